/// Errors surfaced by the mesh runtime.
///
/// Most protocol-level failures are handled internally (malformed messages
/// are dropped, missing routes make sends return false); what remains is the
/// host attachment surface.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// The connection handle no longer names a live connection; the glue
    /// should stop driving it.
    #[error("connection is no longer live")]
    StaleConnection,
}
