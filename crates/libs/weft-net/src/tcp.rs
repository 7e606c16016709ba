//! Tokio TCP driver for a mesh node.
//!
//! The session is `!Send`, so one local task owns it and everything else
//! talks to it through an event channel: an acceptor for the AP side, one
//! connector per configured peer for the station side, and per-connection
//! read/write loops.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use weft_mesh::{ConnectionId, Mesh, Transport};

use crate::backoff::ReconnectPolicy;

const READ_BUFFER_SIZE: usize = 4096;
const SOCKET_WINDOW: usize = 16 * 1024;
const UPDATE_TICK: Duration = Duration::from_millis(10);

/// Transport half handed to the session; bytes go to the write loop over a
/// channel so the synchronous runtime never blocks on a socket.
pub struct TcpTransport {
    out_tx: mpsc::UnboundedSender<Vec<u8>>,
    open: Arc<AtomicBool>,
}

impl Transport for TcpTransport {
    fn space(&self) -> usize {
        if self.open.load(Ordering::Relaxed) {
            SOCKET_WINDOW
        } else {
            0
        }
    }

    fn write(&mut self, data: &[u8]) -> usize {
        if !self.open.load(Ordering::Relaxed) {
            return 0;
        }
        if self.out_tx.send(data.to_vec()).is_ok() {
            data.len()
        } else {
            self.open.store(false, Ordering::Relaxed);
            0
        }
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::Relaxed);
        // An empty chunk tells the write loop to shut the socket down.
        let _ = self.out_tx.send(Vec::new());
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed)
    }
}

enum NetEvent {
    Link(TcpStream, SocketAddr, bool),
    Data(ConnectionId, Vec<u8>),
    Closed(ConnectionId),
}

/// Drive a node over real TCP until cancelled.
///
/// The returned future is `!Send`; run it on a `tokio::task::LocalSet`.
pub async fn run_node(
    mut mesh: Mesh<TcpTransport>,
    listen: SocketAddr,
    peers: Vec<SocketAddr>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    log::info!("node {}: listening on {listen}", mesh.node_id());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<NetEvent>();

    tokio::spawn(acceptor(listener, event_tx.clone(), cancel.clone()));
    for peer in peers {
        tokio::spawn(connector(peer, event_tx.clone(), cancel.clone()));
    }

    let mut tick = tokio::time::interval(UPDATE_TICK);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                mesh.stop();
                return Ok(());
            }
            _ = tick.tick() => {
                mesh.update();
            }
            Some(event) = event_rx.recv() => match event {
                NetEvent::Link(stream, addr, station) => {
                    attach(&mut mesh, stream, addr, station, event_tx.clone());
                }
                NetEvent::Data(conn, bytes) => {
                    if mesh.feed(conn, &bytes).is_err() {
                        log::debug!("tcp: dropping bytes for a dead connection");
                    }
                }
                NetEvent::Closed(conn) => mesh.drop_connection(conn),
            },
        }
    }
}

async fn acceptor(
    listener: TcpListener,
    event_tx: mpsc::UnboundedSender<NetEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    log::info!("tcp: accepted {addr}");
                    if event_tx.send(NetEvent::Link(stream, addr, false)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    log::warn!("tcp: accept failed: {err}");
                }
            },
        }
    }
}

/// Dial one peer with the retry/blocklist policy until it connects.
async fn connector(
    peer: SocketAddr,
    event_tx: mpsc::UnboundedSender<NetEvent>,
    cancel: CancellationToken,
) {
    let mut policy = ReconnectPolicy::new();
    let mut elapsed_ms: u64 = 0;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match TcpStream::connect(peer).await {
            Ok(stream) => {
                policy.record_success();
                log::info!("tcp: connected to {peer}");
                let _ = event_tx.send(NetEvent::Link(stream, peer, true));
                return;
            }
            Err(err) => {
                log::warn!("tcp: connect to {peer} failed: {err}");
                let wait_ms = match policy.record_failure(elapsed_ms) {
                    Some(delay) => delay,
                    None => policy.blocked_for_ms(elapsed_ms),
                };
                elapsed_ms += wait_ms;
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
                }
            }
        }
    }
}

/// Wire one socket into the session: transport out, read loop in.
fn attach(
    mesh: &mut Mesh<TcpTransport>,
    stream: TcpStream,
    addr: SocketAddr,
    station: bool,
    event_tx: mpsc::UnboundedSender<NetEvent>,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let open = Arc::new(AtomicBool::new(true));

    let conn = mesh.add_connection(TcpTransport { out_tx, open: open.clone() }, station);

    {
        let open = open.clone();
        let event_tx = event_tx.clone();
        tokio::spawn(async move {
            let mut buffer = [0u8; READ_BUFFER_SIZE];
            loop {
                match read_half.read(&mut buffer).await {
                    Ok(0) => {
                        log::info!("tcp: {addr} closed");
                        break;
                    }
                    Ok(len) => {
                        if event_tx.send(NetEvent::Data(conn, buffer[..len].to_vec())).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        log::warn!("tcp: read from {addr} failed: {err}");
                        break;
                    }
                }
            }
            open.store(false, Ordering::Relaxed);
            let _ = event_tx.send(NetEvent::Closed(conn));
        });
    }

    tokio::spawn(async move {
        while let Some(chunk) = out_rx.recv().await {
            if chunk.is_empty() {
                break;
            }
            if let Err(err) = write_half.write_all(&chunk).await {
                log::warn!("tcp: write to {addr} failed: {err}");
                break;
            }
            if let Err(err) = write_half.flush().await {
                log::warn!("tcp: flush to {addr} failed: {err}");
                break;
            }
        }
        open.store(false, Ordering::Relaxed);
        let _ = event_tx.send(NetEvent::Closed(conn));
        let _ = write_half.shutdown().await;
    });
}
