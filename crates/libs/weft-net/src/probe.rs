//! TCP connect probe backing the gateway's Internet health checker.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use weft_mesh::gateway::InternetProbe;

/// Opens a short-lived TCP connection to the configured target (8.8.8.8:53
/// by default) and reports the connect latency.
#[derive(Debug, Default)]
pub struct TcpProbe;

impl InternetProbe for TcpProbe {
    fn probe(&mut self, host: &str, port: u16, timeout_ms: u32) -> Result<u32, String> {
        let target: SocketAddr = (host, port)
            .to_socket_addrs()
            .map_err(|err| format!("resolve {host}: {err}"))?
            .next()
            .ok_or_else(|| format!("resolve {host}: no address"))?;

        let started = Instant::now();
        let stream = TcpStream::connect_timeout(&target, Duration::from_millis(timeout_ms as u64))
            .map_err(|err| format!("connect {target}: {err}"))?;
        drop(stream);
        Ok(started.elapsed().as_millis() as u32)
    }
}
