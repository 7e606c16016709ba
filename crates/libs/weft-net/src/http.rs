//! Minimal HTTP/1.1 POST client for the gateway relay.
//!
//! Only the status line matters to the mesh: the relay classifies the code
//! and passes it back in the ACK. Plain `http://` only; anything else is a
//! permanent error surfaced to the origin node.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use weft_mesh::gateway::{HttpExecutor, HttpResult};

use crate::NetError;

pub struct MiniHttpClient {
    timeout: Duration,
}

impl MiniHttpClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn post(&self, url: &str, payload: &str, content_type: &str) -> Result<u16, NetError> {
        let (host, port, path) = parse_http_url(url)?;
        let target: SocketAddr = (host.as_str(), port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| NetError::UnsupportedUrl(format!("{url}: no address")))?;

        let mut stream = TcpStream::connect_timeout(&target, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        write!(
            stream,
            "POST {path} HTTP/1.1\r\nHost: {host}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
            payload.len()
        )?;
        stream.flush()?;

        let mut reader = BufReader::new(stream);
        let mut status_line = String::new();
        reader.read_line(&mut status_line)?;
        parse_status_line(&status_line)
    }
}

impl Default for MiniHttpClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl HttpExecutor for MiniHttpClient {
    fn execute(&mut self, url: &str, payload: &str, content_type: &str) -> HttpResult {
        match self.post(url, payload, content_type) {
            Ok(status) => HttpResult { status: status as i32, error: None },
            Err(err) => {
                log::warn!("http: {url}: {err}");
                HttpResult { status: 0, error: Some(err.to_string()) }
            }
        }
    }
}

/// Split `http://host[:port][/path]` into its pieces.
fn parse_http_url(url: &str) -> Result<(String, u16, String), NetError> {
    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| NetError::UnsupportedUrl(url.to_string()))?;
    let (authority, path) = match rest.find('/') {
        Some(index) => (&rest[..index], &rest[index..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return Err(NetError::UnsupportedUrl(url.to_string()));
    }
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| NetError::UnsupportedUrl(url.to_string()))?;
            (host.to_string(), port)
        }
        None => (authority.to_string(), 80),
    };
    Ok((host, port, path.to_string()))
}

/// Pull the status code out of `HTTP/1.1 200 OK`.
fn parse_status_line(line: &str) -> Result<u16, NetError> {
    let mut parts = line.split_whitespace();
    let version = parts.next().ok_or(NetError::MalformedResponse)?;
    if !version.starts_with("HTTP/") {
        return Err(NetError::MalformedResponse);
    }
    parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or(NetError::MalformedResponse)
}
