use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use tracing::trace;

use crate::common::SendError;
use crate::formatting::write_metric_line;

/// Default port of a StatsD collector.
pub const DEFAULT_PORT: u16 = 8125;

/// An outbound channel to a StatsD collector.
///
/// A reporting cycle performs one `open`, any number of `send`s and one `close`.
pub trait Sender {
    /// Establishes the channel for the current cycle.
    fn open(&mut self) -> Result<(), SendError>;

    /// Encodes one metric line and transmits it.
    fn send(&mut self, name: &str, value: &str, tags: &[String]) -> Result<(), SendError>;

    /// Releases the channel. Must be safe to call when `open` failed or was never called.
    fn close(&mut self) -> Result<(), SendError>;
}

/// Sends every metric line as its own UDP datagram.
///
/// The endpoint is resolved and the socket bound on every `open`, so a collector whose address
/// changes is picked up on the next cycle.
pub struct UdpSender {
    host: String,
    port: u16,
    socket: Option<UdpSocket>,
    buffer: String,
}

impl UdpSender {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            socket: None,
            buffer: String::with_capacity(256),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    fn resolve(&self) -> Result<SocketAddr, SendError> {
        let endpoint = format!("{}:{}", self.host, self.port);
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| SendError::Resolve(endpoint.clone()))?
            .next() // just use the first address we resolve to
            .ok_or(SendError::Resolve(endpoint))
    }
}

impl fmt::Debug for UdpSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdpSender")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Sender for UdpSender {
    fn open(&mut self) -> Result<(), SendError> {
        // drop any socket left over from a cycle that was never closed
        self.socket = None;

        let endpoint = self.resolve()?;
        let bind_addr = if endpoint.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        };
        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(endpoint)?;
        self.socket = Some(socket);
        Ok(())
    }

    fn send(&mut self, name: &str, value: &str, tags: &[String]) -> Result<(), SendError> {
        let socket = self.socket.as_ref().ok_or(SendError::NotOpen)?;

        self.buffer.clear();
        write_metric_line(&mut self.buffer, name, value, tags);
        trace!(line = %self.buffer, "sending statsd line");

        let sent = socket.send(self.buffer.as_bytes())?;
        if sent != self.buffer.len() {
            tracing::error!(
                "Somehow this UDP socket sent less bytes ({}) than it was asked ({})",
                sent,
                self.buffer.len()
            );
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SendError> {
        self.socket = None;
        Ok(())
    }
}
