//! UDP transport.
//!
//! Unlike a point-to-point RTP link, LSNP talks to many peers over one
//! socket, so there is no single `remote_addr` — every send names its
//! destination, and broadcast sends go to the subnet's `.255` address.

use logging::Logger;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

#[derive(Debug)]
pub enum TransportError {
    Bind(String),
    SetNonBlocking(String),
    SetBroadcast(String),
    Send(String),
    Receive(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Bind(e) => write!(f, "error binding socket: {}", e),
            TransportError::SetNonBlocking(e) => write!(f, "error setting non-blocking: {}", e),
            TransportError::SetBroadcast(e) => write!(f, "error enabling broadcast: {}", e),
            TransportError::Send(e) => write!(f, "error sending: {}", e),
            TransportError::Receive(e) => write!(f, "error receiving: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Maximum single-frame size. LSNP frames are text with base64-encoded
/// chunk payloads, so this sits well above the 1024-byte `CHUNK_SIZE`.
const RECV_BUFFER_SIZE: usize = 65536;

pub struct UdpTransport {
    socket: UdpSocket,
    logger: Logger,
    bytes_sent: u64,
    bytes_received: u64,
}

impl UdpTransport {
    pub fn new(bind_addr: SocketAddr, logger: Logger) -> Result<Self> {
        logger.info(&format!("creating UDP socket at {}", bind_addr));

        let socket =
            UdpSocket::bind(bind_addr).map_err(|e| TransportError::Bind(e.to_string()))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::SetNonBlocking(e.to_string()))?;

        socket
            .set_broadcast(true)
            .map_err(|e| TransportError::SetBroadcast(e.to_string()))?;

        logger.info("UDP socket configured (non-blocking, broadcast-enabled)");

        Ok(UdpTransport {
            socket,
            logger,
            bytes_sent: 0,
            bytes_received: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| TransportError::Bind(e.to_string()))
    }

    /// Sends `data` to a specific peer address.
    pub fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> Result<usize> {
        let sent = self
            .socket
            .send_to(data, addr)
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.update_send_stats(sent);
        Ok(sent)
    }

    /// Broadcasts `data` to `prefix.255:port`, e.g. `10.0.0.255:50999` for a
    /// host on `10.0.0.0/24`.
    pub fn broadcast(&mut self, data: &[u8], subnet_prefix: Ipv4Addr, port: u16) -> Result<usize> {
        let octets = subnet_prefix.octets();
        let broadcast_ip = Ipv4Addr::new(octets[0], octets[1], octets[2], 255);
        let addr = SocketAddr::new(IpAddr::V4(broadcast_ip), port);
        self.send_to(data, addr)
    }

    fn update_send_stats(&mut self, sent: usize) {
        self.bytes_sent += sent as u64;
        if self.bytes_sent % 100_000 < sent as u64 {
            self.logger
                .debug(&format!("total bytes sent: {}", self.bytes_sent));
        }
    }

    /// Polls for one datagram. Returns `Ok(None)` immediately if nothing is
    /// pending — callers loop this inside a dedicated receive task.
    pub fn receive(&mut self) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        match self.socket.recv_from(&mut buf) {
            Ok((size, addr)) => {
                buf.truncate(size);
                self.update_receive_stats(size);
                Ok(Some((buf, addr)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TransportError::Receive(e.to_string())),
        }
    }

    fn update_receive_stats(&mut self, size: usize) {
        self.bytes_received += size as u64;
        if self.bytes_received % 100_000 < size as u64 {
            self.logger
                .debug(&format!("total bytes received: {}", self.bytes_received));
        }
    }

    pub fn stats(&self) -> (u64, u64) {
        (self.bytes_sent, self.bytes_received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logging::LogLevel;
    use tempfile::tempdir;

    fn test_logger() -> Logger {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("test.log");
        Logger::new(log_path, LogLevel::Debug).unwrap()
    }

    #[test]
    fn binds_and_reports_local_addr() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let transport = UdpTransport::new(addr, test_logger()).unwrap();
        assert!(transport.local_addr().unwrap().port() > 0);
    }

    #[test]
    fn receive_is_nonblocking_when_idle() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut transport = UdpTransport::new(addr, test_logger()).unwrap();
        assert!(transport.receive().unwrap().is_none());
    }

    #[test]
    fn send_then_receive_round_trip() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut tx = UdpTransport::new(addr, test_logger()).unwrap();
        let mut rx = UdpTransport::new(addr, test_logger()).unwrap();
        let rx_addr = rx.local_addr().unwrap();

        let payload = b"TYPE: PING\n\n";
        tx.send_to(payload, rx_addr).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));

        let (data, _from) = rx.receive().unwrap().expect("expected a datagram");
        assert_eq!(&data[..], payload);
    }

    #[test]
    fn stats_track_bytes_sent() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut tx = UdpTransport::new(addr, test_logger()).unwrap();
        let rx = UdpTransport::new(addr, test_logger()).unwrap();
        let rx_addr = rx.local_addr().unwrap();

        tx.send_to(b"hello", rx_addr).unwrap();
        let (sent, _) = tx.stats();
        assert_eq!(sent, 5);
    }
}
