//! Non-blocking UDP endpoint.
//!
//! Moves raw datagram buffers between the socket and the session. All
//! interpretation happens above; this layer only enforces the MTU and
//! filters traffic from strangers.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::protocol::MAX_DATAGRAM_SIZE;

pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
    recv_buffer: [u8; MAX_DATAGRAM_SIZE],
}

impl UdpTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;
        Ok(Self {
            socket,
            local_addr,
            remote_addr: None,
            recv_buffer: [0u8; MAX_DATAGRAM_SIZE],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    pub fn send(&mut self, datagram: &[u8]) -> io::Result<usize> {
        let addr = self
            .remote_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no remote address set"))?;
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "datagram exceeds MTU",
            ));
        }
        self.socket.send_to(datagram, addr)
    }

    /// Drains the socket. Datagrams from anyone but the configured
    /// remote are dropped; `WouldBlock` means the queue is empty.
    pub fn receive(&mut self) -> io::Result<Vec<Vec<u8>>> {
        let mut datagrams = Vec::new();
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    if self.remote_addr.is_some_and(|remote| remote != addr) {
                        log::debug!("dropping datagram from unexpected source {}", addr);
                        continue;
                    }
                    datagrams.push(self.recv_buffer[..size].to_vec());
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // Windows surfaces ICMP port-unreachable as a recv
                // error; treat it like silence and let timeouts decide.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(datagrams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_roundtrip() {
        let mut a = UdpTransport::bind("127.0.0.1:0").unwrap();
        let mut b = UdpTransport::bind("127.0.0.1:0").unwrap();
        a.set_remote(b.local_addr());
        b.set_remote(a.local_addr());

        a.send(&[1, 2, 3, 4, 5, 6]).unwrap();
        // Non-blocking sockets need a moment on loopback.
        let mut received = Vec::new();
        for _ in 0..50 {
            received = b.receive().unwrap();
            if !received.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert_eq!(received, vec![vec![1, 2, 3, 4, 5, 6]]);
    }

    #[test]
    fn send_without_remote_errors() {
        let mut t = UdpTransport::bind("127.0.0.1:0").unwrap();
        assert!(t.send(&[0; 4]).is_err());
    }

    #[test]
    fn oversized_datagram_rejected() {
        let mut t = UdpTransport::bind("127.0.0.1:0").unwrap();
        t.set_remote("127.0.0.1:9".parse().unwrap());
        let big = vec![0u8; MAX_DATAGRAM_SIZE + 1];
        assert!(t.send(&big).is_err());
    }
}
