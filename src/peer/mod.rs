use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

pub mod client;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod message;
pub mod piece;
pub mod state;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

/// A remote peer as handed out by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Peer {
    pub ip_addr: Ipv4Addr,
    pub port: u16,
}

impl Peer {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.ip_addr, self.port))
    }
}

impl From<SocketAddrV4> for Peer {
    fn from(addr: SocketAddrV4) -> Self {
        Self {
            ip_addr: *addr.ip(),
            port: addr.port(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip_addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_display() {
        let peer = Peer {
            ip_addr: Ipv4Addr::new(192, 168, 1, 1),
            port: 6881,
        };
        assert_eq!(peer.to_string(), "192.168.1.1:6881");
        assert_eq!(peer.socket_addr(), "192.168.1.1:6881".parse().unwrap());
    }

    #[test]
    fn test_peer_from_socket_addr() {
        let addr: SocketAddrV4 = "10.0.0.1:8080".parse().unwrap();
        let peer = Peer::from(addr);
        assert_eq!(peer.ip_addr, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(peer.port, 8080);
    }
}
