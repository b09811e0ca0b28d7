//! Peer identity as seen on the network

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

/// A peer on the LAN: display name plus the address it was seen at.
///
/// Two devices are equal only if name, address and port all match. Trust
/// records are keyed by `name` alone, so a reconnect from a new ephemeral
/// port is a different `Device` but the same trusted peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
}

impl Device {
    pub fn new(name: impl Into<String>, address: IpAddr, port: u16) -> Self {
        Self {
            name: name.into(),
            address,
            port,
        }
    }

    pub fn from_socket_addr(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self::new(name, addr.ip(), addr.port())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.socket_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_equality_covers_address_and_port() {
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));
        let a = Device::new("laptop", ip, 4000);

        assert_eq!(a, Device::new("laptop", ip, 4000));
        assert_ne!(a, Device::new("laptop", ip, 4001));
        assert_ne!(a, Device::new("desktop", ip, 4000));
    }

    #[test]
    fn test_display() {
        let d = Device::new("laptop", IpAddr::V4(Ipv4Addr::LOCALHOST), 17394);
        assert_eq!(d.to_string(), "laptop (127.0.0.1:17394)");
    }
}
