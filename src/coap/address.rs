//! Peer address strings.
//!
//! Packets carry their peer as `"a.b.c.d port"`, the form the registry uses
//! as observer and duplicate-suppression key and that outbound transmission
//! resolves back into a socket address.

use super::CoapError;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

pub fn format_address(addr: SocketAddr) -> String {
    format!("{} {}", addr.ip(), addr.port())
}

pub fn parse_address(s: &str) -> Result<SocketAddrV4, CoapError> {
    let bad = || CoapError::InvalidAddress(s.to_string());
    let mut parts = s.split_whitespace();
    let ip: Ipv4Addr = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    let port: u16 = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
    if parts.next().is_some() {
        return Err(bad());
    }
    Ok(SocketAddrV4::new(ip, port))
}

/// IPv4-mapped IPv6 peers are folded to plain IPv4 so the string form stays
/// parseable by [`parse_address`].
pub fn normalize(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V6(v6) => match v6.ip().to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), v6.port()),
            None => addr,
        },
        v4 => v4,
    }
}
