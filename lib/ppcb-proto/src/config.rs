//! Helpers for the bits of the original CLI argument handling that are
//! not just "call clap and stop": port parsing and IPv4 host resolution
//! are actual protocol-adjacent logic worth unit testing.

use crate::error::{Error, Kind, Result};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

/// Parses a port argument, rejecting anything that doesn't fit in a u16.
pub fn parse_port(value: &str) -> Result<u16> {
    value.parse::<u16>().map_err(|_| Error::Fatal(Kind::InvalidPort))
}

/// Resolves `host` to its first IPv4 address and pairs it with `port`.
/// The original implementation is IPv4-only (`gethostbyname`); we keep
/// that restriction rather than silently preferring an IPv6 result.
pub fn resolve_ipv4(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddr::V4(SocketAddrV4::new(addr, port)));
    }

    (host, port)
        .to_socket_addrs()
        .map_err(|_| Error::Fatal(Kind::AddrParse))?
        .find(|addr| addr.is_ipv4())
        .ok_or(Error::Fatal(Kind::AddrParse))
}
