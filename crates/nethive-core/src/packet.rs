//! IP datagram parsing (C1) and the overlay `Payload` type (§3).

use std::net::IpAddr;

use thiserror::Error;

/// IP version extracted from the top nibble of the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

/// Errors returned by [`parse_header`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("packet too short: {len} bytes")]
    TooShort { len: usize },
    #[error("unsupported IP version nibble: {0}")]
    UnsupportedVersion(u8),
}

/// Extract `(version, src, dst)` from a raw IP datagram.
///
/// Only the address fields are interpreted; no checksum validation or TTL
/// manipulation is performed — the overlay is transparent to the payload.
pub fn parse_header(bytes: &[u8]) -> Result<(IpVersion, IpAddr, IpAddr), ParseError> {
    if bytes.len() < 20 {
        return Err(ParseError::TooShort { len: bytes.len() });
    }

    let version_nibble = bytes[0] >> 4;
    match version_nibble {
        4 => {
            let src = IpAddr::from([bytes[12], bytes[13], bytes[14], bytes[15]]);
            let dst = IpAddr::from([bytes[16], bytes[17], bytes[18], bytes[19]]);
            Ok((IpVersion::V4, src, dst))
        }
        6 => {
            if bytes.len() < 40 {
                return Err(ParseError::TooShort { len: bytes.len() });
            }
            let mut src = [0u8; 16];
            src.copy_from_slice(&bytes[8..24]);
            let mut dst = [0u8; 16];
            dst.copy_from_slice(&bytes[24..40]);
            Ok((IpVersion::V6, IpAddr::from(src), IpAddr::from(dst)))
        }
        other => Err(ParseError::UnsupportedVersion(other)),
    }
}

/// Returns true if `addr` is a multicast address (v4 224.0.0.0/4 or v6 ff00::/8).
pub fn is_multicast(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_multicast(),
        IpAddr::V6(v6) => v6.is_multicast(),
    }
}

/// A single overlay IP packet moving through the dataplane.
///
/// `data` holds a complete IP datagram whose header parses; `src`/`dst` are
/// kept alongside the bytes so the dispatcher doesn't have to re-parse on
/// every hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub data: Vec<u8>,
}

impl Payload {
    /// Parse `data`'s header and construct a `Payload`, or return the parse error.
    pub fn from_datagram(data: Vec<u8>) -> Result<Self, ParseError> {
        let (_, src, dst) = parse_header(&data)?;
        Ok(Self { src, dst, data })
    }

    pub fn is_multicast_dst(&self) -> bool {
        is_multicast(&self.dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn v4_packet(src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 20 + payload.len()];
        buf[0] = 0x45;
        buf[12..16].copy_from_slice(&src.octets());
        buf[16..20].copy_from_slice(&dst.octets());
        buf[20..].copy_from_slice(payload);
        buf
    }

    fn v6_packet(src: Ipv6Addr, dst: Ipv6Addr, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 40 + payload.len()];
        buf[0] = 0x60;
        buf[8..24].copy_from_slice(&src.octets());
        buf[24..40].copy_from_slice(&dst.octets());
        buf[40..].copy_from_slice(payload);
        buf
    }

    #[test]
    fn parses_v4_header() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let data = v4_packet(src, dst, b"ping");
        let (version, parsed_src, parsed_dst) = parse_header(&data).unwrap();
        assert_eq!(version, IpVersion::V4);
        assert_eq!(parsed_src, IpAddr::V4(src));
        assert_eq!(parsed_dst, IpAddr::V4(dst));
    }

    #[test]
    fn parses_v6_header() {
        let src = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1);
        let dst = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 2);
        let data = v6_packet(src, dst, b"ping");
        let (version, parsed_src, parsed_dst) = parse_header(&data).unwrap();
        assert_eq!(version, IpVersion::V6);
        assert_eq!(parsed_src, IpAddr::V6(src));
        assert_eq!(parsed_dst, IpAddr::V6(dst));
    }

    #[test]
    fn rejects_short_v4() {
        let mut data = v4_packet(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, b"");
        data.truncate(10);
        assert_eq!(parse_header(&data), Err(ParseError::TooShort { len: 10 }));
    }

    #[test]
    fn rejects_short_v6() {
        let mut data = v6_packet(Ipv6Addr::LOCALHOST, Ipv6Addr::LOCALHOST, b"");
        data.truncate(25);
        assert_eq!(parse_header(&data), Err(ParseError::TooShort { len: 25 }));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut data = vec![0u8; 20];
        data[0] = 0x15;
        assert_eq!(parse_header(&data), Err(ParseError::UnsupportedVersion(1)));
    }

    #[test]
    fn payload_from_datagram_roundtrips_header_fields() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(10, 0, 0, 2);
        let data = v4_packet(src, dst, b"ping");
        let payload = Payload::from_datagram(data.clone()).unwrap();
        assert_eq!(payload.src, IpAddr::V4(src));
        assert_eq!(payload.dst, IpAddr::V4(dst));
        assert_eq!(payload.data, data);
    }

    #[test]
    fn detects_multicast_destination() {
        let src = Ipv4Addr::new(10, 0, 0, 1);
        let dst = Ipv4Addr::new(224, 0, 0, 1);
        let data = v4_packet(src, dst, b"x");
        let payload = Payload::from_datagram(data).unwrap();
        assert!(payload.is_multicast_dst());
    }
}
