// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IPv4 header parsing
//!
//! Capture hands us datagrams with the network header first (AF_PACKET
//! `SOCK_DGRAM` strips the link header), so parsing starts at IPv4. The
//! forwarding path only needs the destination address; the IGMP decoder
//! additionally needs the payload bounds.
//!
//! Safe slice indexing throughout; every index is checked against the
//! length before use.

use std::net::Ipv4Addr;
use thiserror::Error;

use crate::protocols::internet_checksum;

/// Minimum IPv4 header length in bytes (IHL 5)
pub const IPV4_MIN_HEADER_LEN: usize = 20;

/// Errors that can occur during packet parsing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("Invalid IP version: expected 4, got {0}")]
    InvalidIpVersion(u8),

    #[error("IP header length too small: {0} words")]
    IpHeaderTooSmall(u8),

    #[error("IP total length {total} inconsistent with header length {header_len} and {available} captured bytes")]
    InvalidTotalLength {
        total: u16,
        header_len: usize,
        available: usize,
    },

    #[error("IP header checksum mismatch: header carries {expected:#06x}, residue {actual:#06x}")]
    IpChecksumMismatch { expected: u16, actual: u16 },

    #[error("Invalid IP protocol: expected 2 (IGMP), got {0}")]
    InvalidIpProtocol(u8),

    #[error("Fragmented packet")]
    FragmentedPacket,

    #[error("IGMP checksum mismatch: message carries {expected:#06x}, residue {actual:#06x}")]
    IgmpChecksumMismatch { expected: u16, actual: u16 },
}

/// Parsed IPv4 header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8,  // Internet Header Length (in 32-bit words)
    pub dscp: u8, // Differentiated Services Code Point
    pub ecn: u8,  // Explicit Congestion Notification
    pub total_length: u16,
    pub identification: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
}

impl Ipv4Header {
    /// A packet is fragmented if MF is set or the fragment offset is non-zero
    pub fn is_fragmented(&self) -> bool {
        let mf_flag = (self.flags & 0x01) != 0;
        mf_flag || self.fragment_offset != 0
    }

    /// Get the IP header length in bytes
    pub fn header_len(&self) -> usize {
        (self.ihl as usize) * 4
    }

    /// Payload length according to the total length field
    pub fn payload_len(&self) -> usize {
        (self.total_length as usize).saturating_sub(self.header_len())
    }
}

/// Parse an IPv4 header from the start of `data`.
///
/// Checks version, IHL, that the whole header and `total_length` bytes are
/// present, and (when asked) the header checksum. Trailing bytes past
/// `total_length` (link padding) are allowed.
pub fn parse_ipv4(data: &[u8], validate_checksum: bool) -> Result<Ipv4Header, ParseError> {
    if data.len() < IPV4_MIN_HEADER_LEN {
        return Err(ParseError::PacketTooShort {
            expected: IPV4_MIN_HEADER_LEN,
            actual: data.len(),
        });
    }

    let version = (data[0] >> 4) & 0x0F;
    if version != 4 {
        return Err(ParseError::InvalidIpVersion(version));
    }

    let ihl = data[0] & 0x0F;
    if ihl < 5 {
        return Err(ParseError::IpHeaderTooSmall(ihl));
    }

    let header_len = (ihl as usize) * 4;
    if data.len() < header_len {
        return Err(ParseError::PacketTooShort {
            expected: header_len,
            actual: data.len(),
        });
    }

    let total_length = u16::from_be_bytes([data[2], data[3]]);
    if (total_length as usize) < header_len || (total_length as usize) > data.len() {
        return Err(ParseError::InvalidTotalLength {
            total: total_length,
            header_len,
            available: data.len(),
        });
    }

    let checksum = u16::from_be_bytes([data[10], data[11]]);
    if validate_checksum {
        let residue = internet_checksum(&data[..header_len]);
        if residue != 0 {
            return Err(ParseError::IpChecksumMismatch {
                expected: checksum,
                actual: residue,
            });
        }
    }

    let flags_and_offset = u16::from_be_bytes([data[6], data[7]]);

    Ok(Ipv4Header {
        version,
        ihl,
        dscp: (data[1] >> 2) & 0x3F,
        ecn: data[1] & 0x03,
        total_length,
        identification: u16::from_be_bytes([data[4], data[5]]),
        flags: ((flags_and_offset >> 13) & 0x07) as u8,
        fragment_offset: flags_and_offset & 0x1FFF,
        ttl: data[8],
        protocol: data[9],
        checksum,
        src_ip: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
        dst_ip: Ipv4Addr::new(data[16], data[17], data[18], data[19]),
    })
}

/// Parse the header and return it with the payload slice bounded by
/// `total_length`.
pub fn parse_ipv4_payload(
    data: &[u8],
    validate_checksum: bool,
) -> Result<(Ipv4Header, &[u8]), ParseError> {
    let header = parse_ipv4(data, validate_checksum)?;
    let payload = &data[header.header_len()..header.total_length as usize];
    Ok((header, payload))
}

/// Destination address of an IPv4 datagram, without validating the rest.
///
/// The forwarding path calls this per packet and does not care about
/// checksums: the datagram is re-emitted unchanged.
#[inline]
pub fn ipv4_destination(data: &[u8]) -> Option<Ipv4Addr> {
    if data.len() < IPV4_MIN_HEADER_LEN || data[0] >> 4 != 4 || (data[0] & 0x0F) < 5 {
        return None;
    }
    Some(Ipv4Addr::new(data[16], data[17], data[18], data[19]))
}
