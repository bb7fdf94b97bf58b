// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Outbound frame construction
//!
//! IGMP messages the bridge originates go out as
//! `[link header][IPv4 header + Router Alert][IGMP]`. The link header comes
//! from a `FrameBuilder`, so the same encoder serves Ethernet devices and
//! L3 devices (tun, ipip) that take bare IP.
//!
//! IPv4 header of an originated query (24 bytes):
//!
//! | Field | Value |
//! |-------|-------|
//! | Version / IHL | 4 / 6 |
//! | TOS | 0xC0 (internetwork control) |
//! | Identification | 0 |
//! | Flags | DF |
//! | TTL | 1 |
//! | Protocol | 2 (IGMP) |
//! | Options | Router Alert `94 04 00 00` |

use std::net::Ipv4Addr;
use std::time::Duration;

use pnet::util::MacAddr;
use thiserror::Error;

use super::igmp::{IgmpMessageBuilder, IGMP_MESSAGE_LEN, IPPROTO_IGMP};
use super::internet_checksum;

/// EtherType for IPv4
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// Ethernet II header length
pub const ETHERNET_HEADER_LEN: usize = 14;

/// IPv4 header with the 4-byte Router Alert option
pub const IPV4_ROUTER_ALERT_HEADER_LEN: usize = 24;

/// IP TOS for internetwork control traffic
pub const TOS_INTERNETWORK_CONTROL: u8 = 0xC0;

/// Router Alert option (RFC 2113), value 0
pub const ROUTER_ALERT_OPTION: [u8; 4] = [0x94, 0x04, 0x00, 0x00];

const IP_FLAG_DONT_FRAGMENT: u16 = 0x4000;

/// Errors that can occur while building an outbound frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Failed to reserve {requested} bytes for frame")]
    Allocation { requested: usize },

    #[error("Destination {0} is not a multicast address")]
    DestinationNotMulticast(Ipv4Addr),

    #[error("Datagram of {0} bytes exceeds the IPv4 maximum")]
    DatagramTooLarge(usize),
}

/// Writes the link-layer header in front of an IPv4 datagram
pub trait FrameBuilder: Send + Sync {
    /// Bytes `write_header` appends
    fn header_len(&self) -> usize;

    /// Append the link header for a datagram addressed to `destination`
    fn write_header(&self, buf: &mut Vec<u8>, destination: Ipv4Addr);
}

/// Ethernet II framing with the RFC 1112 multicast MAC mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetFrameBuilder {
    /// The sending interface's own address
    pub source: MacAddr,
}

impl EthernetFrameBuilder {
    pub fn new(source: MacAddr) -> Self {
        Self { source }
    }
}

impl FrameBuilder for EthernetFrameBuilder {
    fn header_len(&self) -> usize {
        ETHERNET_HEADER_LEN
    }

    fn write_header(&self, buf: &mut Vec<u8>, destination: Ipv4Addr) {
        buf.extend_from_slice(&mac_octets(ip_multicast_mac(destination)));
        buf.extend_from_slice(&mac_octets(self.source));
        buf.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
    }
}

/// No link header; for devices that carry bare IP
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawIpFrameBuilder;

impl FrameBuilder for RawIpFrameBuilder {
    fn header_len(&self) -> usize {
        0
    }

    fn write_header(&self, _buf: &mut Vec<u8>, _destination: Ipv4Addr) {}
}

/// IPv4 multicast to Ethernet mapping: 01:00:5e followed by the low 23 bits
/// of the group address.
pub fn ip_multicast_mac(group: Ipv4Addr) -> MacAddr {
    let [_, b, c, d] = group.octets();
    MacAddr::new(0x01, 0x00, 0x5e, b & 0x7f, c, d)
}

fn mac_octets(mac: MacAddr) -> [u8; 6] {
    [mac.0, mac.1, mac.2, mac.3, mac.4, mac.5]
}

fn reserve(capacity: usize) -> Result<Vec<u8>, EncodeError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(capacity)
        .map_err(|_| EncodeError::Allocation {
            requested: capacity,
        })?;
    Ok(buf)
}

/// Append the 24-byte IPv4 header (Router Alert, TTL 1, TOS 0xC0, DF)
fn write_ipv4_router_alert_header(
    buf: &mut Vec<u8>,
    source: Ipv4Addr,
    destination: Ipv4Addr,
    payload_len: usize,
) {
    let start = buf.len();
    let total_len = (IPV4_ROUTER_ALERT_HEADER_LEN + payload_len) as u16;

    buf.push(0x40 | (IPV4_ROUTER_ALERT_HEADER_LEN / 4) as u8);
    buf.push(TOS_INTERNETWORK_CONTROL);
    buf.extend_from_slice(&total_len.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes()); // Identification
    buf.extend_from_slice(&IP_FLAG_DONT_FRAGMENT.to_be_bytes());
    buf.push(1); // TTL
    buf.push(IPPROTO_IGMP);
    buf.extend_from_slice(&[0x00, 0x00]); // Checksum placeholder
    buf.extend_from_slice(&source.octets());
    buf.extend_from_slice(&destination.octets());
    buf.extend_from_slice(&ROUTER_ALERT_OPTION);

    let checksum = internet_checksum(&buf[start..start + IPV4_ROUTER_ALERT_HEADER_LEN]);
    buf[start + 10..start + 12].copy_from_slice(&checksum.to_be_bytes());
}

/// Frame an 8-byte IGMP message from `source` to the multicast `destination`
pub fn encode_igmp<F: FrameBuilder + ?Sized>(
    frame: &F,
    source: Ipv4Addr,
    destination: Ipv4Addr,
    message: &IgmpMessageBuilder,
) -> Result<Vec<u8>, EncodeError> {
    if !destination.is_multicast() {
        return Err(EncodeError::DestinationNotMulticast(destination));
    }

    let len = frame.header_len() + IPV4_ROUTER_ALERT_HEADER_LEN + IGMP_MESSAGE_LEN;
    let mut buf = reserve(len)?;
    frame.write_header(&mut buf, destination);
    write_ipv4_router_alert_header(&mut buf, source, destination, IGMP_MESSAGE_LEN);
    buf.extend_from_slice(&message.build());
    Ok(buf)
}

/// Build a complete IGMP membership query frame.
///
/// `target_group` is 0.0.0.0 for a general query. The max response code
/// is `response_interval` in tenths of a second, saturating at 255.
pub fn encode_query<F: FrameBuilder + ?Sized>(
    frame: &F,
    source: Ipv4Addr,
    destination_group: Ipv4Addr,
    response_interval: Duration,
    target_group: Ipv4Addr,
) -> Result<Vec<u8>, EncodeError> {
    let message = if target_group.is_unspecified() {
        IgmpMessageBuilder::general_query(response_interval)
    } else {
        IgmpMessageBuilder::group_query(target_group, response_interval)
    };
    encode_igmp(frame, source, destination_group, &message)
}

/// Prepend a link header to an existing IPv4 datagram, leaving the datagram
/// itself byte-for-byte unchanged.
pub fn frame_datagram<F: FrameBuilder + ?Sized>(
    frame: &F,
    destination: Ipv4Addr,
    datagram: &[u8],
) -> Result<Vec<u8>, EncodeError> {
    if datagram.len() > u16::MAX as usize {
        return Err(EncodeError::DatagramTooLarge(datagram.len()));
    }
    let mut buf = reserve(frame.header_len() + datagram.len())?;
    frame.write_header(&mut buf, destination);
    buf.extend_from_slice(datagram);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::igmp::{decode_igmp, IgmpType, ALL_HOSTS_GROUP, IGMP_MEMBERSHIP_QUERY};

    fn local_mac() -> MacAddr {
        MacAddr::new(0x02, 0x00, 0x00, 0xaa, 0xbb, 0xcc)
    }

    fn bridge_ip() -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, 1)
    }

    #[test]
    fn test_multicast_mac_mapping() {
        assert_eq!(
            ip_multicast_mac(ALL_HOSTS_GROUP),
            MacAddr::new(0x01, 0x00, 0x5e, 0x00, 0x00, 0x01)
        );
        // High bit of the second octet is dropped (23-bit mapping)
        assert_eq!(
            ip_multicast_mac(Ipv4Addr::new(239, 129, 2, 3)),
            MacAddr::new(0x01, 0x00, 0x5e, 0x01, 0x02, 0x03)
        );
    }

    #[test]
    fn test_general_query_layout() {
        let frame = encode_query(
            &EthernetFrameBuilder::new(local_mac()),
            bridge_ip(),
            ALL_HOSTS_GROUP,
            Duration::from_secs(10),
            Ipv4Addr::UNSPECIFIED,
        )
        .unwrap();

        assert_eq!(frame.len(), 14 + 24 + 8);

        // Ethernet
        assert_eq!(&frame[0..6], &[0x01, 0x00, 0x5e, 0x00, 0x00, 0x01]);
        assert_eq!(&frame[6..12], &[0x02, 0x00, 0x00, 0xaa, 0xbb, 0xcc]);
        assert_eq!(&frame[12..14], &[0x08, 0x00]);

        // IPv4
        let ip = &frame[14..38];
        assert_eq!(ip[0], 0x46);
        assert_eq!(ip[1], 0xC0);
        assert_eq!(u16::from_be_bytes([ip[2], ip[3]]), 32);
        assert_eq!(&ip[4..6], &[0, 0]);
        assert_eq!(&ip[6..8], &[0x40, 0x00]);
        assert_eq!(ip[8], 1);
        assert_eq!(ip[9], 2);
        assert_eq!(&ip[12..16], &[192, 168, 1, 1]);
        assert_eq!(&ip[16..20], &[224, 0, 0, 1]);
        assert_eq!(&ip[20..24], &[0x94, 0x04, 0x00, 0x00]);
        assert_eq!(internet_checksum(ip), 0);

        // IGMP
        let igmp = &frame[38..];
        assert_eq!(igmp[0], IGMP_MEMBERSHIP_QUERY);
        assert_eq!(igmp[1], 100);
        assert_eq!(&igmp[4..8], &[0, 0, 0, 0]);
        assert_eq!(internet_checksum(igmp), 0);
    }

    #[test]
    fn test_group_query_decodes() {
        let group = Ipv4Addr::new(239, 1, 1, 1);
        let frame = encode_query(
            &EthernetFrameBuilder::new(local_mac()),
            bridge_ip(),
            group,
            Duration::from_secs(1),
            group,
        )
        .unwrap();

        assert_eq!(&frame[0..6], &[0x01, 0x00, 0x5e, 0x01, 0x01, 0x01]);

        let message = decode_igmp(&frame[ETHERNET_HEADER_LEN..]).unwrap();
        assert_eq!(message.kind, IgmpType::MembershipQuery);
        assert_eq!(message.group, group);
        assert_eq!(message.destination, group);
        assert_eq!(message.source, bridge_ip());
        assert_eq!(message.max_resp_code, 10);
    }

    #[test]
    fn test_response_interval_saturates() {
        let frame = encode_query(
            &RawIpFrameBuilder,
            bridge_ip(),
            ALL_HOSTS_GROUP,
            Duration::from_secs(60),
            Ipv4Addr::UNSPECIFIED,
        )
        .unwrap();
        assert_eq!(frame[IPV4_ROUTER_ALERT_HEADER_LEN + 1], 255);
    }

    #[test]
    fn test_raw_ip_frame_has_no_link_header() {
        let frame = encode_query(
            &RawIpFrameBuilder,
            bridge_ip(),
            ALL_HOSTS_GROUP,
            Duration::from_secs(10),
            Ipv4Addr::UNSPECIFIED,
        )
        .unwrap();

        assert_eq!(frame.len(), 32);
        assert_eq!(frame[0], 0x46);
        assert!(decode_igmp(&frame).unwrap().is_general_query());
    }

    #[test]
    fn test_unicast_destination_rejected() {
        let result = encode_query(
            &RawIpFrameBuilder,
            bridge_ip(),
            Ipv4Addr::new(10, 0, 0, 1),
            Duration::from_secs(10),
            Ipv4Addr::UNSPECIFIED,
        );
        assert_eq!(
            result,
            Err(EncodeError::DestinationNotMulticast(Ipv4Addr::new(10, 0, 0, 1)))
        );
    }

    #[test]
    fn test_frame_datagram_preserves_payload() {
        let datagram: Vec<u8> = (0..64u8).collect();
        let group = Ipv4Addr::new(239, 1, 1, 1);
        let frame =
            frame_datagram(&EthernetFrameBuilder::new(local_mac()), group, &datagram).unwrap();

        assert_eq!(frame.len(), 14 + 64);
        assert_eq!(&frame[0..6], &[0x01, 0x00, 0x5e, 0x01, 0x01, 0x01]);
        assert_eq!(&frame[14..], datagram.as_slice());
    }
}
