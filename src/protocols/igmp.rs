// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IGMPv2 message handling (RFC 2236)
//!
//! Message types, the RFC 2236 timer set used by the proxy engine, the
//! 8-byte message builder, and decoding of received IGMP datagrams.
//!
//! ## Timers (RFC 2236 Defaults)
//!
//! | Timer | Default Value | Purpose |
//! |-------|--------------|---------|
//! | Query Interval | 125s | Time between General Queries |
//! | Query Response Interval | 10s | Max response time in General Queries |
//! | Group Membership Interval | 260s | Time to consider group inactive |
//! | Last Member Query Interval | 1s | Time between group-specific queries |
//! | Last Member Query Count | 2 | Group-specific queries sent after a Leave |
//!
//! ## IGMP Message Types
//!
//! | Type | Value | Handling |
//! |------|-------|----------|
//! | Membership Query | 0x11 | Sent by the bridge; others' are ignored |
//! | V1 Membership Report | 0x12 | Treated as a report |
//! | V2 Membership Report | 0x16 | Host joined group |
//! | Leave Group | 0x17 | Host left group |
//! | V3 Membership Report | 0x22 | Recognized, ignored |

use std::net::Ipv4Addr;
use std::time::Duration;

use super::internet_checksum;
use crate::worker::packet_parser::{parse_ipv4_payload, ParseError};

/// IP protocol number for IGMP
pub const IPPROTO_IGMP: u8 = 2;

/// Length of an IGMPv1/v2 message
pub const IGMP_MESSAGE_LEN: usize = 8;

// IGMP message types
pub const IGMP_MEMBERSHIP_QUERY: u8 = 0x11;
pub const IGMP_V1_MEMBERSHIP_REPORT: u8 = 0x12;
pub const IGMP_V2_MEMBERSHIP_REPORT: u8 = 0x16;
pub const IGMP_LEAVE_GROUP: u8 = 0x17;
pub const IGMP_V3_MEMBERSHIP_REPORT: u8 = 0x22;

// Default timer values (RFC 2236)
pub const DEFAULT_QUERY_INTERVAL: Duration = Duration::from_secs(125);
pub const DEFAULT_QUERY_RESPONSE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_ROBUSTNESS_VARIABLE: u8 = 2;
pub const DEFAULT_LAST_MEMBER_QUERY_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_LAST_MEMBER_QUERY_COUNT: u8 = 2;

/// All-hosts group (224.0.0.1), destination of general queries
pub const ALL_HOSTS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 1);

/// All-routers group (224.0.0.2), joined upstream while the bridge runs
pub const ALL_ROUTERS_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 2);

/// Compute Group Membership Interval (GMI)
/// GMI = (Robustness Variable * Query Interval) + Query Response Interval
///
/// Saturates at `Duration::MAX`.
pub fn group_membership_interval(
    robustness: u8,
    query_interval: Duration,
    query_response: Duration,
) -> Duration {
    query_interval
        .saturating_mul(u32::from(robustness))
        .saturating_add(query_response)
}

/// Max Resp Code for a response interval: tenths of a second, saturating
/// at 255 (25.5 s).
pub fn max_resp_code(response: Duration) -> u8 {
    let tenths = response.as_millis() / 100;
    u8::try_from(tenths).unwrap_or(u8::MAX)
}

/// True for 224.0.0.0/24, the local network control block. Membership in
/// these groups is implicit and routers never forward them.
pub fn is_link_local_multicast(group: Ipv4Addr) -> bool {
    let [a, b, c, _] = group.octets();
    a == 224 && b == 0 && c == 0
}

/// IGMP timer set used by the proxy engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgmpConfig {
    /// Time between general queries
    pub query_interval: Duration,
    /// Maximum response time advertised in general queries
    pub query_response_interval: Duration,
    /// Robustness variable
    pub robustness_variable: u8,
    /// Time between group-specific queries after Leave, also advertised as
    /// their maximum response time
    pub last_member_query_interval: Duration,
    /// Number of group-specific queries to send after Leave
    pub last_member_query_count: u8,
}

impl Default for IgmpConfig {
    fn default() -> Self {
        Self {
            query_interval: DEFAULT_QUERY_INTERVAL,
            query_response_interval: DEFAULT_QUERY_RESPONSE_INTERVAL,
            robustness_variable: DEFAULT_ROBUSTNESS_VARIABLE,
            last_member_query_interval: DEFAULT_LAST_MEMBER_QUERY_INTERVAL,
            last_member_query_count: DEFAULT_LAST_MEMBER_QUERY_COUNT,
        }
    }
}

impl IgmpConfig {
    /// Compute the Group Membership Interval for this config
    pub fn group_membership_interval(&self) -> Duration {
        group_membership_interval(
            self.robustness_variable,
            self.query_interval,
            self.query_response_interval,
        )
    }

    /// Last Member Query Time: how long a leave may go unanswered before
    /// the group is dropped
    pub fn last_member_query_time(&self) -> Duration {
        self.last_member_query_interval
            .saturating_mul(u32::from(self.last_member_query_count.max(1)))
    }
}

/// IGMP message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IgmpType {
    MembershipQuery,
    V1Report,
    V2Report,
    V3Report,
    Leave,
    Other(u8),
}

impl IgmpType {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            IGMP_MEMBERSHIP_QUERY => IgmpType::MembershipQuery,
            IGMP_V1_MEMBERSHIP_REPORT => IgmpType::V1Report,
            IGMP_V2_MEMBERSHIP_REPORT => IgmpType::V2Report,
            IGMP_V3_MEMBERSHIP_REPORT => IgmpType::V3Report,
            IGMP_LEAVE_GROUP => IgmpType::Leave,
            other => IgmpType::Other(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            IgmpType::MembershipQuery => IGMP_MEMBERSHIP_QUERY,
            IgmpType::V1Report => IGMP_V1_MEMBERSHIP_REPORT,
            IgmpType::V2Report => IGMP_V2_MEMBERSHIP_REPORT,
            IgmpType::V3Report => IGMP_V3_MEMBERSHIP_REPORT,
            IgmpType::Leave => IGMP_LEAVE_GROUP,
            IgmpType::Other(value) => value,
        }
    }

    /// Get the message type as a string
    pub const fn name(self) -> &'static str {
        match self {
            IgmpType::MembershipQuery => "Membership Query",
            IgmpType::V1Report => "V1 Membership Report",
            IgmpType::V2Report => "V2 Membership Report",
            IgmpType::V3Report => "V3 Membership Report",
            IgmpType::Leave => "Leave Group",
            IgmpType::Other(_) => "Unknown",
        }
    }
}

impl std::fmt::Display for IgmpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IgmpType::Other(value) => write!(f, "Unknown ({:#04x})", value),
            known => f.write_str(known.name()),
        }
    }
}

/// A decoded IGMP message with the addressing of the datagram it came in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgmpMessage {
    pub kind: IgmpType,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// Group field (0.0.0.0 in general queries; for v3 reports this is the
    /// reserved field and carries no group)
    pub group: Ipv4Addr,
    /// Max Resp Code (in 1/10 seconds); only meaningful for queries
    pub max_resp_code: u8,
}

impl IgmpMessage {
    /// Check if this is a general query (group = 0.0.0.0)
    pub fn is_general_query(&self) -> bool {
        self.kind == IgmpType::MembershipQuery && self.group.is_unspecified()
    }

    /// Check if this is a group-specific query
    pub fn is_group_specific_query(&self) -> bool {
        self.kind == IgmpType::MembershipQuery && !self.group.is_unspecified()
    }

    pub fn max_response_time(&self) -> Duration {
        Duration::from_millis(self.max_resp_code as u64 * 100)
    }
}

/// Builder for 8-byte IGMPv2 messages
#[derive(Debug, Clone)]
pub struct IgmpMessageBuilder {
    pub kind: IgmpType,
    /// Max response time (in 1/10 seconds); zero for reports and leaves
    pub max_resp_code: u8,
    pub group: Ipv4Addr,
}

impl IgmpMessageBuilder {
    /// General query (all groups)
    pub fn general_query(response: Duration) -> Self {
        Self {
            kind: IgmpType::MembershipQuery,
            max_resp_code: max_resp_code(response),
            group: Ipv4Addr::UNSPECIFIED,
        }
    }

    /// Group-specific query
    pub fn group_query(group: Ipv4Addr, response: Duration) -> Self {
        Self {
            kind: IgmpType::MembershipQuery,
            max_resp_code: max_resp_code(response),
            group,
        }
    }

    /// V2 membership report
    pub fn report(group: Ipv4Addr) -> Self {
        Self {
            kind: IgmpType::V2Report,
            max_resp_code: 0,
            group,
        }
    }

    /// Leave group
    pub fn leave(group: Ipv4Addr) -> Self {
        Self {
            kind: IgmpType::Leave,
            max_resp_code: 0,
            group,
        }
    }

    /// Serialize with the checksum computed over exactly these 8 bytes
    pub fn build(&self) -> [u8; IGMP_MESSAGE_LEN] {
        let mut message = [0u8; IGMP_MESSAGE_LEN];
        message[0] = self.kind.as_u8();
        message[1] = self.max_resp_code;
        message[4..8].copy_from_slice(&self.group.octets());

        let checksum = internet_checksum(&message);
        message[2..4].copy_from_slice(&checksum.to_be_bytes());
        message
    }
}

/// Decode an IGMP message from an IPv4 datagram (network header first).
///
/// Validates the IPv4 header (version, lengths, checksum), that the
/// protocol is IGMP and the datagram is not a fragment, that at least 8
/// IGMP bytes are present and that the IGMP checksum over the whole IGMP
/// message verifies.
pub fn decode_igmp(ip_packet: &[u8]) -> Result<IgmpMessage, ParseError> {
    let (header, payload) = parse_ipv4_payload(ip_packet, true)?;

    if header.protocol != IPPROTO_IGMP {
        return Err(ParseError::InvalidIpProtocol(header.protocol));
    }
    if header.is_fragmented() {
        return Err(ParseError::FragmentedPacket);
    }
    if payload.len() < IGMP_MESSAGE_LEN {
        return Err(ParseError::PacketTooShort {
            expected: header.header_len() + IGMP_MESSAGE_LEN,
            actual: header.header_len() + payload.len(),
        });
    }

    let residue = internet_checksum(payload);
    if residue != 0 {
        return Err(ParseError::IgmpChecksumMismatch {
            expected: u16::from_be_bytes([payload[2], payload[3]]),
            actual: residue,
        });
    }

    Ok(IgmpMessage {
        kind: IgmpType::from_u8(payload[0]),
        source: header.src_ip,
        destination: header.dst_ip,
        group: Ipv4Addr::new(payload[4], payload[5], payload[6], payload[7]),
        max_resp_code: payload[1],
    })
}
