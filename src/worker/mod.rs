// SPDX-License-Identifier: Apache-2.0 OR MIT
//! # Worker Module
//!
//! The data path of the bridge:
//!
//! - `packet_parser`: IPv4 header parsing shared with the IGMP decoder
//! - `forwarder`: copies routed upstream multicast to the downstream link
//! - `egress`: AF_PACKET transmission, the production `Transmit`
//!
//! Nothing here mutates the route table; the forwarder only reads it.

pub mod egress;
pub mod forwarder;
pub mod packet_parser;

pub use egress::{EgressLink, PacketTransmitter};
pub use forwarder::{ForwardCounters, ForwardStats, Forwarder};
pub use packet_parser::{parse_ipv4, parse_ipv4_payload, Ipv4Header, ParseError};
