// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IGMP proxy bridge.
//!
//! Forwards multicast from an upstream link to a downstream link for every
//! group with at least one downstream member, and speaks enough IGMP on both
//! sides to keep that membership current.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

#[macro_use]
pub mod logging;

pub mod config;
pub mod mroute;
pub mod protocols;
pub mod supervisor;
pub mod validation;
pub mod worker;

pub use mroute::{Route, RouteTable};
pub use protocols::frame::{encode_query, EncodeError, EthernetFrameBuilder, FrameBuilder, RawIpFrameBuilder};
pub use protocols::igmp::{decode_igmp, IgmpConfig, IgmpMessage, IgmpType};
pub use supervisor::proxy_engine::ProxyEngine;
pub use supervisor::Bridge;
pub use worker::forwarder::Forwarder;
pub use worker::packet_parser::ParseError;

/// Which side of the bridge a packet arrived on or must leave through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceRole {
    /// Toward the multicast source / router
    Upstream,
    /// Toward the receivers
    Downstream,
}

impl InterfaceRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            InterfaceRole::Upstream => "upstream",
            InterfaceRole::Downstream => "downstream",
        }
    }
}

impl std::fmt::Display for InterfaceRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disposition of an intercepted packet.
///
/// The bridge only ever adds traffic (duplicates or queries); it never
/// removes a packet from the host's normal path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
}

/// Sends a fully built link-layer frame out of one interface.
///
/// Fire-and-forget: implementations must not block on the peer.
pub trait Transmit: Send + Sync {
    fn transmit(&self, role: InterfaceRole, frame: &[u8]) -> anyhow::Result<()>;
}

/// Host-level multicast group membership on one interface.
pub trait GroupMembership: Send + Sync {
    fn join(&self, role: InterfaceRole, group: Ipv4Addr) -> anyhow::Result<()>;
    fn leave(&self, role: InterfaceRole, group: Ipv4Addr) -> anyhow::Result<()>;
}

/// Point-in-time view of one route, for display and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteInfo {
    pub group: Ipv4Addr,
    /// Last-member queries still outstanding (0 = no leave pending)
    pub age_value: u32,
    /// Reports that refreshed this route
    pub age_activity: u64,
    /// Most recent reporter, if any report carried a unicast source
    pub last_reporter: Option<Ipv4Addr>,
    /// Milliseconds since the route was created
    pub age_ms: u64,
}
