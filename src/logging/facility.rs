// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logging facilities (component identifiers)

use serde::{Deserialize, Serialize};

/// Logging facility - identifies which component generated the log message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Facility {
    // === Control path ===
    /// Packet dispatch between interfaces, lifecycle
    Bridge = 0,
    /// Route insert/delete/teardown
    RouteTable = 1,
    /// IGMP decode and query construction
    Codec = 2,
    /// Membership report/leave handling, queries, aging
    Proxy = 3,
    /// Protocol timer scheduling
    Timers = 4,

    // === Data path ===
    /// Upstream to downstream multicast duplication
    Forwarder = 5,

    // === Cross-cutting ===
    /// Sockets, interface lookups, group membership syscalls
    Network = 6,
    /// Configuration loading and validation
    Config = 7,

    /// Test harness and fixtures
    Test = 8,

    /// Fallback for uncategorized messages
    Unknown = 255,
}

impl Facility {
    /// Every facility that owns log output, in display order.
    pub const ALL: [Facility; 9] = [
        Facility::Bridge,
        Facility::RouteTable,
        Facility::Codec,
        Facility::Proxy,
        Facility::Timers,
        Facility::Forwarder,
        Facility::Network,
        Facility::Config,
        Facility::Test,
    ];

    /// Get facility code as u8
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get facility name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            Facility::Bridge => "Bridge",
            Facility::RouteTable => "RouteTable",
            Facility::Codec => "Codec",
            Facility::Proxy => "Proxy",
            Facility::Timers => "Timers",
            Facility::Forwarder => "Forwarder",
            Facility::Network => "Network",
            Facility::Config => "Config",
            Facility::Test => "Test",
            Facility::Unknown => "Unknown",
        }
    }

    /// Create from u8 value (returns Unknown if invalid)
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0 => Facility::Bridge,
            1 => Facility::RouteTable,
            2 => Facility::Codec,
            3 => Facility::Proxy,
            4 => Facility::Timers,
            5 => Facility::Forwarder,
            6 => Facility::Network,
            7 => Facility::Config,
            8 => Facility::Test,
            _ => Facility::Unknown,
        }
    }

    /// Look up a facility by name, ignoring case. `Unknown` is not nameable.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|facility| facility.as_str().eq_ignore_ascii_case(name))
    }

    /// Per-packet facilities; these log on every forwarded datagram at Debug.
    pub const fn is_high_frequency(self) -> bool {
        matches!(self, Facility::Forwarder | Facility::Codec)
    }
}

impl std::fmt::Display for Facility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
