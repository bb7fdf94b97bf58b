// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IGMP protocol support for the bridge
//!
//! - **igmp**: message types, RFC 2236 timer set, decoding
//! - **frame**: query construction and link-layer framing
//!
//! Protocol handlers never sleep. They take the current `Instant` and return
//! `TimerRequest`s; the supervisor's timer manager turns those into
//! `ProtocolEvent::TimerExpired` events later.

pub mod frame;
pub mod igmp;

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Stand-in horizon for deadlines that would overflow `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Events delivered back to the supervisor loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// Timer expired
    TimerExpired(TimerType),
}

/// Types of timers used by the proxy engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerType {
    /// Periodic general query on the downstream link
    GeneralQuery,
    /// Next last-member query for a group with a pending leave
    GroupQuery { group: Ipv4Addr },
    /// Membership deadline check for a routed group
    GroupExpiry { group: Ipv4Addr },
}

impl TimerType {
    /// Group the timer belongs to, if any
    pub fn group(&self) -> Option<Ipv4Addr> {
        match self {
            TimerType::GeneralQuery => None,
            TimerType::GroupQuery { group } | TimerType::GroupExpiry { group } => Some(*group),
        }
    }
}

/// Request to schedule a timer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerRequest {
    /// Type of timer
    pub timer_type: TimerType,
    /// When the timer should fire
    pub fire_at: Instant,
    /// Whether this cancels any existing timer of the same type
    pub replace_existing: bool,
}

impl TimerRequest {
    /// Schedule `timer_type` at `fire_at`, superseding any pending timer of
    /// the same type
    pub fn replacing(timer_type: TimerType, fire_at: Instant) -> Self {
        Self {
            timer_type,
            fire_at,
            replace_existing: true,
        }
    }
}

/// `now + after`, clamped to a far-future instant instead of overflowing.
pub fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Internet checksum (RFC 1071): ones' complement of the ones' complement
/// sum of 16-bit big-endian words, odd trailing byte padded with zero.
///
/// Summing over data that already contains a correct checksum yields 0.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum = sum.wrapping_add(u16::from_be_bytes([word[0], word[1]]) as u32);
    }
    if let [last] = words.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_type_equality() {
        let g1 = Ipv4Addr::new(239, 1, 1, 1);
        let g2 = Ipv4Addr::new(239, 1, 1, 2);

        assert_eq!(
            TimerType::GroupQuery { group: g1 },
            TimerType::GroupQuery { group: g1 }
        );
        assert_ne!(
            TimerType::GroupQuery { group: g1 },
            TimerType::GroupQuery { group: g2 }
        );
        assert_ne!(
            TimerType::GroupQuery { group: g1 },
            TimerType::GroupExpiry { group: g1 }
        );
        assert_eq!(TimerType::GroupExpiry { group: g2 }.group(), Some(g2));
        assert_eq!(TimerType::GeneralQuery.group(), None);
    }

    #[test]
    fn test_deadline_after_clamps() {
        let now = Instant::now();
        assert_eq!(
            deadline_after(now, Duration::from_secs(5)),
            now + Duration::from_secs(5)
        );
        let far = deadline_after(now, Duration::MAX);
        assert!(far > now + Duration::from_secs(3600));
    }

    #[test]
    fn test_checksum_known_vector() {
        // RFC 1071 section 3 example words
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(internet_checksum(&data), !0xddf2);
    }

    #[test]
    fn test_checksum_odd_length() {
        assert_eq!(internet_checksum(&[0x12]), !0x1200);
    }

    #[test]
    fn test_checksum_validates_to_zero() {
        let mut data = vec![0x11, 0x64, 0x00, 0x00, 239, 1, 1, 1];
        let checksum = internet_checksum(&data);
        data[2..4].copy_from_slice(&checksum.to_be_bytes());
        assert_eq!(internet_checksum(&data), 0);
    }
}
