// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Codec robustness against arbitrary input
//!
//! Captured traffic is attacker-controlled. The parsers must return an
//! error, never panic, and whatever they accept must be self-consistent.

use igmp_bridge::protocols::frame::{encode_query, RawIpFrameBuilder};
use igmp_bridge::protocols::igmp::max_resp_code;
use igmp_bridge::worker::packet_parser::{parse_ipv4, parse_ipv4_payload};
use igmp_bridge::{decode_igmp, IgmpType};
use proptest::prelude::*;
use std::net::Ipv4Addr;
use std::time::Duration;

fn multicast_group() -> impl Strategy<Value = Ipv4Addr> {
    (224u8..=239, any::<u8>(), any::<u8>(), any::<u8>())
        .prop_map(|(a, b, c, d)| Ipv4Addr::new(a, b, c, d))
}

proptest! {
    #[test]
    fn parse_ipv4_never_panics(input in any::<Vec<u8>>()) {
        let _ = parse_ipv4(&input, true);
        let _ = parse_ipv4(&input, false);
    }

    #[test]
    fn decode_igmp_never_panics(input in proptest::collection::vec(any::<u8>(), 0..128)) {
        let _ = decode_igmp(&input);
    }

    /// Arbitrary bytes behind a plausible IPv4 prefix reach the deeper checks
    #[test]
    fn decode_igmp_never_panics_past_version_check(
        ihl in 0u8..16,
        rest in proptest::collection::vec(any::<u8>(), 0..96),
    ) {
        let mut input = vec![0x40 | ihl];
        input.extend_from_slice(&rest);
        let _ = decode_igmp(&input);
    }

    #[test]
    fn accepted_payload_stays_within_total_length(input in any::<Vec<u8>>()) {
        if let Ok((header, payload)) = parse_ipv4_payload(&input, false) {
            prop_assert!(header.header_len() + payload.len() <= input.len());
            prop_assert_eq!(header.header_len() + payload.len(), header.total_length as usize);
        }
    }

    #[test]
    fn encoded_query_decodes_to_same_group(
        group in multicast_group(),
        source in any::<u32>(),
        response_ms in 0u64..60_000,
    ) {
        let response = Duration::from_millis(response_ms);
        let frame = encode_query(
            &RawIpFrameBuilder,
            Ipv4Addr::from(source),
            group,
            response,
            group,
        )
        .unwrap();

        let message = decode_igmp(&frame).unwrap();
        prop_assert_eq!(message.kind, IgmpType::MembershipQuery);
        prop_assert_eq!(message.group, group);
        prop_assert_eq!(message.destination, group);
        prop_assert_eq!(message.max_resp_code, max_resp_code(response));
    }

    /// Flipping any single bit of a valid query must be caught by a checksum
    /// or a structural check
    #[test]
    fn single_bit_corruption_detected(group in multicast_group(), bit in 0usize..(32 * 8)) {
        let mut frame = encode_query(
            &RawIpFrameBuilder,
            Ipv4Addr::new(192, 168, 1, 1),
            group,
            Duration::from_secs(1),
            group,
        )
        .unwrap();
        frame[bit / 8] ^= 1 << (bit % 8);
        prop_assert!(decode_igmp(&frame).is_err());
    }
}
