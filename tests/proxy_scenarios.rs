// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Proxy scenarios end to end through `Bridge`
//!
//! Real IGMP and UDP datagrams go in through `handle_packet`; a recording
//! collaborator captures every frame transmitted and every upstream
//! join/leave, in order. Timers are driven by hand with synthetic instants.

use igmp_bridge::logging::LogRegistry;
use igmp_bridge::protocols::igmp::{IgmpMessageBuilder, ALL_HOSTS_GROUP, ALL_ROUTERS_GROUP};
use igmp_bridge::protocols::{internet_checksum, TimerType};
use igmp_bridge::supervisor::QuerySource;
use igmp_bridge::{
    decode_igmp, Bridge, Forwarder, GroupMembership, IgmpConfig, IgmpType, InterfaceRole,
    ProxyEngine, RawIpFrameBuilder, RouteTable, Transmit, Verdict,
};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Frame(InterfaceRole, Vec<u8>),
    Join(Ipv4Addr),
    Leave(Ipv4Addr),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Transmit for Recorder {
    fn transmit(&self, role: InterfaceRole, frame: &[u8]) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(Event::Frame(role, frame.to_vec()));
        Ok(())
    }
}

impl GroupMembership for Recorder {
    fn join(&self, role: InterfaceRole, group: Ipv4Addr) -> anyhow::Result<()> {
        assert_eq!(role, InterfaceRole::Upstream);
        self.events.lock().unwrap().push(Event::Join(group));
        Ok(())
    }

    fn leave(&self, role: InterfaceRole, group: Ipv4Addr) -> anyhow::Result<()> {
        assert_eq!(role, InterfaceRole::Upstream);
        self.events.lock().unwrap().push(Event::Leave(group));
        Ok(())
    }
}

impl Recorder {
    fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

const GROUP: Ipv4Addr = Ipv4Addr::new(239, 1, 1, 1);
const HOST_A: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 100);
const HOST_B: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 101);

fn setup() -> (Bridge, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let logger = LogRegistry::new(1024).logger();
    let routes = Arc::new(RouteTable::new());
    let frame = Arc::new(RawIpFrameBuilder);

    let engine = ProxyEngine::new(
        IgmpConfig::default(),
        Arc::clone(&routes),
        QuerySource {
            address: Ipv4Addr::new(192, 168, 1, 1),
            frame: frame.clone(),
        },
        recorder.clone(),
        recorder.clone(),
        logger.clone(),
    );
    let forwarder = Forwarder::new(routes, frame, recorder.clone(), logger.clone());
    (Bridge::new(engine, forwarder, logger), recorder)
}

fn ipv4(protocol: u8, src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
    let total = (20 + payload.len()) as u16;
    let mut packet = vec![0x45, 0x00];
    packet.extend_from_slice(&total.to_be_bytes());
    packet.extend_from_slice(&[0, 0, 0x40, 0, 1, protocol, 0, 0]);
    packet.extend_from_slice(&src.octets());
    packet.extend_from_slice(&dst.octets());
    let checksum = internet_checksum(&packet);
    packet[10..12].copy_from_slice(&checksum.to_be_bytes());
    packet.extend_from_slice(payload);
    packet
}

fn report(from: Ipv4Addr, group: Ipv4Addr) -> Vec<u8> {
    ipv4(2, from, group, &IgmpMessageBuilder::report(group).build())
}

fn leave(from: Ipv4Addr, group: Ipv4Addr) -> Vec<u8> {
    ipv4(2, from, ALL_ROUTERS_GROUP, &IgmpMessageBuilder::leave(group).build())
}

fn udp(dst: Ipv4Addr) -> Vec<u8> {
    ipv4(17, Ipv4Addr::new(10, 1, 1, 1), dst, &[0x13, 0x88, 0x13, 0x88, 0, 12, 0, 0, 1, 2, 3, 4])
}

/// Decoded (destination, group) of every query frame among `events`
fn queries(events: &[Event]) -> Vec<(Ipv4Addr, Ipv4Addr)> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::Frame(InterfaceRole::Downstream, frame) => decode_igmp(frame).ok(),
            _ => None,
        })
        .filter(|message| message.kind == IgmpType::MembershipQuery)
        .map(|message| (message.destination, message.group))
        .collect()
}

#[test]
fn startup_probes_downstream_before_joining_upstream() {
    let (bridge, recorder) = setup();
    bridge.startup(Instant::now());

    let events = recorder.take();
    assert_eq!(events.len(), 2);
    assert_eq!(queries(&events[..1]), vec![(ALL_HOSTS_GROUP, Ipv4Addr::UNSPECIFIED)]);
    assert_eq!(events[1], Event::Join(ALL_ROUTERS_GROUP));
    assert!(bridge.routes().is_empty());
}

#[test]
fn general_query_carries_router_alert_and_response_time() {
    let (bridge, recorder) = setup();
    bridge.startup(Instant::now());

    let events = recorder.take();
    let Event::Frame(_, frame) = &events[0] else {
        panic!("first event should be a frame");
    };
    assert_eq!(frame.len(), 32);
    assert_eq!(frame[0], 0x46);
    assert_eq!(frame[1], 0xC0);
    assert_eq!(frame[8], 1, "TTL");
    assert_eq!(&frame[20..24], &[0x94, 0x04, 0x00, 0x00]);
    let message = decode_igmp(frame).unwrap();
    assert!(message.is_general_query());
    assert_eq!(message.max_resp_code, 100);
}

#[test]
fn report_creates_route_and_data_flows() {
    let (bridge, recorder) = setup();

    bridge.handle_packet(InterfaceRole::Downstream, &report(HOST_A, GROUP));
    assert!(bridge.routes().lookup(GROUP).is_some());
    assert_eq!(recorder.take(), vec![Event::Join(GROUP)]);

    let data = udp(GROUP);
    assert_eq!(bridge.handle_packet(InterfaceRole::Upstream, &data), Verdict::Accept);
    assert_eq!(recorder.take(), vec![Event::Frame(InterfaceRole::Downstream, data)]);

    // Other groups stay on the upstream side only
    bridge.handle_packet(InterfaceRole::Upstream, &udp(Ipv4Addr::new(239, 9, 9, 9)));
    assert!(recorder.take().is_empty());
}

#[test]
fn all_hosts_report_accepted_unicast_rejected() {
    let (bridge, recorder) = setup();

    bridge.handle_packet(InterfaceRole::Downstream, &report(HOST_A, ALL_HOSTS_GROUP));
    assert!(bridge.routes().lookup(ALL_HOSTS_GROUP).is_some());

    let unicast = Ipv4Addr::new(10, 0, 0, 1);
    bridge.handle_packet(InterfaceRole::Downstream, &report(HOST_A, unicast));
    bridge.handle_packet(InterfaceRole::Downstream, &leave(HOST_A, unicast));
    assert!(bridge.routes().lookup(unicast).is_none());
    assert_eq!(bridge.routes().len(), 1);

    // 224.0.0.1 is never joined upstream and nothing was queried
    assert!(recorder.take().is_empty());
}

#[test]
fn leave_sends_one_group_query_and_keeps_route() {
    let (bridge, recorder) = setup();
    bridge.handle_packet(InterfaceRole::Downstream, &report(HOST_A, GROUP));
    recorder.take();

    bridge.handle_packet(InterfaceRole::Downstream, &leave(HOST_A, GROUP));

    let events = recorder.take();
    assert_eq!(queries(&events), vec![(GROUP, GROUP)]);
    assert_eq!(events.len(), 1);
    assert!(bridge.routes().lookup(GROUP).is_some());
}

#[test]
fn silent_group_ages_out_after_last_member_queries() {
    let (bridge, recorder) = setup();
    let t0 = Instant::now();
    bridge.handle_packet_at(InterfaceRole::Downstream, &report(HOST_A, GROUP), t0);
    bridge.handle_packet_at(InterfaceRole::Downstream, &leave(HOST_A, GROUP), t0);
    recorder.take();

    bridge.handle_timer(TimerType::GroupQuery { group: GROUP }, t0 + Duration::from_secs(1));
    assert_eq!(queries(&recorder.take()), vec![(GROUP, GROUP)]);
    assert!(bridge.routes().lookup(GROUP).is_some());

    bridge.handle_timer(TimerType::GroupExpiry { group: GROUP }, t0 + Duration::from_secs(2));
    assert!(bridge.routes().lookup(GROUP).is_none());
    assert_eq!(recorder.take(), vec![Event::Leave(GROUP)]);

    // No route, no copy
    bridge.handle_packet(InterfaceRole::Upstream, &udp(GROUP));
    assert!(recorder.take().is_empty());
}

#[test]
fn report_during_leave_keeps_group() {
    let (bridge, recorder) = setup();
    let t0 = Instant::now();
    bridge.handle_packet_at(InterfaceRole::Downstream, &report(HOST_A, GROUP), t0);
    bridge.handle_packet_at(InterfaceRole::Downstream, &leave(HOST_A, GROUP), t0);
    bridge.handle_packet_at(
        InterfaceRole::Downstream,
        &report(HOST_B, GROUP),
        t0 + Duration::from_millis(300),
    );
    recorder.take();

    bridge.handle_timer(TimerType::GroupQuery { group: GROUP }, t0 + Duration::from_secs(1));
    bridge.handle_timer(TimerType::GroupExpiry { group: GROUP }, t0 + Duration::from_secs(2));

    let route = bridge.routes().lookup(GROUP).expect("route kept");
    assert_eq!(route.last_reporter(), Some(HOST_B));
    assert_eq!(route.age_activity(), 2);
    assert!(recorder.take().is_empty());
}

#[test]
fn shutdown_leaves_all_routers_then_groups() {
    let (bridge, recorder) = setup();
    let now = Instant::now();
    bridge.startup(now);
    bridge.handle_packet_at(InterfaceRole::Downstream, &report(HOST_A, GROUP), now);
    bridge.handle_packet_at(InterfaceRole::Downstream, &report(HOST_A, ALL_HOSTS_GROUP), now);
    recorder.take();

    assert_eq!(bridge.shutdown(), 2);
    assert_eq!(
        recorder.take(),
        vec![Event::Leave(ALL_ROUTERS_GROUP), Event::Leave(GROUP)]
    );
    assert!(bridge.routes().is_empty());
}
