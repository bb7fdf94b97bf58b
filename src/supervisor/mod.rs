// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Bridge runtime
//!
//! `Bridge` is the interception entry point: it classifies each captured
//! datagram by the interface it arrived on and hands it to the proxy engine
//! (downstream IGMP) or the forwarder (upstream multicast). `run` wires the
//! bridge to real interfaces, the timer manager and the signal handlers.

pub mod proxy_engine;
pub mod socket_helpers;
pub mod timer_manager;

pub use proxy_engine::{ProxyEngine, QuerySource};
pub use socket_helpers::{CaptureSocket, InterfaceInfo, SocketMembership};
pub use timer_manager::ProtocolTimerManager;

use anyhow::{Context, Result};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::unix::AsyncFd;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::logging::{Facility, Logger};
use crate::mroute::RouteTable;
use crate::protocols::igmp::{decode_igmp, IPPROTO_IGMP};
use crate::protocols::{ProtocolEvent, TimerRequest, TimerType};
use crate::worker::egress::{EgressLink, PacketTransmitter};
use crate::worker::forwarder::Forwarder;
use crate::worker::packet_parser::IPV4_MIN_HEADER_LEN;
use crate::{InterfaceRole, Verdict};

/// Capacity of the timer event channel
const TIMER_CHANNEL_CAPACITY: usize = 256;
/// Datagrams handled per readiness event before yielding to other branches
const RECV_BATCH: usize = 64;
/// Largest IPv4 datagram
const RECV_BUFFER_LEN: usize = 65536;

/// Dispatches captured traffic to the engine and the forwarder
pub struct Bridge {
    engine: ProxyEngine,
    forwarder: Forwarder,
    timer_tx: Option<mpsc::UnboundedSender<TimerRequest>>,
    logger: Logger,
}

impl Bridge {
    /// Timers the engine requests are dropped until a sink is attached with
    /// `with_timer_sink`.
    pub fn new(engine: ProxyEngine, forwarder: Forwarder, logger: Logger) -> Self {
        Self {
            engine,
            forwarder,
            timer_tx: None,
            logger,
        }
    }

    pub fn with_timer_sink(mut self, timer_tx: mpsc::UnboundedSender<TimerRequest>) -> Self {
        self.timer_tx = Some(timer_tx);
        self
    }

    pub fn engine(&self) -> &ProxyEngine {
        &self.engine
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        self.engine.routes()
    }

    /// Handle one IPv4 datagram captured on `role`'s interface
    pub fn handle_packet(&self, role: InterfaceRole, packet: &[u8]) -> Verdict {
        self.handle_packet_at(role, packet, Instant::now())
    }

    pub fn handle_packet_at(&self, role: InterfaceRole, packet: &[u8], now: Instant) -> Verdict {
        let is_igmp = packet.len() >= IPV4_MIN_HEADER_LEN && packet[9] == IPPROTO_IGMP;

        match (role, is_igmp) {
            (InterfaceRole::Upstream, false) => self.forwarder.handle_upstream(packet),
            (InterfaceRole::Upstream, true) => {
                // The host stack answers upstream queries for the groups we
                // hold through SocketMembership.
                log_debug!(self.logger, Facility::Bridge, "Upstream IGMP left to the host stack");
                Verdict::Accept
            }
            (InterfaceRole::Downstream, true) => {
                match decode_igmp(packet) {
                    Ok(message) => {
                        let timers = self.engine.handle_igmp(&message, now);
                        self.schedule(timers);
                    }
                    Err(e) => {
                        log_debug!(self.logger, Facility::Codec, "Dropping downstream IGMP: {}", e)
                    }
                }
                Verdict::Accept
            }
            (InterfaceRole::Downstream, false) => Verdict::Accept,
        }
    }

    pub fn handle_timer(&self, timer: TimerType, now: Instant) {
        let timers = self.engine.handle_timer(timer, now);
        self.schedule(timers);
    }

    pub fn startup(&self, now: Instant) {
        let timers = self.engine.startup(now);
        self.schedule(timers);
    }

    pub fn shutdown(&self) -> usize {
        self.engine.shutdown()
    }

    fn schedule(&self, timers: Vec<TimerRequest>) {
        let Some(timer_tx) = &self.timer_tx else {
            return;
        };
        for request in timers {
            let request_type = request.timer_type;
            // Only fails once the timer manager has exited
            if timer_tx.send(request).is_err() {
                log_warning!(
                    self.logger,
                    Facility::Timers,
                    "Timer manager gone, {:?} not scheduled",
                    request_type
                );
            }
        }
    }
}

/// Read up to `RECV_BATCH` datagrams from a readable capture socket.
///
/// Returns an error only when the socket itself has failed.
async fn service_capture(
    bridge: &Bridge,
    role: InterfaceRole,
    socket: &AsyncFd<CaptureSocket>,
    buf: &mut [u8],
) -> Result<()> {
    let mut guard = socket
        .readable()
        .await
        .with_context(|| format!("{} capture socket poll failed", role))?;

    for _ in 0..RECV_BATCH {
        match guard.try_io(|inner| inner.get_ref().recv(buf)) {
            Ok(Ok(len)) => {
                bridge.handle_packet(role, &buf[..len]);
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Ok(Err(e)) => {
                return Err(e)
                    .with_context(|| format!("{} capture on {} failed", role, socket.get_ref().name()))
            }
            Err(_would_block) => break,
        }
    }
    Ok(())
}

fn query_source_address(downstream: &InterfaceInfo, logger: &Logger) -> Ipv4Addr {
    match downstream.ipv4 {
        Some(address) => address,
        None => {
            log_warning!(
                logger,
                Facility::Network,
                "{} has no IPv4 address, sending queries from 0.0.0.0",
                downstream.name
            );
            Ipv4Addr::UNSPECIFIED
        }
    }
}

/// Run the bridge until SIGINT or SIGTERM.
pub async fn run(config: &Config, logger: Logger) -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        log_warning!(
            logger,
            Facility::Bridge,
            "Not running as root; capture and multicast membership need CAP_NET_RAW"
        );
    }

    let upstream = socket_helpers::resolve_interface(&config.upstream)
        .context("Failed to resolve upstream interface")?;
    let downstream = socket_helpers::resolve_interface(&config.downstream)
        .context("Failed to resolve downstream interface")?;
    log_info!(logger, Facility::Network, "Upstream {}", upstream);
    log_info!(logger, Facility::Network, "Downstream {}", downstream);

    let transmitter = Arc::new(PacketTransmitter::new(
        EgressLink::open(&upstream.name, upstream.ifindex())?,
        EgressLink::open(&downstream.name, downstream.ifindex())?,
    ));
    let membership = Arc::new(SocketMembership::new(upstream.index, downstream.index));
    let downstream_frame = downstream.frame_builder();

    let routes = Arc::new(RouteTable::new());
    let engine = ProxyEngine::new(
        config.igmp.to_engine_config(),
        Arc::clone(&routes),
        QuerySource {
            address: query_source_address(&downstream, &logger),
            frame: Arc::clone(&downstream_frame),
        },
        transmitter.clone(),
        membership,
        logger.clone(),
    );
    let forwarder = Forwarder::new(routes, downstream_frame, transmitter, logger.clone());

    let (timer_tx, timer_rx) = mpsc::unbounded_channel();
    let (event_tx, mut event_rx) = mpsc::channel(TIMER_CHANNEL_CAPACITY);
    let timer_task =
        tokio::spawn(ProtocolTimerManager::new(timer_rx, event_tx, logger.clone()).run());

    let bridge = Bridge::new(engine, forwarder, logger.clone()).with_timer_sink(timer_tx);

    let upstream_capture = AsyncFd::new(CaptureSocket::open(&upstream, &logger)?)
        .context("Failed to register upstream capture socket")?;
    let downstream_capture = AsyncFd::new(CaptureSocket::open(&downstream, &logger)?)
        .context("Failed to register downstream capture socket")?;

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    bridge.startup(Instant::now());
    log_notice!(
        logger,
        Facility::Bridge,
        "Bridging {} -> {}",
        upstream.name,
        downstream.name
    );

    let mut upstream_buf = vec![0u8; RECV_BUFFER_LEN];
    let mut downstream_buf = vec![0u8; RECV_BUFFER_LEN];

    let outcome = loop {
        tokio::select! {
            result = service_capture(&bridge, InterfaceRole::Upstream, &upstream_capture, &mut upstream_buf) => {
                if let Err(e) = result {
                    break Err(e);
                }
            }
            result = service_capture(&bridge, InterfaceRole::Downstream, &downstream_capture, &mut downstream_buf) => {
                if let Err(e) = result {
                    break Err(e);
                }
            }
            event = event_rx.recv() => {
                match event {
                    Some(ProtocolEvent::TimerExpired(timer)) => bridge.handle_timer(timer, Instant::now()),
                    None => {
                        log_critical!(logger, Facility::Timers, "Timer manager stopped");
                        break Err(anyhow::anyhow!("Timer manager stopped unexpectedly"));
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log_info!(logger, Facility::Bridge, "SIGINT received, shutting down");
                break Ok(());
            }
            _ = sigterm.recv() => {
                log_info!(logger, Facility::Bridge, "SIGTERM received, shutting down");
                break Ok(());
            }
        }
    };

    for route in bridge.routes().routes(Instant::now()) {
        match serde_json::to_string(&route) {
            Ok(json) => log_debug!(logger, Facility::RouteTable, "Route at shutdown: {}", json),
            Err(e) => log_debug!(logger, Facility::RouteTable, "Route {}: {}", route.group, e),
        }
    }

    let released = bridge.shutdown();
    let stats = bridge.forwarder().stats();
    log_notice!(
        logger,
        Facility::Bridge,
        "Stopped: {} routes released, {} datagrams forwarded, {} transmit failures",
        released,
        stats.forwarded,
        stats.transmit_failures
    );

    drop(bridge);
    timer_task.abort();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogRegistry;
    use crate::protocols::frame::RawIpFrameBuilder;
    use crate::protocols::igmp::IgmpMessageBuilder;
    use crate::protocols::internet_checksum;
    use crate::{GroupMembership, Transmit};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Vec<u8>>>,
        joins: Mutex<Vec<Ipv4Addr>>,
    }

    impl Transmit for Recorder {
        fn transmit(&self, _role: InterfaceRole, frame: &[u8]) -> anyhow::Result<()> {
            self.frames.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    impl GroupMembership for Recorder {
        fn join(&self, _role: InterfaceRole, group: Ipv4Addr) -> anyhow::Result<()> {
            self.joins.lock().unwrap().push(group);
            Ok(())
        }

        fn leave(&self, _role: InterfaceRole, _group: Ipv4Addr) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn bridge() -> (Bridge, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let logger = LogRegistry::new(256).logger();
        let routes = Arc::new(RouteTable::new());
        let frame: Arc<dyn crate::FrameBuilder> = Arc::new(RawIpFrameBuilder);
        let engine = ProxyEngine::new(
            crate::IgmpConfig::default(),
            Arc::clone(&routes),
            QuerySource {
                address: Ipv4Addr::new(192, 168, 1, 1),
                frame: Arc::clone(&frame),
            },
            recorder.clone(),
            recorder.clone(),
            logger.clone(),
        );
        let forwarder = Forwarder::new(routes, frame, recorder.clone(), logger.clone());
        (Bridge::new(engine, forwarder, logger), recorder)
    }

    fn ipv4(protocol: u8, dst: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
        let total = (20 + payload.len()) as u16;
        let mut packet = vec![0x45, 0x00];
        packet.extend_from_slice(&total.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 0, 0, 1, protocol, 0, 0]);
        packet.extend_from_slice(&[192, 168, 1, 100]);
        packet.extend_from_slice(&dst.octets());
        let checksum = internet_checksum(&packet);
        packet[10..12].copy_from_slice(&checksum.to_be_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn test_downstream_report_reaches_engine() {
        let (bridge, recorder) = bridge();
        let group = Ipv4Addr::new(239, 1, 1, 1);
        let report = ipv4(IPPROTO_IGMP, group, &IgmpMessageBuilder::report(group).build());

        assert_eq!(bridge.handle_packet(InterfaceRole::Downstream, &report), Verdict::Accept);
        assert!(bridge.routes().lookup(group).is_some());
        assert_eq!(*recorder.joins.lock().unwrap(), vec![group]);
    }

    #[test]
    fn test_upstream_igmp_is_not_treated_as_membership() {
        let (bridge, _recorder) = bridge();
        let group = Ipv4Addr::new(239, 1, 1, 1);
        let report = ipv4(IPPROTO_IGMP, group, &IgmpMessageBuilder::report(group).build());

        bridge.handle_packet(InterfaceRole::Upstream, &report);
        assert!(bridge.routes().is_empty());
    }

    #[test]
    fn test_upstream_data_forwarded_after_report() {
        let (bridge, recorder) = bridge();
        let group = Ipv4Addr::new(239, 1, 1, 1);
        let report = ipv4(IPPROTO_IGMP, group, &IgmpMessageBuilder::report(group).build());
        bridge.handle_packet(InterfaceRole::Downstream, &report);

        let data = ipv4(17, group, &[0x13, 0x88, 0x13, 0x88, 0, 12, 0, 0, 1, 2, 3, 4]);
        assert_eq!(bridge.handle_packet(InterfaceRole::Upstream, &data), Verdict::Accept);

        assert_eq!(*recorder.frames.lock().unwrap(), vec![data]);
        assert_eq!(bridge.forwarder().stats().forwarded, 1);
    }

    #[test]
    fn test_corrupt_downstream_igmp_dropped() {
        let (bridge, _recorder) = bridge();
        let group = Ipv4Addr::new(239, 1, 1, 1);
        let mut report = ipv4(IPPROTO_IGMP, group, &IgmpMessageBuilder::report(group).build());
        let last = report.len() - 1;
        report[last] ^= 0xFF;

        assert_eq!(bridge.handle_packet(InterfaceRole::Downstream, &report), Verdict::Accept);
        assert!(bridge.routes().is_empty());
    }

    #[tokio::test]
    async fn test_timer_requests_reach_sink() {
        let (bridge, _recorder) = bridge();
        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();
        let bridge = bridge.with_timer_sink(timer_tx);

        let now = Instant::now();
        bridge.startup(now);

        let request = timer_rx.recv().await.unwrap();
        assert_eq!(request.timer_type, TimerType::GeneralQuery);
        assert_eq!(request.fire_at, now + std::time::Duration::from_secs(125));
    }

    #[test]
    fn test_every_new_route_gets_expiry_timer_under_burst() {
        let (bridge, _recorder) = bridge();
        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();
        let bridge = bridge.with_timer_sink(timer_tx);

        // Nobody drains the sink while the burst is handled
        let groups: Vec<Ipv4Addr> = (0..TIMER_CHANNEL_CAPACITY as u16 * 2)
            .map(|i| {
                let [hi, lo] = i.to_be_bytes();
                Ipv4Addr::new(239, 20, hi, lo)
            })
            .collect();
        for &group in &groups {
            let report = ipv4(IPPROTO_IGMP, group, &IgmpMessageBuilder::report(group).build());
            bridge.handle_packet(InterfaceRole::Downstream, &report);
        }
        assert_eq!(bridge.routes().len(), groups.len());

        let mut armed = Vec::new();
        while let Ok(request) = timer_rx.try_recv() {
            if let TimerType::GroupExpiry { group } = request.timer_type {
                armed.push(group);
            }
        }
        assert_eq!(armed, groups);
    }
}
