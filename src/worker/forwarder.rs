// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Upstream → downstream multicast duplication
//!
//! Every multicast datagram seen arriving on the upstream link is checked
//! against the route table. Routed datagrams are copied out of the
//! downstream link unchanged behind a fresh link header. The original is
//! never dropped; unrouted traffic is simply not copied.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::logging::{Facility, Logger, Severity};
use crate::mroute::RouteTable;
use crate::protocols::frame::{frame_datagram, FrameBuilder};
use crate::protocols::igmp::is_link_local_multicast;
use crate::worker::packet_parser::ipv4_destination;
use crate::{InterfaceRole, Transmit, Verdict};

/// Forwarding counters, updated with relaxed atomics on the packet path
#[derive(Debug, Default)]
pub struct ForwardStats {
    inspected: AtomicU64,
    forwarded: AtomicU64,
    unrouted: AtomicU64,
    transmit_failures: AtomicU64,
}

/// Point-in-time copy of `ForwardStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ForwardCounters {
    pub inspected: u64,
    pub forwarded: u64,
    pub unrouted: u64,
    pub transmit_failures: u64,
}

impl ForwardStats {
    pub fn snapshot(&self) -> ForwardCounters {
        ForwardCounters {
            inspected: self.inspected.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
            transmit_failures: self.transmit_failures.load(Ordering::Relaxed),
        }
    }
}

/// Read-only consumer of the route table on the upstream data path
pub struct Forwarder {
    routes: Arc<RouteTable>,
    downstream_frame: Arc<dyn FrameBuilder>,
    transmitter: Arc<dyn Transmit>,
    stats: ForwardStats,
    logger: Logger,
}

impl Forwarder {
    pub fn new(
        routes: Arc<RouteTable>,
        downstream_frame: Arc<dyn FrameBuilder>,
        transmitter: Arc<dyn Transmit>,
        logger: Logger,
    ) -> Self {
        Self {
            routes,
            downstream_frame,
            transmitter,
            stats: ForwardStats::default(),
            logger,
        }
    }

    /// True when `destination` has a downstream route
    #[inline]
    pub fn should_forward(&self, destination: Ipv4Addr) -> bool {
        self.routes.lookup(destination).is_some()
    }

    /// Inspect a datagram that arrived upstream and copy it downstream if
    /// its group is routed. Always accepts the original.
    pub fn handle_upstream(&self, ip_packet: &[u8]) -> Verdict {
        self.stats.inspected.fetch_add(1, Ordering::Relaxed);

        let destination = match ipv4_destination(ip_packet) {
            Some(destination) if destination.is_multicast() => destination,
            _ => return Verdict::Accept,
        };
        // 224.0.0.0/24 stays on its link; routes for it are bookkeeping only
        if is_link_local_multicast(destination) {
            return Verdict::Accept;
        }

        if !self.should_forward(destination) {
            self.stats.unrouted.fetch_add(1, Ordering::Relaxed);
            return Verdict::Accept;
        }

        let frame = match frame_datagram(self.downstream_frame.as_ref(), destination, ip_packet) {
            Ok(frame) => frame,
            Err(e) => {
                log_error!(
                    self.logger,
                    Facility::Forwarder,
                    "Dropping copy for {}: {}",
                    destination,
                    e
                );
                return Verdict::Accept;
            }
        };

        match self.transmitter.transmit(InterfaceRole::Downstream, &frame) {
            Ok(()) => {
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                if self.logger.enabled(Severity::Debug, Facility::Forwarder) {
                    self.logger.log_kv(
                        Severity::Debug,
                        Facility::Forwarder,
                        "Forwarded datagram",
                        &[
                            ("group", destination.to_string().as_str()),
                            ("bytes", ip_packet.len().to_string().as_str()),
                        ],
                    );
                }
            }
            Err(e) => {
                self.stats.transmit_failures.fetch_add(1, Ordering::Relaxed);
                log_error!(
                    self.logger,
                    Facility::Forwarder,
                    "Downstream transmit for {} failed: {:#}",
                    destination,
                    e
                );
            }
        }

        Verdict::Accept
    }

    pub fn stats(&self) -> ForwardCounters {
        self.stats.snapshot()
    }
}
