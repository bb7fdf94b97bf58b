// SPDX-License-Identifier: Apache-2.0 OR MIT
//! IGMP proxy engine
//!
//! Reacts to IGMP arriving on the downstream link and keeps the route table
//! and the upstream subscriptions in step with it.
//!
//! ## Per-group states
//!
//! ```text
//!   no-route --report--> routed --leave--> leave-pending
//!                          ^                   |  |
//!                          +------report-------+  | last-member queries
//!                                                 | go unanswered
//!   routed --GMI without report--> no-route <-----+
//! ```
//!
//! A leave never deletes a route directly: other members may remain. The
//! engine sends a group-specific query right away and, while the route
//! exists, keeps asking every Last Member Query Interval until the count
//! is exhausted. A report at any point cancels the countdown.
//!
//! Handlers are synchronous and never sleep. They take `now` and return the
//! timers they want; whoever drives the engine schedules those and calls
//! `handle_timer` when they fire. An embedder that drops the requests gets
//! routes that never expire.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::logging::{Facility, Logger, Severity};
use crate::mroute::RouteTable;
use crate::protocols::frame::{encode_query, EncodeError, FrameBuilder};
use crate::protocols::igmp::{
    is_link_local_multicast, IgmpConfig, IgmpMessage, IgmpType, ALL_HOSTS_GROUP,
    ALL_ROUTERS_GROUP,
};
use crate::protocols::{deadline_after, TimerRequest, TimerType};
use crate::{GroupMembership, InterfaceRole, Transmit};

/// How the engine addresses the queries it originates on the downstream link
#[derive(Clone)]
pub struct QuerySource {
    /// IPv4 source address of queries (the downstream interface's address)
    pub address: Ipv4Addr,
    /// Link framing for the downstream interface
    pub frame: Arc<dyn FrameBuilder>,
}

pub struct ProxyEngine {
    config: IgmpConfig,
    routes: Arc<RouteTable>,
    query_source: QuerySource,
    transmitter: Arc<dyn Transmit>,
    membership: Arc<dyn GroupMembership>,
    logger: Logger,
}

impl ProxyEngine {
    pub fn new(
        config: IgmpConfig,
        routes: Arc<RouteTable>,
        query_source: QuerySource,
        transmitter: Arc<dyn Transmit>,
        membership: Arc<dyn GroupMembership>,
        logger: Logger,
    ) -> Self {
        Self {
            config,
            routes,
            query_source,
            transmitter,
            membership,
            logger,
        }
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn config(&self) -> &IgmpConfig {
        &self.config
    }

    /// A downstream host reported membership in `group`.
    pub fn on_membership_report(
        &self,
        source: Ipv4Addr,
        group: Ipv4Addr,
        now: Instant,
    ) -> Vec<TimerRequest> {
        if !group.is_multicast() {
            log_debug!(
                self.logger,
                Facility::Proxy,
                "Ignoring report from {} for non-multicast group {}",
                source,
                group
            );
            return Vec::new();
        }

        if self.routes.add_route(group) {
            let (group_text, reporter) = (group.to_string(), source.to_string());
            log_kv!(
                self.logger,
                Severity::Info,
                Facility::RouteTable,
                "Route inserted",
                "group" => group_text.as_str(),
                "reporter" => reporter.as_str()
            );
            if !is_link_local_multicast(group) {
                self.on_upstream_join(group);
            }
        }

        // Deleted by a concurrent expiry between insert and lookup; the next
        // report recreates it.
        let Some(route) = self.routes.lookup(group) else {
            return Vec::new();
        };

        let deadline = deadline_after(now, self.config.group_membership_interval());
        let activity = route.refresh(source, deadline);
        log_debug!(
            self.logger,
            Facility::Proxy,
            "Report for {} from {} (activity {})",
            group,
            source,
            activity
        );

        vec![TimerRequest::replacing(
            TimerType::GroupExpiry { group },
            deadline,
        )]
    }

    /// A downstream host announced it is leaving `group`.
    pub fn on_leave_message(
        &self,
        source: Ipv4Addr,
        group: Ipv4Addr,
        now: Instant,
    ) -> Vec<TimerRequest> {
        if !group.is_multicast() {
            log_debug!(
                self.logger,
                Facility::Proxy,
                "Ignoring leave from {} for non-multicast group {}",
                source,
                group
            );
            return Vec::new();
        }

        log_info!(
            self.logger,
            Facility::Proxy,
            "Leave for {} from {}, probing for remaining members",
            group,
            source
        );
        self.on_group_probe(group);

        let Some(route) = self.routes.lookup(group) else {
            log_debug!(self.logger, Facility::Proxy, "Leave for unrouted group {}", group);
            return Vec::new();
        };

        let count = u32::from(self.config.last_member_query_count.max(1));
        let interval = self.config.last_member_query_interval;
        route.begin_leave(
            count - 1,
            deadline_after(now, self.config.last_member_query_time()),
        );

        let next = if count > 1 {
            TimerType::GroupQuery { group }
        } else {
            TimerType::GroupExpiry { group }
        };
        vec![TimerRequest::replacing(next, deadline_after(now, interval))]
    }

    /// Send the general query to all hosts downstream and ask for the next one.
    pub fn on_startup_probe(&self, now: Instant) -> Vec<TimerRequest> {
        self.send_query(
            ALL_HOSTS_GROUP,
            self.config.query_response_interval,
            Ipv4Addr::UNSPECIFIED,
        );
        vec![TimerRequest::replacing(
            TimerType::GeneralQuery,
            deadline_after(now, self.config.query_interval),
        )]
    }

    /// Ask downstream whether anyone still wants `group`.
    pub fn on_group_probe(&self, group: Ipv4Addr) {
        self.send_query(group, self.config.last_member_query_interval, group);
    }

    pub fn on_upstream_join(&self, group: Ipv4Addr) {
        match self.membership.join(InterfaceRole::Upstream, group) {
            Ok(()) => log_info!(self.logger, Facility::Network, "Joined {} upstream", group),
            Err(e) => log_error!(
                self.logger,
                Facility::Network,
                "Upstream join of {} failed: {:#}",
                group,
                e
            ),
        }
    }

    pub fn on_upstream_leave(&self, group: Ipv4Addr) {
        match self.membership.leave(InterfaceRole::Upstream, group) {
            Ok(()) => log_info!(self.logger, Facility::Network, "Left {} upstream", group),
            Err(e) => log_warning!(
                self.logger,
                Facility::Network,
                "Upstream leave of {} failed: {:#}",
                group,
                e
            ),
        }
    }

    /// A timer the engine asked for has fired.
    pub fn handle_timer(&self, timer: TimerType, now: Instant) -> Vec<TimerRequest> {
        match timer {
            TimerType::GeneralQuery => self.on_startup_probe(now),
            TimerType::GroupQuery { group } => self.last_member_query_due(group, now),
            TimerType::GroupExpiry { group } => self.membership_deadline_due(group, now),
        }
    }

    fn last_member_query_due(&self, group: Ipv4Addr, now: Instant) -> Vec<TimerRequest> {
        let Some(route) = self.routes.lookup(group) else {
            return Vec::new();
        };
        // None: a report arrived and cancelled the leave
        let Some(remaining) = route.consume_leave_query() else {
            return Vec::new();
        };

        self.on_group_probe(group);

        let next = if remaining > 0 {
            TimerType::GroupQuery { group }
        } else {
            TimerType::GroupExpiry { group }
        };
        vec![TimerRequest::replacing(
            next,
            deadline_after(now, self.config.last_member_query_interval),
        )]
    }

    fn membership_deadline_due(&self, group: Ipv4Addr, now: Instant) -> Vec<TimerRequest> {
        let Some(route) = self.routes.lookup(group) else {
            return Vec::new();
        };

        if route.is_expired(now) {
            self.expire_route(group);
            return Vec::new();
        }

        // Refreshed since this timer was armed
        match route.deadline() {
            Some(deadline) => vec![TimerRequest::replacing(
                TimerType::GroupExpiry { group },
                deadline,
            )],
            None => Vec::new(),
        }
    }

    fn expire_route(&self, group: Ipv4Addr) {
        if !self.routes.delete_route(group) {
            return;
        }
        self.logger.log_kv(
            Severity::Notice,
            Facility::RouteTable,
            "Route expired",
            &[("group", group.to_string().as_str())],
        );
        if !is_link_local_multicast(group) {
            self.on_upstream_leave(group);
        }
    }

    /// Dispatch a decoded IGMP message that arrived on the downstream link.
    pub fn handle_igmp(&self, message: &IgmpMessage, now: Instant) -> Vec<TimerRequest> {
        match message.kind {
            IgmpType::V1Report | IgmpType::V2Report => {
                self.on_membership_report(message.source, message.group, now)
            }
            IgmpType::Leave => self.on_leave_message(message.source, message.group, now),
            IgmpType::MembershipQuery => {
                log_debug!(
                    self.logger,
                    Facility::Proxy,
                    "Ignoring query from {} (group {})",
                    message.source,
                    message.group
                );
                Vec::new()
            }
            IgmpType::V3Report => {
                log_debug!(
                    self.logger,
                    Facility::Proxy,
                    "Ignoring IGMPv3 report from {}",
                    message.source
                );
                Vec::new()
            }
            IgmpType::Other(kind) => {
                log_debug!(
                    self.logger,
                    Facility::Proxy,
                    "Ignoring IGMP type {:#04x} from {}",
                    kind,
                    message.source
                );
                Vec::new()
            }
        }
    }

    /// Bring-up: route table ready, general probe downstream, then join
    /// all-routers upstream.
    pub fn startup(&self, now: Instant) -> Vec<TimerRequest> {
        log_notice!(
            self.logger,
            Facility::Bridge,
            "Proxy engine starting ({} routes)",
            self.routes.len()
        );
        let timers = self.on_startup_probe(now);
        self.on_upstream_join(ALL_ROUTERS_GROUP);
        timers
    }

    /// Teardown: leave all-routers, leave every routed group, release the
    /// table. Returns how many routes were released.
    pub fn shutdown(&self) -> usize {
        self.on_upstream_leave(ALL_ROUTERS_GROUP);
        for group in self.routes.groups() {
            if !is_link_local_multicast(group) {
                self.on_upstream_leave(group);
            }
        }
        let released = self.routes.teardown();
        log_notice!(
            self.logger,
            Facility::Bridge,
            "Proxy engine stopped, released {} routes",
            released
        );
        released
    }

    /// Encode and transmit a query downstream. Failures are logged; the
    /// caller carries on either way.
    fn send_query(&self, destination: Ipv4Addr, response: Duration, group: Ipv4Addr) -> bool {
        let frame = match encode_query(
            self.query_source.frame.as_ref(),
            self.query_source.address,
            destination,
            response,
            group,
        ) {
            Ok(frame) => frame,
            Err(e @ EncodeError::Allocation { .. }) => {
                log_error!(self.logger, Facility::Codec, "Query for {} not sent: {}", group, e);
                return false;
            }
            Err(e) => {
                log_debug!(self.logger, Facility::Codec, "Query for {} not sent: {}", group, e);
                return false;
            }
        };

        match self.transmitter.transmit(InterfaceRole::Downstream, &frame) {
            Ok(()) => {
                log_debug!(
                    self.logger,
                    Facility::Proxy,
                    "Sent query for {} to {}",
                    group,
                    destination
                );
                true
            }
            Err(e) => {
                log_error!(
                    self.logger,
                    Facility::Proxy,
                    "Failed to send query for {}: {:#}",
                    group,
                    e
                );
                false
            }
        }
    }
}
