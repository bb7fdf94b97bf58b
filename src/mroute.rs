// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Multicast route table
//!
//! One route per multicast group that has at least one downstream member.
//! The forwarding path looks groups up on every upstream datagram, so reads
//! must never wait on the control path that inserts and expires routes.
//!
//! ## Concurrency
//!
//! Readers load an immutable snapshot (`ArcSwap`) and never block. Writers
//! serialize on a mutex, copy the current map, modify the copy and publish
//! it. A reader that loaded a route before it was deleted keeps a valid
//! `Arc<Route>`; the route is freed when the last such handle drops.
//!
//! Per-route aging state lives in atomics so the control path can update a
//! route in place without republishing the map.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;

use crate::RouteInfo;

const NO_DEADLINE: u64 = u64::MAX;
const NO_REPORTER: u32 = 0;

/// Downstream interest in one multicast group
#[derive(Debug)]
pub struct Route {
    group: Ipv4Addr,
    created_at: Instant,
    /// Last-member queries still to be sent for a pending leave
    age_value: AtomicU32,
    /// Membership reports that refreshed this route
    age_activity: AtomicU64,
    /// Membership deadline as milliseconds after `created_at`
    deadline_ms: AtomicU64,
    last_reporter: AtomicU32,
}

impl Route {
    fn new(group: Ipv4Addr, created_at: Instant) -> Self {
        Self {
            group,
            created_at,
            age_value: AtomicU32::new(0),
            age_activity: AtomicU64::new(0),
            deadline_ms: AtomicU64::new(NO_DEADLINE),
            last_reporter: AtomicU32::new(NO_REPORTER),
        }
    }

    pub fn group(&self) -> Ipv4Addr {
        self.group
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn age_value(&self) -> u32 {
        self.age_value.load(Ordering::Acquire)
    }

    pub fn age_activity(&self) -> u64 {
        self.age_activity.load(Ordering::Relaxed)
    }

    /// True while last-member queries are still outstanding
    pub fn leave_pending(&self) -> bool {
        self.age_value() > 0
    }

    pub fn last_reporter(&self) -> Option<Ipv4Addr> {
        match self.last_reporter.load(Ordering::Relaxed) {
            NO_REPORTER => None,
            raw => Some(Ipv4Addr::from(raw)),
        }
    }

    /// Record a membership report: cancels any pending leave and pushes the
    /// deadline out. Returns the new activity count.
    pub fn refresh(&self, reporter: Ipv4Addr, deadline: Instant) -> u64 {
        self.age_value.store(0, Ordering::Release);
        self.set_deadline(deadline);
        if !reporter.is_unspecified() {
            self.last_reporter
                .store(u32::from(reporter), Ordering::Relaxed);
        }
        self.age_activity.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Start the last-member-query countdown.
    pub fn begin_leave(&self, queries_remaining: u32, deadline: Instant) {
        self.age_value.store(queries_remaining, Ordering::Release);
        self.set_deadline(deadline);
    }

    /// Account for one more last-member query sent.
    ///
    /// Returns the remaining count, or `None` if no leave was pending (a
    /// report cancelled it in the meantime).
    pub fn consume_leave_query(&self) -> Option<u32> {
        self.age_value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
                value.checked_sub(1)
            })
            .ok()
            .map(|previous| previous - 1)
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.deadline_ms.load(Ordering::Acquire) {
            NO_DEADLINE => None,
            ms => Some(self.created_at + Duration::from_millis(ms)),
        }
    }

    /// A route without a deadline never expires.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    pub fn info(&self, now: Instant) -> RouteInfo {
        RouteInfo {
            group: self.group,
            age_value: self.age_value(),
            age_activity: self.age_activity(),
            last_reporter: self.last_reporter(),
            age_ms: now.saturating_duration_since(self.created_at).as_millis() as u64,
        }
    }

    fn set_deadline(&self, deadline: Instant) {
        let offset = deadline.saturating_duration_since(self.created_at).as_millis();
        let offset = u64::try_from(offset).unwrap_or(NO_DEADLINE - 1);
        self.deadline_ms
            .store(offset.min(NO_DEADLINE - 1), Ordering::Release);
    }
}

type RouteMap = HashMap<Ipv4Addr, Arc<Route>>;

/// Concurrent group → route index
pub struct RouteTable {
    routes: ArcSwap<RouteMap>,
    writer: Mutex<()>,
}

impl RouteTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            routes: ArcSwap::from_pointee(HashMap::new()),
            writer: Mutex::new(()),
        }
    }

    /// Insert a route for `group` if none exists.
    ///
    /// Returns true when a new route was stored. When two callers race on
    /// the same group exactly one wins; the other's candidate is discarded.
    pub fn add_route(&self, group: Ipv4Addr) -> bool {
        let _guard = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = self.routes.load();
        if current.contains_key(&group) {
            return false;
        }

        let mut next: RouteMap = (**current).clone();
        next.insert(group, Arc::new(Route::new(group, Instant::now())));
        self.routes.store(Arc::new(next));
        true
    }

    /// Remove the route for `group`. Returns true if one was removed.
    ///
    /// Readers holding the route keep it alive until they drop it.
    pub fn delete_route(&self, group: Ipv4Addr) -> bool {
        let _guard = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let current = self.routes.load();
        if !current.contains_key(&group) {
            return false;
        }

        let mut next: RouteMap = (**current).clone();
        next.remove(&group);
        self.routes.store(Arc::new(next));
        true
    }

    /// Wait-free lookup against the current snapshot
    #[inline]
    pub fn lookup(&self, group: Ipv4Addr) -> Option<Arc<Route>> {
        self.routes.load().get(&group).cloned()
    }

    #[inline]
    pub fn contains(&self, group: Ipv4Addr) -> bool {
        self.routes.load().contains_key(&group)
    }

    /// Remove every route. Returns how many were released.
    pub fn teardown(&self) -> usize {
        let _guard = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let previous = self.routes.swap(Arc::new(HashMap::new()));
        previous.len()
    }

    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.load().is_empty()
    }

    /// Routed groups in ascending address order
    pub fn groups(&self) -> Vec<Ipv4Addr> {
        let mut groups: Vec<Ipv4Addr> = self.routes.load().keys().copied().collect();
        groups.sort();
        groups
    }

    /// Display snapshot of every route, ordered by group
    pub fn routes(&self, now: Instant) -> Vec<RouteInfo> {
        let mut routes: Vec<RouteInfo> = self
            .routes
            .load()
            .values()
            .map(|route| route.info(now))
            .collect();
        routes.sort_by_key(|info| info.group);
        routes
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("groups", &self.groups())
            .finish()
    }
}
