// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Protocol timer management.
//!
//! The proxy engine never sleeps; it hands back `TimerRequest`s. This task
//! owns them in a min-heap keyed on fire time and sends
//! `ProtocolEvent::TimerExpired` back to the supervisor loop when each one
//! comes due. A request with `replace_existing` supersedes any pending
//! timer of the same type, so per-group timers never pile up.
//!
//! Requests arrive on an unbounded channel: a dropped request would leave
//! a route with no aging timer. Replacement keeps the heap to one entry per
//! timer type.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::logging::{Facility, Logger};
use crate::protocols::{ProtocolEvent, TimerRequest, TimerType};

/// How long to sleep when nothing is pending
const IDLE_SLEEP: Duration = Duration::from_secs(3600);

pub struct ProtocolTimerManager {
    timers: BinaryHeap<Reverse<ScheduledTimer>>,
    timer_rx: mpsc::UnboundedReceiver<TimerRequest>,
    event_tx: mpsc::Sender<ProtocolEvent>,
    logger: Logger,
}

/// Ordered by fire time, ties broken by timer type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledTimer {
    fire_at: Instant,
    timer_type: TimerType,
}

impl ProtocolTimerManager {
    pub fn new(
        timer_rx: mpsc::UnboundedReceiver<TimerRequest>,
        event_tx: mpsc::Sender<ProtocolEvent>,
        logger: Logger,
    ) -> Self {
        Self {
            timers: BinaryHeap::new(),
            timer_rx,
            event_tx,
            logger,
        }
    }

    /// Number of timers waiting to fire
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    fn schedule(&mut self, request: TimerRequest) {
        if request.replace_existing {
            self.timers
                .retain(|Reverse(t)| t.timer_type != request.timer_type);
        }

        self.timers.push(Reverse(ScheduledTimer {
            fire_at: request.fire_at,
            timer_type: request.timer_type,
        }));

        log_debug!(
            self.logger,
            Facility::Timers,
            "Scheduled {:?}, {} pending",
            request.timer_type,
            self.timers.len()
        );
    }

    /// Pop the earliest timer if it is due at `now`
    fn pop_due(&mut self, now: Instant) -> Option<TimerType> {
        match self.timers.peek() {
            Some(Reverse(next)) if next.fire_at <= now => {
                self.timers.pop().map(|Reverse(timer)| timer.timer_type)
            }
            _ => None,
        }
    }

    fn sleep_duration(&self) -> Duration {
        match self.timers.peek() {
            Some(Reverse(next)) => next.fire_at.saturating_duration_since(Instant::now()),
            None => IDLE_SLEEP,
        }
    }

    /// Run until either channel closes
    pub async fn run(mut self) {
        log_info!(self.logger, Facility::Timers, "Protocol timer manager started");

        loop {
            let sleep_duration = self.sleep_duration();

            tokio::select! {
                _ = sleep(sleep_duration) => {
                    let now = Instant::now();
                    while let Some(timer_type) = self.pop_due(now) {
                        log_debug!(self.logger, Facility::Timers, "Timer expired: {:?}", timer_type);

                        if self
                            .event_tx
                            .send(ProtocolEvent::TimerExpired(timer_type))
                            .await
                            .is_err()
                        {
                            log_warning!(
                                self.logger,
                                Facility::Timers,
                                "Event channel closed, timer manager exiting"
                            );
                            return;
                        }
                    }
                }

                request = self.timer_rx.recv() => {
                    match request {
                        Some(request) => self.schedule(request),
                        None => {
                            log_info!(
                                self.logger,
                                Facility::Timers,
                                "Timer request channel closed, timer manager exiting"
                            );
                            return;
                        }
                    }
                }
            }
        }
    }
}
