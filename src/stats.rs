//! Callback statistics for a delivery stream.
//!
//! The stream is the only producer of [`StreamEvent`]s; the acquisition loop is
//! the only consumer. Counters are mutated by the consumer when it drains the
//! channel, so no locking is involved.

use crate::traits::{BufferStatus, EventSink, StreamEvent};
use crossbeam_channel::Receiver;
use std::fmt;
use tracing::warn;

/// Events a stream may emit besides two per pooled buffer (`Init`, `Exit`,
/// and headroom).
const EVENT_SLACK: usize = 8;

/// How the success counter is compared with the expected buffer count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessRule {
    /// At least the expected number of successful buffers.
    AtLeast,
    /// Exactly the expected number.
    Exact,
}

/// Lifetime counters of one stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// `Init` events seen.
    pub n_init: u32,
    /// `StartBuffer` events seen.
    pub n_start: u32,
    /// `BufferDone` events seen.
    pub n_done: u32,
    /// `BufferDone` events carrying a successful status.
    pub n_success: u32,
    /// `Exit` events seen.
    pub n_exit: u32,
}

impl StreamStats {
    /// Account for one event.
    pub fn record(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Init => self.n_init += 1,
            StreamEvent::StartBuffer => self.n_start += 1,
            StreamEvent::BufferDone(status) => {
                self.n_done += 1;
                if status == BufferStatus::Success {
                    self.n_success += 1;
                }
            }
            StreamEvent::Exit => self.n_exit += 1,
        }
    }

    /// Check the counters of a torn-down stream.
    pub const fn reconcile(&self, n_expected: u32, rule: SuccessRule) -> Reconciliation {
        let success_ok = match rule {
            SuccessRule::AtLeast => self.n_success >= n_expected,
            SuccessRule::Exact => self.n_success == n_expected,
        };
        Reconciliation {
            init_ok: self.n_init == 1,
            buffer_ok: self.n_start == self.n_done && success_ok,
            exit_ok: self.n_exit == 1,
        }
    }
}

/// Outcome of [`StreamStats::reconcile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    /// Exactly one `Init`.
    pub init_ok: bool,
    /// Every started buffer completed and enough of them succeeded.
    pub buffer_ok: bool,
    /// Exactly one `Exit`.
    pub exit_ok: bool,
}

impl Reconciliation {
    /// Whether every sub-check holds.
    pub const fn is_ok(&self) -> bool {
        self.init_ok && self.buffer_ok && self.exit_ok
    }
}

/// Lists the violated sub-checks, each prefixed by a space.
impl fmt::Display for Reconciliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.init_ok {
            f.write_str(" cb_init_err")?;
        }
        if !self.buffer_ok {
            f.write_str(" cb_buffer_err")?;
        }
        if !self.exit_ok {
            f.write_str(" cb_exit_err")?;
        }
        Ok(())
    }
}

/// Consumer side of the stream event channel.
pub struct StatsCollector {
    events: Receiver<StreamEvent>,
    stats: StreamStats,
}

impl StatsCollector {
    /// Create the event channel for a stream fed by `pool_capacity` buffers.
    ///
    /// A buffer produces at most two events before the consumer must pop it,
    /// so draining after every pop keeps the channel from filling up.
    pub fn channel(pool_capacity: usize) -> (EventSink, Self) {
        let (sink, events) = crossbeam_channel::bounded(2 * pool_capacity + EVENT_SLACK);
        (
            sink,
            Self {
                events,
                stats: StreamStats::default(),
            },
        )
    }

    /// Account for every event currently queued. Returns how many were read.
    pub fn drain(&mut self) -> usize {
        let mut n_events = 0;
        while let Ok(event) = self.events.try_recv() {
            self.stats.record(event);
            n_events += 1;
        }
        n_events
    }

    /// Counters accumulated so far.
    pub const fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Drain the remaining events of a torn-down stream and reconcile.
    pub fn finish(mut self, n_expected: u32, rule: SuccessRule) -> (StreamStats, Reconciliation) {
        self.drain();
        let reconciliation = self.stats.reconcile(n_expected, rule);
        if !reconciliation.is_ok() {
            warn!(
                n_init = self.stats.n_init,
                n_start = self.stats.n_start,
                n_done = self.stats.n_done,
                n_success = self.stats.n_success,
                n_exit = self.stats.n_exit,
                n_expected,
                "Stream callback statistics do not reconcile"
            );
        }
        (self.stats, reconciliation)
    }
}
