//! Buffer-pool acquisition engine.
//!
//! Drives a delivery stream through a small pool of recycled buffers, polls
//! completed buffers with bounded waits, and reconciles the stream's callback
//! statistics once the stream is torn down.

use crate::pool::BufferPool;
use crate::stats::{Reconciliation, StatsCollector, StreamStats, SuccessRule};
use crate::traits::{
    AcquisitionMode, Buffer, BufferStatus, DeliveryStream, DeviceSession, Result,
    TimestampSource, SOFTWARE_TRIGGER,
};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Relative frame-rate error accepted by [`check_frame_rate`].
pub const FRAME_RATE_TOLERANCE: f64 = 0.10;

/// Parameters of a continuous acquisition run.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionParams {
    /// Buffers allocated for the run.
    pub pool_capacity: usize,
    /// Buffers to poll.
    pub n_expected: u32,
    /// Wait for the first buffer (pipeline fill).
    pub warmup_timeout: Duration,
    /// Wait for every following buffer.
    pub steady_timeout: Duration,
    /// Clock used for the frame interval.
    pub timestamp_source: TimestampSource,
    /// Parts every delivered buffer must carry.
    pub expected_parts: Option<usize>,
    /// Keep the last popped buffer instead of recycling it.
    pub retain_last: bool,
}

impl Default for AcquisitionParams {
    fn default() -> Self {
        Self {
            pool_capacity: 2,
            n_expected: 10,
            warmup_timeout: Duration::from_secs(5),
            steady_timeout: Duration::from_millis(500),
            timestamp_source: TimestampSource::Device,
            expected_parts: None,
            retain_last: false,
        }
    }
}

impl AcquisitionParams {
    /// One buffer, kept for inspection.
    pub fn single(timeout: Duration) -> Self {
        Self {
            pool_capacity: 1,
            n_expected: 1,
            warmup_timeout: timeout,
            steady_timeout: timeout,
            retain_last: true,
            ..Self::default()
        }
    }
}

/// Parameters of a software-triggered acquisition run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerParams {
    /// Buffers allocated for the run.
    pub pool_capacity: usize,
    /// Triggers to issue.
    pub n_expected: u32,
    /// Wait for each triggered buffer.
    pub timeout: Duration,
    /// Pause before every trigger but the first.
    pub trigger_delay: Duration,
}

impl Default for TriggerParams {
    fn default() -> Self {
        Self {
            pool_capacity: 2,
            n_expected: 5,
            timeout: Duration::from_millis(500),
            trigger_delay: Duration::ZERO,
        }
    }
}

/// First and last successful timestamps of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInterval {
    /// Timestamp of the first successful buffer, in ns.
    pub first_ns: u64,
    /// Timestamp of the last successful buffer, in ns.
    pub last_ns: u64,
    /// Successful buffers between the two, both included.
    pub n_buffers: u32,
}

impl FrameInterval {
    /// Measured frame rate, when the interval spans two distinct timestamps.
    #[allow(clippy::cast_precision_loss)]
    pub fn frame_rate(&self) -> Option<f64> {
        if self.n_buffers < 2 || self.last_ns <= self.first_ns {
            return None;
        }
        let span_ns = (self.last_ns - self.first_ns) as f64;
        Some(f64::from(self.n_buffers - 1) * 1e9 / span_ns)
    }
}

/// Result of an acquisition run.
#[derive(Debug, Clone)]
pub struct AcquisitionOutcome {
    /// Buffers the run asked for.
    pub requested: u32,
    /// Buffers delivered with a successful status.
    pub completed: u32,
    /// Whether every delivery and the reconciliation succeeded.
    pub success: bool,
    /// Timestamps of the successful buffers.
    pub interval: Option<FrameInterval>,
    /// Callback statistics after teardown.
    pub stats: StreamStats,
    /// Reconciliation of `stats`, when the stream was created.
    pub reconciliation: Option<Reconciliation>,
    /// Highest number of buffers in flight.
    pub peak_in_flight: usize,
    /// Last buffer, when the run retained it.
    pub buffer: Option<Buffer>,
    /// Device or transfer errors, in order of occurrence.
    pub errors: Vec<String>,
}

impl AcquisitionOutcome {
    fn new(requested: u32) -> Self {
        Self {
            requested,
            completed: 0,
            success: true,
            interval: None,
            stats: StreamStats::default(),
            reconciliation: None,
            peak_in_flight: 0,
            buffer: None,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, error: String) {
        warn!(%error, "Acquisition failure");
        self.success = false;
        self.errors.push(error);
    }

    fn track(&mut self, buffer: &Buffer, source: TimestampSource) {
        let timestamp = buffer.timestamp(source);
        self.interval = Some(match self.interval {
            None => FrameInterval {
                first_ns: timestamp,
                last_ns: timestamp,
                n_buffers: 1,
            },
            Some(interval) => FrameInterval {
                last_ns: timestamp,
                n_buffers: interval.n_buffers + 1,
                ..interval
            },
        });
    }

    fn reconcile(&mut self, collector: StatsCollector, n_expected: u32, rule: SuccessRule) {
        let (stats, reconciliation) = collector.finish(n_expected, rule);
        self.stats = stats;
        self.reconciliation = Some(reconciliation);
        self.success &= reconciliation.is_ok();
    }

    /// Whether the step passes.
    pub fn is_success(&self) -> bool {
        self.success && self.errors.is_empty()
    }
}

/// `completed/requested`, then violated callback checks, then the first error.
impl fmt::Display for AcquisitionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.completed, self.requested)?;
        if let Some(reconciliation) = self.reconciliation {
            write!(f, "{reconciliation}")?;
        }
        if let Some(error) = self.errors.first() {
            write!(f, " {error}")?;
        }
        Ok(())
    }
}

/// Configure continuous free-running acquisition at `frame_rate`.
pub fn configure_continuous<D: DeviceSession>(session: &mut D, frame_rate: f64) -> Result<()> {
    session.set_acquisition_mode(AcquisitionMode::Continuous)?;
    session.set_trigger(None)?;
    session.set_frame_rate(frame_rate)
}

/// Configure one-buffer acquisition without trigger.
pub fn configure_single<D: DeviceSession>(session: &mut D) -> Result<()> {
    session.set_acquisition_mode(AcquisitionMode::SingleFrame)?;
    session.set_trigger(None)
}

/// Configure continuous acquisition driven by software triggers.
pub fn configure_software_trigger<D: DeviceSession>(session: &mut D) -> Result<()> {
    session.set_acquisition_mode(AcquisitionMode::Continuous)?;
    session.set_trigger(Some(SOFTWARE_TRIGGER))
}

/// Run a continuous acquisition of `params.n_expected` buffers.
///
/// A missing buffer fails the run but polling goes on for the full count.
/// Every popped buffer goes straight back into the stream, except the last
/// one when `retain_last` is set.
pub fn run<D: DeviceSession>(session: &mut D, params: &AcquisitionParams) -> AcquisitionOutcome {
    let mut outcome = AcquisitionOutcome::new(params.n_expected);

    let payload_size = match session.payload_size() {
        Ok(size) => size,
        Err(err) => {
            outcome.fail(err.to_string());
            return outcome;
        }
    };

    let (sink, mut collector) = StatsCollector::channel(params.pool_capacity);
    let stream = match session.create_stream(sink) {
        Ok(stream) => stream,
        Err(err) => {
            outcome.fail(err.to_string());
            return outcome;
        }
    };
    let mut pool = match BufferPool::fill(stream, params.pool_capacity, payload_size) {
        Ok(pool) => pool,
        Err(err) => {
            outcome.fail(err.to_string());
            return outcome;
        }
    };

    debug!(
        n_expected = params.n_expected,
        pool_capacity = params.pool_capacity,
        payload_size,
        "Starting continuous acquisition"
    );

    if let Err(err) = pool.stream().start() {
        outcome.fail(err.to_string());
    } else {
        for i in 0..params.n_expected {
            let timeout = if i == 0 {
                params.warmup_timeout
            } else {
                params.steady_timeout
            };

            let popped = pool.pop(timeout);
            collector.drain();

            let Some(buffer) = popped else {
                warn!(iteration = i, ?timeout, "No buffer delivered in time");
                outcome.success = false;
                continue;
            };

            inspect(&mut outcome, &buffer, params);

            if params.retain_last && i + 1 == params.n_expected {
                outcome.buffer = Some(buffer);
            } else if let Err(err) = pool.recycle(buffer) {
                outcome.fail(err.to_string());
            }
        }

        if let Err(err) = pool.stream().stop() {
            outcome.fail(err.to_string());
        }
    }

    outcome.peak_in_flight = pool.peak_in_flight();
    pool.teardown();
    outcome.reconcile(collector, params.n_expected, SuccessRule::AtLeast);

    info!(
        completed = outcome.completed,
        requested = outcome.requested,
        success = outcome.is_success(),
        "Continuous acquisition finished"
    );
    outcome
}

fn inspect(outcome: &mut AcquisitionOutcome, buffer: &Buffer, params: &AcquisitionParams) {
    if buffer.status == BufferStatus::Success {
        outcome.completed += 1;
        outcome.track(buffer, params.timestamp_source);
    } else {
        debug!(frame_id = buffer.frame_id, status = %buffer.status, "Buffer not successful");
        outcome.success = false;
    }

    if let Some(expected) = params.expected_parts {
        if buffer.n_parts() != expected {
            outcome.fail(format!(
                "Invalid number of parts (found: {} - expected: {expected})",
                buffer.n_parts()
            ));
        }
    }
}

/// Run a software-triggered acquisition.
///
/// Each iteration waits `trigger_delay` (except the first), triggers, and pops
/// one buffer. The run stops at the first failed iteration and requires
/// exactly `n_expected` successful buffers.
pub fn run_triggered<D: DeviceSession>(
    session: &mut D,
    params: &TriggerParams,
) -> AcquisitionOutcome {
    let mut outcome = AcquisitionOutcome::new(params.n_expected);

    let payload_size = match session.payload_size() {
        Ok(size) => size,
        Err(err) => {
            outcome.fail(err.to_string());
            return outcome;
        }
    };

    let (sink, mut collector) = StatsCollector::channel(params.pool_capacity);
    let stream = match session.create_stream(sink) {
        Ok(stream) => stream,
        Err(err) => {
            outcome.fail(err.to_string());
            return outcome;
        }
    };
    let mut pool = match BufferPool::fill(stream, params.pool_capacity, payload_size) {
        Ok(pool) => pool,
        Err(err) => {
            outcome.fail(err.to_string());
            return outcome;
        }
    };

    debug!(
        n_expected = params.n_expected,
        trigger_delay = ?params.trigger_delay,
        "Starting triggered acquisition"
    );

    if let Err(err) = pool.stream().start() {
        outcome.fail(err.to_string());
    } else {
        for i in 0..params.n_expected {
            if !outcome.is_success() {
                break;
            }
            if i > 0 {
                std::thread::sleep(params.trigger_delay);
            }
            if let Err(err) = pool.stream().software_trigger() {
                outcome.fail(err.to_string());
                break;
            }

            let popped = pool.pop(params.timeout);
            collector.drain();

            match popped {
                None => {
                    warn!(iteration = i, "No buffer delivered after trigger");
                    outcome.success = false;
                }
                Some(buffer) => {
                    if buffer.status == BufferStatus::Success {
                        outcome.completed += 1;
                        outcome.track(&buffer, TimestampSource::Device);
                    } else {
                        outcome.success = false;
                    }
                    if let Err(err) = pool.recycle(buffer) {
                        outcome.fail(err.to_string());
                    }
                }
            }
        }

        if let Err(err) = pool.stream().stop() {
            outcome.fail(err.to_string());
        }
    }

    outcome.peak_in_flight = pool.peak_in_flight();
    pool.teardown();
    outcome.reconcile(collector, params.n_expected, SuccessRule::Exact);

    info!(
        completed = outcome.completed,
        requested = outcome.requested,
        success = outcome.is_success(),
        "Triggered acquisition finished"
    );
    outcome
}

/// Verdict of a frame-rate measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRateCheck {
    /// Whether the measured rate is within tolerance.
    pub success: bool,
    /// Measured rate, when timestamps allowed one.
    pub measured: Option<f64>,
    /// Human-readable verdict.
    pub message: String,
}

/// Compare the rate measured over `interval` with `requested`.
pub fn check_frame_rate(interval: Option<FrameInterval>, requested: f64) -> FrameRateCheck {
    let Some(measured) = interval.as_ref().and_then(FrameInterval::frame_rate) else {
        return FrameRateCheck {
            success: false,
            measured: None,
            message: "Missing timestamp information".to_owned(),
        };
    };

    let error = (measured - requested).abs() / requested;
    if error < FRAME_RATE_TOLERANCE {
        FrameRateCheck {
            success: true,
            measured: Some(measured),
            message: format!("{measured:.2} Hz"),
        }
    } else {
        FrameRateCheck {
            success: false,
            measured: Some(measured),
            message: format!("{measured:.2} Hz (expected:{requested:.2} Hz)"),
        }
    }
}
