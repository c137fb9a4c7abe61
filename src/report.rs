//! Step results and the sinks they are recorded into.

use std::fmt;
use std::time::Duration;

/// Verdict of one test step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    /// The step passed.
    Success,
    /// The step failed.
    Failure,
    /// The step was not run.
    Ignored,
}

impl TestStatus {
    /// `Success` when `ok`, `Failure` otherwise.
    pub const fn from_bool(ok: bool) -> Self {
        if ok {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Success => "Success",
            Self::Failure => "Failure",
            Self::Ignored => "Ignored",
        };
        f.write_str(name)
    }
}

/// Outcome of one step of a device test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    /// Step name, e.g. `BufferCheck`.
    pub step: String,
    /// Verdict.
    pub status: TestStatus,
    /// Free-form detail; may be empty.
    pub message: String,
}

impl StepResult {
    /// Create a step result.
    pub fn new(step: &str, status: TestStatus, message: impl Into<String>) -> Self {
        Self {
            step: step.to_owned(),
            status,
            message: message.into(),
        }
    }

    /// Step passing iff `ok`.
    pub fn check(step: &str, ok: bool, message: impl Into<String>) -> Self {
        Self::new(step, TestStatus::from_bool(ok), message)
    }
}

/// A step result attributed to a test and a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestResult {
    /// `Test:Step`.
    pub title: String,
    /// `vendor:model` of the device.
    pub device: String,
    /// Verdict.
    pub status: TestStatus,
    /// Detail of the step.
    pub message: String,
    /// Wall-clock time spent in the test.
    pub elapsed: Duration,
}

impl TestResult {
    /// Attribute `step` of `test` to `device`.
    pub fn from_step(test: &str, device: &str, step: StepResult, elapsed: Duration) -> Self {
        Self {
            title: format!("{test}:{}", step.step),
            device: device.to_owned(),
            status: step.status,
            message: step.message,
            elapsed,
        }
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<40} {:<24} {:<8}", self.title, self.device, self.status)?;
        if !self.message.is_empty() {
            write!(f, " {}", self.message)?;
        }
        Ok(())
    }
}

/// Sink receiving results as they are produced.
pub trait Recorder {
    /// Record one result.
    fn record(&mut self, result: &TestResult);
}

impl Recorder for Vec<TestResult> {
    fn record(&mut self, result: &TestResult) {
        self.push(result.clone());
    }
}

/// Recorder printing every result on stdout.
#[derive(Debug, Default)]
pub struct PrintRecorder;

impl Recorder for PrintRecorder {
    fn record(&mut self, result: &TestResult) {
        println!("{result}");
    }
}

/// Counts of results per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    /// Successful steps.
    pub n_success: usize,
    /// Failed steps.
    pub n_failure: usize,
    /// Ignored steps.
    pub n_ignored: usize,
}

impl Summary {
    /// Tally a list of results.
    pub fn of(results: &[TestResult]) -> Self {
        results.iter().fold(Self::default(), |mut summary, result| {
            match result.status {
                TestStatus::Success => summary.n_success += 1,
                TestStatus::Failure => summary.n_failure += 1,
                TestStatus::Ignored => summary.n_ignored += 1,
            }
            summary
        })
    }

    /// Whether no step failed.
    pub const fn passed(&self) -> bool {
        self.n_failure == 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} success, {} failure, {} ignored",
            self.n_success, self.n_failure, self.n_ignored
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_joins_test_and_step() {
        let step = StepResult::check("BufferCheck", true, "10/10");
        let result =
            TestResult::from_step("MultipleAcquisitionA", "PiCam:Simulated", step, Duration::ZERO);
        assert_eq!(result.title, "MultipleAcquisitionA:BufferCheck");
        assert_eq!(result.status, TestStatus::Success);
        assert!(result.to_string().ends_with(" 10/10"));
    }

    #[test]
    fn test_summary_counts() {
        let results: Vec<TestResult> = [
            TestStatus::Success,
            TestStatus::Failure,
            TestStatus::Ignored,
            TestStatus::Success,
        ]
        .into_iter()
        .map(|status| {
            TestResult::from_step("T", "D", StepResult::new("S", status, ""), Duration::ZERO)
        })
        .collect();

        let summary = Summary::of(&results);
        assert_eq!(summary.n_success, 2);
        assert!(!summary.passed());
        assert_eq!(summary.to_string(), "2 success, 1 failure, 1 ignored");
    }

    #[test]
    fn test_vec_recorder_collects() {
        let mut recorder: Vec<TestResult> = Vec::new();
        let step = StepResult::new("NoSupport", TestStatus::Ignored, "");
        recorder.record(&TestResult::from_step("Chunks", "D", step, Duration::ZERO));
        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder[0].title, "Chunks:NoSupport");
    }
}
