//! Runs the test suite over every selected device.

use crate::config::TestConfig;
use crate::report::{Recorder, StepResult, TestResult, TestStatus};
use crate::suite::{self, DeviceTest};
use crate::traits::{DeviceProvider, DeviceSession};
use regex::Regex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Errors preventing a run from starting.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A selection pattern does not translate into a valid expression.
    #[error("Invalid selection pattern '{pattern}': {source}")]
    Pattern {
        /// The glob pattern.
        pattern: String,
        /// Regex compilation error.
        #[source]
        source: regex::Error,
    },
}

/// Translate a glob pattern into a case-insensitive anchored regex.
///
/// `*` matches any run of characters, `?` a single one, and `|` separates
/// alternatives.
pub fn glob_regex(pattern: &str) -> Result<Regex, RunnerError> {
    let alternatives: Vec<String> = pattern
        .split('|')
        .map(|alternative| {
            alternative
                .split('*')
                .map(|part| {
                    part.split('?')
                        .map(regex::escape)
                        .collect::<Vec<_>>()
                        .join(".")
                })
                .collect::<Vec<_>>()
                .join(".*")
        })
        .collect();

    Regex::new(&format!("(?i)^(?:{})$", alternatives.join("|"))).map_err(|source| {
        RunnerError::Pattern {
            pattern: pattern.to_owned(),
            source,
        }
    })
}

/// What to run and how often.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Glob over device ids.
    pub device_pattern: String,
    /// Glob over test names.
    pub test_pattern: String,
    /// Passes over the selected devices.
    pub iterations: u32,
    /// Record the register cache error count of every device.
    pub cache_check: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            device_pattern: "*".to_owned(),
            test_pattern: "*".to_owned(),
            iterations: 1,
            cache_check: false,
        }
    }
}

/// Runs the registered tests on the devices of one provider.
pub struct Runner<'c, P: DeviceProvider> {
    provider: P,
    config: &'c TestConfig,
    tests: Vec<Box<dyn DeviceTest<P::Session>>>,
}

impl<'c, P: DeviceProvider> Runner<'c, P> {
    /// Runner over the full registry.
    pub fn new(provider: P, config: &'c TestConfig) -> Self {
        Self {
            provider,
            config,
            tests: suite::registry(),
        }
    }

    /// Replace the registered tests.
    #[must_use]
    pub fn with_tests(mut self, tests: Vec<Box<dyn DeviceTest<P::Session>>>) -> Self {
        self.tests = tests;
        self
    }

    /// Run every selected test on every selected device.
    ///
    /// Results are handed to `recorder` as they are produced and returned
    /// together at the end.
    pub fn run(
        &self,
        options: &RunOptions,
        recorder: &mut dyn Recorder,
    ) -> Result<Vec<TestResult>, RunnerError> {
        let device_regex = glob_regex(&options.device_pattern)?;
        let test_regex = glob_regex(&options.test_pattern)?;

        let ids = self.provider.device_ids();
        info!(n_devices = ids.len(), "Devices found");

        let mut results = Vec::new();
        let mut record = |result: TestResult| {
            recorder.record(&result);
            results.push(result);
        };

        for iteration in 0..options.iterations {
            for id in ids.iter().filter(|id| device_regex.is_match(id)) {
                let mut session = match self.provider.open(id) {
                    Ok(session) => session,
                    Err(err) => {
                        warn!(%id, error = %err, "Failed to connect");
                        continue;
                    }
                };
                let device = session.identity().vendor_model();
                info!(iteration, %device, "Testing");

                let settings = self.config.device(session.identity());

                for test in self.tests.iter().filter(|test| test_regex.is_match(test.name())) {
                    let name = test.name();

                    if !settings.boolean(name).unwrap_or(true) {
                        let comment = settings.comment(name).unwrap_or_default();
                        info!(test = name, comment, "Test disabled");
                        let step = StepResult::new("*", TestStatus::Ignored, comment);
                        record(TestResult::from_step(name, &device, step, Duration::ZERO));
                        continue;
                    }

                    let delay = settings.double(&format!("{name}Delay")).unwrap_or(0.0);
                    std::thread::sleep(Duration::try_from_secs_f64(delay).unwrap_or_default());

                    let started = Instant::now();
                    let steps = test.run(&mut session, &settings);
                    let elapsed = started.elapsed();
                    for step in steps {
                        record(TestResult::from_step(name, &device, step, elapsed));
                    }
                }

                if options.cache_check {
                    if let Some(n_errors) = session.register_cache_errors() {
                        let message = if n_errors > 0 {
                            format!("{n_errors} error(s)")
                        } else {
                            String::new()
                        };
                        let step = StepResult::check("RegisterCache", n_errors == 0, message);
                        record(TestResult::from_step("Genicam", &device, step, Duration::ZERO));
                    }
                }
            }
        }

        Ok(results)
    }
}
