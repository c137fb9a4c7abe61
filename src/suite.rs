//! Device tests and their registry.
//!
//! Each test drives one aspect of a device session and reports an ordered list
//! of steps. Expectations come from the device's configuration table.

use crate::acquisition::{
    self, check_frame_rate, AcquisitionOutcome, AcquisitionParams, TriggerParams,
};
use crate::chunks::{self, ChunkRequest, IGNORE_SELECTOR};
use crate::config::DeviceSettings;
use crate::multipart::{self, STEP_BUFFER_CHECK, STEP_NO_SUPPORT};
use crate::report::{StepResult, TestStatus};
use crate::traits::{Buffer, BufferStatus, DeviceError, DeviceSession, TimestampSource};
use std::time::Duration;
use tracing::{debug, warn};

/// Message of a single acquisition that returned no usable buffer.
pub const TRANSFER_FAILURE: &str = "Buffer transfer failure";

/// Wait for the buffer of a single acquisition.
const SINGLE_ACQUISITION_TIMEOUT: Duration = Duration::from_secs(1);

/// One test of the suite.
pub trait DeviceTest<D: DeviceSession> {
    /// Test name, used for selection, configuration keys and result titles.
    fn name(&self) -> &'static str;

    /// Run the test and return its steps in order.
    fn run(&self, session: &mut D, settings: &DeviceSettings<'_>) -> Vec<StepResult>;
}

/// Every test, in execution order.
pub fn registry<D: DeviceSession>() -> Vec<Box<dyn DeviceTest<D>>> {
    vec![
        Box::new(Properties),
        Box::new(MultipleAcquisition::A),
        Box::new(SingleAcquisition),
        Box::new(SoftwareTrigger),
        Box::new(MultipleAcquisition::B),
        Box::new(Multipart),
        Box::new(Chunks),
        Box::new(GigEVision),
    ]
}

/// Sensor size, gain and exposure readouts.
#[derive(Debug, Clone, Copy)]
pub struct Properties;

impl<D: DeviceSession> DeviceTest<D> for Properties {
    fn name(&self) -> &'static str {
        "Properties"
    }

    fn run(&self, session: &mut D, settings: &DeviceSettings<'_>) -> Vec<StepResult> {
        let mut steps = Vec::with_capacity(6);

        let sensor_size = session.sensor_size();
        steps.push(readout("SensorSizeReadout", &sensor_size));

        let expected = settings.integer_list("SensorSize");
        steps.push(match (sensor_size, expected.as_deref()) {
            (Ok((width, height)), Some(&[exp_width, exp_height])) => {
                if i64::from(width) == exp_width && i64::from(height) == exp_height {
                    StepResult::check("SensorSizeCheck", true, format!("{exp_width}x{exp_height}"))
                } else {
                    StepResult::check(
                        "SensorSizeCheck",
                        false,
                        format!("Found {width}x{height} instead of {exp_width}x{exp_height}"),
                    )
                }
            }
            _ => StepResult::new("SensorSizeCheck", TestStatus::Ignored, ""),
        });

        let available = session.is_gain_available();
        steps.push(availability(
            "GainAvailable",
            &available,
            settings.boolean("GainAvailable").unwrap_or(true),
        ));
        if matches!(available, Ok(true)) {
            steps.push(readout("GainReadout", &session.gain()));
        }

        let available = session.is_exposure_time_available();
        steps.push(availability(
            "ExposureTimeAvailable",
            &available,
            settings.boolean("ExposureTimeAvailable").unwrap_or(true),
        ));
        if matches!(available, Ok(true)) {
            steps.push(readout("ExposureTimeReadout", &session.exposure_time()));
        }

        steps
    }
}

fn readout<T>(step: &str, value: &crate::traits::Result<T>) -> StepResult {
    match value {
        Ok(_) => StepResult::check(step, true, ""),
        Err(err) => StepResult::check(step, false, err.to_string()),
    }
}

fn availability(step: &str, available: &crate::traits::Result<bool>, expected: bool) -> StepResult {
    match available {
        Ok(available) => StepResult::check(step, *available == expected, ""),
        Err(err) => StepResult::check(step, false, err.to_string()),
    }
}

/// Continuous acquisition of ten buffers and frame rate measurement.
#[derive(Debug, Clone, Copy)]
pub enum MultipleAcquisition {
    /// At `FrameRateA`.
    A,
    /// At `FrameRateB`.
    B,
}

impl MultipleAcquisition {
    const fn frame_rate_key(self) -> (&'static str, f64) {
        match self {
            Self::A => ("FrameRateA", 10.0),
            Self::B => ("FrameRateB", 5.0),
        }
    }
}

impl<D: DeviceSession> DeviceTest<D> for MultipleAcquisition {
    fn name(&self) -> &'static str {
        match self {
            Self::A => "MultipleAcquisitionA",
            Self::B => "MultipleAcquisitionB",
        }
    }

    fn run(&self, session: &mut D, settings: &DeviceSettings<'_>) -> Vec<StepResult> {
        let (key, default_rate) = self.frame_rate_key();
        let frame_rate = settings.double(key).unwrap_or(default_rate);
        let timestamp_source = if settings.boolean("UseSystemTimestamp").unwrap_or(false) {
            TimestampSource::System
        } else {
            TimestampSource::Device
        };

        if let Err(err) = acquisition::configure_continuous(session, frame_rate) {
            return vec![StepResult::check(STEP_BUFFER_CHECK, false, err.to_string())];
        }

        let params = AcquisitionParams {
            timestamp_source,
            ..AcquisitionParams::default()
        };
        let outcome = acquisition::run(session, &params);
        let rate = check_frame_rate(outcome.interval, frame_rate);
        debug!(frame_rate, measured = ?rate.measured, "Frame rate measured");

        vec![
            StepResult::check(STEP_BUFFER_CHECK, outcome.is_success(), outcome.to_string()),
            StepResult::check("FrameRate", rate.success, rate.message),
        ]
    }
}

/// Acquire one buffer in single-frame mode, expecting `n_parts` parts.
fn single_acquisition<D: DeviceSession>(session: &mut D, n_parts: usize) -> AcquisitionOutcome {
    let params = AcquisitionParams {
        expected_parts: Some(n_parts),
        ..AcquisitionParams::single(SINGLE_ACQUISITION_TIMEOUT)
    };
    acquisition::run(session, &params)
}

/// The delivered buffer of a single acquisition, or why there is none usable.
fn checked_buffer(outcome: AcquisitionOutcome) -> Result<Buffer, String> {
    let AcquisitionOutcome {
        buffer,
        errors,
        reconciliation,
        ..
    } = outcome;

    let buffer = match buffer {
        Some(buffer) if buffer.status == BufferStatus::Success => buffer,
        Some(_) => return Err(TRANSFER_FAILURE.to_owned()),
        None => {
            return Err(errors
                .into_iter()
                .next()
                .unwrap_or_else(|| TRANSFER_FAILURE.to_owned()))
        }
    };
    if let Some(error) = errors.into_iter().next() {
        return Err(error);
    }
    match reconciliation {
        Some(reconciliation) if !reconciliation.is_ok() => {
            Err(reconciliation.to_string().trim_start().to_owned())
        }
        _ => Ok(buffer),
    }
}

fn buffer_check(outcome: AcquisitionOutcome) -> StepResult {
    match checked_buffer(outcome) {
        Ok(_) => StepResult::check(STEP_BUFFER_CHECK, true, ""),
        Err(message) => StepResult::check(STEP_BUFFER_CHECK, false, message),
    }
}

/// Acquisition of a single buffer.
#[derive(Debug, Clone, Copy)]
pub struct SingleAcquisition;

impl<D: DeviceSession> DeviceTest<D> for SingleAcquisition {
    fn name(&self) -> &'static str {
        "SingleAcquisition"
    }

    fn run(&self, session: &mut D, _settings: &DeviceSettings<'_>) -> Vec<StepResult> {
        if let Err(err) = acquisition::configure_single(session) {
            return vec![StepResult::check(STEP_BUFFER_CHECK, false, err.to_string())];
        }
        vec![buffer_check(single_acquisition(session, 1))]
    }
}

/// Five software-triggered buffers.
#[derive(Debug, Clone, Copy)]
pub struct SoftwareTrigger;

impl<D: DeviceSession> DeviceTest<D> for SoftwareTrigger {
    fn name(&self) -> &'static str {
        "SoftwareTrigger"
    }

    fn run(&self, session: &mut D, settings: &DeviceSettings<'_>) -> Vec<StepResult> {
        let expected = settings.boolean("SoftwareTriggerSupport").unwrap_or(true);

        match session.is_software_trigger_supported() {
            Ok(true) => {}
            Ok(false) => return vec![StepResult::check(STEP_NO_SUPPORT, !expected, "")],
            Err(err) => return vec![StepResult::check(STEP_NO_SUPPORT, false, err.to_string())],
        }

        let delay = settings.double("SoftwareTriggerWait").unwrap_or(0.0);

        if let Err(err) = acquisition::configure_software_trigger(session) {
            return vec![StepResult::check(STEP_BUFFER_CHECK, false, err.to_string())];
        }

        let params = TriggerParams {
            trigger_delay: Duration::try_from_secs_f64(delay).unwrap_or_default(),
            ..TriggerParams::default()
        };
        let outcome = acquisition::run_triggered(session, &params);

        vec![StepResult::check(
            STEP_BUFFER_CHECK,
            outcome.is_success(),
            outcome.to_string(),
        )]
    }
}

/// Multi-component delivery of the components listed under `Multipart`.
#[derive(Debug, Clone, Copy)]
pub struct Multipart;

impl<D: DeviceSession> DeviceTest<D> for Multipart {
    fn name(&self) -> &'static str {
        "Multipart"
    }

    fn run(&self, session: &mut D, settings: &DeviceSettings<'_>) -> Vec<StepResult> {
        let components = settings.string_list("Multipart").unwrap_or_default();

        if let Err(err) = acquisition::configure_single(session) {
            warn!(error = %err, "Single frame mode unavailable");
        }

        multipart::negotiate_and_run(session, &components, single_acquisition)
    }
}

/// Chunk metadata decoding.
#[derive(Debug, Clone, Copy)]
pub struct Chunks;

impl Chunks {
    fn acquire_and_decode<D: DeviceSession>(
        session: &mut D,
        request: &ChunkRequest,
        n_parts: usize,
    ) -> Result<String, String> {
        let mut parser = session.create_chunk_parser().map_err(|err| err.to_string())?;
        session
            .set_chunks(request.chunk_list())
            .map_err(|err| err.to_string())?;
        acquisition::configure_single(session).map_err(|err| err.to_string())?;

        let buffer = checked_buffer(single_acquisition(session, n_parts))?;
        chunks::decode(parser.as_mut(), &buffer, request).map_err(|err| err.to_string())
    }
}

impl<D: DeviceSession> DeviceTest<D> for Chunks {
    fn name(&self) -> &'static str {
        "Chunks"
    }

    fn run(&self, session: &mut D, settings: &DeviceSettings<'_>) -> Vec<StepResult> {
        let expected = settings.boolean("ChunksSupport").unwrap_or(true);

        match session.are_chunks_available() {
            Ok(true) => {}
            Ok(false) => return vec![StepResult::check(STEP_NO_SUPPORT, !expected, "")],
            Err(err) => return vec![StepResult::check(STEP_NO_SUPPORT, false, err.to_string())],
        }

        let n_parts = settings
            .int64("ChunksNParts")
            .and_then(|n| usize::try_from(n).ok())
            .unwrap_or(1);
        let fields = settings
            .string_list("ChunkList")
            .unwrap_or_else(|| vec!["Width".to_owned(), "Height".to_owned()]);
        let selectors = settings
            .string_list("ChunkSelector")
            .unwrap_or_else(|| vec![IGNORE_SELECTOR.to_owned(), IGNORE_SELECTOR.to_owned()]);
        let request = ChunkRequest::from_lists(fields, &selectors);

        let decoded = Self::acquire_and_decode(session, &request, n_parts);

        if let Err(err) = session.set_chunks(&[]) {
            warn!(error = %err, "Failed to disable chunks");
        }

        vec![match decoded {
            Ok(report) => StepResult::check(STEP_BUFFER_CHECK, true, report),
            Err(message) => StepResult::check(STEP_BUFFER_CHECK, false, message),
        }]
    }
}

/// Network interface and stream channel counts of GigE Vision devices.
///
/// Other devices produce no steps.
#[derive(Debug, Clone, Copy)]
pub struct GigEVision;

impl GigEVision {
    fn count(step: &str, count: Result<u32, DeviceError>, expected: i64) -> StepResult {
        match count {
            Ok(count) => {
                let ok = i64::from(count) == expected;
                StepResult::check(step, ok, count.to_string())
            }
            Err(err) => StepResult::check(step, false, err.to_string()),
        }
    }
}

impl<D: DeviceSession> DeviceTest<D> for GigEVision {
    fn name(&self) -> &'static str {
        "GigEVision"
    }

    fn run(&self, session: &mut D, settings: &DeviceSettings<'_>) -> Vec<StepResult> {
        let Some(n_network_interfaces) = session.n_network_interfaces() else {
            debug!("Not a GigE Vision device");
            return Vec::new();
        };
        let mut steps = Vec::with_capacity(3);

        let expected = settings.int64("NNetworkInterfaces").unwrap_or(1);
        steps.push(Self::count("NNetworkInterfaces", n_network_interfaces, expected));

        let expected = settings.int64("NStreamChannels").unwrap_or(1);
        let n_stream_channels = session
            .n_stream_channels()
            .unwrap_or_else(|| Err(DeviceError::unsupported("Stream channels")));
        steps.push(Self::count("NStreamChannels", n_stream_channels, expected));

        steps.push(if expected > 0 {
            match session.current_stream_channel() {
                Some(Ok(_)) => StepResult::check("StreamChannel", true, ""),
                Some(Err(err)) => StepResult::check("StreamChannel", false, err.to_string()),
                None => StepResult::check(
                    "StreamChannel",
                    false,
                    DeviceError::unsupported("Stream channel").to_string(),
                ),
            }
        } else {
            StepResult::new("StreamChannel", TestStatus::Ignored, "")
        });

        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestConfig;
    use crate::sim::{SimConfig, SimDevice, SimFaults, SimGigEVision};
    use crate::traits::DeviceIdentity;
    use serial_test::serial;
    use std::path::Path;

    fn fast_config() -> SimConfig {
        SimConfig {
            width: 16,
            height: 8,
            frame_rate: 50.0,
            ..SimConfig::default()
        }
    }

    fn config(document: &str) -> TestConfig {
        TestConfig::parse(document, Path::new("test")).expect("configuration should parse")
    }

    fn sim_identity() -> DeviceIdentity {
        SimDevice::new(SimConfig::default()).identity().clone()
    }

    fn run_test(
        test: &dyn DeviceTest<SimDevice>,
        device: &mut SimDevice,
        document: &str,
    ) -> Vec<StepResult> {
        let config = config(document);
        let settings = config.device(&sim_identity());
        test.run(device, &settings)
    }

    fn statuses(steps: &[StepResult]) -> Vec<(&str, TestStatus)> {
        steps
            .iter()
            .map(|step| (step.step.as_str(), step.status))
            .collect()
    }

    #[test]
    fn test_registry_order() {
        let names: Vec<&str> = registry::<SimDevice>()
            .iter()
            .map(|test| test.name())
            .collect();
        assert_eq!(
            names,
            [
                "Properties",
                "MultipleAcquisitionA",
                "SingleAcquisition",
                "SoftwareTrigger",
                "MultipleAcquisitionB",
                "Multipart",
                "Chunks",
                "GigEVision",
            ]
        );
    }

    #[test]
    fn test_properties_match_configuration() {
        let mut device = SimDevice::new(fast_config());
        let steps = run_test(
            &Properties,
            &mut device,
            "[\"PiCam:Simulated\"]\nSensorSize = [16, 8]\n",
        );

        assert_eq!(
            statuses(&steps),
            [
                ("SensorSizeReadout", TestStatus::Success),
                ("SensorSizeCheck", TestStatus::Success),
                ("GainAvailable", TestStatus::Success),
                ("GainReadout", TestStatus::Success),
                ("ExposureTimeAvailable", TestStatus::Success),
                ("ExposureTimeReadout", TestStatus::Success),
            ]
        );
        assert_eq!(steps[1].message, "16x8");
    }

    #[test]
    fn test_properties_mismatch_and_missing_size() {
        let mut device = SimDevice::new(SimConfig {
            gain_available: false,
            ..fast_config()
        });

        let steps = run_test(
            &Properties,
            &mut device,
            "[\"PiCam:Simulated\"]\nSensorSize = [640, 480]\n",
        );
        assert_eq!(steps[1].message, "Found 16x8 instead of 640x480");
        assert_eq!(steps[2].status, TestStatus::Failure);
        assert!(steps.iter().all(|step| step.step != "GainReadout"));

        let steps = run_test(&Properties, &mut device, "");
        assert_eq!(steps[1].status, TestStatus::Ignored);
    }

    #[test]
    #[serial]
    fn test_multiple_acquisition_reports_rate() {
        let mut device = SimDevice::new(fast_config());
        let steps = run_test(
            &MultipleAcquisition::A,
            &mut device,
            "[\"PiCam:Simulated\"]\nFrameRateA = 50\n",
        );

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].message, "10/10");
        assert_eq!(steps[0].status, TestStatus::Success);
        assert_eq!(steps[1].step, "FrameRate");
        assert_eq!(steps[1].status, TestStatus::Success, "{}", steps[1].message);
        assert_eq!(steps[1].message, "50.00 Hz");
    }

    #[test]
    #[serial]
    fn test_multiple_acquisition_host_clock() {
        let mut device = SimDevice::new(fast_config());
        let steps = run_test(
            &MultipleAcquisition::A,
            &mut device,
            "[\"PiCam:Simulated\"]\nFrameRateA = 20\nUseSystemTimestamp = true\n",
        );

        assert_eq!(steps[0].message, "10/10");
        assert_eq!(steps[1].status, TestStatus::Success, "{}", steps[1].message);
        assert!(steps[1].message.ends_with(" Hz"));
    }

    #[test]
    #[serial]
    fn test_multiple_acquisition_rejected_rate() {
        let mut device = SimDevice::new(fast_config());
        let steps = run_test(
            &MultipleAcquisition::B,
            &mut device,
            "[\"PiCam:Simulated\"]\nFrameRateB = -1.0\n",
        );

        assert_eq!(statuses(&steps), [(STEP_BUFFER_CHECK, TestStatus::Failure)]);
    }

    #[test]
    #[serial]
    fn test_single_acquisition() {
        let mut device = SimDevice::new(fast_config());
        let steps = run_test(&SingleAcquisition, &mut device, "");
        assert_eq!(statuses(&steps), [(STEP_BUFFER_CHECK, TestStatus::Success)]);

        let mut device = SimDevice::new(fast_config().with_faults(SimFaults {
            fail_every: Some(1),
            ..SimFaults::default()
        }));
        let steps = run_test(&SingleAcquisition, &mut device, "");
        assert_eq!(steps[0].status, TestStatus::Failure);
        assert_eq!(steps[0].message, TRANSFER_FAILURE);
    }

    #[test]
    #[serial]
    fn test_software_trigger() {
        let mut device = SimDevice::new(fast_config());
        let steps = run_test(&SoftwareTrigger, &mut device, "");
        assert_eq!(steps[0].step, STEP_BUFFER_CHECK);
        assert_eq!(steps[0].message, "5/5");
        assert_eq!(steps[0].status, TestStatus::Success);
    }

    #[test]
    fn test_software_trigger_not_supported() {
        let mut device = SimDevice::new(SimConfig {
            software_trigger: false,
            ..fast_config()
        });

        let steps = run_test(&SoftwareTrigger, &mut device, "");
        assert_eq!(statuses(&steps), [(STEP_NO_SUPPORT, TestStatus::Failure)]);

        let steps = run_test(
            &SoftwareTrigger,
            &mut device,
            "[\"PiCam:Simulated\"]\nSoftwareTriggerSupport = false\n",
        );
        assert_eq!(statuses(&steps), [(STEP_NO_SUPPORT, TestStatus::Success)]);
    }

    #[test]
    #[serial]
    fn test_multipart_two_components() {
        let mut device = SimDevice::new(fast_config());
        let steps = run_test(
            &Multipart,
            &mut device,
            "[\"PiCam:Simulated\"]\nMultipart = \"Intensity Range\"\n",
        );

        assert_eq!(
            statuses(&steps),
            [
                ("Enable", TestStatus::Success),
                (STEP_BUFFER_CHECK, TestStatus::Success),
            ]
        );
        assert!(!device.multipart_enabled());
    }

    #[test]
    fn test_multipart_without_configuration() {
        let mut device = SimDevice::new(SimConfig {
            multipart: false,
            ..fast_config()
        });
        let steps = run_test(&Multipart, &mut device, "");
        assert_eq!(statuses(&steps), [(STEP_NO_SUPPORT, TestStatus::Success)]);
    }

    #[test]
    #[serial]
    fn test_chunks_decoded_with_selector() {
        let mut device = SimDevice::new(fast_config());
        let steps = run_test(
            &Chunks,
            &mut device,
            "[\"PiCam:Simulated\"]\nChunkList = \"Width Gain\"\n\
             ChunkSelector = \"GainSelector Red Blue\"\n",
        );

        assert_eq!(steps[0].status, TestStatus::Success, "{}", steps[0].message);
        assert_eq!(steps[0].message, "16 16 1.5 2");
        assert!(device.chunk_list().is_empty());
    }

    #[test]
    #[serial]
    fn test_chunks_default_list() {
        let mut device = SimDevice::new(fast_config());
        let steps = run_test(&Chunks, &mut device, "");
        assert_eq!(steps[0].message, "16 8");
    }

    #[test]
    #[serial]
    fn test_chunks_unknown_field_fails() {
        let mut device = SimDevice::new(fast_config());
        let steps = run_test(
            &Chunks,
            &mut device,
            "[\"PiCam:Simulated\"]\nChunkList = \"Temperature\"\n",
        );
        assert_eq!(steps[0].status, TestStatus::Failure);
        assert!(device.chunk_list().is_empty());
    }

    #[test]
    fn test_chunks_unavailable() {
        let mut device = SimDevice::new(SimConfig {
            chunks: false,
            ..fast_config()
        });
        let steps = run_test(
            &Chunks,
            &mut device,
            "[\"PiCam:Simulated\"]\nChunksSupport = false\n",
        );
        assert_eq!(statuses(&steps), [(STEP_NO_SUPPORT, TestStatus::Success)]);
    }

    #[test]
    fn test_gige_vision_counts() {
        let mut device = SimDevice::new(fast_config());
        let steps = run_test(&GigEVision, &mut device, "");
        assert_eq!(
            statuses(&steps),
            [
                ("NNetworkInterfaces", TestStatus::Success),
                ("NStreamChannels", TestStatus::Success),
                ("StreamChannel", TestStatus::Success),
            ]
        );
        assert_eq!(steps[0].message, "1");
        assert_eq!(steps[1].message, "1");
    }

    #[test]
    fn test_gige_vision_without_stream_channel() {
        let mut device = SimDevice::new(SimConfig {
            gige_vision: Some(SimGigEVision {
                n_network_interfaces: 2,
                n_stream_channels: 0,
            }),
            ..fast_config()
        });

        let steps = run_test(&GigEVision, &mut device, "");
        assert_eq!(
            statuses(&steps),
            [
                ("NNetworkInterfaces", TestStatus::Failure),
                ("NStreamChannels", TestStatus::Failure),
                ("StreamChannel", TestStatus::Failure),
            ]
        );
        assert_eq!(steps[0].message, "2");
        assert_eq!(steps[2].message, "Stream channel not supported");

        let steps = run_test(
            &GigEVision,
            &mut device,
            "[\"PiCam:Simulated\"]\nNNetworkInterfaces = 2\nNStreamChannels = 0\n",
        );
        assert_eq!(
            statuses(&steps),
            [
                ("NNetworkInterfaces", TestStatus::Success),
                ("NStreamChannels", TestStatus::Success),
                ("StreamChannel", TestStatus::Ignored),
            ]
        );
    }

    #[test]
    fn test_gige_vision_skipped_on_other_transports() {
        let mut device = SimDevice::new(SimConfig {
            gige_vision: None,
            ..fast_config()
        });
        assert!(run_test(&GigEVision, &mut device, "").is_empty());
    }
}
