//! Full suite runs against simulated cameras with the bundled configuration.

use pi_cam_verify::report::Summary;
use pi_cam_verify::sim::SimFaults;
use pi_cam_verify::{RunOptions, Runner, SimConfig, SimProvider, TestConfig, TestResult, TestStatus};
use serial_test::serial;

fn run_suite(provider: SimProvider, options: &RunOptions) -> Vec<TestResult> {
    let config = TestConfig::bundled().expect("bundled configuration should parse");
    let runner = Runner::new(provider, &config);
    let mut recorded: Vec<TestResult> = Vec::new();
    runner
        .run(options, &mut recorded)
        .expect("selection patterns should be valid")
}

fn find<'r>(results: &'r [TestResult], title: &str) -> &'r TestResult {
    results
        .iter()
        .find(|result| result.title == title)
        .expect(title)
}

#[test]
#[serial]
fn test_full_suite_passes_on_simulated_camera() {
    let options = RunOptions {
        cache_check: true,
        ..RunOptions::default()
    };
    let results = run_suite(SimProvider::default(), &options);

    for result in &results {
        println!("{result}");
    }

    let summary = Summary::of(&results);
    assert!(summary.passed(), "{summary}");
    assert_eq!(summary.n_ignored, 0);

    assert_eq!(find(&results, "Properties:SensorSizeCheck").message, "320x240");
    assert_eq!(find(&results, "MultipleAcquisitionA:BufferCheck").message, "10/10");
    assert_eq!(find(&results, "MultipleAcquisitionA:FrameRate").message, "10.00 Hz");
    assert_eq!(find(&results, "MultipleAcquisitionB:FrameRate").message, "5.00 Hz");
    assert_eq!(find(&results, "SoftwareTrigger:BufferCheck").message, "5/5");
    assert_eq!(find(&results, "Multipart:Enable").status, TestStatus::Success);
    assert_eq!(
        find(&results, "Chunks:BufferCheck").message,
        "320 320 320 320 240 240 240 240 10000 10000 10000 10000 1 1.5 1 2"
    );
    assert_eq!(find(&results, "GigEVision:NStreamChannels").message, "1");
    assert_eq!(
        find(&results, "GigEVision:StreamChannel").status,
        TestStatus::Success
    );
    assert_eq!(
        find(&results, "Genicam:RegisterCache").status,
        TestStatus::Success
    );
    assert!(results.iter().all(|result| result.device == "PiCam:Simulated"));
}

#[test]
#[serial]
fn test_failures_do_not_abort_remaining_tests() {
    let faults = SimFaults {
        fail_every: Some(2),
        ..SimFaults::default()
    };
    let provider = SimProvider::new(vec![SimConfig::default().with_faults(faults)]);
    let options = RunOptions {
        test_pattern: "MultipleAcquisitionA|SoftwareTrigger|Properties".to_owned(),
        ..RunOptions::default()
    };

    let results = run_suite(provider, &options);

    let buffer_check = find(&results, "MultipleAcquisitionA:BufferCheck");
    assert_eq!(buffer_check.status, TestStatus::Failure);
    assert!(buffer_check.message.contains("cb_buffer_err"));

    let trigger = find(&results, "SoftwareTrigger:BufferCheck");
    assert_eq!(trigger.status, TestStatus::Failure);
    assert!(trigger.message.starts_with("1/5"));
    assert!(trigger.message.contains("cb_buffer_err"));

    assert_eq!(
        find(&results, "Properties:GainReadout").status,
        TestStatus::Success
    );
}

#[test]
#[serial]
fn test_unknown_device_type_uses_defaults() {
    let provider = SimProvider::new(vec![SimConfig::default()
        .with_id("sim-7")
        .with_model("Unlisted")]);
    let options = RunOptions {
        test_pattern: "Multipart|Chunks".to_owned(),
        ..RunOptions::default()
    };

    let results = run_suite(provider, &options);

    // no Multipart key: a single-component expectation against a multipart device
    assert_eq!(find(&results, "Multipart:NoSupport").status, TestStatus::Failure);
    assert_eq!(find(&results, "Chunks:BufferCheck").message, "320 240");
    assert!(results.iter().all(|result| result.device == "PiCam:Unlisted"));
}
