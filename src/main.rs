//! pi-cam-verify binary: runs the verification suite on the selected cameras.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pi_cam_verify::report::{PrintRecorder, Summary};
use pi_cam_verify::{DeviceProvider, RunOptions, Runner, SimProvider, TestConfig, V4l2Provider};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-process simulated camera
    Sim,
    /// V4L2 capture devices
    V4l2,
}

#[derive(Parser)]
#[command(name = "pi-cam-verify")]
#[command(about = "Check camera streaming acquisition against expected behaviour")]
#[command(version)]
struct Cli {
    /// Device selection (glob over device ids, `|` separates alternatives)
    #[arg(short, long, value_name = "PATTERN", default_value = "*")]
    name: String,

    /// Test selection (glob over test names)
    #[arg(short, long, value_name = "PATTERN", default_value = "*")]
    test: String,

    /// Configuration file replacing the bundled one
    #[arg(short, long, value_name = "PATH")]
    configuration: Option<PathBuf>,

    /// Number of passes over the selected devices
    #[arg(short, long, default_value = "1")]
    iterations: u32,

    /// Check the register cache error count of each device
    #[arg(short = 'a', long)]
    cache_check: bool,

    /// Device backend
    #[arg(short, long, value_enum, default_value = "v4l2")]
    backend: Backend,

    /// Log filter directives (e.g. `debug` or `pi_cam_verify::acquisition=trace`)
    #[arg(short, long, value_name = "FILTER")]
    debug: Option<String>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = match &cli.debug {
        Some(directives) => EnvFilter::try_new(directives)
            .with_context(|| format!("invalid log filter '{directives}'"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match &cli.configuration {
        Some(path) => TestConfig::from_file(path)?,
        None => TestConfig::bundled()?,
    };

    let options = RunOptions {
        device_pattern: cli.name,
        test_pattern: cli.test,
        iterations: cli.iterations,
        cache_check: cli.cache_check,
    };

    let passed = match cli.backend {
        Backend::Sim => run(SimProvider::default(), &config, &options)?,
        Backend::V4l2 => run(V4l2Provider, &config, &options)?,
    };

    Ok(if passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn run<P: DeviceProvider>(provider: P, config: &TestConfig, options: &RunOptions) -> Result<bool> {
    let n_devices = provider.device_ids().len();
    println!("Found {n_devices} device{}", if n_devices == 1 { "" } else { "s" });

    let runner = Runner::new(provider, config);
    let results = runner.run(options, &mut PrintRecorder)?;

    let summary = Summary::of(&results);
    println!("{summary}");
    Ok(summary.passed())
}
