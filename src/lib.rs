//! Pi-Cam-Verify: streaming-acquisition verification for cameras
//!
//! This library drives a camera's delivery pipeline through a small recycled
//! buffer pool, reconciles the stream's lifecycle events, measures the frame
//! rate, decodes chunk metadata and negotiates multipart delivery. Devices are
//! reached through trait-based sessions, with a V4L2 backend for real hardware
//! and a simulated camera for testing.

pub mod acquisition;
pub mod chunks;
pub mod config;
pub mod device;
pub mod multipart;
pub mod pool;
pub mod report;
pub mod runner;
pub mod sim;
pub mod stats;
pub mod suite;
pub mod traits;

pub use acquisition::{AcquisitionOutcome, AcquisitionParams, FrameInterval, TriggerParams};
pub use config::{ConfigError, DeviceSettings, TestConfig};
pub use device::{V4L2Device, V4l2Provider};
pub use report::{Recorder, StepResult, TestResult, TestStatus};
pub use runner::{RunOptions, Runner};
pub use sim::{SimConfig, SimDevice, SimProvider};
pub use traits::{
    Buffer, BufferStatus, ChunkParser, DeliveryStream, DeviceError, DeviceIdentity,
    DeviceProvider, DeviceSession, StreamEvent,
};
