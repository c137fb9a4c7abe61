//! Core traits and types for the device-session abstraction.
//!
//! A [`DeviceSession`] is an already-connected camera. It hands out a
//! [`DeliveryStream`], the live delivery channel through which pooled
//! [`Buffer`]s make their round trip, and reports lifecycle events into an
//! [`EventSink`] owned by the caller.

use crossbeam_channel::Sender;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Trigger source name selecting software triggering.
pub const SOFTWARE_TRIGGER: &str = "Software";

/// Delivery status of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferStatus {
    /// Freshly allocated, never delivered.
    #[default]
    Cleared,
    /// Payload delivered completely.
    Success,
    /// The device did not complete the buffer in time.
    Timeout,
    /// Delivery was aborted (acquisition stopped while in flight).
    Aborted,
    /// Part of the payload was lost in transfer.
    MissingPackets,
    /// The payload did not fit the buffer.
    SizeMismatch,
}

impl BufferStatus {
    /// Whether this status marks a transfer error.
    pub const fn is_transfer_error(self) -> bool {
        matches!(self, Self::MissingPackets | Self::SizeMismatch)
    }
}

impl fmt::Display for BufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cleared => "cleared",
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
            Self::MissingPackets => "missing packets",
            Self::SizeMismatch => "size mismatch",
        };
        f.write_str(name)
    }
}

/// Which clock a buffer timestamp is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampSource {
    /// Device clock, stamped at exposure.
    #[default]
    Device,
    /// Host clock, stamped on reception.
    System,
}

/// Acquisition mode of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionMode {
    /// Free-running delivery until stopped.
    #[default]
    Continuous,
    /// One buffer per start.
    SingleFrame,
}

/// Identity of a connected device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device id as reported by the provider.
    pub id: String,
    /// Vendor name.
    pub vendor: String,
    /// Model name.
    pub model: String,
}

impl DeviceIdentity {
    /// `vendor:model` key used for per-device configuration lookups.
    pub fn vendor_model(&self) -> String {
        format!("{}:{}", self.vendor, self.model)
    }
}

/// One component sub-stream inside a delivered buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPart {
    /// Component name (e.g. `Intensity`, `Range`).
    pub component: String,
    /// Byte offset of the part in the buffer data.
    pub offset: usize,
    /// Part size in bytes.
    pub size: usize,
}

/// A reusable acquisition buffer.
///
/// Allocated once at pool-fill time and recycled for the lifetime of a stream.
#[derive(Debug, Clone)]
pub struct Buffer {
    /// Backing storage; its length is the buffer capacity.
    pub data: Vec<u8>,
    /// Bytes written by the last delivery.
    pub received: usize,
    /// Delivery status of the last delivery.
    pub status: BufferStatus,
    /// Component parts of the last delivery.
    pub parts: Vec<BufferPart>,
    /// Device frame counter.
    pub frame_id: u64,
    /// Device-clock timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Host-clock timestamp in nanoseconds.
    pub system_timestamp_ns: u64,
    /// Whether the payload ends with chunk data.
    pub has_chunks: bool,
}

impl Buffer {
    /// Allocate a zeroed buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            received: 0,
            status: BufferStatus::Cleared,
            parts: Vec::new(),
            frame_id: 0,
            timestamp_ns: 0,
            system_timestamp_ns: 0,
            has_chunks: false,
        }
    }

    /// Buffer capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of component parts in the last delivery.
    pub fn n_parts(&self) -> usize {
        self.parts.len()
    }

    /// Timestamp from the requested clock.
    pub const fn timestamp(&self, source: TimestampSource) -> u64 {
        match source {
            TimestampSource::Device => self.timestamp_ns,
            TimestampSource::System => self.system_timestamp_ns,
        }
    }

    /// Bytes delivered by the last transfer.
    pub fn payload(&self) -> &[u8] {
        self.data.get(..self.received).unwrap_or(&self.data)
    }

    /// Reset delivery metadata before the buffer goes back in flight.
    pub fn reset(&mut self) {
        self.received = 0;
        self.status = BufferStatus::Cleared;
        self.parts.clear();
        self.frame_id = 0;
        self.timestamp_ns = 0;
        self.system_timestamp_ns = 0;
        self.has_chunks = false;
    }
}

/// Lifecycle event reported by a delivery stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// The stream worker is up. Fires once per stream.
    Init,
    /// A buffer entered flight.
    StartBuffer,
    /// A buffer completed, successful or not.
    BufferDone(BufferStatus),
    /// The stream was torn down. Fires once per stream.
    Exit,
}

/// Producer side of the event channel handed to a stream.
pub type EventSink = Sender<StreamEvent>;

/// Error type for device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// No device with the given id.
    #[error("Device {0} not found")]
    DeviceNotFound(String),
    /// The device could not be opened.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// The device lacks the requested capability.
    #[error("{feature} not supported")]
    Unsupported {
        /// Capability name.
        feature: String,
    },
    /// A parameter value was rejected.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// Error during a streaming operation.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,
    /// A chunk feature could not be read.
    #[error("Chunk {name}: {reason}")]
    Chunk {
        /// Chunk feature name.
        name: String,
        /// What went wrong.
        reason: String,
    },
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// Shorthand for [`DeviceError::Unsupported`].
    pub fn unsupported(feature: &str) -> Self {
        Self::Unsupported {
            feature: feature.to_owned(),
        }
    }
}

/// Result type for device operations.
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Decoder of chunk metadata appended to a buffer payload.
pub trait ChunkParser {
    /// Set a string feature (typically a selector) on the parser.
    fn set_string_feature(&mut self, name: &str, value: &str) -> Result<()>;

    /// Decode an integer chunk feature.
    fn integer_value(&self, buffer: &Buffer, name: &str) -> Result<i64>;

    /// Decode a floating-point chunk feature.
    fn float_value(&self, buffer: &Buffer, name: &str) -> Result<f64>;
}

/// Live delivery channel of a device session.
pub trait DeliveryStream {
    /// Hand a buffer to the stream for filling.
    fn push_buffer(&mut self, buffer: Buffer) -> Result<()>;

    /// Wait up to `timeout` for a completed buffer.
    fn timeout_pop_buffer(&mut self, timeout: Duration) -> Option<Buffer>;

    /// Start delivery.
    fn start(&mut self) -> Result<()>;

    /// Stop delivery. Buffers in flight stay owned by the stream.
    fn stop(&mut self) -> Result<()>;

    /// Request one delivery cycle while in software-trigger mode.
    fn software_trigger(&mut self) -> Result<()>;

    /// Tear the stream down, releasing every buffer it still holds.
    ///
    /// The `Exit` event has been emitted when this returns.
    fn teardown(self);
}

/// Abstraction over a connected camera.
pub trait DeviceSession {
    /// The stream type returned by `create_stream`.
    type Stream<'a>: DeliveryStream
    where
        Self: 'a;

    /// Device identity.
    fn identity(&self) -> &DeviceIdentity;

    /// Current acquisition mode.
    fn acquisition_mode(&self) -> Result<AcquisitionMode>;

    /// Set acquisition mode.
    fn set_acquisition_mode(&mut self, mode: AcquisitionMode) -> Result<()>;

    /// Current frame rate in Hz.
    fn frame_rate(&self) -> Result<f64>;

    /// Set frame rate in Hz.
    fn set_frame_rate(&mut self, frame_rate: f64) -> Result<()>;

    /// Size in bytes a buffer needs to hold one delivery.
    fn payload_size(&self) -> Result<usize>;

    /// Sensor size as `(width, height)`.
    fn sensor_size(&self) -> Result<(u32, u32)>;

    /// Whether gain control is available.
    fn is_gain_available(&self) -> Result<bool>;

    /// Current gain.
    fn gain(&self) -> Result<f64>;

    /// Whether exposure time control is available.
    fn is_exposure_time_available(&self) -> Result<bool>;

    /// Current exposure time in microseconds.
    fn exposure_time(&self) -> Result<f64>;

    /// Whether a software trigger source exists.
    fn is_software_trigger_supported(&self) -> Result<bool>;

    /// Select a trigger source, or free-running delivery with `None`.
    fn set_trigger(&mut self, source: Option<&str>) -> Result<()>;

    /// Whether multipart delivery is supported.
    fn is_multipart_supported(&self) -> Result<bool>;

    /// Enable or disable multipart delivery.
    fn set_multipart(&mut self, enable: bool) -> Result<()>;

    /// Enable a component. With `exclusive`, every other component is
    /// disabled first and `name` becomes the active one.
    fn select_and_enable_component(&mut self, name: &str, exclusive: bool) -> Result<()>;

    /// Whether chunk metadata is available.
    fn are_chunks_available(&self) -> Result<bool>;

    /// Enable the listed chunks; an empty list disables chunk mode.
    fn set_chunks(&mut self, chunks: &[String]) -> Result<()>;

    /// Build a parser for the chunk layout of this device.
    fn create_chunk_parser(&self) -> Result<Box<dyn ChunkParser>>;

    /// Open the delivery channel. `Init` is reported into `events`.
    fn create_stream(&mut self, events: EventSink) -> Result<Self::Stream<'_>>;

    /// Register cache error counter, when the device keeps one.
    fn register_cache_errors(&self) -> Option<u64> {
        None
    }

    /// Network interface count. `None` on devices that are not GigE Vision.
    fn n_network_interfaces(&self) -> Option<Result<u32>> {
        None
    }

    /// Stream channel count. `None` on devices that are not GigE Vision.
    fn n_stream_channels(&self) -> Option<Result<u32>> {
        None
    }

    /// Stream channel in use. `None` on devices that are not GigE Vision.
    fn current_stream_channel(&self) -> Option<Result<u32>> {
        None
    }
}

/// Enumerates and opens devices of one backend.
pub trait DeviceProvider {
    /// The session type opened by this provider.
    type Session: DeviceSession;

    /// Ids of the devices currently available.
    fn device_ids(&self) -> Vec<String>;

    /// Open a session on the device with the given id.
    fn open(&self, id: &str) -> Result<Self::Session>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_reset_keeps_capacity() {
        let mut buffer = Buffer::new(64);
        buffer.received = 32;
        buffer.status = BufferStatus::Success;
        buffer.parts.push(BufferPart {
            component: "Intensity".to_owned(),
            offset: 0,
            size: 32,
        });

        buffer.reset();

        assert_eq!(buffer.capacity(), 64);
        assert_eq!(buffer.n_parts(), 0);
        assert_eq!(buffer.status, BufferStatus::Cleared);
        assert!(buffer.payload().is_empty());
    }

    #[test]
    fn test_timestamp_source_selection() {
        let mut buffer = Buffer::new(1);
        buffer.timestamp_ns = 100;
        buffer.system_timestamp_ns = 200;
        assert_eq!(buffer.timestamp(TimestampSource::Device), 100);
        assert_eq!(buffer.timestamp(TimestampSource::System), 200);
    }

    #[test]
    fn test_vendor_model_key() {
        let identity = DeviceIdentity {
            id: "sim-0".to_owned(),
            vendor: "PiCam".to_owned(),
            model: "Simulated".to_owned(),
        };
        assert_eq!(identity.vendor_model(), "PiCam:Simulated");
    }

    #[test]
    fn test_error_display() {
        let err = DeviceError::unsupported("Multipart");
        assert_eq!(err.to_string(), "Multipart not supported");
    }
}
