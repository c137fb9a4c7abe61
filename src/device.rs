//! V4L2 device session using the v4l crate.

use v4l::buffer::Type;
use v4l::capability::Flags;
use v4l::control::Value;
use v4l::fraction::Fraction;
use v4l::io::mmap::Stream;
use v4l::io::traits::{CaptureStream as V4lCaptureStream, Stream as V4lStream};
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::traits::{
    AcquisitionMode, Buffer, BufferPart, BufferStatus, ChunkParser, DeliveryStream, DeviceError,
    DeviceIdentity, DeviceProvider, DeviceSession, EventSink, Result, StreamEvent,
};
use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace};

/// Name of the only component a V4L2 capture device delivers.
pub const VIDEO_COMPONENT: &str = "Video";

/// Kernel-side mmap buffers queued by a stream.
const MMAP_BUFFER_COUNT: u32 = 4;

const CID_GAIN: u32 = 0x0098_0913;
const CID_EXPOSURE_ABSOLUTE: u32 = 0x009a_0902;
/// `V4L2_CID_EXPOSURE_ABSOLUTE` counts in 100 µs units.
const EXPOSURE_UNIT_US: f64 = 100.0;

fn stream_error(err: &std::io::Error) -> DeviceError {
    DeviceError::StreamError(err.to_string())
}

/// V4L2 capture device.
pub struct V4L2Device {
    device: Device,
    identity: DeviceIdentity,
    mode: AcquisitionMode,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: u32) -> Result<Self> {
        Self::open_path(Path::new(&format!("/dev/video{index}")))
    }

    /// Open a V4L2 device node.
    pub fn open_path(path: &Path) -> Result<Self> {
        let device =
            Device::with_path(path).map_err(|err| DeviceError::DeviceOpenFailed(err.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|err| DeviceError::DeviceOpenFailed(err.to_string()))?;

        if !caps.capabilities.contains(Flags::VIDEO_CAPTURE | Flags::STREAMING) {
            return Err(DeviceError::DeviceOpenFailed(format!(
                "{} is not a streaming capture device",
                path.display()
            )));
        }

        let identity = DeviceIdentity {
            id: path.display().to_string(),
            vendor: caps.driver,
            model: caps.card,
        };
        debug!(
            id = %identity.id,
            device = %identity.vendor_model(),
            bus = %caps.bus,
            "Opened V4L2 device"
        );

        Ok(Self {
            device,
            identity,
            mode: AcquisitionMode::Continuous,
        })
    }

    /// Request a YUYV capture format of the given size.
    ///
    /// Returns the size the driver actually applied.
    pub fn set_capture_size(&mut self, width: u32, height: u32) -> Result<(u32, u32)> {
        let mut fmt = self.device.format().map_err(|err| stream_error(&err))?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = FourCC::new(b"YUYV");

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| stream_error(&err))?;
        Ok((fmt.width, fmt.height))
    }

    fn has_control(&self, id: u32) -> Result<bool> {
        let controls = self.device.query_controls()?;
        Ok(controls.iter().any(|description| description.id == id))
    }

    #[allow(clippy::cast_precision_loss)]
    fn control_value(&self, id: u32, name: &str) -> Result<f64> {
        if !self.has_control(id)? {
            return Err(DeviceError::unsupported(name));
        }
        match self.device.control(id)?.value {
            Value::Integer(value) => Ok(value as f64),
            Value::Boolean(value) => Ok(f64::from(u8::from(value))),
            _ => Err(DeviceError::InvalidParameter(format!(
                "{name} is not a numeric control"
            ))),
        }
    }
}

impl DeviceSession for V4L2Device {
    type Stream<'a> = V4L2Stream<'a>;

    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn acquisition_mode(&self) -> Result<AcquisitionMode> {
        Ok(self.mode)
    }

    /// Single-frame mode is emulated by the stream, which delivers one
    /// buffer per start.
    fn set_acquisition_mode(&mut self, mode: AcquisitionMode) -> Result<()> {
        self.mode = mode;
        Ok(())
    }

    fn frame_rate(&self) -> Result<f64> {
        let params = self.device.params().map_err(|err| stream_error(&err))?;
        let Fraction {
            numerator,
            denominator,
        } = params.interval;
        if numerator == 0 {
            return Err(DeviceError::StreamError("frame interval is zero".to_owned()));
        }
        Ok(f64::from(denominator) / f64::from(numerator))
    }

    fn set_frame_rate(&mut self, frame_rate: f64) -> Result<()> {
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(DeviceError::InvalidParameter(format!(
                "frame rate {frame_rate} Hz"
            )));
        }

        // Interval expressed in ms over frames, to keep fractional rates.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millihertz = (frame_rate * 1000.0).round() as u32;
        let params = Parameters::new(Fraction::new(1000, millihertz.max(1)));
        let applied = self
            .device
            .set_params(&params)
            .map_err(|err| stream_error(&err))?;

        debug!(
            requested = frame_rate,
            numerator = applied.interval.numerator,
            denominator = applied.interval.denominator,
            "Frame interval applied"
        );
        Ok(())
    }

    fn payload_size(&self) -> Result<usize> {
        let fmt = self.device.format().map_err(|err| stream_error(&err))?;
        Ok(fmt.size as usize)
    }

    fn sensor_size(&self) -> Result<(u32, u32)> {
        let fmt = self.device.format().map_err(|err| stream_error(&err))?;
        Ok((fmt.width, fmt.height))
    }

    fn is_gain_available(&self) -> Result<bool> {
        self.has_control(CID_GAIN)
    }

    fn gain(&self) -> Result<f64> {
        self.control_value(CID_GAIN, "Gain")
    }

    fn is_exposure_time_available(&self) -> Result<bool> {
        self.has_control(CID_EXPOSURE_ABSOLUTE)
    }

    fn exposure_time(&self) -> Result<f64> {
        Ok(self.control_value(CID_EXPOSURE_ABSOLUTE, "ExposureTime")? * EXPOSURE_UNIT_US)
    }

    fn is_software_trigger_supported(&self) -> Result<bool> {
        Ok(false)
    }

    fn set_trigger(&mut self, source: Option<&str>) -> Result<()> {
        match source {
            None => Ok(()),
            Some(source) => Err(DeviceError::unsupported(&format!("Trigger source {source}"))),
        }
    }

    fn is_multipart_supported(&self) -> Result<bool> {
        Ok(false)
    }

    fn set_multipart(&mut self, enable: bool) -> Result<()> {
        if enable {
            Err(DeviceError::unsupported("Multipart"))
        } else {
            Ok(())
        }
    }

    fn select_and_enable_component(&mut self, name: &str, _exclusive: bool) -> Result<()> {
        if name == VIDEO_COMPONENT {
            Ok(())
        } else {
            Err(DeviceError::InvalidParameter(format!(
                "unknown component {name}"
            )))
        }
    }

    fn are_chunks_available(&self) -> Result<bool> {
        Ok(false)
    }

    fn set_chunks(&mut self, chunks: &[String]) -> Result<()> {
        if chunks.is_empty() {
            Ok(())
        } else {
            Err(DeviceError::unsupported("Chunks"))
        }
    }

    fn create_chunk_parser(&self) -> Result<Box<dyn ChunkParser>> {
        Err(DeviceError::unsupported("Chunks"))
    }

    fn create_stream(&mut self, events: EventSink) -> Result<Self::Stream<'_>> {
        let stream = Stream::with_buffers(&self.device, Type::VideoCapture, MMAP_BUFFER_COUNT)
            .map_err(|err| stream_error(&err))?;

        let _ = events.send(StreamEvent::Init);

        Ok(V4L2Stream {
            stream,
            queue: VecDeque::new(),
            events,
            single_frame: self.mode == AcquisitionMode::SingleFrame,
            n_delivered: 0,
            running: false,
        })
    }
}

/// V4L2 delivery stream over mmap buffers.
///
/// Frames are copied out of the kernel buffers into the pooled buffers when
/// they are popped, so a frame is only dequeued when a pooled buffer is
/// waiting for it.
pub struct V4L2Stream<'a> {
    stream: Stream<'a>,
    queue: VecDeque<Buffer>,
    events: EventSink,
    single_frame: bool,
    n_delivered: u64,
    running: bool,
}

impl V4L2Stream<'_> {
    fn fill(buffer: &mut Buffer, frame: &[u8], meta: &v4l::buffer::Metadata) -> BufferStatus {
        let used = frame.get(..meta.bytesused as usize).unwrap_or(frame);
        let Some(dst) = buffer.data.get_mut(..used.len()) else {
            return BufferStatus::SizeMismatch;
        };
        dst.copy_from_slice(used);

        // Safe conversions: V4L2 timestamps are always non-negative in practice
        #[allow(clippy::cast_sign_loss)]
        let secs = meta.timestamp.sec.max(0) as u64;
        #[allow(clippy::cast_sign_loss)]
        let usecs = meta.timestamp.usec.max(0) as u64;

        buffer.received = used.len();
        buffer.frame_id = u64::from(meta.sequence);
        buffer.timestamp_ns = secs
            .saturating_mul(1_000_000_000)
            .saturating_add(usecs.saturating_mul(1000));
        buffer.system_timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
        buffer.parts.push(BufferPart {
            component: VIDEO_COMPONENT.to_owned(),
            offset: 0,
            size: used.len(),
        });

        BufferStatus::Success
    }
}

impl DeliveryStream for V4L2Stream<'_> {
    fn push_buffer(&mut self, buffer: Buffer) -> Result<()> {
        self.queue.push_back(buffer);
        Ok(())
    }

    fn timeout_pop_buffer(&mut self, timeout: Duration) -> Option<Buffer> {
        if !self.running || (self.single_frame && self.n_delivered > 0) {
            std::thread::sleep(timeout);
            return None;
        }
        let mut buffer = self.queue.pop_front()?;

        self.stream.set_timeout(timeout);
        let status = match self.stream.next() {
            Ok((frame, meta)) => {
                let _ = self.events.send(StreamEvent::StartBuffer);
                Self::fill(&mut buffer, frame, meta)
            }
            Err(err) => {
                debug!(error = %err, "No frame dequeued");
                self.queue.push_front(buffer);
                return None;
            }
        };

        self.n_delivered += 1;
        buffer.status = status;
        trace!(frame_id = buffer.frame_id, %status, "Frame copied");
        let _ = self.events.send(StreamEvent::BufferDone(status));
        Some(buffer)
    }

    fn start(&mut self) -> Result<()> {
        V4lStream::start(&mut self.stream).map_err(|err| stream_error(&err))?;
        self.running = true;
        self.n_delivered = 0;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        V4lStream::stop(&mut self.stream).map_err(|err| stream_error(&err))
    }

    fn software_trigger(&mut self) -> Result<()> {
        Err(DeviceError::unsupported("Software trigger"))
    }

    fn teardown(mut self) {
        if let Err(err) = DeliveryStream::stop(&mut self) {
            debug!(error = %err, "Stop on teardown failed");
        }
        let Self { stream, events, .. } = self;
        drop(stream);
        let _ = events.send(StreamEvent::Exit);
    }
}

/// Provider of the V4L2 capture devices present on the system.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Provider;

impl DeviceProvider for V4l2Provider {
    type Session = V4L2Device;

    fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = v4l::context::enum_devices()
            .iter()
            .map(|node| node.path().display().to_string())
            .collect();
        ids.sort();
        ids
    }

    fn open(&self, id: &str) -> Result<Self::Session> {
        let path = Path::new(id);
        if !path.exists() {
            return Err(DeviceError::DeviceNotFound(id.to_owned()));
        }
        V4L2Device::open_path(path)
    }
}
