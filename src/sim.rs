//! Simulated camera for running the verification suite without hardware.
//!
//! A worker thread plays the device: it takes pushed buffers, fills them at
//! the configured frame rate (or once per software trigger), and reports
//! stream events. Faults can be injected to exercise the failure paths.

use crate::chunks::{chunk_block_len, find_chunk, put_chunk, CHUNK_FEATURE_PREFIX};
use crate::traits::{
    AcquisitionMode, Buffer, BufferPart, BufferStatus, ChunkParser, DeliveryStream,
    DeviceError, DeviceIdentity, DeviceProvider, DeviceSession, EventSink, Result, StreamEvent,
    SOFTWARE_TRIGGER,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

/// Vendor name reported by simulated cameras.
pub const SIM_VENDOR: &str = "PiCam";
/// Model name reported by simulated cameras.
pub const SIM_MODEL: &str = "Simulated";
/// Selector choosing the gain channel read by `ChunkGain`.
pub const GAIN_SELECTOR: &str = "GainSelector";
/// Values accepted by [`GAIN_SELECTOR`].
pub const GAIN_SELECTOR_VALUES: [&str; 4] = ["All", "Red", "Green", "Blue"];

/// Gain offsets per [`GAIN_SELECTOR_VALUES`] entry.
const GAIN_CHANNEL_OFFSETS: [f64; 4] = [0.0, 0.5, 0.0, 1.0];
/// How long `stop` waits for the worker to acknowledge.
const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkKind {
    Integer,
    Float,
    /// One float per gain selector value.
    GainTable,
}

#[derive(Debug, Clone, Copy)]
struct ChunkDef {
    name: &'static str,
    id: u32,
    kind: ChunkKind,
}

impl ChunkDef {
    const fn data_len(&self) -> usize {
        match self.kind {
            ChunkKind::Integer | ChunkKind::Float => 8,
            ChunkKind::GainTable => 8 * GAIN_SELECTOR_VALUES.len(),
        }
    }
}

const CHUNK_DEFS: [ChunkDef; 6] = [
    ChunkDef {
        name: "Width",
        id: 0x1000,
        kind: ChunkKind::Integer,
    },
    ChunkDef {
        name: "Height",
        id: 0x1001,
        kind: ChunkKind::Integer,
    },
    ChunkDef {
        name: "ExposureTime",
        id: 0x1002,
        kind: ChunkKind::Float,
    },
    ChunkDef {
        name: "Gain",
        id: 0x1003,
        kind: ChunkKind::GainTable,
    },
    ChunkDef {
        name: "FrameID",
        id: 0x1004,
        kind: ChunkKind::Integer,
    },
    ChunkDef {
        name: "Timestamp",
        id: 0x1005,
        kind: ChunkKind::Integer,
    },
];

fn chunk_def(name: &str) -> Option<&'static ChunkDef> {
    CHUNK_DEFS.iter().find(|def| def.name == name)
}

/// Faults injected into delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimFaults {
    /// Every n-th delivered buffer reports missing packets.
    pub fail_every: Option<u32>,
    /// Stop delivering after this many buffers.
    pub stop_after: Option<u32>,
    /// Extra parts appended to every buffer.
    pub extra_parts: usize,
    /// Do not report the `Init` event.
    pub skip_init: bool,
}

/// Configuration of one simulated camera.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Device id.
    pub id: String,
    /// Vendor name.
    pub vendor: String,
    /// Model name.
    pub model: String,
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// Initial frame rate in Hz.
    pub frame_rate: f64,
    /// Exposure time in microseconds.
    pub exposure_time: f64,
    /// Gain in dB.
    pub gain: f64,
    /// Whether gain control exists.
    pub gain_available: bool,
    /// Whether exposure control exists.
    pub exposure_time_available: bool,
    /// Whether a software trigger source exists.
    pub software_trigger: bool,
    /// Whether multipart delivery is supported.
    pub multipart: bool,
    /// Components the device can deliver; the first is active by default.
    pub components: Vec<String>,
    /// Whether chunk metadata is supported.
    pub chunks: bool,
    /// Register cache error count reported in diagnostic mode.
    pub register_cache_errors: Option<u64>,
    /// Network topology, when the device presents itself as GigE Vision.
    pub gige_vision: Option<SimGigEVision>,
    /// Injected faults.
    pub faults: SimFaults,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            id: "sim-0".to_owned(),
            vendor: SIM_VENDOR.to_owned(),
            model: SIM_MODEL.to_owned(),
            width: 320,
            height: 240,
            frame_rate: 10.0,
            exposure_time: 10_000.0,
            gain: 1.0,
            gain_available: true,
            exposure_time_available: true,
            software_trigger: true,
            multipart: true,
            components: vec!["Intensity".to_owned(), "Range".to_owned()],
            chunks: true,
            register_cache_errors: Some(0),
            gige_vision: Some(SimGigEVision::default()),
            faults: SimFaults::default(),
        }
    }
}

/// GigE Vision network topology of a simulated camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimGigEVision {
    /// Network interface count.
    pub n_network_interfaces: u32,
    /// Stream channel count. Without a channel, no current channel can be read.
    pub n_stream_channels: u32,
}

impl Default for SimGigEVision {
    fn default() -> Self {
        Self {
            n_network_interfaces: 1,
            n_stream_channels: 1,
        }
    }
}

impl SimConfig {
    /// Set the device id.
    #[must_use]
    pub fn with_id(mut self, id: &str) -> Self {
        id.clone_into(&mut self.id);
        self
    }

    /// Set the model name.
    #[must_use]
    pub fn with_model(mut self, model: &str) -> Self {
        model.clone_into(&mut self.model);
        self
    }

    /// Set the injected faults.
    #[must_use]
    pub fn with_faults(mut self, faults: SimFaults) -> Self {
        self.faults = faults;
        self
    }

    fn image_size(&self) -> usize {
        // YUYV is 2 bytes per pixel
        self.width as usize * self.height as usize * 2
    }
}

/// Simulated camera session.
pub struct SimDevice {
    identity: DeviceIdentity,
    config: SimConfig,
    mode: AcquisitionMode,
    frame_rate: f64,
    trigger: Option<String>,
    multipart: bool,
    enabled_components: Vec<String>,
    chunk_list: Vec<String>,
}

impl SimDevice {
    /// Create a simulated camera.
    pub fn new(config: SimConfig) -> Self {
        let identity = DeviceIdentity {
            id: config.id.clone(),
            vendor: config.vendor.clone(),
            model: config.model.clone(),
        };
        let enabled_components = config.components.iter().take(1).cloned().collect();

        Self {
            identity,
            frame_rate: config.frame_rate,
            config,
            mode: AcquisitionMode::Continuous,
            trigger: None,
            multipart: false,
            enabled_components,
            chunk_list: Vec::new(),
        }
    }

    /// Components currently enabled; the first is the active one.
    pub fn enabled_components(&self) -> &[String] {
        &self.enabled_components
    }

    /// Whether multipart delivery is enabled.
    pub const fn multipart_enabled(&self) -> bool {
        self.multipart
    }

    /// Chunks currently enabled.
    pub fn chunk_list(&self) -> &[String] {
        &self.chunk_list
    }

    /// Active trigger source.
    pub fn trigger(&self) -> Option<&str> {
        self.trigger.as_deref()
    }

    fn delivered_components(&self) -> Vec<String> {
        if self.multipart {
            self.enabled_components.clone()
        } else {
            self.enabled_components.iter().take(1).cloned().collect()
        }
    }

    fn chunk_defs(&self) -> Vec<ChunkDef> {
        self.chunk_list
            .iter()
            .filter_map(|name| chunk_def(name).copied())
            .collect()
    }

    fn plan(&self) -> FramePlan {
        let components = self.delivered_components();
        let chunks = self.chunk_defs();
        let chunk_len: usize = chunks.iter().map(|def| chunk_block_len(def.data_len())).sum();

        FramePlan {
            image_size: self.config.image_size(),
            payload_size: self.config.image_size() * components.len() + chunk_len,
            components,
            chunks,
            period: Duration::from_secs_f64(1.0 / self.frame_rate),
            single_frame: self.mode == AcquisitionMode::SingleFrame,
            triggered: self.trigger.is_some(),
            width: self.config.width,
            height: self.config.height,
            exposure_time: self.config.exposure_time,
            gain: self.config.gain,
            faults: self.config.faults.clone(),
        }
    }
}

impl DeviceSession for SimDevice {
    type Stream<'a> = SimStream;

    fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    fn acquisition_mode(&self) -> Result<AcquisitionMode> {
        Ok(self.mode)
    }

    fn set_acquisition_mode(&mut self, mode: AcquisitionMode) -> Result<()> {
        self.mode = mode;
        Ok(())
    }

    fn frame_rate(&self) -> Result<f64> {
        Ok(self.frame_rate)
    }

    /// Setting a frame rate switches the trigger off.
    fn set_frame_rate(&mut self, frame_rate: f64) -> Result<()> {
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(DeviceError::InvalidParameter(format!(
                "frame rate {frame_rate} Hz"
            )));
        }
        self.frame_rate = frame_rate;
        self.trigger = None;
        Ok(())
    }

    fn payload_size(&self) -> Result<usize> {
        Ok(self.plan().payload_size)
    }

    fn sensor_size(&self) -> Result<(u32, u32)> {
        Ok((self.config.width, self.config.height))
    }

    fn is_gain_available(&self) -> Result<bool> {
        Ok(self.config.gain_available)
    }

    fn gain(&self) -> Result<f64> {
        if self.config.gain_available {
            Ok(self.config.gain)
        } else {
            Err(DeviceError::unsupported("Gain"))
        }
    }

    fn is_exposure_time_available(&self) -> Result<bool> {
        Ok(self.config.exposure_time_available)
    }

    fn exposure_time(&self) -> Result<f64> {
        if self.config.exposure_time_available {
            Ok(self.config.exposure_time)
        } else {
            Err(DeviceError::unsupported("ExposureTime"))
        }
    }

    fn is_software_trigger_supported(&self) -> Result<bool> {
        Ok(self.config.software_trigger)
    }

    fn set_trigger(&mut self, source: Option<&str>) -> Result<()> {
        match source {
            None => self.trigger = None,
            Some(SOFTWARE_TRIGGER) if self.config.software_trigger => {
                self.trigger = Some(SOFTWARE_TRIGGER.to_owned());
            }
            Some(SOFTWARE_TRIGGER) => {
                return Err(DeviceError::unsupported("Software trigger"));
            }
            Some(other) => {
                return Err(DeviceError::InvalidParameter(format!(
                    "unknown trigger source {other}"
                )));
            }
        }
        Ok(())
    }

    fn is_multipart_supported(&self) -> Result<bool> {
        Ok(self.config.multipart)
    }

    fn set_multipart(&mut self, enable: bool) -> Result<()> {
        if enable && !self.config.multipart {
            return Err(DeviceError::unsupported("Multipart"));
        }
        self.multipart = enable;
        Ok(())
    }

    fn select_and_enable_component(&mut self, name: &str, exclusive: bool) -> Result<()> {
        if !self.config.components.iter().any(|component| component == name) {
            return Err(DeviceError::InvalidParameter(format!(
                "unknown component {name}"
            )));
        }
        if exclusive {
            self.enabled_components.clear();
        }
        if !self.enabled_components.iter().any(|component| component == name) {
            self.enabled_components.push(name.to_owned());
        }
        Ok(())
    }

    fn are_chunks_available(&self) -> Result<bool> {
        Ok(self.config.chunks)
    }

    fn set_chunks(&mut self, chunks: &[String]) -> Result<()> {
        if chunks.is_empty() {
            self.chunk_list.clear();
            return Ok(());
        }
        if !self.config.chunks {
            return Err(DeviceError::unsupported("Chunks"));
        }
        if let Some(unknown) = chunks.iter().find(|name| chunk_def(name).is_none()) {
            return Err(DeviceError::InvalidParameter(format!(
                "unknown chunk {unknown}"
            )));
        }
        self.chunk_list = chunks.to_vec();
        Ok(())
    }

    fn create_chunk_parser(&self) -> Result<Box<dyn ChunkParser>> {
        if !self.config.chunks {
            return Err(DeviceError::unsupported("Chunks"));
        }
        Ok(Box::new(SimChunkParser::default()))
    }

    fn create_stream(&mut self, events: EventSink) -> Result<Self::Stream<'_>> {
        SimStream::spawn(self.plan(), events)
    }

    fn register_cache_errors(&self) -> Option<u64> {
        self.config.register_cache_errors
    }

    fn n_network_interfaces(&self) -> Option<Result<u32>> {
        self.config.gige_vision.map(|gv| Ok(gv.n_network_interfaces))
    }

    fn n_stream_channels(&self) -> Option<Result<u32>> {
        self.config.gige_vision.map(|gv| Ok(gv.n_stream_channels))
    }

    fn current_stream_channel(&self) -> Option<Result<u32>> {
        self.config.gige_vision.map(|gv| {
            if gv.n_stream_channels > 0 {
                Ok(0)
            } else {
                Err(DeviceError::unsupported("Stream channel"))
            }
        })
    }
}

/// Everything the worker needs to fill buffers, fixed at stream creation.
#[derive(Debug, Clone)]
struct FramePlan {
    image_size: usize,
    payload_size: usize,
    components: Vec<String>,
    chunks: Vec<ChunkDef>,
    period: Duration,
    single_frame: bool,
    triggered: bool,
    width: u32,
    height: u32,
    exposure_time: f64,
    gain: f64,
    faults: SimFaults,
}

enum Control {
    Start,
    Stop(Sender<()>),
    Trigger,
    Shutdown,
}

/// Delivery stream of a [`SimDevice`].
pub struct SimStream {
    input: Sender<Buffer>,
    output: Receiver<Buffer>,
    control: Sender<Control>,
    events: EventSink,
    worker: Option<JoinHandle<()>>,
    running: bool,
}

impl SimStream {
    fn spawn(plan: FramePlan, events: EventSink) -> Result<Self> {
        let (input, input_rx) = crossbeam_channel::unbounded();
        let (output_tx, output) = crossbeam_channel::unbounded();
        let (control, control_rx) = crossbeam_channel::unbounded();

        let worker = Worker {
            plan,
            input: input_rx,
            output: output_tx,
            control: control_rx,
            events: events.clone(),
            n_delivered: 0,
        };
        let handle = std::thread::Builder::new()
            .name("sim-stream".to_owned())
            .spawn(move || worker.run())?;

        Ok(Self {
            input,
            output,
            control,
            events,
            worker: Some(handle),
            running: false,
        })
    }

    fn send_control(&self, control: Control) -> Result<()> {
        self.control
            .send(control)
            .map_err(|_| DeviceError::StreamError("stream worker is gone".to_owned()))
    }

    fn shutdown_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            let _ = self.control.send(Control::Shutdown);
            if handle.join().is_err() {
                warn!("Simulated stream worker panicked");
            }
        }
    }
}

impl DeliveryStream for SimStream {
    fn push_buffer(&mut self, buffer: Buffer) -> Result<()> {
        self.input
            .send(buffer)
            .map_err(|_| DeviceError::StreamError("stream worker is gone".to_owned()))
    }

    fn timeout_pop_buffer(&mut self, timeout: Duration) -> Option<Buffer> {
        self.output.recv_timeout(timeout).ok()
    }

    fn start(&mut self) -> Result<()> {
        self.send_control(Control::Start)?;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        let (ack, ack_rx) = crossbeam_channel::bounded(1);
        self.send_control(Control::Stop(ack))?;
        self.running = false;
        ack_rx
            .recv_timeout(STOP_ACK_TIMEOUT)
            .map_err(|_| DeviceError::Timeout)
    }

    fn software_trigger(&mut self) -> Result<()> {
        self.send_control(Control::Trigger)
    }

    fn teardown(mut self) {
        self.shutdown_worker();
        let _ = self.events.send(StreamEvent::Exit);
    }
}

impl Drop for SimStream {
    fn drop(&mut self) {
        self.shutdown_worker();
    }
}

struct Worker {
    plan: FramePlan,
    input: Receiver<Buffer>,
    output: Sender<Buffer>,
    control: Receiver<Control>,
    events: EventSink,
    n_delivered: u32,
}

enum State {
    Idle,
    Running { started: Instant, n_frames: u64 },
}

impl Worker {
    fn run(mut self) {
        if !self.plan.faults.skip_init {
            let _ = self.events.send(StreamEvent::Init);
        }

        let mut state = State::Idle;

        loop {
            let control = match state {
                State::Idle => self
                    .control
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
                State::Running { .. } if self.plan.triggered => self
                    .control
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
                State::Running { started, n_frames } => {
                    let deadline = started + self.frame_offset(n_frames + 1);
                    self.control.recv_deadline(deadline)
                }
            };

            state = match (control, state) {
                (Ok(Control::Shutdown) | Err(RecvTimeoutError::Disconnected), _) => break,
                (Ok(Control::Start), State::Idle) => State::Running {
                    started: Instant::now(),
                    n_frames: 0,
                },
                (Ok(Control::Stop(ack)), _) => {
                    let _ = ack.send(());
                    State::Idle
                }
                (Ok(Control::Trigger), State::Running { started, n_frames }) => {
                    self.deliver(started, n_frames + 1);
                    self.next_state(started, n_frames + 1)
                }
                (Err(RecvTimeoutError::Timeout), State::Running { started, n_frames }) => {
                    self.deliver(started, n_frames + 1);
                    self.next_state(started, n_frames + 1)
                }
                (_, state) => state,
            };
        }

        debug!(n_delivered = self.n_delivered, "Simulated stream worker exiting");
    }

    fn frame_offset(&self, n_frames: u64) -> Duration {
        self.plan
            .period
            .saturating_mul(u32::try_from(n_frames).unwrap_or(u32::MAX))
    }

    const fn next_state(&self, started: Instant, n_frames: u64) -> State {
        if self.plan.single_frame {
            State::Idle
        } else {
            State::Running { started, n_frames }
        }
    }

    fn deliver(&mut self, started: Instant, frame_id: u64) {
        if self
            .plan
            .faults
            .stop_after
            .is_some_and(|limit| self.n_delivered >= limit)
        {
            trace!(frame_id, "Delivery stopped by fault injection");
            return;
        }

        let Ok(mut buffer) = self.input.try_recv() else {
            debug!(frame_id, "No buffer queued, frame dropped");
            return;
        };

        let _ = self.events.send(StreamEvent::StartBuffer);

        let device_clock = if self.plan.triggered {
            started.elapsed()
        } else {
            self.frame_offset(frame_id)
        };
        buffer.frame_id = frame_id;
        buffer.timestamp_ns = u64::try_from(device_clock.as_nanos()).unwrap_or(u64::MAX);
        buffer.system_timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));

        self.n_delivered += 1;
        buffer.status = self.fill(&mut buffer);
        if self
            .plan
            .faults
            .fail_every
            .is_some_and(|every| every > 0 && self.n_delivered % every == 0)
        {
            buffer.status = BufferStatus::MissingPackets;
        }

        trace!(frame_id, status = %buffer.status, "Buffer filled");
        let _ = self.events.send(StreamEvent::BufferDone(buffer.status));
        let _ = self.output.send(buffer);
    }

    fn fill(&self, buffer: &mut Buffer) -> BufferStatus {
        let plan = &self.plan;
        if buffer.capacity() < plan.payload_size {
            return BufferStatus::SizeMismatch;
        }

        #[allow(clippy::cast_possible_truncation)]
        let pattern = buffer.frame_id as u8;
        let mut offset = 0;
        for component in &plan.components {
            if let Some(part) = buffer.data.get_mut(offset..offset + plan.image_size) {
                part.fill(pattern);
            }
            buffer.parts.push(BufferPart {
                component: component.clone(),
                offset,
                size: plan.image_size,
            });
            offset += plan.image_size;
        }
        for extra in 0..plan.faults.extra_parts {
            buffer.parts.push(BufferPart {
                component: format!("Extra{extra}"),
                offset: 0,
                size: 0,
            });
        }

        for def in &plan.chunks {
            let data = self.chunk_data(def, buffer);
            let Some(next) = put_chunk(&mut buffer.data, offset, def.id, &data) else {
                return BufferStatus::SizeMismatch;
            };
            offset = next;
        }

        buffer.has_chunks = !plan.chunks.is_empty();
        buffer.received = offset;
        BufferStatus::Success
    }

    fn chunk_data(&self, def: &ChunkDef, buffer: &Buffer) -> Vec<u8> {
        let plan = &self.plan;
        match def.name {
            "Width" => i64::from(plan.width).to_be_bytes().to_vec(),
            "Height" => i64::from(plan.height).to_be_bytes().to_vec(),
            "FrameID" => buffer.frame_id.to_be_bytes().to_vec(),
            "Timestamp" => buffer.timestamp_ns.to_be_bytes().to_vec(),
            "ExposureTime" => plan.exposure_time.to_be_bytes().to_vec(),
            "Gain" => GAIN_CHANNEL_OFFSETS
                .iter()
                .flat_map(|offset| (plan.gain + offset).to_be_bytes())
                .collect(),
            _ => vec![0; def.data_len()],
        }
    }
}

/// Chunk parser for the simulator's chunk layout.
#[derive(Debug, Default)]
pub struct SimChunkParser {
    gain_channel: usize,
}

impl SimChunkParser {
    fn lookup<'b>(buffer: &'b Buffer, feature: &str) -> Result<(&'static ChunkDef, &'b [u8])> {
        let def = feature
            .strip_prefix(CHUNK_FEATURE_PREFIX)
            .and_then(chunk_def)
            .ok_or_else(|| DeviceError::Chunk {
                name: feature.to_owned(),
                reason: "unknown feature".to_owned(),
            })?;
        let data = find_chunk(buffer.payload(), def.id).ok_or_else(|| DeviceError::Chunk {
            name: feature.to_owned(),
            reason: "not present in buffer".to_owned(),
        })?;
        Ok((def, data))
    }
}

fn be_bytes(feature: &str, data: &[u8]) -> Result<[u8; 8]> {
    data.try_into().map_err(|_| DeviceError::Chunk {
        name: feature.to_owned(),
        reason: format!("expected 8 bytes, found {}", data.len()),
    })
}

impl ChunkParser for SimChunkParser {
    fn set_string_feature(&mut self, name: &str, value: &str) -> Result<()> {
        if name != GAIN_SELECTOR {
            return Err(DeviceError::unsupported(name));
        }
        self.gain_channel = GAIN_SELECTOR_VALUES
            .iter()
            .position(|candidate| *candidate == value)
            .ok_or_else(|| DeviceError::InvalidParameter(format!("{name}={value}")))?;
        Ok(())
    }

    fn integer_value(&self, buffer: &Buffer, name: &str) -> Result<i64> {
        let (def, data) = Self::lookup(buffer, name)?;
        if def.kind != ChunkKind::Integer {
            return Err(DeviceError::Chunk {
                name: name.to_owned(),
                reason: "not an integer feature".to_owned(),
            });
        }
        Ok(i64::from_be_bytes(be_bytes(name, data)?))
    }

    fn float_value(&self, buffer: &Buffer, name: &str) -> Result<f64> {
        let (def, data) = Self::lookup(buffer, name)?;
        match def.kind {
            ChunkKind::Float => Ok(f64::from_be_bytes(be_bytes(name, data)?)),
            ChunkKind::GainTable => {
                let start = self.gain_channel * 8;
                let value = data.get(start..start + 8).unwrap_or_default();
                Ok(f64::from_be_bytes(be_bytes(name, value)?))
            }
            ChunkKind::Integer => Err(DeviceError::Chunk {
                name: name.to_owned(),
                reason: "not a float feature".to_owned(),
            }),
        }
    }
}

/// Provider of simulated cameras.
#[derive(Debug, Clone)]
pub struct SimProvider {
    devices: Vec<SimConfig>,
}

impl Default for SimProvider {
    fn default() -> Self {
        Self::new(vec![SimConfig::default()])
    }
}

impl SimProvider {
    /// Create a provider for the given cameras.
    pub const fn new(devices: Vec<SimConfig>) -> Self {
        Self { devices }
    }
}

impl DeviceProvider for SimProvider {
    type Session = SimDevice;

    fn device_ids(&self) -> Vec<String> {
        self.devices.iter().map(|config| config.id.clone()).collect()
    }

    fn open(&self, id: &str) -> Result<Self::Session> {
        self.devices
            .iter()
            .find(|config| config.id == id)
            .map(|config| SimDevice::new(config.clone()))
            .ok_or_else(|| DeviceError::DeviceNotFound(id.to_owned()))
    }
}
