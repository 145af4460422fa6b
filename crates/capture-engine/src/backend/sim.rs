//! Deterministic in-process hardware.
//!
//! [`SimHardware`] stands in for a camera service, a hardware encoder and a
//! container muxer at once. Camera callbacks are held back until the driver
//! delivers them, in order or out of order, which makes superseded-request
//! and cancellation paths reproducible. Every hardware-visible action is
//! recorded in a [`SimLedger`] for inspection.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use camcord_common::error::{CamcordError, CamcordResult};
use camcord_platform_core::{
    BufferFlags, BufferInfo, CallbackSink, CameraBackend, CameraEvent, CameraInfo,
    CaptureRequest, ContainerFormat, ContainerMuxer, DeviceHandle, EncoderEvent, HardwareEncoder,
    MediaFactory, MediaFormat, OutputTarget, SessionHandle, Size, SurfaceId, TrackIndex,
};
use parking_lot::Mutex;

use super::h264;

/// Surface id handed out for the simulated encoder's input surface.
pub const SIM_ENCODER_SURFACE: SurfaceId = SurfaceId(0xE0C0);

/// One sample the simulated muxer accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRecord {
    pub track: TrackIndex,
    pub size: usize,
    pub presentation_time_us: i64,
    pub key_frame: bool,
}

/// Everything the simulated hardware has been asked to do.
#[derive(Debug, Clone, Default)]
pub struct SimLedger {
    pub devices_opened: u64,
    pub open_devices: BTreeSet<DeviceHandle>,
    pub sessions_created: u64,
    /// Sessions not yet closed, with the surfaces they cover.
    pub open_sessions: BTreeMap<SessionHandle, Vec<SurfaceId>>,
    /// The running repeating request, if any.
    pub repeating: Option<(SessionHandle, CaptureRequest)>,
    pub captures_aborted: u64,

    pub encoder_running: bool,
    pub encoder_released: bool,
    pub encoder_format: Option<MediaFormat>,
    pub buffers_produced: u64,
    pub buffers_released: u64,
    pub double_releases: u64,

    pub output_path: Option<PathBuf>,
    pub tracks_added: u64,
    pub muxer_started: bool,
    pub muxer_stopped: bool,
    pub muxer_released: bool,
    pub samples: Vec<SampleRecord>,
    pub premature_writes: u64,
}

impl SimLedger {
    /// Number of buffers handed out and not yet returned.
    pub fn outstanding_buffers(&self) -> u64 {
        self.buffers_produced - self.buffers_released
    }
}

#[derive(Default)]
struct SimState {
    cameras: Vec<CameraInfo>,
    ledger: SimLedger,
    held: VecDeque<(CallbackSink<CameraEvent>, CameraEvent)>,
    device_sinks: HashMap<DeviceHandle, CallbackSink<CameraEvent>>,
    next_handle: u64,
    reject_sessions: u32,
    refuse_sessions: u32,
    fail_open: bool,

    supported_mimes: Vec<String>,
    encoder_sink: Option<CallbackSink<EncoderEvent>>,
    outstanding: HashMap<usize, Vec<u8>>,
    next_buffer: usize,
    frames_emitted: u64,
    fail_next_write: bool,
    fail_next_start: bool,
}

impl SimState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// Shared handle to the simulated hardware. Clones observe the same state.
#[derive(Clone)]
pub struct SimHardware {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHardware {
    /// One 4:3-capable camera with a typical phone size table.
    pub fn new() -> Self {
        Self::with_cameras(vec![Self::default_camera()])
    }

    /// A device with no cameras at all.
    pub fn without_cameras() -> Self {
        Self::with_cameras(Vec::new())
    }

    pub fn with_cameras(cameras: Vec<CameraInfo>) -> Self {
        let state = SimState {
            cameras,
            supported_mimes: vec!["video/avc".to_string()],
            ..SimState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn default_camera() -> CameraInfo {
        let sizes = |list: &[(u32, u32)]| -> Vec<Size> {
            list.iter().map(|&(w, h)| Size::new(w, h)).collect()
        };
        CameraInfo {
            id: "0".to_string(),
            preview_sizes: sizes(&[
                (1920, 1440),
                (1920, 1080),
                (1440, 1080),
                (1280, 960),
                (1280, 720),
                (960, 720),
                (640, 480),
                (320, 240),
            ]),
            encoder_sizes: sizes(&[
                (1920, 1080),
                (1440, 1080),
                (1280, 960),
                (1280, 720),
                (960, 720),
                (640, 480),
                (320, 240),
            ]),
        }
    }

    pub fn camera_backend(&self) -> Box<dyn CameraBackend> {
        Box::new(SimCamera {
            state: Arc::clone(&self.state),
        })
    }

    pub fn media(&self) -> SimMedia {
        SimMedia {
            state: Arc::clone(&self.state),
        }
    }

    /// Snapshot of the ledger.
    pub fn ledger(&self) -> SimLedger {
        self.state.lock().ledger.clone()
    }

    // Camera control

    /// Fail the next device open asynchronously.
    pub fn fail_next_open(&self) {
        self.state.lock().fail_open = true;
    }

    /// Have the hardware reject the next session configuration.
    pub fn reject_next_session(&self) {
        self.state.lock().reject_sessions += 1;
    }

    /// Make the next session request fail synchronously, before the
    /// hardware sees it.
    pub fn refuse_next_session_request(&self) {
        self.state.lock().refuse_sessions += 1;
    }

    /// Queue a disconnect for every open device.
    pub fn disconnect_camera(&self) {
        let mut state = self.state.lock();
        let pending: Vec<_> = state
            .device_sinks
            .iter()
            .map(|(device, sink)| {
                (
                    sink.clone(),
                    CameraEvent::DeviceDisconnected { device: *device },
                )
            })
            .collect();
        state.held.extend(pending);
    }

    /// Queue a fatal device error for every open device.
    pub fn fail_camera(&self, code: i32) {
        let mut state = self.state.lock();
        let pending: Vec<_> = state
            .device_sinks
            .iter()
            .map(|(device, sink)| {
                (
                    sink.clone(),
                    CameraEvent::DeviceError {
                        device: *device,
                        code,
                    },
                )
            })
            .collect();
        state.held.extend(pending);
    }

    pub fn pending_camera_callbacks(&self) -> usize {
        self.state.lock().held.len()
    }

    /// Deliver every held camera callback in issue order.
    pub fn deliver_camera_callbacks(&self) -> usize {
        let held: Vec<_> = self.state.lock().held.drain(..).collect();
        let count = held.len();
        for (sink, event) in held {
            sink.post(event);
        }
        count
    }

    /// Deliver the oldest held camera callback.
    pub fn deliver_next_camera_callback(&self) -> bool {
        let next = self.state.lock().held.pop_front();
        match next {
            Some((sink, event)) => sink.post(event),
            None => false,
        }
    }

    /// Deliver the newest held camera callback ahead of older ones.
    pub fn deliver_last_camera_callback(&self) -> bool {
        let last = self.state.lock().held.pop_back();
        match last {
            Some((sink, event)) => sink.post(event),
            None => false,
        }
    }

    // Encoder control

    /// Report the negotiated output format.
    pub fn emit_encoder_format(&self) {
        let state = self.state.lock();
        let Some(sink) = state.encoder_sink.clone() else {
            return;
        };
        let Some(configured) = state.ledger.encoder_format.clone() else {
            return;
        };
        drop(state);
        let format = MediaFormat::video(
            configured.mime_type.clone(),
            configured.width,
            configured.height,
        )
        .with_frame_rate(configured.frame_rate.unwrap_or(30))
        .with_codec_config(h264::parameter_sets(configured.width, configured.height));
        sink.post(EncoderEvent::OutputFormatChanged(format));
    }

    /// Produce `count` encoded frames.
    pub fn emit_encoder_buffers(&self, count: usize) {
        for _ in 0..count {
            self.emit_buffer(false);
        }
    }

    /// Produce one codec-config buffer.
    pub fn emit_codec_config_buffer(&self) {
        self.emit_buffer(true);
    }

    pub fn emit_encoder_error(&self, code: i32) {
        let sink = self.state.lock().encoder_sink.clone();
        if let Some(sink) = sink {
            sink.post(EncoderEvent::Error {
                code,
                message: format!("simulated codec failure {code}"),
            });
        }
    }

    /// Make the muxer reject the next sample write.
    pub fn fail_next_sample_write(&self) {
        self.state.lock().fail_next_write = true;
    }

    /// Make the muxer refuse to start once.
    pub fn fail_next_muxer_start(&self) {
        self.state.lock().fail_next_start = true;
    }

    fn emit_buffer(&self, codec_config: bool) {
        let mut state = self.state.lock();
        if !state.ledger.encoder_running {
            return;
        }
        let Some(sink) = state.encoder_sink.clone() else {
            return;
        };
        let (frame_rate, gop, size) = state
            .ledger
            .encoder_format
            .as_ref()
            .map(|f| {
                let fps = f.frame_rate.unwrap_or(30).max(1) as u64;
                let gop = fps * f.key_frame_interval_secs.unwrap_or(1).max(1) as u64;
                (fps, gop, Size::new(f.width, f.height))
            })
            .unwrap_or((30, 30, Size::new(640, 480)));

        let index = state.next_buffer;
        state.next_buffer += 1;

        let (data, flags, pts) = if codec_config {
            let flags = BufferFlags {
                codec_config: true,
                ..BufferFlags::default()
            };
            (h264::parameter_sets(size.width, size.height), flags, 0)
        } else {
            let frame = state.frames_emitted;
            state.frames_emitted += 1;
            let key_frame = frame % gop == 0;
            // Leading padding exercises the offset handling.
            let mut data = vec![0xAA; 8];
            data.extend(h264::access_unit(
                key_frame,
                frame % gop,
                48 + (frame % 16) as usize,
            ));
            let flags = BufferFlags {
                key_frame,
                ..BufferFlags::default()
            };
            (data, flags, (frame * 1_000_000 / frame_rate) as i64)
        };

        let (offset, size) = if codec_config {
            (0, data.len())
        } else {
            (8, data.len() - 8)
        };
        state.outstanding.insert(index, data);
        state.ledger.buffers_produced += 1;
        drop(state);

        sink.post(EncoderEvent::OutputBufferAvailable {
            index,
            info: BufferInfo {
                offset,
                size,
                presentation_time_us: pts,
                flags,
            },
        });
    }
}

/// Simulated camera service.
pub struct SimCamera {
    state: Arc<Mutex<SimState>>,
}

impl CameraBackend for SimCamera {
    fn name(&self) -> &str {
        "sim"
    }

    fn camera_ids(&self) -> CamcordResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .cameras
            .iter()
            .map(|c| c.id.clone())
            .collect())
    }

    fn camera_info(&self, id: &str) -> CamcordResult<CameraInfo> {
        self.state
            .lock()
            .cameras
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| CamcordError::platform(format!("Unknown camera {id}")))
    }

    fn open_device(
        &mut self,
        id: &str,
        token: u64,
        callbacks: CallbackSink<CameraEvent>,
    ) -> CamcordResult<()> {
        let mut state = self.state.lock();
        if !state.cameras.iter().any(|c| c.id == id) {
            return Err(CamcordError::platform(format!("Unknown camera {id}")));
        }
        if std::mem::take(&mut state.fail_open) {
            state.held.push_back((
                callbacks,
                CameraEvent::DeviceOpenFailed {
                    token,
                    reason: format!("camera {id} in use"),
                },
            ));
            return Ok(());
        }
        let device = DeviceHandle(state.handle());
        state.ledger.devices_opened += 1;
        state.ledger.open_devices.insert(device);
        state.device_sinks.insert(device, callbacks.clone());
        state
            .held
            .push_back((callbacks, CameraEvent::DeviceOpened { token, device }));
        Ok(())
    }

    fn create_session(
        &mut self,
        device: DeviceHandle,
        targets: &[OutputTarget],
        generation: u64,
        callbacks: CallbackSink<CameraEvent>,
    ) -> CamcordResult<()> {
        let mut state = self.state.lock();
        if !state.ledger.open_devices.contains(&device) {
            return Err(CamcordError::platform(format!(
                "Device {device:?} is not open"
            )));
        }
        if state.refuse_sessions > 0 {
            state.refuse_sessions -= 1;
            return Err(CamcordError::platform("Session request refused"));
        }
        let session = SessionHandle(state.handle());
        state.ledger.sessions_created += 1;
        state
            .ledger
            .open_sessions
            .insert(session, targets.iter().map(|t| t.surface).collect());

        let event = if state.reject_sessions > 0 {
            state.reject_sessions -= 1;
            CameraEvent::SessionConfigureFailed {
                generation,
                session,
            }
        } else {
            CameraEvent::SessionConfigured {
                generation,
                session,
            }
        };
        state.held.push_back((callbacks, event));
        Ok(())
    }

    fn set_repeating_request(
        &mut self,
        session: SessionHandle,
        request: &CaptureRequest,
    ) -> CamcordResult<()> {
        let mut state = self.state.lock();
        let Some(surfaces) = state.ledger.open_sessions.get(&session) else {
            return Err(CamcordError::platform(format!(
                "Session {session:?} is closed"
            )));
        };
        if let Some(stray) = request.targets.iter().find(|s| !surfaces.contains(s)) {
            return Err(CamcordError::platform(format!(
                "{stray} is not part of session {session:?}"
            )));
        }
        state.ledger.repeating = Some((session, request.clone()));
        Ok(())
    }

    fn abort_captures(&mut self, session: SessionHandle) -> CamcordResult<()> {
        let mut state = self.state.lock();
        if !state.ledger.open_sessions.contains_key(&session) {
            return Err(CamcordError::platform(format!(
                "Session {session:?} is closed"
            )));
        }
        state.ledger.captures_aborted += 1;
        if matches!(state.ledger.repeating, Some((s, _)) if s == session) {
            state.ledger.repeating = None;
        }
        Ok(())
    }

    fn close_session(&mut self, session: SessionHandle) {
        let mut state = self.state.lock();
        state.ledger.open_sessions.remove(&session);
        if matches!(state.ledger.repeating, Some((s, _)) if s == session) {
            state.ledger.repeating = None;
        }
    }

    fn close_device(&mut self, device: DeviceHandle) {
        let mut state = self.state.lock();
        state.ledger.open_devices.remove(&device);
        state.device_sinks.remove(&device);
    }
}

/// Simulated codec and muxer factory.
pub struct SimMedia {
    state: Arc<Mutex<SimState>>,
}

impl MediaFactory for SimMedia {
    fn create_encoder_by_type(&self, mime_type: &str) -> CamcordResult<Box<dyn HardwareEncoder>> {
        let supported = self
            .state
            .lock()
            .supported_mimes
            .iter()
            .any(|m| m == mime_type);
        if !supported {
            return Err(CamcordError::encoder_unavailable(
                mime_type,
                "no simulated codec for this type",
            ));
        }
        Ok(Box::new(SimEncoder {
            state: Arc::clone(&self.state),
            scratch: Vec::new(),
        }))
    }

    fn create_muxer(
        &self,
        path: &Path,
        format: ContainerFormat,
    ) -> CamcordResult<Box<dyn ContainerMuxer>> {
        let ContainerFormat::Mpeg4 = format;
        self.state.lock().ledger.output_path = Some(path.to_path_buf());
        Ok(Box::new(MemoryMuxer {
            state: Arc::clone(&self.state),
        }))
    }
}

/// Simulated surface-input encoder.
pub struct SimEncoder {
    state: Arc<Mutex<SimState>>,
    scratch: Vec<u8>,
}

impl HardwareEncoder for SimEncoder {
    fn configure(
        &mut self,
        format: &MediaFormat,
        callbacks: CallbackSink<EncoderEvent>,
    ) -> CamcordResult<()> {
        let mut state = self.state.lock();
        state.ledger.encoder_format = Some(format.clone());
        state.encoder_sink = Some(callbacks);
        Ok(())
    }

    fn create_input_surface(&mut self) -> CamcordResult<SurfaceId> {
        let state = self.state.lock();
        if state.encoder_sink.is_none() {
            return Err(CamcordError::platform("Encoder not configured"));
        }
        Ok(SIM_ENCODER_SURFACE)
    }

    fn start(&mut self) -> CamcordResult<()> {
        self.state.lock().ledger.encoder_running = true;
        Ok(())
    }

    fn output_buffer(&mut self, index: usize) -> CamcordResult<&[u8]> {
        let data = self
            .state
            .lock()
            .outstanding
            .get(&index)
            .cloned()
            .ok_or_else(|| CamcordError::platform(format!("Buffer {index} is not outstanding")))?;
        self.scratch = data;
        Ok(&self.scratch)
    }

    fn release_output_buffer(&mut self, index: usize, _render: bool) -> CamcordResult<()> {
        let mut state = self.state.lock();
        if state.outstanding.remove(&index).is_some() {
            state.ledger.buffers_released += 1;
            Ok(())
        } else {
            state.ledger.double_releases += 1;
            Err(CamcordError::platform(format!(
                "Buffer {index} released twice"
            )))
        }
    }

    fn stop(&mut self) -> CamcordResult<()> {
        self.state.lock().ledger.encoder_running = false;
        Ok(())
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        state.ledger.encoder_running = false;
        state.ledger.encoder_released = true;
        state.encoder_sink = None;
        state.outstanding.clear();
    }
}

/// Muxer that records samples in the ledger instead of writing a file.
pub struct MemoryMuxer {
    state: Arc<Mutex<SimState>>,
}

impl ContainerMuxer for MemoryMuxer {
    fn add_track(&mut self, _format: &MediaFormat) -> CamcordResult<TrackIndex> {
        let mut state = self.state.lock();
        if state.ledger.muxer_started {
            return Err(CamcordError::container(
                "Tracks must be added before the muxer starts",
            ));
        }
        state.ledger.tracks_added += 1;
        Ok(TrackIndex(state.ledger.tracks_added as usize - 1))
    }

    fn start(&mut self) -> CamcordResult<()> {
        let mut state = self.state.lock();
        if std::mem::take(&mut state.fail_next_start) {
            return Err(CamcordError::container("Simulated muxer start failure"));
        }
        state.ledger.muxer_started = true;
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: TrackIndex,
        data: &[u8],
        info: &BufferInfo,
    ) -> CamcordResult<()> {
        let mut state = self.state.lock();
        if !state.ledger.muxer_started {
            state.ledger.premature_writes += 1;
            return Err(CamcordError::container("Muxer not started"));
        }
        if std::mem::take(&mut state.fail_next_write) {
            return Err(CamcordError::container("Simulated write failure"));
        }
        state.ledger.samples.push(SampleRecord {
            track,
            size: data.len(),
            presentation_time_us: info.presentation_time_us,
            key_frame: info.flags.key_frame,
        });
        Ok(())
    }

    fn stop(&mut self) -> CamcordResult<()> {
        let mut state = self.state.lock();
        if !state.ledger.muxer_started {
            return Err(CamcordError::container("Muxer stopped before start"));
        }
        state.ledger.muxer_stopped = true;
        Ok(())
    }

    fn release(&mut self) {
        self.state.lock().ledger.muxer_released = true;
    }
}
