//! Recording orchestration.
//!
//! [`CapturePipeline`] composes a [`CaptureSession`] with an
//! [`EncodePipeline`] and exposes the lifecycle the view layer drives:
//! `open`, `start_record`, `stop_record`, `pause` and `close`.
//!
//! Hardware callbacks never touch pipeline state directly. Backends post
//! them into two single-consumer queues (camera and encoder) which the
//! owner drains with [`CapturePipeline::dispatch_pending`] or
//! [`CapturePipeline::dispatch_next`]. Anything the view layer should hear
//! about is published as a [`PipelineNotice`].

use std::path::PathBuf;

use camcord_common::config::{AppConfig, EncoderConfig};
use camcord_common::error::{CamcordError, CamcordResult};
use camcord_platform_core::{
    CallbackSink, CameraBackend, CameraEvent, EncoderEvent, MediaFactory, OutputTarget, Size,
    SurfaceId,
};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::encode::{EncodePipeline, EncodeStats};
use crate::session::{CameraSelector, CaptureSession, SessionState, SessionUpdate};

/// Everything needed to build a [`CapturePipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub camera: CameraSelector,
    pub encoder: EncoderConfig,
    pub output_path: PathBuf,
    /// Upper bound on the larger dimension of the capture size.
    pub max_capture_dimension: u32,
}

impl PipelineConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            camera: CameraSelector::FirstAvailable,
            encoder: config.recording.encoder_config(),
            output_path: config.output_path(),
            max_capture_dimension: config.recording.max_capture_dimension,
        }
    }
}

/// Lifecycle transitions and faults published to the view layer.
#[derive(Debug)]
pub enum PipelineNotice {
    DeviceOpened,
    SessionActive {
        generation: u64,
        targets: Vec<OutputTarget>,
    },
    RecordingStarted,
    RecordingStopped,
    Fault(CamcordError),
}

/// Owns the capture session and the encode pipeline.
pub struct CapturePipeline {
    session: CaptureSession,
    encode: Option<EncodePipeline>,
    camera_events: UnboundedReceiver<CameraEvent>,
    encoder_events: UnboundedReceiver<EncoderEvent>,
    notices: CallbackSink<PipelineNotice>,
    selector: CameraSelector,
    preview: Option<OutputTarget>,
    pending_open: Option<(u32, u32)>,
    recording: bool,
    torn_down: bool,
}

impl CapturePipeline {
    /// Create the encode pipeline (so its input surface exists) and an idle
    /// capture session. Returns the pipeline with its notice receiver.
    pub fn new(
        backend: Box<dyn CameraBackend>,
        media: &dyn MediaFactory,
        config: PipelineConfig,
    ) -> CamcordResult<(Self, UnboundedReceiver<PipelineNotice>)> {
        let (encoder_sink, encoder_events) = CallbackSink::channel();
        let encode =
            EncodePipeline::create(media, config.encoder, &config.output_path, encoder_sink)?;

        let (camera_sink, camera_events) = CallbackSink::channel();
        let session = CaptureSession::new(backend, camera_sink, config.max_capture_dimension);

        let (notices, notice_rx) = CallbackSink::channel();
        let pipeline = Self {
            session,
            encode: Some(encode),
            camera_events,
            encoder_events,
            notices,
            selector: config.camera,
            preview: None,
            pending_open: None,
            recording: false,
            torn_down: false,
        };
        Ok((pipeline, notice_rx))
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn targets(&self) -> &[OutputTarget] {
        self.session.targets()
    }

    pub fn preview_size(&self) -> Option<Size> {
        self.session.preview_size()
    }

    pub fn video_size(&self) -> Option<Size> {
        self.session.video_size()
    }

    /// Encoder counters; zeroed after teardown.
    pub fn encode_stats(&self) -> EncodeStats {
        self.encode
            .as_ref()
            .map(|e| e.stats().clone())
            .unwrap_or_default()
    }

    /// The encoder's input surface, if the pipeline has not been torn down.
    pub fn encoder_surface(&self) -> Option<SurfaceId> {
        self.encode.as_ref().map(|e| e.input_surface().surface)
    }

    /// Open the camera for a `width` x `height` preview. If no preview
    /// surface exists yet the open is deferred until one becomes available.
    pub fn open(&mut self, width: u32, height: u32) -> CamcordResult<()> {
        self.ensure_live()?;
        if self.session.state() != SessionState::Closed {
            return Err(CamcordError::illegal_operation("Camera is already open"));
        }
        if self.preview.is_none() {
            tracing::debug!(width, height, "No preview surface yet; deferring open");
            self.pending_open = Some((width, height));
            return Ok(());
        }
        self.open_camera(width, height)
    }

    fn open_camera(&mut self, width: u32, height: u32) -> CamcordResult<()> {
        self.pending_open = None;
        if let Some(preview) = self.preview {
            self.session.add_target(preview)?;
        }
        self.session.open(&self.selector, width, height)
    }

    /// The view layer's preview surface became available.
    pub fn surface_available(
        &mut self,
        surface: SurfaceId,
        width: u32,
        height: u32,
    ) -> CamcordResult<()> {
        self.ensure_live()?;
        tracing::debug!(%surface, width, height, "Preview surface available");
        if let Some(old) = self.preview.take() {
            if old.surface != surface {
                self.session.remove_target(old.surface)?;
            }
        }
        let size = self.session.preview_size().unwrap_or(Size::new(width, height));
        let preview = OutputTarget::preview(surface, size);
        self.preview = Some(preview);

        match self.pending_open {
            Some((w, h)) => self.open_camera(w, h),
            None if self.session.state() != SessionState::Closed => {
                self.session.add_target(preview)
            }
            None => Ok(()),
        }
    }

    pub fn surface_size_changed(&mut self, width: u32, height: u32) {
        tracing::debug!(width, height, "Preview surface resized");
    }

    /// The preview surface is gone; stop rendering into it.
    pub fn surface_destroyed(&mut self) -> CamcordResult<()> {
        if let Some(preview) = self.preview.take() {
            tracing::debug!(surface = %preview.surface, "Preview surface destroyed");
            self.session.remove_target(preview.surface)?;
        }
        Ok(())
    }

    /// Route frames into the encoder and start accepting samples.
    pub fn start_record(&mut self) -> CamcordResult<()> {
        self.ensure_live()?;
        if self.recording {
            return Err(CamcordError::illegal_operation("Already recording"));
        }
        if self.session.state() == SessionState::Closed {
            return Err(CamcordError::illegal_operation(
                "Recording requested before the camera was opened",
            ));
        }
        let Some(encode) = self.encode.as_mut() else {
            return Err(CamcordError::illegal_operation("Encoder already destroyed"));
        };

        let input = encode.input_surface();
        if let Err(e) = self.session.add_target(input) {
            // A failed rebuild still lists the encoder surface.
            if let Err(restore) = self.session.remove_target(input.surface) {
                tracing::warn!(error = %restore, "Failed to drop encoder surface");
            }
            return Err(e);
        }
        encode.start();
        self.recording = true;
        tracing::info!("Recording started");
        self.notify(PipelineNotice::RecordingStarted);
        Ok(())
    }

    /// Stop accepting samples and go back to preview only. The container
    /// stays open for a later segment.
    pub fn stop_record(&mut self) -> CamcordResult<()> {
        self.ensure_live()?;
        if !self.recording {
            return Err(CamcordError::illegal_operation("Not recording"));
        }
        self.end_recording()
    }

    fn end_recording(&mut self) -> CamcordResult<()> {
        self.recording = false;
        let Some(encode) = self.encode.as_mut() else {
            return Ok(());
        };
        encode.stop();
        let surface = encode.input_surface().surface;
        let removed = self.session.remove_target(surface);
        tracing::info!(stats = ?encode.stats(), "Recording stopped");
        self.notify(PipelineNotice::RecordingStopped);
        removed.map(|_| ())
    }

    /// Release the camera while keeping the encoder alive. Any recording
    /// segment ends; `open` resumes the preview.
    pub fn pause(&mut self) -> CamcordResult<()> {
        self.ensure_live()?;
        self.pending_open = None;
        if self.recording {
            self.recording = false;
            if let Some(encode) = self.encode.as_mut() {
                encode.stop();
            }
            self.notify(PipelineNotice::RecordingStopped);
        }
        self.session.close();
        if let Some(surface) = self.encoder_surface() {
            // Device is closed, so this only edits the remembered targets.
            self.session.remove_target(surface)?;
        }
        tracing::info!("Pipeline paused");
        Ok(())
    }

    /// Tear everything down: close the camera, then destroy the encoder and
    /// finalize the container. A second call is an `IllegalOperation`.
    pub fn close(&mut self) -> CamcordResult<()> {
        self.ensure_live()?;
        self.torn_down = true;
        self.pending_open = None;
        if self.recording {
            self.recording = false;
            self.notify(PipelineNotice::RecordingStopped);
        }
        self.session.close();
        let result = match self.encode.take() {
            Some(encode) => encode.destroy(),
            None => Ok(()),
        };
        tracing::info!("Pipeline closed");
        result
    }

    fn ensure_live(&self) -> CamcordResult<()> {
        if self.torn_down {
            return Err(CamcordError::illegal_operation(
                "Pipeline has been torn down",
            ));
        }
        Ok(())
    }

    /// Handle every queued callback without waiting. Returns how many were
    /// handled.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let before = handled;
            while let Ok(event) = self.camera_events.try_recv() {
                self.on_camera_event(event);
                handled += 1;
            }
            while let Ok(event) = self.encoder_events.try_recv() {
                self.on_encoder_event(event);
                handled += 1;
            }
            if handled == before {
                return handled;
            }
        }
    }

    /// Wait for the next callback from either queue and handle it. Returns
    /// `false` once both queues are closed.
    pub async fn dispatch_next(&mut self) -> bool {
        tokio::select! {
            Some(event) = self.camera_events.recv() => {
                self.on_camera_event(event);
                true
            }
            Some(event) = self.encoder_events.recv() => {
                self.on_encoder_event(event);
                true
            }
            else => false,
        }
    }

    fn on_camera_event(&mut self, event: CameraEvent) {
        match self.session.handle_event(event) {
            Ok(SessionUpdate::Ignored) => {}
            Ok(SessionUpdate::DeviceOpened) => {
                self.notify(PipelineNotice::DeviceOpened);
                if let Err(e) = self.session.refresh() {
                    self.on_fault(e);
                }
            }
            Ok(SessionUpdate::SessionActive {
                generation,
                targets,
            }) => self.notify(PipelineNotice::SessionActive {
                generation,
                targets,
            }),
            Err(e) => self.on_fault(e),
        }
    }

    fn on_encoder_event(&mut self, event: EncoderEvent) {
        let result = match self.encode.as_mut() {
            Some(encode) => encode.handle_event(event),
            None => Ok(()),
        };
        if let Err(e) = result {
            self.on_fault(e);
        }
    }

    fn on_fault(&mut self, error: CamcordError) {
        let kind = error.kind();
        tracing::warn!(error = %error, ?kind, recording = self.recording, "Pipeline fault");
        self.notify(PipelineNotice::Fault(error));

        if self.recording {
            if let Err(e) = self.end_recording() {
                tracing::warn!(error = %e, "Failed to drop encoder target after fault");
                self.notify(PipelineNotice::Fault(e));
            }
        }
    }

    fn notify(&self, notice: PipelineNotice) {
        self.notices.post(notice);
    }
}
