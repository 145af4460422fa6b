//! Camera device and capture session management.
//!
//! A [`CaptureSession`] owns at most one open camera device and at most one
//! hardware capture session. Hardware sessions are immutable once
//! configured, so every change to the output target set tears the current
//! session down and requests a new one.
//!
//! Each session request is tagged with a generation number. Callbacks for a
//! generation other than the one currently being configured belong to a
//! superseded request: the session they carry is closed, never activated.

use camcord_common::error::{CamcordError, CamcordResult};
use camcord_platform_core::{
    CallbackSink, CameraBackend, CameraEvent, CameraInfo, CaptureRequest, ControlMode,
    DeviceHandle, OutputTarget, RequestTemplate, SessionHandle, Size, SurfaceId, TargetRole,
};

use crate::size_select::{choose_capture_size, choose_optimal_preview_size};

/// Which camera to open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CameraSelector {
    /// The first camera the backend enumerates. Not multi-camera aware.
    #[default]
    FirstAvailable,
    /// A specific backend camera id.
    ById(String),
}

/// State of the device/session pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device.
    Closed,
    /// Device open requested, waiting for the callback tagged `token`.
    Opening { token: u64 },
    /// Device open, no capture session.
    Open,
    /// Session requested for `generation`, waiting for the hardware.
    Configuring { generation: u64 },
    /// Session configured and its repeating request running.
    Active {
        generation: u64,
        session: SessionHandle,
    },
}

/// Outcome of handling a camera callback that the owner may care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    /// Stale or uninteresting callback; nothing changed.
    Ignored,
    /// The device finished opening.
    DeviceOpened,
    /// A session for `targets` is live.
    SessionActive {
        generation: u64,
        targets: Vec<OutputTarget>,
    },
}

/// Owns the camera device and the active capture session.
pub struct CaptureSession {
    backend: Box<dyn CameraBackend>,
    callbacks: CallbackSink<CameraEvent>,
    state: SessionState,
    device: Option<DeviceHandle>,
    camera: Option<CameraInfo>,
    targets: Vec<OutputTarget>,
    pending_request: Option<CaptureRequest>,
    next_token: u64,
    generation: u64,
    max_capture_dimension: u32,
    video_size: Option<Size>,
    preview_size: Option<Size>,
}

impl CaptureSession {
    pub fn new(
        backend: Box<dyn CameraBackend>,
        callbacks: CallbackSink<CameraEvent>,
        max_capture_dimension: u32,
    ) -> Self {
        Self {
            backend,
            callbacks,
            state: SessionState::Closed,
            device: None,
            camera: None,
            targets: Vec::new(),
            pending_request: None,
            next_token: 0,
            generation: 0,
            max_capture_dimension,
            video_size: None,
            preview_size: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current ordered target set. Preview targets come first.
    pub fn targets(&self) -> &[OutputTarget] {
        &self.targets
    }

    pub fn has_target(&self, surface: SurfaceId) -> bool {
        self.targets.iter().any(|t| t.surface == surface)
    }

    /// Generation of the most recently issued session request.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_device_open(&self) -> bool {
        self.device.is_some()
    }

    pub fn camera(&self) -> Option<&CameraInfo> {
        self.camera.as_ref()
    }

    /// Capture size chosen for the encoder-facing stream at the last open.
    pub fn video_size(&self) -> Option<Size> {
        self.video_size
    }

    /// Preview buffer size chosen at the last open.
    pub fn preview_size(&self) -> Option<Size> {
        self.preview_size
    }

    /// Pick a camera, fix the preview and capture sizes, and request the
    /// device be opened.
    ///
    /// Fails with `DeviceUnavailable` when no camera can be enumerated; in
    /// that case nothing is requested from the backend.
    pub fn open(
        &mut self,
        selector: &CameraSelector,
        requested_width: u32,
        requested_height: u32,
    ) -> CamcordResult<()> {
        if self.state != SessionState::Closed {
            return Err(CamcordError::illegal_operation(format!(
                "Camera already open ({:?})",
                self.state
            )));
        }

        let ids = self.backend.camera_ids().map_err(|e| {
            CamcordError::device_unavailable(format!("Camera enumeration failed: {e}"))
        })?;
        let id = match selector {
            CameraSelector::FirstAvailable => ids.first().cloned(),
            CameraSelector::ById(wanted) => ids.iter().find(|id| *id == wanted).cloned(),
        }
        .ok_or_else(|| {
            CamcordError::device_unavailable(format!(
                "No camera matching {selector:?} (backend {} reports {} cameras)",
                self.backend.name(),
                ids.len()
            ))
        })?;

        let info = self
            .backend
            .camera_info(&id)
            .map_err(|e| CamcordError::device_unavailable(format!("Camera {id}: {e}")))?;

        let video = choose_capture_size(&info.encoder_sizes, self.max_capture_dimension)?;
        let preview = choose_optimal_preview_size(
            &info.preview_sizes,
            requested_width,
            requested_height,
            video.size,
        )?;

        self.next_token += 1;
        let token = self.next_token;
        self.backend
            .open_device(&id, token, self.callbacks.clone())
            .map_err(|e| CamcordError::device_unavailable(format!("Camera {id}: {e}")))?;

        tracing::info!(
            camera = %id,
            video = %video.size,
            preview = %preview.size,
            token,
            "Opening camera"
        );

        for target in &mut self.targets {
            if target.role == TargetRole::Preview {
                target.buffer_size = preview.size;
            }
        }
        self.video_size = Some(video.size);
        self.preview_size = Some(preview.size);
        self.camera = Some(info);
        self.state = SessionState::Opening { token };
        Ok(())
    }

    /// Add a target and rebuild the session around the new set. While the
    /// device is not yet open the target is only recorded.
    pub fn add_target(&mut self, target: OutputTarget) -> CamcordResult<()> {
        let mut targets = self.targets.clone();
        match targets.iter_mut().find(|t| t.surface == target.surface) {
            Some(existing) => *existing = target,
            None if target.role == TargetRole::Preview => targets.insert(0, target),
            None => targets.push(target),
        }
        self.apply_targets(targets)
    }

    /// Remove the target for `surface`. Returns `false` if it was not part of
    /// the set, in which case the session is left alone.
    pub fn remove_target(&mut self, surface: SurfaceId) -> CamcordResult<bool> {
        if !self.has_target(surface) {
            return Ok(false);
        }
        let targets = self
            .targets
            .iter()
            .copied()
            .filter(|t| t.surface != surface)
            .collect();
        self.apply_targets(targets)?;
        Ok(true)
    }

    fn apply_targets(&mut self, targets: Vec<OutputTarget>) -> CamcordResult<()> {
        if self.device.is_some() {
            self.rebuild_session(targets)
        } else {
            self.targets = dedup_targets(targets);
            Ok(())
        }
    }

    /// Replace the session with one covering exactly `targets`.
    ///
    /// Any active session has its captures aborted (best effort) and is
    /// closed first. The new session's repeating request is only issued once
    /// the hardware confirms this generation. Calling this twice with the
    /// same targets simply replaces the session.
    pub fn rebuild_session(&mut self, targets: Vec<OutputTarget>) -> CamcordResult<()> {
        let Some(device) = self.device else {
            return Err(CamcordError::illegal_operation(
                "Cannot build a capture session without an open camera",
            ));
        };

        self.discard_session();
        self.generation += 1;
        let generation = self.generation;
        self.targets = dedup_targets(targets);
        self.state = SessionState::Open;

        if self.targets.is_empty() {
            tracing::debug!(generation, "No output targets; camera left idle");
            return Ok(());
        }

        let mut request =
            CaptureRequest::new(RequestTemplate::Record).with_control_mode(ControlMode::Auto);
        for target in &self.targets {
            request.add_target(target.surface);
        }

        self.backend
            .create_session(device, &self.targets, generation, self.callbacks.clone())
            .map_err(|e| CamcordError::session_configuration_failed(generation, e.to_string()))?;

        tracing::debug!(
            generation,
            targets = self.targets.len(),
            "Capture session requested"
        );
        self.pending_request = Some(request);
        self.state = SessionState::Configuring { generation };
        Ok(())
    }

    /// Re-request a session for the current targets, e.g. once the device
    /// has finished opening.
    pub fn refresh(&mut self) -> CamcordResult<()> {
        if self.targets.is_empty() {
            return Ok(());
        }
        self.rebuild_session(self.targets.clone())
    }

    /// Apply a camera callback.
    ///
    /// Errors are the faults the callback reports (`DeviceUnavailable`,
    /// `SessionConfigurationFailed`); the session has already been brought
    /// back to a consistent state when they are returned.
    pub fn handle_event(&mut self, event: CameraEvent) -> CamcordResult<SessionUpdate> {
        match event {
            CameraEvent::DeviceOpened { token, device } => {
                if self.state != (SessionState::Opening { token }) {
                    tracing::debug!(token, ?device, "Closing device from superseded open");
                    self.backend.close_device(device);
                    return Ok(SessionUpdate::Ignored);
                }
                tracing::info!(?device, "Camera opened");
                self.device = Some(device);
                self.state = SessionState::Open;
                Ok(SessionUpdate::DeviceOpened)
            }
            CameraEvent::DeviceOpenFailed { token, reason } => {
                if self.state != (SessionState::Opening { token }) {
                    tracing::debug!(token, "Ignoring failure of superseded open");
                    return Ok(SessionUpdate::Ignored);
                }
                self.state = SessionState::Closed;
                Err(CamcordError::device_unavailable(reason))
            }
            CameraEvent::DeviceDisconnected { device } => {
                if self.device != Some(device) {
                    return Ok(SessionUpdate::Ignored);
                }
                self.close();
                Err(CamcordError::device_unavailable("Camera disconnected"))
            }
            CameraEvent::DeviceError { device, code } => {
                if self.device != Some(device) {
                    return Ok(SessionUpdate::Ignored);
                }
                tracing::error!(code, "Camera device error");
                self.close();
                Err(CamcordError::device_unavailable(format!(
                    "Camera device error code {code}"
                )))
            }
            CameraEvent::SessionConfigured {
                generation,
                session,
            } => self.on_configured(generation, session),
            CameraEvent::SessionConfigureFailed {
                generation,
                session,
            } => {
                self.backend.close_session(session);
                if self.state != (SessionState::Configuring { generation }) {
                    tracing::debug!(generation, "Superseded session failed to configure");
                    return Ok(SessionUpdate::Ignored);
                }
                self.pending_request = None;
                self.state = SessionState::Open;
                Err(CamcordError::session_configuration_failed(
                    generation,
                    format!("Hardware rejected {} output targets", self.targets.len()),
                ))
            }
        }
    }

    fn on_configured(
        &mut self,
        generation: u64,
        session: SessionHandle,
    ) -> CamcordResult<SessionUpdate> {
        if self.state != (SessionState::Configuring { generation }) {
            tracing::debug!(
                generation,
                current = self.generation,
                "Closing session from superseded request"
            );
            self.backend.close_session(session);
            return Ok(SessionUpdate::Ignored);
        }

        let Some(request) = self.pending_request.take() else {
            self.backend.close_session(session);
            self.state = SessionState::Open;
            return Err(CamcordError::session_configuration_failed(
                generation,
                "No capture request built for this session",
            ));
        };

        if let Err(e) = self.backend.set_repeating_request(session, &request) {
            self.backend.close_session(session);
            self.state = SessionState::Open;
            return Err(CamcordError::session_configuration_failed(
                generation,
                format!("Repeating request rejected: {e}"),
            ));
        }

        tracing::info!(
            generation,
            targets = self.targets.len(),
            "Capture session active"
        );
        self.state = SessionState::Active {
            generation,
            session,
        };
        Ok(SessionUpdate::SessionActive {
            generation,
            targets: self.targets.clone(),
        })
    }

    /// Abort and close any session, then close the device. Any request still
    /// in flight becomes stale. The target set is kept for the next open.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.discard_session();
        // Invalidates in-flight session requests and pending opens.
        self.generation += 1;
        if let Some(device) = self.device.take() {
            self.backend.close_device(device);
        }
        self.state = SessionState::Closed;
        tracing::info!("Camera closed");
    }

    fn discard_session(&mut self) {
        if let SessionState::Active { session, .. } = self.state {
            if let Err(e) = self.backend.abort_captures(session) {
                tracing::warn!(error = %e, ?session, "Failed to abort captures");
            }
            self.backend.close_session(session);
        }
        self.pending_request = None;
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn dedup_targets(targets: Vec<OutputTarget>) -> Vec<OutputTarget> {
    let mut unique: Vec<OutputTarget> = Vec::with_capacity(targets.len());
    for target in targets {
        if !unique.iter().any(|t| t.surface == target.surface) {
            unique.push(target);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim::SimHardware;

    type Events = tokio::sync::mpsc::UnboundedReceiver<CameraEvent>;

    fn open_session(hw: &SimHardware) -> (CaptureSession, Events) {
        let (sink, rx) = CallbackSink::channel();
        let mut session = CaptureSession::new(hw.camera_backend(), sink, 1080);
        session
            .open(&CameraSelector::FirstAvailable, 1280, 960)
            .unwrap();
        (session, rx)
    }

    fn pump(
        hw: &SimHardware,
        session: &mut CaptureSession,
        rx: &mut Events,
    ) -> Vec<CamcordResult<SessionUpdate>> {
        hw.deliver_camera_callbacks();
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(session.handle_event(event));
        }
        out
    }

    #[test]
    fn open_fixes_sizes_and_waits_for_callback() {
        let hw = SimHardware::new();
        let (mut session, mut rx) = open_session(&hw);
        assert!(matches!(session.state(), SessionState::Opening { .. }));
        assert_eq!(session.video_size(), Some(Size::new(960, 720)));
        assert_eq!(session.preview_size(), Some(Size::new(1280, 960)));

        let updates = pump(&hw, &mut session, &mut rx);
        assert!(matches!(updates[..], [Ok(SessionUpdate::DeviceOpened)]));
        assert_eq!(session.state(), SessionState::Open);
    }

    #[test]
    fn open_twice_is_illegal() {
        let hw = SimHardware::new();
        let (mut session, _rx) = open_session(&hw);
        let err = session
            .open(&CameraSelector::FirstAvailable, 640, 480)
            .unwrap_err();
        assert!(matches!(err, CamcordError::IllegalOperation { .. }));
    }

    #[test]
    fn unknown_camera_id_is_unavailable() {
        let hw = SimHardware::new();
        let (sink, _rx) = CallbackSink::channel();
        let mut session = CaptureSession::new(hw.camera_backend(), sink, 1080);
        let err = session
            .open(&CameraSelector::ById("rear-9".into()), 640, 480)
            .unwrap_err();
        assert!(matches!(err, CamcordError::DeviceUnavailable { .. }));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(hw.ledger().devices_opened, 0);
    }

    #[test]
    fn targets_added_before_open_are_used_once_device_opens() {
        let hw = SimHardware::new();
        let (mut session, mut rx) = open_session(&hw);
        session
            .add_target(OutputTarget::preview(SurfaceId(1), Size::new(1280, 960)))
            .unwrap();
        assert_eq!(hw.ledger().sessions_created, 0);

        pump(&hw, &mut session, &mut rx);
        session.refresh().unwrap();
        let updates = pump(&hw, &mut session, &mut rx);
        assert!(matches!(
            updates[..],
            [Ok(SessionUpdate::SessionActive { generation: 1, .. })]
        ));
        assert_eq!(hw.ledger().open_sessions.len(), 1);
    }

    #[test]
    fn preview_targets_stay_first() {
        let hw = SimHardware::new();
        let (mut session, _rx) = open_session(&hw);
        session
            .add_target(OutputTarget::encoder(SurfaceId(9), Size::new(1440, 1080)))
            .unwrap();
        session
            .add_target(OutputTarget::preview(SurfaceId(1), Size::new(1, 1)))
            .unwrap();
        let order: Vec<_> = session.targets().iter().map(|t| t.surface).collect();
        assert_eq!(order, vec![SurfaceId(1), SurfaceId(9)]);
    }

    #[test]
    fn configure_failure_closes_the_half_built_session() {
        let hw = SimHardware::new();
        let (mut session, mut rx) = open_session(&hw);
        pump(&hw, &mut session, &mut rx);

        hw.reject_next_session();
        session
            .add_target(OutputTarget::preview(SurfaceId(1), Size::new(1280, 960)))
            .unwrap();
        let updates = pump(&hw, &mut session, &mut rx);
        assert!(matches!(
            updates[..],
            [Err(CamcordError::SessionConfigurationFailed { generation: 1, .. })]
        ));
        assert_eq!(session.state(), SessionState::Open);
        let ledger = hw.ledger();
        assert!(ledger.open_sessions.is_empty());
        assert!(ledger.repeating.is_none());
    }

    #[test]
    fn close_during_open_closes_late_device() {
        let hw = SimHardware::new();
        let (mut session, mut rx) = open_session(&hw);
        session.close();
        let updates = pump(&hw, &mut session, &mut rx);
        assert!(matches!(updates[..], [Ok(SessionUpdate::Ignored)]));
        assert_eq!(session.state(), SessionState::Closed);
        let ledger = hw.ledger();
        assert_eq!(ledger.devices_opened, 1);
        assert!(ledger.open_devices.is_empty());
    }

    #[test]
    fn disconnect_tears_everything_down() {
        let hw = SimHardware::new();
        let (mut session, mut rx) = open_session(&hw);
        session
            .add_target(OutputTarget::preview(SurfaceId(1), Size::new(1280, 960)))
            .unwrap();
        pump(&hw, &mut session, &mut rx);
        session.refresh().unwrap();
        pump(&hw, &mut session, &mut rx);
        assert!(matches!(session.state(), SessionState::Active { .. }));

        hw.disconnect_camera();
        let updates = pump(&hw, &mut session, &mut rx);
        assert!(matches!(
            updates[..],
            [Err(CamcordError::DeviceUnavailable { .. })]
        ));
        assert_eq!(session.state(), SessionState::Closed);
        let ledger = hw.ledger();
        assert!(ledger.open_sessions.is_empty());
        assert!(ledger.open_devices.is_empty());
        assert!(ledger.repeating.is_none());
    }

    #[test]
    fn device_error_closes_device_and_keeps_targets() {
        let hw = SimHardware::new();
        let (mut session, mut rx) = open_session(&hw);
        session
            .add_target(OutputTarget::preview(SurfaceId(1), Size::new(1280, 960)))
            .unwrap();
        pump(&hw, &mut session, &mut rx);

        hw.fail_camera(4);
        let updates = pump(&hw, &mut session, &mut rx);
        assert!(matches!(
            updates[..],
            [Err(CamcordError::DeviceUnavailable { .. })]
        ));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!session.is_device_open());
        assert!(session.has_target(SurfaceId(1)));
        assert!(hw.ledger().open_devices.is_empty());
    }
}
