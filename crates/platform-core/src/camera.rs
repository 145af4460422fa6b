//! Camera device and capture session contracts.

use camcord_common::error::CamcordResult;
use serde::{Deserialize, Serialize};

use crate::{CallbackSink, OutputTarget, Size, SurfaceId};

/// Capability descriptor of a physical camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    /// Backend-specific device identifier.
    pub id: String,

    /// Sizes the camera can produce for a preview surface, in the backend's
    /// preferred order.
    pub preview_sizes: Vec<Size>,

    /// Sizes the camera can produce for an encoder input surface.
    pub encoder_sizes: Vec<Size>,
}

/// Backend token for an opened camera device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub u64);

/// Backend token for a configured capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionHandle(pub u64);

/// Capture request template, selecting the hardware's tuning preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTemplate {
    Preview,
    /// Stable frame rate suitable for video recording.
    Record,
}

/// 3A control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    Auto,
    Off,
}

/// A capture request the hardware reissues continuously once set as the
/// session's repeating request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub template: RequestTemplate,
    pub control_mode: ControlMode,
    pub targets: Vec<SurfaceId>,
}

impl CaptureRequest {
    pub fn new(template: RequestTemplate) -> Self {
        Self {
            template,
            control_mode: ControlMode::Auto,
            targets: Vec::new(),
        }
    }

    pub fn with_control_mode(mut self, mode: ControlMode) -> Self {
        self.control_mode = mode;
        self
    }

    pub fn add_target(&mut self, surface: SurfaceId) {
        if !self.targets.contains(&surface) {
            self.targets.push(surface);
        }
    }
}

/// Asynchronous outcomes reported by a [`CameraBackend`].
///
/// Device events carry the open token passed to
/// [`CameraBackend::open_device`]; session events carry the generation
/// passed to [`CameraBackend::create_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraEvent {
    DeviceOpened { token: u64, device: DeviceHandle },
    DeviceOpenFailed { token: u64, reason: String },
    DeviceDisconnected { device: DeviceHandle },
    DeviceError { device: DeviceHandle, code: i32 },
    SessionConfigured { generation: u64, session: SessionHandle },
    SessionConfigureFailed { generation: u64, session: SessionHandle },
}

/// Platform camera service.
///
/// Every method returns immediately. Requests that complete asynchronously
/// (`open_device`, `create_session`) report through the supplied sink.
pub trait CameraBackend: Send {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Identifiers of the cameras currently available.
    fn camera_ids(&self) -> CamcordResult<Vec<String>>;

    /// Capability descriptor for one camera.
    fn camera_info(&self, id: &str) -> CamcordResult<CameraInfo>;

    /// Request the device be opened. Completion arrives as
    /// `DeviceOpened`/`DeviceOpenFailed` tagged with `token`.
    fn open_device(
        &mut self,
        id: &str,
        token: u64,
        callbacks: CallbackSink<CameraEvent>,
    ) -> CamcordResult<()>;

    /// Request a capture session covering exactly `targets`. Completion
    /// arrives as `SessionConfigured`/`SessionConfigureFailed` tagged with
    /// `generation`.
    fn create_session(
        &mut self,
        device: DeviceHandle,
        targets: &[OutputTarget],
        generation: u64,
        callbacks: CallbackSink<CameraEvent>,
    ) -> CamcordResult<()>;

    /// Replace the session's repeating request.
    fn set_repeating_request(
        &mut self,
        session: SessionHandle,
        request: &CaptureRequest,
    ) -> CamcordResult<()>;

    /// Discard in-flight and repeating captures on a session.
    fn abort_captures(&mut self, session: SessionHandle) -> CamcordResult<()>;

    fn close_session(&mut self, session: SessionHandle);

    fn close_device(&mut self, device: DeviceHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_targets_are_deduplicated() {
        let mut request = CaptureRequest::new(RequestTemplate::Record);
        request.add_target(SurfaceId(1));
        request.add_target(SurfaceId(2));
        request.add_target(SurfaceId(1));
        assert_eq!(request.targets, vec![SurfaceId(1), SurfaceId(2)]);
        assert_eq!(request.control_mode, ControlMode::Auto);
    }
}
