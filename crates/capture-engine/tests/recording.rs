use std::path::PathBuf;

use camcord_capture_engine::backend::sim::{SimHardware, SIM_ENCODER_SURFACE};
use camcord_capture_engine::{CapturePipeline, PipelineConfig, PipelineNotice, SessionState};
use camcord_common::config::RecordingDefaults;
use camcord_common::error::{CamcordError, FaultKind};
use camcord_platform_core::{CameraInfo, Size, SurfaceId};
use tokio::sync::mpsc::UnboundedReceiver;

const PREVIEW: SurfaceId = SurfaceId(1);

fn full_hd_sensor() -> CameraInfo {
    let sizes: Vec<Size> = [
        (1920, 1080),
        (1440, 1080),
        (1280, 960),
        (1280, 720),
        (960, 720),
        (640, 480),
    ]
    .iter()
    .map(|&(w, h)| Size::new(w, h))
    .collect();
    CameraInfo {
        id: "back".to_string(),
        preview_sizes: sizes.clone(),
        encoder_sizes: sizes,
    }
}

fn config() -> PipelineConfig {
    let defaults = RecordingDefaults::default();
    PipelineConfig {
        camera: Default::default(),
        encoder: defaults.encoder_config(),
        output_path: PathBuf::from("/tmp/camcord-test/h264.mp4"),
        max_capture_dimension: defaults.max_capture_dimension,
    }
}

fn build(hw: &SimHardware) -> (CapturePipeline, UnboundedReceiver<PipelineNotice>) {
    CapturePipeline::new(hw.camera_backend(), &hw.media(), config())
        .expect("pipeline should build against the simulated hardware")
}

/// Deliver held camera callbacks and apply everything queued until quiet.
fn settle(hw: &SimHardware, pipeline: &mut CapturePipeline) {
    while hw.deliver_camera_callbacks() > 0 {
        pipeline.dispatch_pending();
    }
    pipeline.dispatch_pending();
}

fn drain(notices: &mut UnboundedReceiver<PipelineNotice>) -> Vec<PipelineNotice> {
    let mut out = Vec::new();
    while let Ok(notice) = notices.try_recv() {
        out.push(notice);
    }
    out
}

fn previewing(hw: &SimHardware) -> (CapturePipeline, UnboundedReceiver<PipelineNotice>) {
    let (mut pipeline, notices) = build(hw);
    pipeline.surface_available(PREVIEW, 1440, 1080).unwrap();
    pipeline.open(1440, 1080).unwrap();
    settle(hw, &mut pipeline);
    (pipeline, notices)
}

#[test]
fn thirty_frames_after_format_change_become_thirty_samples() {
    let hw = SimHardware::with_cameras(vec![full_hd_sensor()]);
    let (mut pipeline, mut notices) = previewing(&hw);

    let preview = pipeline.preview_size().expect("preview size chosen on open");
    assert!(preview.has_aspect_of(Size::new(4, 3)));
    assert!(preview.width <= 1920 && preview.height <= 1080);
    assert_eq!(pipeline.video_size(), Some(Size::new(960, 720)));
    assert!(matches!(
        pipeline.session_state(),
        SessionState::Active { .. }
    ));
    let sessions_before = hw.ledger().sessions_created;

    pipeline.start_record().unwrap();
    settle(&hw, &mut pipeline);
    assert_eq!(hw.ledger().sessions_created, sessions_before + 1);

    let ledger = hw.ledger();
    let (_, request) = ledger.repeating.expect("recording session should be running");
    assert_eq!(request.targets, vec![PREVIEW, SIM_ENCODER_SURFACE]);

    hw.emit_encoder_format();
    hw.emit_encoder_buffers(30);
    pipeline.dispatch_pending();

    let ledger = hw.ledger();
    assert_eq!(ledger.samples.len(), 30);
    assert_eq!(ledger.premature_writes, 0);
    assert_eq!(ledger.buffers_released, 30);
    assert!(ledger.samples[0].key_frame);
    assert_eq!(pipeline.encode_stats().samples_written, 30);

    let notices = drain(&mut notices);
    assert!(notices
        .iter()
        .any(|n| matches!(n, PipelineNotice::RecordingStarted)));
}

#[test]
fn buffers_after_stop_are_released_but_not_written() {
    let hw = SimHardware::with_cameras(vec![full_hd_sensor()]);
    let (mut pipeline, _notices) = previewing(&hw);
    pipeline.start_record().unwrap();
    settle(&hw, &mut pipeline);
    hw.emit_encoder_format();
    hw.emit_encoder_buffers(10);
    pipeline.dispatch_pending();

    pipeline.stop_record().unwrap();
    hw.emit_encoder_buffers(5);
    settle(&hw, &mut pipeline);

    let ledger = hw.ledger();
    assert_eq!(ledger.samples.len(), 10);
    assert_eq!(ledger.buffers_released, 15);
    assert_eq!(ledger.outstanding_buffers(), 0);
    assert_eq!(ledger.double_releases, 0);

    let (_, request) = ledger.repeating.expect("preview should keep running");
    assert_eq!(request.targets, vec![PREVIEW]);
    assert!(!pipeline.is_recording());
}

#[test]
fn second_segment_lands_in_the_same_file() {
    let hw = SimHardware::new();
    let (mut pipeline, _notices) = previewing(&hw);

    pipeline.start_record().unwrap();
    settle(&hw, &mut pipeline);
    hw.emit_encoder_format();
    hw.emit_encoder_buffers(4);
    pipeline.dispatch_pending();
    pipeline.stop_record().unwrap();
    settle(&hw, &mut pipeline);

    pipeline.start_record().unwrap();
    settle(&hw, &mut pipeline);
    hw.emit_encoder_buffers(6);
    pipeline.dispatch_pending();

    let ledger = hw.ledger();
    assert_eq!(ledger.samples.len(), 10);
    assert_eq!(ledger.tracks_added, 1);
    assert!(!ledger.muxer_stopped);
}

#[test]
fn open_without_cameras_reports_device_unavailable() {
    let hw = SimHardware::without_cameras();
    let (mut pipeline, _notices) = build(&hw);
    pipeline.surface_available(PREVIEW, 1440, 1080).unwrap();

    let err = pipeline.open(1440, 1080).unwrap_err();
    assert!(matches!(err, CamcordError::DeviceUnavailable { .. }));
    assert!(err.kind().is_blocking());
    assert_eq!(pipeline.session_state(), SessionState::Closed);

    let ledger = hw.ledger();
    assert_eq!(ledger.devices_opened, 0);
    assert_eq!(ledger.sessions_created, 0);
    assert_eq!(hw.pending_camera_callbacks(), 0);
}

#[test]
fn open_waits_for_the_preview_surface() {
    let hw = SimHardware::new();
    let (mut pipeline, _notices) = build(&hw);
    pipeline.open(1280, 960).unwrap();
    assert_eq!(pipeline.session_state(), SessionState::Closed);
    assert_eq!(hw.pending_camera_callbacks(), 0);

    pipeline.surface_available(PREVIEW, 1280, 960).unwrap();
    settle(&hw, &mut pipeline);
    assert!(matches!(
        pipeline.session_state(),
        SessionState::Active { .. }
    ));
    assert_eq!(pipeline.targets()[0].surface, PREVIEW);
}

#[test]
fn recording_before_open_is_illegal() {
    let hw = SimHardware::new();
    let (mut pipeline, _notices) = build(&hw);
    let err = pipeline.start_record().unwrap_err();
    assert!(matches!(err, CamcordError::IllegalOperation { .. }));
    assert!(matches!(
        pipeline.stop_record(),
        Err(CamcordError::IllegalOperation { .. })
    ));
}

#[test]
fn encoder_fault_ends_the_recording() {
    let hw = SimHardware::new();
    let (mut pipeline, mut notices) = previewing(&hw);
    pipeline.start_record().unwrap();
    settle(&hw, &mut pipeline);
    drain(&mut notices);

    hw.emit_encoder_error(-38);
    settle(&hw, &mut pipeline);

    let notices = drain(&mut notices);
    assert!(matches!(
        notices.first(),
        Some(PipelineNotice::Fault(CamcordError::EncoderFault { code: -38, .. }))
    ));
    assert!(notices
        .iter()
        .any(|n| matches!(n, PipelineNotice::RecordingStopped)));
    assert!(!pipeline.is_recording());
    assert!(!pipeline
        .targets()
        .iter()
        .any(|t| t.surface == SIM_ENCODER_SURFACE));
}

#[test]
fn rejected_recording_session_reverts_to_not_recording() {
    let hw = SimHardware::new();
    let (mut pipeline, mut notices) = previewing(&hw);
    drain(&mut notices);

    hw.reject_next_session();
    pipeline.start_record().unwrap();
    settle(&hw, &mut pipeline);

    let notices = drain(&mut notices);
    let fault = notices.iter().find_map(|n| match n {
        PipelineNotice::Fault(e) => Some(e.kind()),
        _ => None,
    });
    assert_eq!(fault, Some(FaultKind::SessionConfigurationFailed));
    assert!(!pipeline.is_recording());

    // Back to a preview-only session; nothing half-built is left open.
    let ledger = hw.ledger();
    assert_eq!(ledger.open_sessions.len(), 1);
    let (_, request) = ledger.repeating.expect("preview session should be running");
    assert_eq!(request.targets, vec![PREVIEW]);
}

#[test]
fn disconnect_while_recording_is_blocking_and_stops_recording() {
    let hw = SimHardware::new();
    let (mut pipeline, mut notices) = previewing(&hw);
    pipeline.start_record().unwrap();
    settle(&hw, &mut pipeline);
    drain(&mut notices);

    hw.disconnect_camera();
    settle(&hw, &mut pipeline);

    let notices = drain(&mut notices);
    let blocking = notices.iter().any(|n| {
        matches!(n, PipelineNotice::Fault(e) if e.kind().is_blocking())
    });
    assert!(blocking);
    assert!(!pipeline.is_recording());
    assert_eq!(pipeline.session_state(), SessionState::Closed);
    let ledger = hw.ledger();
    assert!(ledger.open_devices.is_empty());
    assert!(ledger.open_sessions.is_empty());
}

#[test]
fn pause_keeps_encoder_and_open_resumes_preview() {
    let hw = SimHardware::new();
    let (mut pipeline, mut notices) = previewing(&hw);
    pipeline.start_record().unwrap();
    settle(&hw, &mut pipeline);
    drain(&mut notices);

    pipeline.pause().unwrap();
    assert!(!pipeline.is_recording());
    assert_eq!(pipeline.session_state(), SessionState::Closed);
    assert!(matches!(
        drain(&mut notices)[..],
        [PipelineNotice::RecordingStopped]
    ));
    let ledger = hw.ledger();
    assert!(ledger.open_devices.is_empty());
    assert!(ledger.encoder_running);

    pipeline.open(1280, 960).unwrap();
    settle(&hw, &mut pipeline);
    let ledger = hw.ledger();
    let (_, request) = ledger.repeating.expect("preview should resume");
    assert_eq!(request.targets, vec![PREVIEW]);
}

#[test]
fn close_finalizes_once() {
    let hw = SimHardware::new();
    let (mut pipeline, _notices) = previewing(&hw);
    pipeline.start_record().unwrap();
    settle(&hw, &mut pipeline);
    hw.emit_encoder_format();
    hw.emit_encoder_buffers(3);
    pipeline.dispatch_pending();

    pipeline.close().unwrap();
    let ledger = hw.ledger();
    assert!(ledger.encoder_released);
    assert!(ledger.muxer_stopped);
    assert!(ledger.muxer_released);
    assert!(ledger.open_devices.is_empty());
    assert_eq!(
        ledger.output_path,
        Some(PathBuf::from("/tmp/camcord-test/h264.mp4"))
    );

    assert!(matches!(
        pipeline.close(),
        Err(CamcordError::IllegalOperation { .. })
    ));
    assert!(matches!(
        pipeline.start_record(),
        Err(CamcordError::IllegalOperation { .. })
    ));
}

#[test]
fn surface_destroyed_drops_preview_target() {
    let hw = SimHardware::new();
    let (mut pipeline, _notices) = previewing(&hw);
    pipeline.surface_destroyed().unwrap();
    settle(&hw, &mut pipeline);

    assert!(pipeline.targets().is_empty());
    let ledger = hw.ledger();
    assert!(ledger.repeating.is_none());
    assert!(ledger.open_sessions.is_empty());
    assert_eq!(ledger.open_devices.len(), 1);
}

#[test]
fn refused_session_request_leaves_encoder_unrouted() {
    let hw = SimHardware::with_cameras(vec![full_hd_sensor()]);
    let (mut pipeline, _notices) = previewing(&hw);

    hw.refuse_next_session_request();
    let err = pipeline.start_record().unwrap_err();
    assert!(matches!(err, CamcordError::SessionConfigurationFailed { .. }));
    assert!(!pipeline.is_recording());
    assert!(pipeline
        .targets()
        .iter()
        .all(|t| t.surface != SIM_ENCODER_SURFACE));
    assert!(matches!(
        pipeline.stop_record(),
        Err(CamcordError::IllegalOperation { .. })
    ));

    settle(&hw, &mut pipeline);
    pipeline.surface_available(SurfaceId(2), 1440, 1080).unwrap();
    settle(&hw, &mut pipeline);

    let (_, request) = hw.ledger().repeating.expect("preview keeps running");
    assert_eq!(request.targets, vec![SurfaceId(2)]);
}

#[tokio::test]
async fn dispatch_next_applies_one_callback() {
    let hw = SimHardware::new();
    let (mut pipeline, mut notices) = build(&hw);
    pipeline.surface_available(PREVIEW, 1280, 960).unwrap();
    pipeline.open(1280, 960).unwrap();

    hw.deliver_camera_callbacks();
    assert!(pipeline.dispatch_next().await);
    assert!(matches!(
        notices.recv().await,
        Some(PipelineNotice::DeviceOpened)
    ));
    assert_eq!(hw.pending_camera_callbacks(), 1);

    hw.deliver_camera_callbacks();
    assert!(pipeline.dispatch_next().await);
    assert!(matches!(
        notices.recv().await,
        Some(PipelineNotice::SessionActive { generation: 1, .. })
    ));
}
