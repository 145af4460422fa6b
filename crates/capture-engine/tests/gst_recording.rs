#![cfg(feature = "gst")]

use camcord_capture_engine::backend::gst_mux::required_elements;
use camcord_capture_engine::backend::{GstMuxerFactory, SimHardware};
use camcord_capture_engine::{CapturePipeline, PipelineConfig};
use camcord_common::config::RecordingDefaults;
use camcord_platform_core::SurfaceId;

fn writer_elements_installed() -> bool {
    required_elements()
        .map(|elements| elements.iter().all(|(_, found)| *found))
        .unwrap_or(false)
}

#[test]
fn simulated_recording_produces_an_mp4_file() {
    if !writer_elements_installed() {
        return;
    }
    let dir = std::env::temp_dir().join(format!("camcord-gst-pipeline-{}", std::process::id()));
    let path = dir.join("nested").join("h264.mp4");

    let defaults = RecordingDefaults::default();
    let config = PipelineConfig {
        camera: Default::default(),
        encoder: defaults.encoder_config(),
        output_path: path.clone(),
        max_capture_dimension: defaults.max_capture_dimension,
    };

    let hw = SimHardware::new();
    let media = GstMuxerFactory::new(hw.media());
    let (mut pipeline, _notices) =
        CapturePipeline::new(hw.camera_backend(), &media, config).unwrap();

    pipeline.surface_available(SurfaceId(1), 1440, 1080).unwrap();
    pipeline.open(1440, 1080).unwrap();
    while hw.deliver_camera_callbacks() > 0 {
        pipeline.dispatch_pending();
    }

    pipeline.start_record().unwrap();
    while hw.deliver_camera_callbacks() > 0 {
        pipeline.dispatch_pending();
    }
    hw.emit_encoder_format();
    hw.emit_encoder_buffers(30);
    pipeline.dispatch_pending();
    assert_eq!(pipeline.encode_stats().samples_written, 30);
    assert_eq!(pipeline.encode_stats().write_failures, 0);

    pipeline.stop_record().unwrap();
    pipeline.close().unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[4..8], b"ftyp");
    assert!(bytes.windows(4).any(|w| w == b"moov"));
    assert_eq!(hw.ledger().outstanding_buffers(), 0);
    let _ = std::fs::remove_dir_all(&dir);
}
