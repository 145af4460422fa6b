//! Run a full recording against the simulated backend.
//!
//! With the `gst` feature the encoded stream is written to a real MP4 file;
//! otherwise samples only reach the in-memory muxer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use camcord_capture_engine::backend::{SimHardware, SimLedger};
use camcord_capture_engine::EncodeStats;
use camcord_capture_engine::{CapturePipeline, PipelineConfig, PipelineNotice};
use camcord_common::config::AppConfig;
use camcord_platform_core::SurfaceId;
use tokio::sync::mpsc::UnboundedReceiver;

const PREVIEW_SURFACE: SurfaceId = SurfaceId(1);
const IDLE: Duration = Duration::from_millis(20);

pub async fn run(
    config: &AppConfig,
    frames: usize,
    width: u32,
    height: u32,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut pipeline_config = PipelineConfig::from_app_config(config);
    if let Some(output) = output {
        pipeline_config.output_path = output;
    }
    println!("Simulated recording");
    println!("  Output: {}", pipeline_config.output_path.display());
    println!("  Requested preview: {width}x{height}");
    println!("  Frames: {frames}");
    println!();

    let output_path = pipeline_config.output_path.clone();
    let hw = SimHardware::new();
    #[cfg(feature = "gst")]
    let media = camcord_capture_engine::backend::GstMuxerFactory::new(hw.media());
    #[cfg(not(feature = "gst"))]
    let media = hw.media();
    let (mut pipeline, mut notices) =
        CapturePipeline::new(hw.camera_backend(), &media, pipeline_config)?;

    pipeline.surface_available(PREVIEW_SURFACE, width, height)?;
    pipeline.open(width, height)?;
    pump(&hw, &mut pipeline).await;
    report(&mut notices);

    if let (Some(preview), Some(video)) = (pipeline.preview_size(), pipeline.video_size()) {
        println!("  Preview size: {preview}");
        println!("  Capture size: {video}");
    }

    pipeline.start_record()?;
    pump(&hw, &mut pipeline).await;
    hw.emit_encoder_format();
    hw.emit_encoder_buffers(frames);
    pump(&hw, &mut pipeline).await;

    pipeline.stop_record()?;
    hw.emit_encoder_buffers(frames / 10);
    pump(&hw, &mut pipeline).await;
    report(&mut notices);

    let stats = pipeline.encode_stats();
    pipeline.close()?;
    report(&mut notices);

    let ledger = hw.ledger();
    println!();
    println!("Encode statistics");
    println!("  Buffers received: {}", stats.buffers_received);
    println!("  Samples written:  {}", stats.samples_written);
    println!("  Buffers dropped:  {} ({:.1}%)", stats.buffers_dropped, stats.drop_rate());
    println!("  Bytes written:    {}", stats.bytes_written);
    println!("  Sessions built:   {}", ledger.sessions_created);
    println!("  Buffers leaked:   {}", ledger.outstanding_buffers());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&summary(&stats, &ledger, &output_path))?
    );

    Ok(())
}

/// Deliver held camera callbacks and apply events until the pipeline has
/// been quiet for a moment.
async fn pump(hw: &SimHardware, pipeline: &mut CapturePipeline) -> usize {
    let mut handled = 0;
    loop {
        hw.deliver_camera_callbacks();
        match tokio::time::timeout(IDLE, pipeline.dispatch_next()).await {
            Ok(true) => handled += 1,
            Ok(false) | Err(_) => break,
        }
    }
    tracing::debug!(handled, "Pipeline idle");
    handled
}

fn report(notices: &mut UnboundedReceiver<PipelineNotice>) {
    while let Ok(notice) = notices.try_recv() {
        match notice {
            PipelineNotice::DeviceOpened => println!("[OK] Camera opened"),
            PipelineNotice::SessionActive {
                generation,
                targets,
            } => println!(
                "[OK] Session {generation} active with {} target(s)",
                targets.len()
            ),
            PipelineNotice::RecordingStarted => println!("[OK] Recording started"),
            PipelineNotice::RecordingStopped => println!("[OK] Recording stopped"),
            PipelineNotice::Fault(e) if e.kind().is_blocking() => {
                println!("[FAIL] {e}")
            }
            PipelineNotice::Fault(e) => println!("[WARN] {e}"),
        }
    }
}

fn summary(stats: &EncodeStats, ledger: &SimLedger, output: &Path) -> serde_json::Value {
    serde_json::json!({
        "samples_written": stats.samples_written,
        "samples_in_memory": ledger.samples.len(),
        "key_frames_in_memory": ledger.samples.iter().filter(|s| s.key_frame).count(),
        "buffers_released": ledger.buffers_released,
        "double_releases": ledger.double_releases,
        "file_bytes": std::fs::metadata(output).ok().map(|m| m.len()),
    })
}
