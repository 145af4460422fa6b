//! Check configuration and container writer capabilities.

use camcord_common::config::AppConfig;

pub fn run(config: &AppConfig, write_config: bool) -> anyhow::Result<()> {
    println!("Camcord System Check");
    println!("{}", "=".repeat(50));

    if write_config {
        config.save()?;
        println!("[OK] Configuration written");
    }

    println!("[OK] Output file: {}", config.output_path().display());

    let encoder = config.recording.encoder_config();
    match encoder.validate() {
        Ok(()) => println!(
            "[OK] Encoder: {} {}x{} @ {} fps, {} bps, key frame every {}s",
            encoder.mime_type,
            encoder.width,
            encoder.height,
            encoder.frame_rate,
            encoder.bit_rate,
            encoder.key_frame_interval_secs
        ),
        Err(e) => println!("[FAIL] Encoder configuration: {e}"),
    }
    println!(
        "[OK] Capture size limit: {}px",
        config.recording.max_capture_dimension
    );

    println!();
    let writer_ok = check_mp4_writer()?;

    println!();
    if writer_ok && encoder.validate().is_ok() {
        println!("All required capabilities are available. Camcord is ready.");
    } else {
        println!("Some capabilities are missing. See above for details.");
    }
    Ok(())
}

#[cfg(feature = "gst")]
fn check_mp4_writer() -> anyhow::Result<bool> {
    let elements = camcord_capture_engine::backend::gst_mux::required_elements()?;
    for (name, available) in &elements {
        if *available {
            println!("[OK] GStreamer element: {name}");
        } else {
            println!("[FAIL] GStreamer element missing: {name}");
        }
    }
    Ok(elements.iter().all(|(_, available)| *available))
}

#[cfg(not(feature = "gst"))]
fn check_mp4_writer() -> anyhow::Result<bool> {
    println!("[WARN] MP4 writer not built in (rebuild with --features gst)");
    Ok(false)
}
