//! Hardware encoder to container muxer bridge.
//!
//! The encoder runs from creation until destruction and keeps producing
//! output buffers the whole time. Whether those buffers reach the container
//! is decided per buffer by two independent latches:
//!
//! - the accept gate, toggled by [`EncodePipeline::start`]/[`EncodePipeline::stop`]
//! - the writer latch, set once by the first output format change
//!
//! Every borrowed output buffer goes back to the encoder exactly once,
//! whether it was written or dropped.
//!
//! Stopping does not finalize the container, so a file spans every
//! start/stop segment recorded while the pipeline lives.

use std::path::Path;

use camcord_common::config::EncoderConfig;
use camcord_common::error::{CamcordError, CamcordResult};
use camcord_platform_core::{
    BufferInfo, CallbackSink, ColorFormat, ContainerFormat, ContainerMuxer, EncoderEvent,
    HardwareEncoder, MediaFactory, MediaFormat, OutputTarget, Size, TrackIndex,
};

/// Accept-gate state of the encode pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeState {
    /// Encoder created and running, recording never started.
    Configured,
    /// Samples are forwarded to the container.
    Accepting,
    /// Recording stopped; samples are dropped.
    Idle,
}

/// Runtime statistics from the encode pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodeStats {
    /// Output buffers handed over by the encoder.
    pub buffers_received: u64,

    /// Samples written to the container.
    pub samples_written: u64,

    /// Buffers released without being written.
    pub buffers_dropped: u64,

    /// Payload bytes written to the container.
    pub bytes_written: u64,

    /// Sample writes the container rejected.
    pub write_failures: u64,

    /// Buffers the encoder refused to take back.
    pub release_failures: u64,
}

impl EncodeStats {
    /// Drop rate as a percentage.
    pub fn drop_rate(&self) -> f64 {
        if self.buffers_received == 0 {
            return 0.0;
        }
        self.buffers_dropped as f64 / self.buffers_received as f64 * 100.0
    }
}

/// Owns the hardware encoder and the container muxer.
pub struct EncodePipeline {
    config: EncoderConfig,
    encoder: Box<dyn HardwareEncoder>,
    muxer: Box<dyn ContainerMuxer>,
    input_surface: OutputTarget,
    state: EncodeState,
    track: Option<TrackIndex>,
    writer_started: bool,
    output_format: Option<MediaFormat>,
    stats: EncodeStats,
    destroyed: bool,
}

impl EncodePipeline {
    /// Create and start an encoder in surface-input mode and open the
    /// container writer at `output_path`.
    ///
    /// The encoder starts producing callbacks on `callbacks` immediately,
    /// before recording is logically on.
    pub fn create(
        factory: &dyn MediaFactory,
        config: EncoderConfig,
        output_path: &Path,
        callbacks: CallbackSink<EncoderEvent>,
    ) -> CamcordResult<Self> {
        config.validate()?;
        let mime = config.mime_type.clone();

        let mut encoder = factory
            .create_encoder_by_type(&mime)
            .map_err(|e| match e {
                CamcordError::EncoderUnavailable { .. } => e,
                other => CamcordError::encoder_unavailable(&mime, other.to_string()),
            })?;

        let format = MediaFormat::video(&mime, config.width, config.height)
            .with_bit_rate(config.bit_rate)
            .with_frame_rate(config.frame_rate)
            .with_key_frame_interval(config.key_frame_interval_secs)
            .with_color_format(ColorFormat::Surface);

        let surface = match prepare_encoder(encoder.as_mut(), &format, callbacks) {
            Ok(surface) => surface,
            Err(e) => {
                encoder.release();
                return Err(CamcordError::encoder_unavailable(&mime, e.to_string()));
            }
        };

        let muxer = match factory.create_muxer(output_path, ContainerFormat::Mpeg4) {
            Ok(muxer) => muxer,
            Err(e) => {
                if let Err(stop_err) = encoder.stop() {
                    tracing::warn!(error = %stop_err, "Failed to stop encoder");
                }
                encoder.release();
                return Err(e);
            }
        };

        tracing::info!(
            mime = %mime,
            width = config.width,
            height = config.height,
            bit_rate = config.bit_rate,
            frame_rate = config.frame_rate,
            path = %output_path.display(),
            "Encoder running"
        );

        let input_surface =
            OutputTarget::encoder(surface, Size::new(config.width, config.height));
        Ok(Self {
            config,
            encoder,
            muxer,
            input_surface,
            state: EncodeState::Configured,
            track: None,
            writer_started: false,
            output_format: None,
            stats: EncodeStats::default(),
            destroyed: false,
        })
    }

    /// The encoder's input surface, as a capture target.
    pub fn input_surface(&self) -> OutputTarget {
        self.input_surface
    }

    pub fn state(&self) -> EncodeState {
        self.state
    }

    pub fn is_accepting(&self) -> bool {
        self.state == EncodeState::Accepting
    }

    /// Whether the container writer has been started.
    pub fn writer_started(&self) -> bool {
        self.writer_started
    }

    pub fn output_format(&self) -> Option<&MediaFormat> {
        self.output_format.as_ref()
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    pub fn stats(&self) -> &EncodeStats {
        &self.stats
    }

    /// Start forwarding samples to the container.
    pub fn start(&mut self) {
        self.state = EncodeState::Accepting;
        tracing::debug!("Encoder accepting samples");
    }

    /// Stop forwarding samples. The encoder keeps running and the container
    /// stays open.
    pub fn stop(&mut self) {
        if self.state == EncodeState::Accepting {
            self.state = EncodeState::Idle;
            tracing::debug!("Encoder no longer accepting samples");
        }
    }

    /// Apply an encoder callback. An `Err` is a fault to surface; the
    /// pipeline does not restart the encoder itself.
    pub fn handle_event(&mut self, event: EncoderEvent) -> CamcordResult<()> {
        if self.destroyed {
            tracing::debug!("Encoder event after destroy ignored");
            return Ok(());
        }
        match event {
            EncoderEvent::OutputFormatChanged(format) => self.on_output_format_changed(format),
            EncoderEvent::OutputBufferAvailable { index, info } => {
                self.on_output_buffer_available(index, info);
                Ok(())
            }
            EncoderEvent::Error { code, message } => {
                tracing::error!(code, %message, "Encoder error");
                Err(CamcordError::encoder_fault(code, message))
            }
        }
    }

    fn on_output_format_changed(&mut self, format: MediaFormat) -> CamcordResult<()> {
        if let Some(track) = self.track {
            tracing::warn!(
                track = track.0,
                started = self.writer_started,
                "Output format changed again after the track was registered; ignoring"
            );
            return Ok(());
        }

        let track = self.muxer.add_track(&format)?;
        // The track stays registered even if the writer fails to start.
        self.track = Some(track);
        self.muxer.start()?;
        self.writer_started = true;
        tracing::info!(
            track = track.0,
            mime = %format.mime_type,
            width = format.width,
            height = format.height,
            "Container writer started"
        );
        self.output_format = Some(format);
        Ok(())
    }

    fn on_output_buffer_available(&mut self, index: usize, info: BufferInfo) {
        self.stats.buffers_received += 1;

        let write = match (self.state, self.track) {
            (EncodeState::Accepting, Some(track))
                if self.writer_started && !info.flags.codec_config =>
            {
                Some(write_sample(
                    self.encoder.as_mut(),
                    self.muxer.as_mut(),
                    track,
                    index,
                    &info,
                ))
            }
            _ => None,
        };

        match write {
            Some(Ok(())) => {
                self.stats.samples_written += 1;
                self.stats.bytes_written += info.size as u64;
            }
            Some(Err(e)) => {
                self.stats.write_failures += 1;
                self.stats.buffers_dropped += 1;
                tracing::warn!(error = %e, index, "Failed to write sample");
            }
            None => self.stats.buffers_dropped += 1,
        }

        if let Err(e) = self.encoder.release_output_buffer(index, false) {
            self.stats.release_failures += 1;
            tracing::warn!(error = %e, index, "Failed to release output buffer");
        }
    }

    /// Stop and release the encoder, then finalize and release the container.
    pub fn destroy(mut self) -> CamcordResult<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> CamcordResult<()> {
        if self.destroyed {
            return Err(CamcordError::illegal_operation(
                "Encode pipeline already destroyed",
            ));
        }
        self.destroyed = true;
        self.state = EncodeState::Idle;

        let encoder_result = self.encoder.stop();
        self.encoder.release();

        let muxer_result = if self.writer_started {
            self.muxer.stop()
        } else {
            tracing::warn!("No output format was negotiated; container left empty");
            Ok(())
        };
        self.muxer.release();

        tracing::info!(
            samples = self.stats.samples_written,
            dropped = self.stats.buffers_dropped,
            bytes = self.stats.bytes_written,
            "Encode pipeline destroyed"
        );
        encoder_result.and(muxer_result)
    }
}

impl Drop for EncodePipeline {
    fn drop(&mut self) {
        if !self.destroyed {
            tracing::warn!("Encode pipeline dropped without destroy; releasing");
            if let Err(e) = self.shutdown() {
                tracing::warn!(error = %e, "Release on drop failed");
            }
        }
    }
}

fn prepare_encoder(
    encoder: &mut dyn HardwareEncoder,
    format: &MediaFormat,
    callbacks: CallbackSink<EncoderEvent>,
) -> CamcordResult<camcord_platform_core::SurfaceId> {
    encoder.configure(format, callbacks)?;
    let surface = encoder.create_input_surface()?;
    encoder.start()?;
    Ok(surface)
}

fn write_sample(
    encoder: &mut dyn HardwareEncoder,
    muxer: &mut dyn ContainerMuxer,
    track: TrackIndex,
    index: usize,
    info: &BufferInfo,
) -> CamcordResult<()> {
    let buffer = encoder.output_buffer(index)?;
    let end = info.offset.checked_add(info.size).ok_or_else(|| {
        CamcordError::invalid_argument(format!("Buffer {index} range overflows"))
    })?;
    let data = buffer.get(info.offset..end).ok_or_else(|| {
        CamcordError::invalid_argument(format!(
            "Buffer {index} range {}..{end} exceeds {} bytes",
            info.offset,
            buffer.len()
        ))
    })?;
    muxer.write_sample(track, data, info)
}
