//! Hardware encoder and container muxer contracts.

use std::path::Path;

use camcord_common::error::CamcordResult;

use crate::{CallbackSink, SurfaceId};

/// Pixel layout an encoder expects on its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    /// Frames arrive through an input surface rather than byte buffers.
    Surface,
}

/// Encoder configuration on the way in, negotiated stream format on the way
/// out (`OutputFormatChanged`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFormat {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub bit_rate: Option<u32>,
    pub frame_rate: Option<u32>,
    pub key_frame_interval_secs: Option<u32>,
    pub color_format: Option<ColorFormat>,
    /// Codec-specific configuration (SPS/PPS for H.264), when known.
    pub codec_config: Vec<u8>,
}

impl MediaFormat {
    pub fn video(mime_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            mime_type: mime_type.into(),
            width,
            height,
            bit_rate: None,
            frame_rate: None,
            key_frame_interval_secs: None,
            color_format: None,
            codec_config: Vec::new(),
        }
    }

    pub fn with_bit_rate(mut self, bit_rate: u32) -> Self {
        self.bit_rate = Some(bit_rate);
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: u32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn with_key_frame_interval(mut self, secs: u32) -> Self {
        self.key_frame_interval_secs = Some(secs);
        self
    }

    pub fn with_color_format(mut self, format: ColorFormat) -> Self {
        self.color_format = Some(format);
        self
    }

    pub fn with_codec_config(mut self, config: Vec<u8>) -> Self {
        self.codec_config = config;
        self
    }
}

/// Flags describing an encoded output buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferFlags {
    pub key_frame: bool,
    /// Buffer holds codec configuration, not a media sample.
    pub codec_config: bool,
    pub end_of_stream: bool,
}

/// Describes the valid range of an encoder output buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferInfo {
    pub offset: usize,
    pub size: usize,
    pub presentation_time_us: i64,
    pub flags: BufferFlags,
}

/// Asynchronous events reported by a [`HardwareEncoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    OutputFormatChanged(MediaFormat),
    /// Output buffer `index` is borrowed from the encoder and must be handed
    /// back through [`HardwareEncoder::release_output_buffer`] exactly once.
    OutputBufferAvailable {
        index: usize,
        info: BufferInfo,
    },
    Error {
        code: i32,
        message: String,
    },
}

/// A hardware video encoder running in surface-input mode.
pub trait HardwareEncoder: Send {
    /// Configure for encoding and register the callback sink.
    fn configure(
        &mut self,
        format: &MediaFormat,
        callbacks: CallbackSink<EncoderEvent>,
    ) -> CamcordResult<()>;

    /// Create the surface camera frames are written to. Only valid between
    /// `configure` and `start`.
    fn create_input_surface(&mut self) -> CamcordResult<SurfaceId>;

    fn start(&mut self) -> CamcordResult<()>;

    /// Contents of a borrowed output buffer.
    fn output_buffer(&mut self, index: usize) -> CamcordResult<&[u8]>;

    /// Return a borrowed output buffer. `render` is only meaningful for
    /// decoders displaying to a surface.
    fn release_output_buffer(&mut self, index: usize, render: bool) -> CamcordResult<()>;

    fn stop(&mut self) -> CamcordResult<()>;

    /// Free the native codec. The encoder must not be used afterwards.
    fn release(&mut self);
}

/// Index of a track registered with a [`ContainerMuxer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackIndex(pub usize);

/// Container formats a muxer can be created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFormat {
    Mpeg4,
}

/// Interleaves encoded samples into a container file.
pub trait ContainerMuxer: Send {
    fn add_track(&mut self, format: &MediaFormat) -> CamcordResult<TrackIndex>;

    /// Begin writing. Tracks can no longer be added afterwards.
    fn start(&mut self) -> CamcordResult<()>;

    fn write_sample(
        &mut self,
        track: TrackIndex,
        data: &[u8],
        info: &BufferInfo,
    ) -> CamcordResult<()>;

    /// Finalize the container. Only valid after `start`.
    fn stop(&mut self) -> CamcordResult<()>;

    fn release(&mut self);
}

/// Instantiates codecs and muxers.
pub trait MediaFactory {
    /// Create an encoder for `mime_type`. Fails with `EncoderUnavailable`
    /// when no codec supports it.
    fn create_encoder_by_type(&self, mime_type: &str) -> CamcordResult<Box<dyn HardwareEncoder>>;

    fn create_muxer(
        &self,
        path: &Path,
        format: ContainerFormat,
    ) -> CamcordResult<Box<dyn ContainerMuxer>>;
}
