//! MPEG-4 container writer backed by GStreamer.
//!
//! Encoded H.264 access units are pushed through
//! `appsrc ! h264parse ! mp4mux ! filesink`. The pipeline is built when the
//! single video track is added and finalized by an EOS drain on stop. The
//! track's codec config (SPS/PPS) travels in front of the first sample.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use camcord_common::error::{CamcordError, CamcordResult};
use camcord_platform_core::{
    BufferInfo, ContainerFormat, ContainerMuxer, HardwareEncoder, MediaFactory, MediaFormat,
    TrackIndex,
};
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app::AppSrc;

const H264_MIME: &str = "video/avc";
const EOS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

struct GstTrack {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    /// Taken by the first sample written.
    codec_config: Option<Vec<u8>>,
}

/// Writes a single H.264 track into an MP4 file.
pub struct GstMp4Muxer {
    path: PathBuf,
    track: Option<GstTrack>,
    started: bool,
    samples: u64,
}

impl GstMp4Muxer {
    pub fn new(path: &Path) -> CamcordResult<Self> {
        init_gstreamer()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                CamcordError::container(format!(
                    "Cannot create output directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            track: None,
            started: false,
            samples: 0,
        })
    }

    fn track(&self) -> CamcordResult<&GstTrack> {
        self.track
            .as_ref()
            .ok_or_else(|| CamcordError::container("No track added"))
    }

    fn track_mut(&mut self) -> CamcordResult<&mut GstTrack> {
        self.track
            .as_mut()
            .ok_or_else(|| CamcordError::container("No track added"))
    }

    pub fn samples_written(&self) -> u64 {
        self.samples
    }
}

impl ContainerMuxer for GstMp4Muxer {
    fn add_track(&mut self, format: &MediaFormat) -> CamcordResult<TrackIndex> {
        if self.track.is_some() {
            return Err(CamcordError::container(
                "Only one video track is supported",
            ));
        }
        if format.mime_type != H264_MIME {
            return Err(CamcordError::container(format!(
                "Unsupported track type {}",
                format.mime_type
            )));
        }

        let pipeline = gst::Pipeline::new();
        let make = |factory: &str| {
            gst::ElementFactory::make(factory).build().map_err(|e| {
                CamcordError::container(format!("Failed to create {factory}: {e}"))
            })
        };
        let appsrc = make("appsrc")?;
        let parse = make("h264parse")?;
        let mux = make("mp4mux")?;
        let sink = gst::ElementFactory::make("filesink")
            .property("location", self.path.to_string_lossy().to_string())
            .build()
            .map_err(|e| CamcordError::container(format!("Failed to create filesink: {e}")))?;

        let appsrc = appsrc
            .downcast::<AppSrc>()
            .map_err(|_| CamcordError::container("Failed to downcast to AppSrc"))?;

        let mut caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "byte-stream")
            .field("alignment", "au")
            .field("width", format.width as i32)
            .field("height", format.height as i32);
        if let Some(fps) = format.frame_rate {
            caps = caps.field("framerate", gst::Fraction::new(fps as i32, 1));
        }
        appsrc.set_caps(Some(&caps.build()));
        appsrc.set_format(gst::Format::Time);
        appsrc.set_is_live(false);

        pipeline
            .add_many([appsrc.upcast_ref(), &parse, &mux, &sink])
            .map_err(|e| CamcordError::container(format!("Failed to add elements: {e}")))?;
        gst::Element::link_many([appsrc.upcast_ref(), &parse, &mux, &sink])
            .map_err(|e| CamcordError::container(format!("Failed to link elements: {e}")))?;

        tracing::debug!(
            path = %self.path.display(),
            width = format.width,
            height = format.height,
            "MP4 writer pipeline built"
        );
        self.track = Some(GstTrack {
            pipeline,
            appsrc,
            codec_config: Some(format.codec_config.clone()).filter(|c| !c.is_empty()),
        });
        Ok(TrackIndex(0))
    }

    fn start(&mut self) -> CamcordResult<()> {
        let track = self.track()?;
        track
            .pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| CamcordError::container(format!("Failed to start MP4 writer: {e:?}")))?;
        self.started = true;
        Ok(())
    }

    fn write_sample(
        &mut self,
        track: TrackIndex,
        data: &[u8],
        info: &BufferInfo,
    ) -> CamcordResult<()> {
        if !self.started {
            return Err(CamcordError::container("MP4 writer not started"));
        }
        if track != TrackIndex(0) {
            return Err(CamcordError::container(format!(
                "Unknown track {}",
                track.0
            )));
        }
        let pts = u64::try_from(info.presentation_time_us).map_err(|_| {
            CamcordError::container(format!(
                "Negative presentation time {}",
                info.presentation_time_us
            ))
        })?;

        let track = self.track_mut()?;
        let payload = match track.codec_config.take() {
            Some(mut header) => {
                header.extend_from_slice(data);
                header
            }
            None => data.to_vec(),
        };

        let mut buffer = gst::Buffer::from_slice(payload);
        let buffer_ref = buffer
            .get_mut()
            .ok_or_else(|| CamcordError::container("Failed to get mutable buffer reference"))?;
        let timestamp = gst::ClockTime::from_useconds(pts);
        buffer_ref.set_pts(timestamp);
        // No B-frames: decode order is presentation order.
        buffer_ref.set_dts(timestamp);
        if !info.flags.key_frame {
            buffer_ref.set_flags(gst::BufferFlags::DELTA_UNIT);
        }
        track
            .appsrc
            .push_buffer(buffer)
            .map_err(|e| CamcordError::container(format!("appsrc rejected buffer: {e:?}")))?;

        self.samples += 1;
        if self.samples % 300 == 0 {
            tracing::debug!(samples = self.samples, "MP4 samples written");
        }
        Ok(())
    }

    fn stop(&mut self) -> CamcordResult<()> {
        let track = self.track()?;
        if !self.started {
            return Err(CamcordError::container("MP4 writer stopped before start"));
        }

        if let Err(e) = track.appsrc.end_of_stream() {
            tracing::warn!(?e, "Failed to send EOS; MP4 may be truncated");
        } else if let Some(bus) = track.pipeline.bus() {
            drain_until_eos(&bus);
        }

        track
            .pipeline
            .set_state(gst::State::Null)
            .map_err(|e| CamcordError::container(format!("Failed to stop MP4 writer: {e:?}")))?;
        self.started = false;
        tracing::info!(
            path = %self.path.display(),
            samples = self.samples,
            "MP4 finalized"
        );
        Ok(())
    }

    fn release(&mut self) {
        if let Some(track) = self.track.take() {
            if let Err(e) = track.pipeline.set_state(gst::State::Null) {
                tracing::warn!(?e, "Failed to set MP4 writer to Null");
            }
        }
    }
}

/// Media factory that writes through [`GstMp4Muxer`] and takes encoders
/// from another factory.
pub struct GstMuxerFactory<F> {
    encoders: F,
}

impl<F: MediaFactory> GstMuxerFactory<F> {
    pub fn new(encoders: F) -> Self {
        Self { encoders }
    }
}

impl<F: MediaFactory> MediaFactory for GstMuxerFactory<F> {
    fn create_encoder_by_type(&self, mime_type: &str) -> CamcordResult<Box<dyn HardwareEncoder>> {
        self.encoders.create_encoder_by_type(mime_type)
    }

    fn create_muxer(
        &self,
        path: &Path,
        format: ContainerFormat,
    ) -> CamcordResult<Box<dyn ContainerMuxer>> {
        let ContainerFormat::Mpeg4 = format;
        Ok(Box::new(GstMp4Muxer::new(path)?))
    }
}

/// Element factories the MP4 writer depends on, with whether each is
/// installed.
pub fn required_elements() -> CamcordResult<Vec<(&'static str, bool)>> {
    init_gstreamer()?;
    Ok(["appsrc", "h264parse", "mp4mux", "filesink"]
        .into_iter()
        .map(|name| (name, gst::ElementFactory::find(name).is_some()))
        .collect())
}

fn drain_until_eos(bus: &gst::Bus) {
    let start = std::time::Instant::now();
    loop {
        let elapsed = start.elapsed();
        if elapsed >= EOS_DRAIN_TIMEOUT {
            tracing::warn!("MP4 EOS drain timed out");
            break;
        }
        let remaining =
            gst::ClockTime::from_nseconds((EOS_DRAIN_TIMEOUT - elapsed).as_nanos() as u64);
        match bus.timed_pop(remaining) {
            Some(msg) => match msg.view() {
                gst::MessageView::Eos(_) => {
                    tracing::debug!("EOS received; MP4 writer drained");
                    break;
                }
                gst::MessageView::Error(e) => {
                    tracing::warn!(error = %e.error(), "MP4 writer error during EOS drain");
                    break;
                }
                _ => {}
            },
            None => {
                tracing::warn!("MP4 EOS drain timed out");
                break;
            }
        }
    }
}

fn init_gstreamer() -> CamcordResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    match GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string())) {
        Ok(()) => Ok(()),
        Err(e) => Err(CamcordError::platform(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::h264;
    use crate::backend::sim::SimHardware;
    use camcord_platform_core::BufferFlags;

    #[test]
    fn factory_takes_encoders_from_the_wrapped_factory() {
        let factory = GstMuxerFactory::new(SimHardware::new().media());
        assert!(factory.create_encoder_by_type("video/avc").is_ok());
        assert!(matches!(
            factory.create_encoder_by_type("video/x-vnd.on2.vp9"),
            Err(CamcordError::EncoderUnavailable { .. })
        ));
    }

    fn writer_elements_installed() -> bool {
        required_elements()
            .map(|elements| elements.iter().all(|(_, found)| *found))
            .unwrap_or(false)
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn writes_samples_and_finalizes_on_stop() {
        if !writer_elements_installed() {
            return;
        }
        let dir = std::env::temp_dir().join(format!("camcord-gst-{}", std::process::id()));
        let path = dir.join("h264.mp4");
        let _ = std::fs::remove_file(&path);

        let mut muxer = GstMp4Muxer::new(&path).unwrap();
        let format = MediaFormat::video(H264_MIME, 320, 240)
            .with_frame_rate(30)
            .with_codec_config(h264::parameter_sets(320, 240));
        let track = muxer.add_track(&format).unwrap();
        muxer.start().unwrap();

        for frame in 0..10u64 {
            let key_frame = frame % 5 == 0;
            let data = h264::access_unit(key_frame, frame % 5, 64);
            let info = BufferInfo {
                offset: 0,
                size: data.len(),
                presentation_time_us: (frame * 1_000_000 / 30) as i64,
                flags: BufferFlags {
                    key_frame,
                    ..BufferFlags::default()
                },
            };
            muxer.write_sample(track, &data, &info).unwrap();
        }
        assert_eq!(muxer.samples_written(), 10);
        muxer.stop().unwrap();
        muxer.release();

        let bytes = std::fs::read(&path).unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(&bytes[4..8], b"ftyp");
        assert!(contains(&bytes, b"moov"));
        assert!(contains(&bytes, b"avcC"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn negative_timestamps_are_rejected() {
        if !writer_elements_installed() {
            return;
        }
        let path = std::env::temp_dir().join("camcord-gst-negative-pts.mp4");
        let mut muxer = GstMp4Muxer::new(&path).unwrap();
        let format = MediaFormat::video(H264_MIME, 320, 240)
            .with_codec_config(h264::parameter_sets(320, 240));
        let track = muxer.add_track(&format).unwrap();
        muxer.start().unwrap();
        let info = BufferInfo {
            presentation_time_us: -1,
            ..BufferInfo::default()
        };
        assert!(muxer
            .write_sample(track, &h264::access_unit(true, 0, 8), &info)
            .is_err());
        muxer.release();
    }

    #[test]
    fn writer_accepts_one_h264_track_only() {
        let path = std::env::temp_dir().join("camcord-gst-track-test.mp4");
        let mut muxer = GstMp4Muxer::new(&path).unwrap();
        let aac = MediaFormat::video("audio/mp4a-latm", 0, 0);
        assert!(muxer.add_track(&aac).is_err());

        if !writer_elements_installed() {
            return;
        }
        let avc = MediaFormat::video(H264_MIME, 640, 480).with_frame_rate(30);
        assert_eq!(muxer.add_track(&avc).unwrap(), TrackIndex(0));
        assert!(muxer.add_track(&avc).is_err());
        assert!(muxer
            .write_sample(TrackIndex(0), &[0, 0, 0, 1], &BufferInfo::default())
            .is_err());
        muxer.release();
    }
}
