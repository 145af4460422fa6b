//! Hardware backends for the capture engine.
//!
//! Platform integrations implement [`camcord_platform_core::CameraBackend`]
//! and [`camcord_platform_core::MediaFactory`]. This module ships the ones
//! that do not need a phone:
//!
//! - [`sim`]: deterministic in-process camera, encoder and muxer, whose
//!   encoder emits a parseable H.264 Annex-B stream built by [`h264`]
//! - `gst_mux` (feature `gst`): a real MP4 writer on top of GStreamer

#[cfg(feature = "gst")]
pub mod gst_mux;
pub mod h264;
pub mod sim;

#[cfg(feature = "gst")]
pub use gst_mux::{GstMp4Muxer, GstMuxerFactory};
pub use sim::{SimHardware, SimLedger};
