//! Camcord Capture Engine
//!
//! Drives a camera into a hardware H.264 encoder and writes the result to a
//! single MPEG-4 file. The engine is written purely against the capability
//! traits in `camcord-platform-core`, so it runs unchanged on a real device
//! or against the simulated backend.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────┐
//! │                 CapturePipeline                   │
//! │  ┌────────────────────┐   ┌────────────────────┐  │
//! │  │  CaptureSession    │   │  EncodePipeline    │  │
//! │  │  device + session  │   │  encoder + muxer   │  │
//! │  └─────────┬──────────┘   └─────────┬──────────┘  │
//! │            │ preview / encoder      │             │
//! │            │ surfaces               ▼             │
//! │            └──────────────────▶  h264.mp4         │
//! └───────────────────────────────────────────────────┘
//! ```
//!
//! Camera and encoder callbacks arrive on separate single-consumer queues
//! and are only ever applied by the pipeline owner.

pub mod backend;
pub mod encode;
pub mod pipeline;
pub mod session;
pub mod size_select;

pub use encode::{EncodePipeline, EncodeState, EncodeStats};
pub use pipeline::{CapturePipeline, PipelineConfig, PipelineNotice};
pub use session::*;
pub use size_select::{choose_capture_size, choose_optimal_preview_size, SizeChoice};
