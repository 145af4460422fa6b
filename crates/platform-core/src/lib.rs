//! Camcord platform core contracts.
//!
//! This crate contains the hardware-neutral data structures and capability
//! traits the capture engine is written against. A platform integration
//! provides a [`CameraBackend`] and a [`MediaFactory`]; everything above it
//! only ever talks to these interfaces.
//!
//! All hardware transitions are asynchronous: backends acknowledge a request
//! immediately and report the outcome later through a [`CallbackSink`].

pub mod callback;
pub mod camera;
pub mod media;

pub use callback::*;
pub use camera::*;
pub use media::*;

use std::fmt;

use serde::{Deserialize, Serialize};

/// A frame resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Pixel count, widened so large sensors cannot overflow.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn larger_dimension(&self) -> u32 {
        self.width.max(self.height)
    }

    /// Whether this size has the same aspect ratio as `ratio`, compared by
    /// integer cross-multiplication.
    pub fn has_aspect_of(&self, ratio: Size) -> bool {
        self.width as u64 * ratio.height as u64 == self.height as u64 * ratio.width as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Opaque identity of a consumer surface (a preview view or an encoder
/// input surface). The backing buffer queue belongs to whoever created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// What a capture target is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetRole {
    Preview,
    Encoder,
}

/// A surface that receives camera frames, with the buffer size the camera
/// should produce for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputTarget {
    pub surface: SurfaceId,
    pub buffer_size: Size,
    pub role: TargetRole,
}

impl OutputTarget {
    pub fn preview(surface: SurfaceId, buffer_size: Size) -> Self {
        Self {
            surface,
            buffer_size,
            role: TargetRole::Preview,
        }
    }

    pub fn encoder(surface: SurfaceId, buffer_size: Size) -> Self {
        Self {
            surface,
            buffer_size,
            role: TargetRole::Encoder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_comparison_avoids_rounding() {
        let four_three = Size::new(4, 3);
        assert!(Size::new(1440, 1080).has_aspect_of(four_three));
        assert!(Size::new(640, 480).has_aspect_of(four_three));
        assert!(!Size::new(1920, 1080).has_aspect_of(four_three));
        // Integer division would accept this one: 1025 * 4 / 3 == 1366.
        assert!(!Size::new(1366, 1025).has_aspect_of(four_three));
    }

    #[test]
    fn area_does_not_overflow_u32() {
        let huge = Size::new(100_000, 100_000);
        assert_eq!(huge.area(), 10_000_000_000);
    }

    #[test]
    fn display_formats_as_width_by_height() {
        assert_eq!(Size::new(1280, 960).to_string(), "1280x960");
    }
}
