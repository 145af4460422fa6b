//! Capture and preview resolution selection.
//!
//! Both selectors are pure: same candidates in, same size out. Neither ever
//! indexes past the candidate list; an empty list is an `InvalidArgument`.

use camcord_common::error::{CamcordError, CamcordResult};
use camcord_platform_core::Size;

/// Aspect ratio required of the capture size.
pub const CAPTURE_ASPECT: Size = Size::new(4, 3);

/// Result of a size selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeChoice {
    pub size: Size,
    /// No candidate satisfied the constraints and the documented fallback
    /// element was returned instead.
    pub fallback: bool,
}

/// Pick the encoder-facing capture size: the largest 4:3 candidate whose
/// larger dimension is at most `max_dimension`. Falls back to the last
/// candidate when nothing qualifies.
pub fn choose_capture_size(candidates: &[Size], max_dimension: u32) -> CamcordResult<SizeChoice> {
    let Some(last) = candidates.last() else {
        return Err(CamcordError::invalid_argument(
            "No capture sizes to choose from",
        ));
    };

    let best = candidates
        .iter()
        .filter(|size| size.has_aspect_of(CAPTURE_ASPECT))
        .filter(|size| size.larger_dimension() <= max_dimension)
        .fold(None::<Size>, |best, size| match best {
            Some(current) if current.area() >= size.area() => Some(current),
            _ => Some(*size),
        });

    match best {
        Some(size) => Ok(SizeChoice {
            size,
            fallback: false,
        }),
        None => {
            tracing::warn!(
                max_dimension,
                fallback = %last,
                "Couldn't find any suitable video size"
            );
            Ok(SizeChoice {
                size: *last,
                fallback: true,
            })
        }
    }
}

/// Pick the preview size: the smallest-area candidate with exactly the
/// aspect ratio of `aspect_ratio` that is at least `min_width` x
/// `min_height`. Ties keep the first one encountered. Falls back to the
/// first candidate when nothing qualifies.
pub fn choose_optimal_preview_size(
    candidates: &[Size],
    min_width: u32,
    min_height: u32,
    aspect_ratio: Size,
) -> CamcordResult<SizeChoice> {
    let Some(first) = candidates.first() else {
        return Err(CamcordError::invalid_argument(
            "No preview sizes to choose from",
        ));
    };
    if aspect_ratio.is_empty() {
        return Err(CamcordError::invalid_argument(format!(
            "Aspect ratio {aspect_ratio} has a zero dimension"
        )));
    }

    let best = candidates
        .iter()
        .filter(|size| size.has_aspect_of(aspect_ratio))
        .filter(|size| size.width >= min_width && size.height >= min_height)
        .min_by_key(|size| size.area());

    match best {
        Some(size) => Ok(SizeChoice {
            size: *size,
            fallback: false,
        }),
        None => {
            tracing::warn!(
                min_width,
                min_height,
                aspect = %aspect_ratio,
                fallback = %first,
                "Couldn't find any suitable preview size"
            );
            Ok(SizeChoice {
                size: *first,
                fallback: true,
            })
        }
    }
}
