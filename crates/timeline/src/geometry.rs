/// Pixel/time conversions for direct manipulation of clips.
use serde::{Deserialize, Serialize};

use crate::{Millis, TimelineError};

pub const MIN_PIXELS_PER_SECOND: f64 = 10.0;
pub const MAX_PIXELS_PER_SECOND: f64 = 80.0;
pub const DEFAULT_PIXELS_PER_SECOND: f64 = 30.0;
pub const MIN_CLIP_DURATION_MS: Millis = 500;
/// Rendered clips never shrink below this width, whatever their duration.
pub const MIN_CLIP_WIDTH_PX: f64 = 20.0;

/// Horizontal scale of the timeline view.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scale(f64);

impl Scale {
    pub fn new(pixels_per_second: f64) -> Result<Self, TimelineError> {
        if !pixels_per_second.is_finite() || pixels_per_second <= 0.0 {
            return Err(TimelineError::InvalidScale(pixels_per_second));
        }
        Ok(Self(pixels_per_second))
    }

    pub fn pixels_per_second(&self) -> f64 {
        self.0
    }

    pub fn px_to_ms(&self, delta_px: f64) -> f64 {
        delta_px / self.0 * 1000.0
    }

    pub fn ms_to_px(&self, ms: Millis) -> f64 {
        ms as f64 / 1000.0 * self.0
    }

    /// Left edge and rendered width of a clip.
    pub fn clip_extent(&self, start_ms: Millis, duration_ms: Millis) -> (f64, f64) {
        let left = self.ms_to_px(start_ms);
        let width = self.ms_to_px(duration_ms).max(MIN_CLIP_WIDTH_PX);
        (left, width)
    }

    /// Width of a track lane, with trailing room for dragging past the end.
    pub fn track_width(&self, total_duration_ms: Millis) -> f64 {
        self.ms_to_px(total_duration_ms) + 100.0
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self(DEFAULT_PIXELS_PER_SECOND)
    }
}

/// New start after dragging the clip body by `delta_px`. Never negative.
pub fn moved_start(original_start_ms: Millis, delta_px: f64, scale: Scale) -> Millis {
    let start = (original_start_ms as f64 + scale.px_to_ms(delta_px)).round();
    start.max(0.0) as Millis
}

/// New duration after dragging the trailing edge by `delta_px`, floored at `min_duration_ms`.
pub fn resized_duration(
    original_duration_ms: Millis,
    delta_px: f64,
    scale: Scale,
    min_duration_ms: Millis,
) -> Millis {
    let duration = (original_duration_ms as f64 + scale.px_to_ms(delta_px)).round();
    duration.max(min_duration_ms as f64) as Millis
}

/// User-tunable editor geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorSettings {
    pub pixels_per_second: f64,
    pub min_clip_duration_ms: Millis,
    /// Gestures travelling less than this are treated as clicks.
    pub select_threshold_px: f64,
    /// Width of the trailing-edge strip that starts a resize.
    pub resize_handle_px: f64,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            pixels_per_second: DEFAULT_PIXELS_PER_SECOND,
            min_clip_duration_ms: MIN_CLIP_DURATION_MS,
            select_threshold_px: 3.0,
            resize_handle_px: 6.0,
        }
    }
}

impl EditorSettings {
    /// Current scale, with the zoom slider range applied.
    pub fn scale(&self) -> Scale {
        let pps = if self.pixels_per_second.is_finite() {
            self.pixels_per_second
                .clamp(MIN_PIXELS_PER_SECOND, MAX_PIXELS_PER_SECOND)
        } else {
            DEFAULT_PIXELS_PER_SECOND
        };
        Scale(pps)
    }

    pub fn set_pixels_per_second(&mut self, pixels_per_second: f64) -> Scale {
        self.pixels_per_second = pixels_per_second;
        let scale = self.scale();
        self.pixels_per_second = scale.pixels_per_second();
        scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_right_by_300px_at_30pps() {
        let scale = Scale::new(30.0).unwrap();
        assert_eq!(scale.px_to_ms(300.0), 10_000.0);
        assert_eq!(moved_start(2000, 300.0, scale), 12_000);
    }

    #[test]
    fn move_left_clamps_at_zero() {
        let scale = Scale::new(30.0).unwrap();
        assert_eq!(moved_start(2000, -90.0, scale), 0);
        assert_eq!(moved_start(2000, -30.0, scale), 1000);
    }

    #[test]
    fn resize_is_floored_at_minimum() {
        let scale = Scale::new(30.0).unwrap();
        assert_eq!(
            resized_duration(1500, -60.0, scale, MIN_CLIP_DURATION_MS),
            MIN_CLIP_DURATION_MS
        );
        assert_eq!(resized_duration(1500, 15.0, scale, MIN_CLIP_DURATION_MS), 2000);
    }

    #[test]
    fn move_rounds_to_whole_milliseconds() {
        let scale = Scale::new(30.0).unwrap();
        // 1px at 30pps is 33.33ms
        assert_eq!(moved_start(0, 1.0, scale), 33);
    }

    #[test]
    fn invalid_scales_are_rejected() {
        assert!(Scale::new(0.0).is_err());
        assert!(Scale::new(-5.0).is_err());
        assert!(Scale::new(f64::NAN).is_err());
    }

    #[test]
    fn settings_clamp_zoom_slider_range() {
        let mut settings = EditorSettings::default();
        assert_eq!(settings.set_pixels_per_second(200.0).pixels_per_second(), 80.0);
        assert_eq!(settings.set_pixels_per_second(1.0).pixels_per_second(), 10.0);
        assert_eq!(settings.pixels_per_second, 10.0);
    }

    #[test]
    fn short_clips_keep_a_minimum_width() {
        let scale = Scale::new(10.0).unwrap();
        let (left, width) = scale.clip_extent(1000, 100);
        assert_eq!(left, 10.0);
        assert_eq!(width, MIN_CLIP_WIDTH_PX);
    }
}
