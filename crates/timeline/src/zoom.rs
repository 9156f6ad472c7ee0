use serde::{Deserialize, Serialize};

use crate::{TimelineClip, TimelineError};

pub const MIN_ZOOM: f64 = 1.0;
pub const MAX_ZOOM: f64 = 2.0;
/// Ramp given to freshly laid out scene clips.
pub const DEFAULT_SCENE_ZOOM_END: f64 = 1.3;

/// Linear magnification across a scene clip's playback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomRamp {
    pub start: f64,
    pub end: f64,
}

impl Default for ZoomRamp {
    fn default() -> Self {
        Self {
            start: MIN_ZOOM,
            end: MIN_ZOOM,
        }
    }
}

impl ZoomRamp {
    pub fn new(start: f64, end: f64) -> Result<Self, TimelineError> {
        Ok(Self {
            start: clamp_zoom(start)?,
            end: clamp_zoom(end)?,
        })
    }

    /// Like `new`, but maps anything unparseable back to no zoom.
    pub fn clamped(start: f64, end: f64) -> Self {
        Self {
            start: clamp_zoom(start).unwrap_or(MIN_ZOOM),
            end: clamp_zoom(end).unwrap_or(MIN_ZOOM),
        }
    }

    /// Magnification at normalised position `t` in `[0, 1]`.
    pub fn at(&self, t: f64) -> f64 {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        self.start + (self.end - self.start) * t
    }

    pub fn is_identity(&self) -> bool {
        self.start == MIN_ZOOM && self.end == MIN_ZOOM
    }
}

/// Clamp a zoom factor into range. NaN is rejected outright.
pub fn clamp_zoom(value: f64) -> Result<f64, TimelineError> {
    if value.is_nan() {
        return Err(TimelineError::InvalidZoom(value));
    }
    Ok(value.clamp(MIN_ZOOM, MAX_ZOOM))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoomEdge {
    Start,
    End,
}

/// Set one end of a scene clip's zoom ramp, returning the stored value.
pub fn set_zoom(
    clip: &mut TimelineClip,
    edge: ZoomEdge,
    value: f64,
) -> Result<f64, TimelineError> {
    if !clip.is_scene() {
        return Err(TimelineError::NotSceneClip(clip.id.clone()));
    }
    let value = clamp_zoom(value)?;
    match edge {
        ZoomEdge::Start => clip.zoom_start = value,
        ZoomEdge::End => clip.zoom_end = value,
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_zoom_is_clamped() {
        let mut clip = TimelineClip::scene("c1", "s1", 0, 3000);
        assert_eq!(set_zoom(&mut clip, ZoomEdge::Start, 2.5).unwrap(), 2.0);
        assert_eq!(clip.zoom_start, 2.0);
        assert_eq!(set_zoom(&mut clip, ZoomEdge::End, 0.2).unwrap(), 1.0);
        assert_eq!(clip.zoom_end, 1.0);
        assert_eq!(set_zoom(&mut clip, ZoomEdge::End, f64::INFINITY).unwrap(), 2.0);
    }

    #[test]
    fn nan_zoom_is_rejected_and_leaves_clip_untouched() {
        let mut clip = TimelineClip::scene("c1", "s1", 0, 3000);
        clip.zoom_end = 1.3;
        assert!(set_zoom(&mut clip, ZoomEdge::End, f64::NAN).is_err());
        assert_eq!(clip.zoom_end, 1.3);
    }

    #[test]
    fn audio_clips_have_no_zoom() {
        let mut clip = TimelineClip::audio("a1", "l1", 500, 1200);
        assert_eq!(
            set_zoom(&mut clip, ZoomEdge::Start, 1.5),
            Err(TimelineError::NotSceneClip("a1".into()))
        );
    }

    #[test]
    fn ramp_interpolates_linearly() {
        let ramp = ZoomRamp::new(1.0, 1.5).unwrap();
        assert_eq!(ramp.at(0.0), 1.0);
        assert_eq!(ramp.at(0.5), 1.25);
        assert_eq!(ramp.at(1.0), 1.5);
        assert_eq!(ramp.at(3.0), 1.5);
        assert!(!ramp.is_identity());
        assert!(ZoomRamp::default().is_identity());
    }

    #[test]
    fn clamped_ramp_drops_garbage() {
        let ramp = ZoomRamp::clamped(f64::NAN, 9.0);
        assert_eq!(ramp, ZoomRamp { start: 1.0, end: 2.0 });
    }
}
