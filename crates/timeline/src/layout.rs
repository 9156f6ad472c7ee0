use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::{Millis, TimelineClip, TimelineError, TrackKind, MAX_ZOOM, MIN_ZOOM};

/// Clips on one track, in start order.
pub fn clips_on(clips: &[TimelineClip], track: TrackKind) -> Vec<&TimelineClip> {
    let mut on_track: Vec<&TimelineClip> = clips.iter().filter(|c| c.track == track).collect();
    on_track.sort_by(|a, b| a.start_ms.cmp(&b.start_ms).then(a.order.cmp(&b.order)));
    on_track
}

/// Client-side program length: the furthest clip end on any track.
pub fn estimated_duration_ms(clips: &[TimelineClip]) -> Millis {
    clips.iter().map(TimelineClip::end_ms).max().unwrap_or(0)
}

/// Program length and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "ms", rename_all = "snake_case")]
pub enum ProgramDuration {
    Estimated(Millis),
    /// Reported by the renderer after export.
    Authoritative(Millis),
}

impl ProgramDuration {
    /// Prefer the exported length once there is one.
    pub fn resolve(clips: &[TimelineClip], exported_ms: Option<Millis>) -> Self {
        match exported_ms {
            Some(ms) if ms > 0 => Self::Authoritative(ms),
            _ => Self::Estimated(estimated_duration_ms(clips)),
        }
    }

    pub fn ms(&self) -> Millis {
        match *self {
            Self::Estimated(ms) | Self::Authoritative(ms) => ms,
        }
    }

    pub fn is_authoritative(&self) -> bool {
        matches!(self, Self::Authoritative(_))
    }
}

/// Ruler tick positions in whole seconds.
pub fn ruler_ticks(duration_ms: Millis, pixels_per_second: f64) -> Vec<u64> {
    let step = if pixels_per_second >= 20.0 { 5 } else { 10 };
    let last = duration_ms.div_ceil(1000);
    (0..=last).step_by(step).collect()
}

/// Pairs of clip ids on `track` whose time ranges intersect.
pub fn overlapping_pairs(clips: &[TimelineClip], track: TrackKind) -> Vec<(String, String)> {
    let on_track = clips_on(clips, track);
    let mut pairs = Vec::new();
    for (i, a) in on_track.iter().enumerate() {
        for b in &on_track[i + 1..] {
            if b.start_ms >= a.end_ms() {
                break;
            }
            pairs.push((a.id.clone(), b.id.clone()));
        }
    }
    pairs
}

/// Checks a clip set is usable for export.
pub fn validate_clips(clips: &[TimelineClip], min_duration_ms: Millis) -> Result<(), TimelineError> {
    if clips.is_empty() {
        return Err(TimelineError::Empty);
    }
    let mut seen = HashSet::new();
    for clip in clips {
        if !seen.insert(clip.id.as_str()) {
            return Err(TimelineError::DuplicateClip(clip.id.clone()));
        }
        if clip.duration_ms < min_duration_ms.max(1) {
            return Err(TimelineError::InvalidOp(format!(
                "clip {} is shorter than {}ms",
                clip.id, min_duration_ms
            )));
        }
        for zoom in [clip.zoom_start, clip.zoom_end] {
            if !(MIN_ZOOM..=MAX_ZOOM).contains(&zoom) {
                return Err(TimelineError::InvalidZoom(zoom));
            }
        }
    }
    Ok(())
}
