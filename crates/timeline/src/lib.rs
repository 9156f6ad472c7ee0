use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

mod captions;
pub use captions::*;
mod geometry;
pub use geometry::*;
mod interaction;
pub use interaction::*;
mod layout;
pub use layout::*;
mod zoom;
pub use zoom::*;

#[derive(Debug, Error, PartialEq)]
pub enum TimelineError {
    #[error("invalid operation: {0}")]
    InvalidOp(String),
    #[error("clip not found: {0}")]
    ClipNotFound(String),
    #[error("duplicate clip id: {0}")]
    DuplicateClip(String),
    #[error("invalid scale: {0} pixels per second")]
    InvalidScale(f64),
    #[error("zoom factor {0} is not a number")]
    InvalidZoom(f64),
    #[error("clip {0} is not on the scene track")]
    NotSceneClip(String),
    #[error("timeline is empty")]
    Empty,
}

pub type Millis = u64;

/// The two lanes of the program. Clips never migrate between them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Scenes,
    Audio,
}

impl TrackKind {
    pub const ALL: [TrackKind; 2] = [TrackKind::Scenes, TrackKind::Audio];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Scenes => "Scenes",
            Self::Audio => "Audio",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scenes => write!(f, "scenes"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClipKind {
    Scene,
    Audio,
}

fn default_zoom() -> f64 {
    MIN_ZOOM
}

/// A positioned, timed reference to a generated scene image or voice line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimelineClip {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ClipKind,
    pub source_id: String,
    #[serde(default)]
    pub source_file: String,
    pub track: TrackKind,
    #[serde(default)]
    pub start_ms: Millis,
    #[serde(default)]
    pub duration_ms: Millis,
    #[serde(default)]
    pub order: usize,
    #[serde(default = "default_zoom")]
    pub zoom_start: f64,
    #[serde(default = "default_zoom")]
    pub zoom_end: f64,
}

impl TimelineClip {
    pub fn scene(
        id: impl Into<String>,
        source_id: impl Into<String>,
        start_ms: Millis,
        duration_ms: Millis,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ClipKind::Scene,
            source_id: source_id.into(),
            source_file: String::new(),
            track: TrackKind::Scenes,
            start_ms,
            duration_ms,
            order: 0,
            zoom_start: MIN_ZOOM,
            zoom_end: MIN_ZOOM,
        }
    }

    pub fn audio(
        id: impl Into<String>,
        source_id: impl Into<String>,
        start_ms: Millis,
        duration_ms: Millis,
    ) -> Self {
        Self {
            id: id.into(),
            kind: ClipKind::Audio,
            source_id: source_id.into(),
            source_file: String::new(),
            track: TrackKind::Audio,
            start_ms,
            duration_ms,
            order: 0,
            zoom_start: MIN_ZOOM,
            zoom_end: MIN_ZOOM,
        }
    }

    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = source_file.into();
        self
    }

    pub fn with_order(mut self, order: usize) -> Self {
        self.order = order;
        self
    }

    pub fn end_ms(&self) -> Millis {
        self.start_ms + self.duration_ms
    }

    pub fn is_scene(&self) -> bool {
        self.track == TrackKind::Scenes
    }

    pub fn zoom_ramp(&self) -> ZoomRamp {
        ZoomRamp::clamped(self.zoom_start, self.zoom_end)
    }

    pub fn apply(&mut self, edit: &ClipEdit) {
        self.start_ms = edit.start_ms;
        self.duration_ms = edit.duration_ms;
    }
}

pub fn find_clip<'a>(clips: &'a [TimelineClip], clip_id: &str) -> Option<&'a TimelineClip> {
    clips.iter().find(|c| c.id == clip_id)
}

pub fn find_clip_mut<'a>(
    clips: &'a mut [TimelineClip],
    clip_id: &str,
) -> Result<&'a mut TimelineClip, TimelineError> {
    clips
        .iter_mut()
        .find(|c| c.id == clip_id)
        .ok_or_else(|| TimelineError::ClipNotFound(clip_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_wire_format_uses_type_and_track_names() {
        let clip = TimelineClip::scene("c1", "scene-1", 0, 3000).with_order(2);
        let json = serde_json::to_value(&clip).unwrap();
        assert_eq!(json["type"], "scene");
        assert_eq!(json["track"], "scenes");
        assert_eq!(json["order"], 2);
    }

    #[test]
    fn missing_zoom_defaults_to_no_zoom() {
        let clip: TimelineClip = serde_json::from_str(
            r#"{"id":"a1","type":"audio","source_id":"l1","source_file":"x.mp3",
                "track":"audio","start_ms":500,"duration_ms":1200,"order":0}"#,
        )
        .unwrap();
        assert_eq!(clip.zoom_start, 1.0);
        assert_eq!(clip.zoom_end, 1.0);
        assert_eq!(clip.end_ms(), 1700);
        assert!(!clip.is_scene());
    }
}
