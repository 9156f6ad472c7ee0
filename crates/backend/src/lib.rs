/// Generation backend abstraction
///
/// Every request the studio makes goes through [`Backend`]:
/// - `HttpBackend` talks to the production REST service
/// - `MockBackend` keeps episodes in memory for offline runs and tests
pub mod config;
pub mod http;
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use episode::{
    ContextData, Episode, EpisodeId, EpisodeSummary, GenerationMode, IntroData, IntroPatch, Scene,
    ScenesData, ScriptLine, StageId, StageKind, ThumbnailData, TimelineData, VoiceData,
    VoiceLineStatus,
};
use timeline::{Millis, TimelineClip};

pub use config::BackendConfig;
pub use http::HttpBackend;
pub use mock::{MockBackend, MockConfig};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("could not reach backend: {0}")]
    Transport(String),
    #[error("rejected by backend: {0}")]
    Rejected(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("generation failed: {0}")]
    Generation(String),
    #[error("malformed response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Map an HTTP status and its `detail` body onto the error taxonomy.
    pub fn from_status(status: u16, detail: String) -> Self {
        match status {
            404 => Self::NotFound(detail),
            400..=499 => Self::Rejected(detail),
            _ => Self::Generation(detail),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// One entry of the backend's stage catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDescriptor {
    pub id: StageId,
    pub order: usize,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedConflict {
    pub episode_id: EpisodeId,
    pub episode_title: String,
    pub similarity: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedCheck {
    pub has_conflicts: bool,
    pub conflicts: Vec<SeedConflict>,
    pub suggestion: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdeaDraft {
    pub idea: String,
    pub characters_used: Vec<String>,
    pub settings_used: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalReceipt {
    pub approved: bool,
    pub current_stage: StageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnapproveReceipt {
    pub stage: StageId,
    pub approved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportReceipt {
    pub output_file: String,
    pub total_duration_ms: Millis,
}

/// Partial update of a single clip. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_ms: Option<Millis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<Millis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom_start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zoom_end: Option<f64>,
}

impl ClipPatch {
    pub fn geometry(start_ms: Millis, duration_ms: Millis) -> Self {
        Self {
            start_ms: Some(start_ms),
            duration_ms: Some(duration_ms),
            ..Self::default()
        }
    }

    pub fn apply(&self, clip: &mut TimelineClip) {
        if let Some(v) = self.start_ms {
            clip.start_ms = v;
        }
        if let Some(v) = self.duration_ms {
            clip.duration_ms = v;
        }
        if let Some(v) = self.zoom_start {
            clip.zoom_start = v;
        }
        if let Some(v) = self.zoom_end {
            clip.zoom_end = v;
        }
    }
}

/// Request/response surface of the generation backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    async fn list_stages(&self) -> Result<Vec<StageDescriptor>>;

    // Episodes
    async fn list_episodes(&self) -> Result<Vec<EpisodeSummary>>;
    async fn create_episode(&self, title: &str) -> Result<EpisodeSummary>;
    async fn get_episode(&self, id: &EpisodeId) -> Result<Episode>;
    async fn delete_episode(&self, id: &EpisodeId) -> Result<()>;
    async fn unapprove(&self, id: &EpisodeId, stage: &StageId) -> Result<UnapproveReceipt>;

    /// Approve a stage's bundle. Context approval never reaches the backend.
    async fn approve(&self, id: &EpisodeId, stage: StageKind) -> Result<ApprovalReceipt>;

    // Context
    async fn load_context(&self, id: &EpisodeId) -> Result<ContextData>;

    // Script
    async fn check_seed(&self, id: &EpisodeId, seed: &str) -> Result<SeedCheck>;
    async fn generate_idea(&self, id: &EpisodeId, seed: &str) -> Result<IdeaDraft>;
    async fn generate_script(&self, id: &EpisodeId, idea: &str) -> Result<Vec<ScriptLine>>;
    async fn update_lines(&self, id: &EpisodeId, lines: &[ScriptLine]) -> Result<Vec<ScriptLine>>;
    async fn add_line(
        &self,
        id: &EpisodeId,
        position: usize,
        line: &ScriptLine,
    ) -> Result<Vec<ScriptLine>>;
    async fn delete_line(&self, id: &EpisodeId, line_id: &str) -> Result<Vec<ScriptLine>>;

    // Voice
    async fn initialize_voice(&self, id: &EpisodeId) -> Result<VoiceData>;
    async fn generate_voice_line(&self, id: &EpisodeId, line_id: &str) -> Result<VoiceLineStatus>;
    async fn revert_voice_line(&self, id: &EpisodeId, line_id: &str) -> Result<()>;
    async fn set_voice_mode(&self, id: &EpisodeId, mode: GenerationMode) -> Result<GenerationMode>;
    async fn set_voice_speed(&self, id: &EpisodeId, speed: f64) -> Result<f64>;
    async fn update_voice_lines(
        &self,
        id: &EpisodeId,
        lines: &[ScriptLine],
    ) -> Result<Vec<ScriptLine>>;
    async fn add_voice_line(
        &self,
        id: &EpisodeId,
        position: usize,
        line: &ScriptLine,
    ) -> Result<Vec<ScriptLine>>;
    async fn delete_voice_line(&self, id: &EpisodeId, line_id: &str) -> Result<Vec<ScriptLine>>;

    // Scenes
    async fn set_art_style(&self, id: &EpisodeId, art_style: &str) -> Result<String>;
    async fn generate_scene_breakdown(&self, id: &EpisodeId) -> Result<ScenesData>;
    async fn update_scenes(&self, id: &EpisodeId, scenes: &[Scene]) -> Result<Vec<Scene>>;
    async fn add_scene(&self, id: &EpisodeId, scene: &Scene) -> Result<Vec<Scene>>;
    async fn delete_scene(&self, id: &EpisodeId, scene_id: &str) -> Result<Vec<Scene>>;
    async fn generate_scene_image(&self, id: &EpisodeId, scene_id: &str) -> Result<Scene>;
    async fn revert_scene_image(&self, id: &EpisodeId, scene_id: &str) -> Result<()>;
    async fn set_scenes_mode(&self, id: &EpisodeId, mode: GenerationMode)
        -> Result<GenerationMode>;

    // Timeline
    async fn initialize_timeline(&self, id: &EpisodeId) -> Result<TimelineData>;
    async fn update_clips(
        &self,
        id: &EpisodeId,
        clips: &[TimelineClip],
    ) -> Result<Vec<TimelineClip>>;
    async fn update_clip(
        &self,
        id: &EpisodeId,
        clip_id: &str,
        patch: &ClipPatch,
    ) -> Result<TimelineClip>;
    async fn update_intro(&self, id: &EpisodeId, patch: &IntroPatch) -> Result<IntroData>;
    async fn export_timeline(&self, id: &EpisodeId) -> Result<ExportReceipt>;

    // Thumbnail
    async fn initialize_thumbnail(&self, id: &EpisodeId) -> Result<ThumbnailData>;
    async fn update_thumbnail_prompt(&self, id: &EpisodeId, prompt: &str)
        -> Result<ThumbnailData>;
    async fn generate_thumbnail(&self, id: &EpisodeId) -> Result<ThumbnailData>;
    async fn revert_thumbnail(&self, id: &EpisodeId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_taxonomy() {
        assert_eq!(
            BackendError::from_status(404, "gone".into()),
            BackendError::NotFound("gone".into())
        );
        assert_eq!(
            BackendError::from_status(400, "locked".into()),
            BackendError::Rejected("locked".into())
        );
        assert_eq!(
            BackendError::from_status(500, "tts".into()),
            BackendError::Generation("tts".into())
        );
        assert!(BackendError::Transport("refused".into()).is_connectivity());
        assert!(!BackendError::Rejected("x".into()).is_connectivity());
    }

    #[test]
    fn clip_patch_only_sends_set_fields() {
        let patch = ClipPatch::geometry(12_000, 1500);
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({"start_ms": 12000, "duration_ms": 1500}));

        let mut clip = TimelineClip::scene("c1", "s1", 2000, 1500);
        ClipPatch {
            zoom_end: Some(1.5),
            ..ClipPatch::default()
        }
        .apply(&mut clip);
        assert_eq!(clip.start_ms, 2000);
        assert_eq!(clip.zoom_end, 1.5);
    }
}
