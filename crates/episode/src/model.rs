use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use timeline::{Millis, TimelineClip};

/// Identifier of a pipeline stage as declared by the backend catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub String);

impl StageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EpisodeId(pub String);

impl EpisodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EpisodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which data bundle of an episode a stage owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Context,
    Script,
    Voice,
    Scenes,
    Timeline,
    Thumbnail,
}

impl StageKind {
    pub const ALL: [StageKind; 6] = [
        StageKind::Context,
        StageKind::Script,
        StageKind::Voice,
        StageKind::Scenes,
        StageKind::Timeline,
        StageKind::Thumbnail,
    ];

    /// Catalog id the backend uses for this stage.
    pub fn default_id(&self) -> StageId {
        StageId::new(match self {
            Self::Context => "stage_0_context",
            Self::Script => "stage_1_script",
            Self::Voice => "stage_2_tts",
            Self::Scenes => "stage_3_scenes",
            Self::Timeline => "stage_4_stitch",
            Self::Thumbnail => "stage_5_thumbnail",
        })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Context => "Context",
            Self::Script => "Script",
            Self::Voice => "Voice",
            Self::Scenes => "Scenes",
            Self::Timeline => "Timeline",
            Self::Thumbnail => "Thumbnail",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whether a batch stage generates per item or all at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    #[default]
    Manual,
    Auto,
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub id: EpisodeId,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub date: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Character {
    pub role: String,
    pub personality: String,
    pub visual: String,
    pub voice_id: String,
    pub reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Setting {
    pub name_zh: String,
    pub name_en: String,
    pub reference: String,
}

/// Reference data for writing an episode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextData {
    pub characters: BTreeMap<String, Character>,
    pub settings: BTreeMap<String, Setting>,
    pub episode_history: Vec<EpisodeSummary>,
    /// Set locally once the context has been acknowledged.
    pub approved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLine {
    pub id: String,
    pub order: usize,
    pub character_id: String,
    #[serde(default)]
    pub text_zh: String,
    #[serde(default)]
    pub text_en: String,
    #[serde(default)]
    pub text_pinyin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
}

impl ScriptLine {
    pub fn new(id: impl Into<String>, character_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            order: 0,
            character_id: character_id.into(),
            text_zh: String::new(),
            text_en: String::new(),
            text_pinyin: String::new(),
            direction: None,
        }
    }

    pub fn with_text(
        mut self,
        zh: impl Into<String>,
        pinyin: impl Into<String>,
        en: impl Into<String>,
    ) -> Self {
        self.text_zh = zh.into();
        self.text_pinyin = pinyin.into();
        self.text_en = en.into();
        self
    }

    /// True when anything the voice render depends on differs. Order is not content.
    pub fn content_differs(&self, other: &ScriptLine) -> bool {
        self.character_id != other.character_id
            || self.text_zh != other.text_zh
            || self.text_en != other.text_en
            || self.text_pinyin != other.text_pinyin
            || self.direction != other.direction
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptData {
    pub seed: String,
    pub idea: String,
    pub lines: Vec<ScriptLine>,
    pub approved: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceLineStatus {
    pub line_id: String,
    #[serde(default)]
    pub audio_file: String,
    #[serde(default)]
    pub duration_ms: Millis,
    #[serde(default)]
    pub generated: bool,
}

impl VoiceLineStatus {
    pub fn pending(line_id: impl Into<String>) -> Self {
        Self {
            line_id: line_id.into(),
            ..Self::default()
        }
    }
}

pub const DEFAULT_VOICE_SPEED: f64 = 1.0;
pub const MIN_VOICE_SPEED: f64 = 0.25;
pub const MAX_VOICE_SPEED: f64 = 4.0;

fn default_speed() -> f64 {
    DEFAULT_VOICE_SPEED
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceData {
    #[serde(default)]
    pub line_statuses: Vec<VoiceLineStatus>,
    #[serde(default)]
    pub mode: GenerationMode,
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default)]
    pub approved: bool,
}

impl Default for VoiceData {
    fn default() -> Self {
        Self {
            line_statuses: Vec::new(),
            mode: GenerationMode::Manual,
            speed: DEFAULT_VOICE_SPEED,
            approved: false,
        }
    }
}

impl VoiceData {
    pub fn status(&self, line_id: &str) -> Option<&VoiceLineStatus> {
        self.line_statuses.iter().find(|s| s.line_id == line_id)
    }

    pub fn is_generated(&self, line_id: &str) -> bool {
        self.status(line_id).is_some_and(|s| s.generated)
    }

    /// Replace or append the status for its line.
    pub fn upsert(&mut self, status: VoiceLineStatus) {
        match self
            .line_statuses
            .iter_mut()
            .find(|s| s.line_id == status.line_id)
        {
            Some(slot) => *slot = status,
            None => self.line_statuses.push(status),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub order: usize,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub setting_id: String,
    #[serde(default)]
    pub character_ids: Vec<String>,
    #[serde(default)]
    pub line_ids: Vec<String>,
    #[serde(default)]
    pub image_file: String,
    #[serde(default)]
    pub generated: bool,
}

impl Scene {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenesData {
    pub scenes: Vec<Scene>,
    pub mode: GenerationMode,
    pub approved: bool,
}

impl ScenesData {
    pub fn scene(&self, scene_id: &str) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.id == scene_id)
    }
}

/// Title card shown before the first scene.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntroData {
    pub character_id: String,
    pub title_zh: String,
    pub title_en: String,
    pub tts_text: String,
    pub image_file: String,
    pub audio_file: String,
    pub audio_duration_ms: Millis,
    pub tts_generated: bool,
    pub image_uploaded: bool,
}

/// Partial update of the intro. `None` fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_zh: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_en: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_text: Option<String>,
}

impl IntroData {
    pub fn apply(&mut self, patch: &IntroPatch) {
        if let Some(v) = &patch.character_id {
            self.character_id = v.clone();
        }
        if let Some(v) = &patch.title_zh {
            self.title_zh = v.clone();
        }
        if let Some(v) = &patch.title_en {
            self.title_en = v.clone();
        }
        if let Some(v) = &patch.tts_text {
            if *v != self.tts_text {
                self.tts_generated = false;
                self.audio_file.clear();
                self.audio_duration_ms = 0;
            }
            self.tts_text = v.clone();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineData {
    pub clips: Vec<TimelineClip>,
    pub total_duration_ms: Millis,
    pub output_file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intro: Option<IntroData>,
    pub approved: bool,
}

impl TimelineData {
    pub fn is_exported(&self) -> bool {
        !self.output_file.is_empty()
    }

    /// Drop the rendered output after a layout change; the old render no longer matches.
    pub fn invalidate_export(&mut self) {
        self.output_file.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailData {
    pub prompt: String,
    pub image_file: String,
    pub generated: bool,
    pub approved: bool,
}

/// Full client-side mirror of one episode record.
///
/// Bundles sit behind `Arc` so an update replaces only the branch it touches;
/// consumers detect change with `Arc::ptr_eq`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    #[serde(default)]
    pub title: String,
    pub current_stage: StageId,
    #[serde(default)]
    pub art_style: String,
    #[serde(default)]
    pub context: Arc<ContextData>,
    #[serde(default)]
    pub script: Arc<ScriptData>,
    #[serde(default, rename = "tts")]
    pub voice: Arc<VoiceData>,
    #[serde(default)]
    pub scenes: Arc<ScenesData>,
    #[serde(default)]
    pub timeline: Arc<TimelineData>,
    #[serde(default)]
    pub thumbnail: Arc<ThumbnailData>,
}

impl Episode {
    pub fn new(id: impl Into<String>, title: impl Into<String>, first_stage: StageId) -> Self {
        Self {
            id: EpisodeId::new(id),
            title: title.into(),
            current_stage: first_stage,
            art_style: String::new(),
            context: Arc::default(),
            script: Arc::default(),
            voice: Arc::default(),
            scenes: Arc::default(),
            timeline: Arc::default(),
            thumbnail: Arc::default(),
        }
    }

    pub fn is_approved(&self, kind: StageKind) -> bool {
        match kind {
            StageKind::Context => self.context.approved,
            StageKind::Script => self.script.approved,
            StageKind::Voice => self.voice.approved,
            StageKind::Scenes => self.scenes.approved,
            StageKind::Timeline => self.timeline.approved,
            StageKind::Thumbnail => self.thumbnail.approved,
        }
    }

    /// Flip one approval flag, copying only that bundle.
    pub fn set_approved(&mut self, kind: StageKind, approved: bool) {
        if self.is_approved(kind) == approved {
            return;
        }
        match kind {
            StageKind::Context => Arc::make_mut(&mut self.context).approved = approved,
            StageKind::Script => Arc::make_mut(&mut self.script).approved = approved,
            StageKind::Voice => Arc::make_mut(&mut self.voice).approved = approved,
            StageKind::Scenes => Arc::make_mut(&mut self.scenes).approved = approved,
            StageKind::Timeline => Arc::make_mut(&mut self.timeline).approved = approved,
            StageKind::Thumbnail => Arc::make_mut(&mut self.thumbnail).approved = approved,
        }
    }

    pub fn line(&self, line_id: &str) -> Option<&ScriptLine> {
        self.script.lines.iter().find(|l| l.id == line_id)
    }

    pub fn summary(&self) -> EpisodeSummary {
        EpisodeSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            summary: self.script.idea.clone(),
            date: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn episode_json_uses_backend_field_names() {
        let json = r#"{
            "id": "ep1",
            "current_stage": "stage_2_tts",
            "art_style": "watercolor",
            "tts": {"line_statuses": [{"line_id": "l1", "generated": true, "duration_ms": 1200}], "mode": "auto"},
            "scenes": {"scenes": [], "mode": "manual", "approved": false}
        }"#;
        let ep: Episode = serde_json::from_str(json).unwrap();
        assert_eq!(ep.current_stage, StageKind::Voice.default_id());
        assert_eq!(ep.voice.mode, GenerationMode::Auto);
        assert_eq!(ep.voice.speed, 1.0);
        assert!(ep.voice.is_generated("l1"));
        assert!(!ep.voice.is_generated("l2"));
        assert!(ep.timeline.intro.is_none());

        let back = serde_json::to_value(&ep).unwrap();
        assert!(back.get("tts").is_some());
        assert!(back.get("voice").is_none());
    }

    #[test]
    fn set_approved_copies_only_the_touched_bundle() {
        let mut ep = Episode::new("ep1", "Episode 1", StageKind::Context.default_id());
        let before = ep.clone();
        ep.set_approved(StageKind::Script, true);
        assert!(ep.is_approved(StageKind::Script));
        assert!(!Arc::ptr_eq(&ep.script, &before.script));
        assert!(Arc::ptr_eq(&ep.voice, &before.voice));
        assert!(Arc::ptr_eq(&ep.timeline, &before.timeline));
    }

    #[test]
    fn changing_intro_text_drops_generated_audio() {
        let mut intro = IntroData {
            tts_text: "hi".into(),
            audio_file: "intro.mp3".into(),
            audio_duration_ms: 900,
            tts_generated: true,
            ..IntroData::default()
        };
        intro.apply(&IntroPatch {
            title_en: Some("Pilot".into()),
            tts_text: Some("hi".into()),
            ..IntroPatch::default()
        });
        assert!(intro.tts_generated);
        intro.apply(&IntroPatch {
            tts_text: Some("hello".into()),
            ..IntroPatch::default()
        });
        assert!(!intro.tts_generated);
        assert!(intro.audio_file.is_empty());
        assert_eq!(intro.title_en, "Pilot");
    }
}
