/// In-memory backend for offline runs and tests.
///
/// Enforces the same rules as the production service (approval locks,
/// sequential voice generation, prompt locks) and lays out timelines the
/// same way, but every "generation" is canned.
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use super::{
    ApprovalReceipt, Backend, BackendError, ClipPatch, ExportReceipt, IdeaDraft, Result,
    SeedCheck, SeedConflict, StageDescriptor, UnapproveReceipt,
};
use episode::ordered::{is_temp_id, renumber};
use episode::{
    Character, ContextData, Episode, EpisodeId, EpisodeSummary, GenerationMode, IntroData,
    IntroPatch, Scene, ScenesData, ScriptLine, Setting, StageId, StageKind, ThumbnailData,
    TimelineData, VoiceData, VoiceLineStatus, MAX_VOICE_SPEED, MIN_VOICE_SPEED,
};
use timeline::{estimated_duration_ms, Millis, TimelineClip, DEFAULT_SCENE_ZOOM_END};

/// Silence before the first line of a scene.
pub const SCENE_LEAD_IN_MS: Millis = 500;
/// Gap between consecutive lines.
pub const LINE_GAP_MS: Millis = 300;
/// Scene length before its lines are added.
pub const SCENE_BASE_MS: Millis = 3000;

#[derive(Clone, Debug)]
pub struct MockConfig {
    pub stages: Vec<StageDescriptor>,
    pub context: ContextData,
    /// Number of lines a generated script has.
    pub script_length: usize,
    pub lines_per_scene: usize,
    /// Seeds containing one of these are reported as conflicting.
    pub conflict_keywords: Vec<String>,
    /// Artificial delay before every call.
    pub latency: Option<Duration>,
}

impl Default for MockConfig {
    fn default() -> Self {
        let mut characters = BTreeMap::new();
        characters.insert(
            "mom".to_string(),
            Character {
                role: "mother".into(),
                personality: "warm, organised".into(),
                visual: "short hair, green apron".into(),
                voice_id: "voice-mom".into(),
                reference: String::new(),
            },
        );
        characters.insert(
            "kid".to_string(),
            Character {
                role: "daughter".into(),
                personality: "curious".into(),
                visual: "pigtails, yellow raincoat".into(),
                voice_id: "voice-kid".into(),
                reference: String::new(),
            },
        );
        let mut settings = BTreeMap::new();
        settings.insert(
            "kitchen".to_string(),
            Setting {
                name_zh: "厨房".into(),
                name_en: "Kitchen".into(),
                reference: String::new(),
            },
        );
        Self {
            stages: StageKind::ALL
                .iter()
                .enumerate()
                .map(|(order, kind)| StageDescriptor {
                    id: kind.default_id(),
                    order,
                    name: kind.label().to_string(),
                })
                .collect(),
            context: ContextData {
                characters,
                settings,
                episode_history: Vec::new(),
                approved: false,
            },
            script_length: 4,
            lines_per_scene: 2,
            conflict_keywords: Vec::new(),
            latency: None,
        }
    }
}

impl MockConfig {
    pub fn with_script_length(mut self, n: usize) -> Self {
        self.script_length = n;
        self
    }

    pub fn with_conflict_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.conflict_keywords.push(keyword.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }
}

const CANNED_LINES: [(&str, &str, &str); 4] = [
    ("早上好！", "zǎo shang hǎo!", "Good morning!"),
    ("我们去公园吧。", "wǒ men qù gōng yuán ba.", "Let's go to the park."),
    ("好主意！", "hǎo zhǔ yì!", "Good idea!"),
    ("太好了！", "tài hǎo le!", "Great!"),
];

/// Canned voice length for a line.
pub fn voice_duration_ms(line: &ScriptLine) -> Millis {
    1000 + 100 * line.text_zh.chars().count() as Millis
}

#[derive(Default)]
struct MockState {
    registry: Vec<EpisodeSummary>,
    episodes: HashMap<String, Episode>,
    created: usize,
    failures: HashMap<String, VecDeque<BackendError>>,
    calls: Vec<String>,
    offline: bool,
}

pub struct MockBackend {
    config: Arc<MockConfig>,
    state: Mutex<MockState>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}

fn short_id(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &id[..8])
}

fn rejected(msg: impl Into<String>) -> BackendError {
    BackendError::Rejected(msg.into())
}

fn locked(kind: StageKind) -> BackendError {
    rejected(format!("{kind} is approved; unapprove it first"))
}

impl MockBackend {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    /// Make the next call to `op` fail with `err`.
    pub fn fail_next(&self, op: &str, err: BackendError) {
        self.state
            .lock()
            .failures
            .entry(op.to_string())
            .or_default()
            .push_back(err);
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Names of the calls made so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, op: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == op).count()
    }

    /// Current server-side copy of an episode.
    pub fn episode(&self, id: &EpisodeId) -> Option<Episode> {
        self.state.lock().episodes.get(id.as_str()).cloned()
    }

    /// Install or overwrite an episode record directly.
    pub fn seed_episode(&self, episode: Episode) {
        let mut state = self.state.lock();
        if !state.registry.iter().any(|s| s.id == episode.id) {
            state.registry.push(episode.summary());
        }
        state.episodes.insert(episode.id.0.clone(), episode);
    }

    async fn enter(&self, op: &str) -> Result<()> {
        if let Some(latency) = self.config.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        state.calls.push(op.to_string());
        if state.offline {
            return Err(BackendError::Transport("connection refused".into()));
        }
        if let Some(err) = state.failures.get_mut(op).and_then(VecDeque::pop_front) {
            debug!(op, %err, "injected failure");
            return Err(err);
        }
        Ok(())
    }

    fn with_episode<R>(
        &self,
        id: &EpisodeId,
        f: impl FnOnce(&mut Episode) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.state.lock();
        let ep = state
            .episodes
            .get_mut(id.as_str())
            .ok_or_else(|| BackendError::NotFound(format!("Episode {id} not found")))?;
        let mut draft = ep.clone();
        let out = f(&mut draft)?;
        *ep = draft;
        Ok(out)
    }

    fn stage_of(&self, id: &StageId) -> Option<StageKind> {
        StageKind::ALL.into_iter().find(|k| k.default_id() == *id)
    }

    /// Stage following `kind` in the catalog; the last stage stays current.
    fn next_stage(&self, kind: StageKind) -> StageId {
        let id = kind.default_id();
        let order = self.config.stages.iter().find(|s| s.id == id).map(|s| s.order);
        order
            .and_then(|o| self.config.stages.iter().find(|s| s.order == o + 1))
            .map(|s| s.id.clone())
            .unwrap_or(id)
    }

    fn later_stages(&self, kind: StageKind) -> Vec<StageKind> {
        let id = kind.default_id();
        let Some(order) = self.config.stages.iter().find(|s| s.id == id).map(|s| s.order) else {
            return Vec::new();
        };
        self.config
            .stages
            .iter()
            .filter(|s| s.order > order)
            .filter_map(|s| self.stage_of(&s.id))
            .collect()
    }

    fn canned_script(&self, ep: &Episode) -> Vec<ScriptLine> {
        let speakers: Vec<&String> = ep.context.characters.keys().collect();
        let mut lines: Vec<ScriptLine> = (0..self.config.script_length)
            .map(|i| {
                let (zh, pinyin, en) = CANNED_LINES[i % CANNED_LINES.len()];
                let speaker = speakers
                    .get(i % speakers.len().max(1))
                    .map(|s| s.as_str())
                    .unwrap_or("narrator");
                ScriptLine::new(short_id("line"), speaker).with_text(zh, pinyin, en)
            })
            .collect();
        renumber(&mut lines);
        lines
    }

    fn voice_line(ep: &Episode, line_id: &str) -> Result<VoiceLineStatus> {
        let line = ep
            .line(line_id)
            .ok_or_else(|| BackendError::NotFound(format!("Line {line_id} not found")))?;
        Ok(VoiceLineStatus {
            line_id: line_id.to_string(),
            audio_file: format!("audio/{line_id}.mp3"),
            duration_ms: voice_duration_ms(line),
            generated: true,
        })
    }

    fn generate_voice_in(ep: &mut Episode, line_id: &str) -> Result<VoiceLineStatus> {
        let index = ep
            .script
            .lines
            .iter()
            .position(|l| l.id == line_id)
            .ok_or_else(|| BackendError::NotFound(format!("Line {line_id} not found")))?;
        if let Some(prior) = ep.script.lines[..index]
            .iter()
            .find(|l| !ep.voice.is_generated(&l.id))
        {
            return Err(rejected(format!(
                "Must generate line {} first (sequential)",
                prior.id
            )));
        }
        let status = Self::voice_line(ep, line_id)?;
        Arc::make_mut(&mut ep.voice).upsert(status.clone());
        Ok(status)
    }

    fn generate_image_in(ep: &mut Episode, scene_id: &str) -> Result<Scene> {
        let scenes = Arc::make_mut(&mut ep.scenes);
        let scene = scenes
            .scenes
            .iter_mut()
            .find(|s| s.id == scene_id)
            .ok_or_else(|| BackendError::NotFound(format!("Scene {scene_id} not found")))?;
        if scene.prompt.trim().is_empty() {
            return Err(BackendError::Generation(format!(
                "Scene {scene_id} has an empty prompt"
            )));
        }
        scene.image_file = format!("images/{scene_id}.png");
        scene.generated = true;
        Ok(scene.clone())
    }

    /// Scene clips back to back, each line's audio placed inside its scene.
    fn layout_timeline(ep: &Episode) -> Vec<TimelineClip> {
        let mut scenes: Vec<&Scene> = ep.scenes.scenes.iter().collect();
        scenes.sort_by_key(|s| s.order);

        let mut clips = Vec::new();
        let mut audio = Vec::new();
        let mut cursor = 0;
        for (order, scene) in scenes.iter().enumerate() {
            let spoken: Millis = scene
                .line_ids
                .iter()
                .filter_map(|id| ep.voice.status(id))
                .map(|s| s.duration_ms)
                .sum();
            let duration = SCENE_BASE_MS + spoken;
            let mut clip = TimelineClip::scene(short_id("clip"), scene.id.clone(), cursor, duration)
                .with_source_file(scene.image_file.clone())
                .with_order(order);
            clip.zoom_end = DEFAULT_SCENE_ZOOM_END;
            clips.push(clip);

            let mut offset = cursor + SCENE_LEAD_IN_MS;
            for line_id in &scene.line_ids {
                let Some(status) = ep.voice.status(line_id).filter(|s| s.generated) else {
                    continue;
                };
                audio.push(
                    TimelineClip::audio(short_id("clip"), line_id.clone(), offset, status.duration_ms)
                        .with_source_file(status.audio_file.clone())
                        .with_order(audio.len()),
                );
                offset += status.duration_ms + LINE_GAP_MS;
            }
            cursor += duration;
        }
        clips.extend(audio);
        clips
    }

    fn lines_mutation(
        ep: &mut Episode,
        lines: &[ScriptLine],
        voice_rules: bool,
    ) -> Result<Vec<ScriptLine>> {
        if ep.script.approved && !voice_rules {
            return Err(locked(StageKind::Script));
        }
        if voice_rules {
            if ep.voice.approved {
                return Err(locked(StageKind::Voice));
            }
            for line in lines {
                if !ep.voice.is_generated(&line.id) {
                    continue;
                }
                if let Some(original) = ep.line(&line.id) {
                    if original.content_differs(line) {
                        return Err(rejected(format!(
                            "Cannot edit line {}: TTS already generated. Revert first.",
                            line.id
                        )));
                    }
                }
            }
        }
        Arc::make_mut(&mut ep.script).lines = lines.to_vec();
        Ok(lines.to_vec())
    }

    fn insert_line(
        ep: &mut Episode,
        position: usize,
        line: &ScriptLine,
        voice_rules: bool,
    ) -> Result<Vec<ScriptLine>> {
        if voice_rules {
            if ep.voice.approved {
                return Err(locked(StageKind::Voice));
            }
            let last_generated = ep
                .script
                .lines
                .iter()
                .rposition(|l| ep.voice.is_generated(&l.id));
            if let Some(last) = last_generated {
                if position <= last {
                    return Err(rejected("Can only add lines after the last generated line"));
                }
            }
        } else if ep.script.approved {
            return Err(locked(StageKind::Script));
        }
        let mut line = line.clone();
        if line.id.is_empty() || is_temp_id(&line.id) {
            line.id = short_id("line");
        }
        let line_id = line.id.clone();
        let script = Arc::make_mut(&mut ep.script);
        let position = position.min(script.lines.len());
        script.lines.insert(position, line);
        renumber(&mut script.lines);
        if voice_rules {
            Arc::make_mut(&mut ep.voice).upsert(VoiceLineStatus::pending(line_id));
        }
        Ok(script.lines.clone())
    }

    fn remove_line(ep: &mut Episode, line_id: &str, voice_rules: bool) -> Result<Vec<ScriptLine>> {
        if voice_rules {
            if ep.voice.approved {
                return Err(locked(StageKind::Voice));
            }
            if ep.voice.is_generated(line_id) {
                return Err(rejected(format!(
                    "Cannot delete line {line_id}: TTS already generated. Revert first."
                )));
            }
        } else if ep.script.approved {
            return Err(locked(StageKind::Script));
        }
        if ep.line(line_id).is_none() {
            return Err(BackendError::NotFound(format!("Line {line_id} not found")));
        }
        let script = Arc::make_mut(&mut ep.script);
        script.lines.retain(|l| l.id != line_id);
        renumber(&mut script.lines);
        let lines = script.lines.clone();
        Arc::make_mut(&mut ep.voice)
            .line_statuses
            .retain(|s| s.line_id != line_id);
        Ok(lines)
    }

    fn check_completion(ep: &Episode, kind: StageKind) -> Result<()> {
        match kind {
            StageKind::Context => Err(rejected("context is acknowledged by the client")),
            StageKind::Script if ep.script.lines.is_empty() => {
                Err(rejected("Script has no lines"))
            }
            StageKind::Voice => match ep.script.lines.iter().find(|l| !ep.voice.is_generated(&l.id)) {
                Some(line) => Err(rejected(format!(
                    "Line {} does not have TTS generated",
                    line.id
                ))),
                None => Ok(()),
            },
            StageKind::Scenes if ep.scenes.scenes.is_empty() => Err(rejected("No scenes")),
            StageKind::Scenes => match ep.scenes.scenes.iter().find(|s| !s.generated) {
                Some(scene) => Err(rejected(format!("Scene {} has no image", scene.id))),
                None => Ok(()),
            },
            StageKind::Timeline if !ep.timeline.is_exported() => {
                Err(rejected("Must export video before approving"))
            }
            StageKind::Thumbnail if !ep.thumbnail.generated => {
                Err(rejected("Thumbnail has not been generated"))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_stages(&self) -> Result<Vec<StageDescriptor>> {
        self.enter("list_stages").await?;
        Ok(self.config.stages.clone())
    }

    async fn list_episodes(&self) -> Result<Vec<EpisodeSummary>> {
        self.enter("list_episodes").await?;
        Ok(self.state.lock().registry.clone())
    }

    async fn create_episode(&self, title: &str) -> Result<EpisodeSummary> {
        self.enter("create_episode").await?;
        let first = self
            .config
            .stages
            .iter()
            .min_by_key(|s| s.order)
            .map(|s| s.id.clone())
            .unwrap_or_else(|| StageKind::Context.default_id());
        let mut state = self.state.lock();
        state.created += 1;
        let n = state.created;
        let title = if title.trim().is_empty() {
            format!("Episode {n}")
        } else {
            title.to_string()
        };
        let episode = Episode::new(format!("ep_{n:03}"), title.clone(), first);
        let summary = EpisodeSummary {
            id: episode.id.clone(),
            title,
            summary: String::new(),
            date: chrono::Utc::now().to_rfc3339(),
        };
        state.registry.push(summary.clone());
        state.episodes.insert(episode.id.0.clone(), episode);
        Ok(summary)
    }

    async fn get_episode(&self, id: &EpisodeId) -> Result<Episode> {
        self.enter("get_episode").await?;
        self.episode(id)
            .ok_or_else(|| BackendError::NotFound(format!("Episode {id} not found")))
    }

    async fn delete_episode(&self, id: &EpisodeId) -> Result<()> {
        self.enter("delete_episode").await?;
        let mut state = self.state.lock();
        if state.episodes.remove(id.as_str()).is_none() {
            return Err(BackendError::NotFound(format!("Episode {id} not found")));
        }
        state.registry.retain(|s| s.id != *id);
        Ok(())
    }

    async fn unapprove(&self, id: &EpisodeId, stage: &StageId) -> Result<UnapproveReceipt> {
        self.enter("unapprove").await?;
        let kind = self
            .stage_of(stage)
            .ok_or_else(|| rejected(format!("Unknown stage {stage}")))?;
        let later = self.later_stages(kind);
        self.with_episode(id, |ep| {
            ep.set_approved(kind, false);
            for k in later {
                ep.set_approved(k, false);
            }
            ep.current_stage = stage.clone();
            Ok(UnapproveReceipt {
                stage: stage.clone(),
                approved: false,
            })
        })
    }

    async fn approve(&self, id: &EpisodeId, stage: StageKind) -> Result<ApprovalReceipt> {
        self.enter(&format!("approve_{}", stage.label().to_lowercase()))
            .await?;
        let next = self.next_stage(stage);
        self.with_episode(id, |ep| {
            if ep.is_approved(stage) {
                return Err(rejected(format!("{stage} is already approved")));
            }
            Self::check_completion(ep, stage)?;
            ep.set_approved(stage, true);
            ep.current_stage = next;
            Ok(ApprovalReceipt {
                approved: true,
                current_stage: ep.current_stage.clone(),
            })
        })
    }

    async fn load_context(&self, id: &EpisodeId) -> Result<ContextData> {
        self.enter("load_context").await?;
        let mut context = self.config.context.clone();
        let history: Vec<EpisodeSummary> = self
            .state
            .lock()
            .registry
            .iter()
            .filter(|s| s.id != *id)
            .cloned()
            .collect();
        context.episode_history = history;
        self.with_episode(id, |ep| {
            let approved = ep.context.approved;
            ep.context = Arc::new(ContextData {
                approved,
                ..context.clone()
            });
            Ok(ContextData {
                approved,
                ..context
            })
        })
    }

    async fn check_seed(&self, id: &EpisodeId, seed: &str) -> Result<SeedCheck> {
        self.enter("check_seed").await?;
        let needle = seed.trim().to_lowercase();
        let state = self.state.lock();
        let mut conflicts = Vec::new();
        for (ep_id, ep) in &state.episodes {
            if ep_id == id.as_str() || ep.script.seed.is_empty() {
                continue;
            }
            if ep.script.seed.trim().to_lowercase() == needle {
                conflicts.push(SeedConflict {
                    episode_id: ep.id.clone(),
                    episode_title: ep.title.clone(),
                    similarity: "same seed".into(),
                });
            }
        }
        for keyword in &self.config.conflict_keywords {
            if needle.contains(&keyword.to_lowercase()) {
                conflicts.push(SeedConflict {
                    episode_id: EpisodeId::new("archive"),
                    episode_title: keyword.clone(),
                    similarity: format!("already covered \"{keyword}\""),
                });
            }
        }
        Ok(SeedCheck {
            has_conflicts: !conflicts.is_empty(),
            suggestion: if conflicts.is_empty() {
                String::new()
            } else {
                "Try a different angle on the story".into()
            },
            conflicts,
        })
    }

    async fn generate_idea(&self, id: &EpisodeId, seed: &str) -> Result<IdeaDraft> {
        self.enter("generate_idea").await?;
        if seed.trim().is_empty() {
            return Err(rejected("Seed is empty"));
        }
        self.with_episode(id, |ep| {
            if ep.script.approved {
                return Err(locked(StageKind::Script));
            }
            let characters_used: Vec<String> = ep.context.characters.keys().cloned().collect();
            let settings_used: Vec<String> = ep.context.settings.keys().take(1).cloned().collect();
            let idea = format!(
                "{} spend a day together: {}",
                characters_used.join(" and "),
                seed.trim()
            );
            let script = Arc::make_mut(&mut ep.script);
            script.seed = seed.to_string();
            script.idea = idea.clone();
            Ok(IdeaDraft {
                idea,
                characters_used,
                settings_used,
            })
        })
    }

    async fn generate_script(&self, id: &EpisodeId, idea: &str) -> Result<Vec<ScriptLine>> {
        self.enter("generate_script").await?;
        self.with_episode(id, |ep| {
            if ep.script.approved {
                return Err(locked(StageKind::Script));
            }
            if idea.trim().is_empty() {
                return Err(rejected("Idea is empty"));
            }
            let lines = self.canned_script(ep);
            let script = Arc::make_mut(&mut ep.script);
            script.idea = idea.to_string();
            script.lines = lines.clone();
            Ok(lines)
        })
    }

    async fn update_lines(&self, id: &EpisodeId, lines: &[ScriptLine]) -> Result<Vec<ScriptLine>> {
        self.enter("update_lines").await?;
        self.with_episode(id, |ep| Self::lines_mutation(ep, lines, false))
    }

    async fn add_line(
        &self,
        id: &EpisodeId,
        position: usize,
        line: &ScriptLine,
    ) -> Result<Vec<ScriptLine>> {
        self.enter("add_line").await?;
        self.with_episode(id, |ep| Self::insert_line(ep, position, line, false))
    }

    async fn delete_line(&self, id: &EpisodeId, line_id: &str) -> Result<Vec<ScriptLine>> {
        self.enter("delete_line").await?;
        self.with_episode(id, |ep| Self::remove_line(ep, line_id, false))
    }

    async fn initialize_voice(&self, id: &EpisodeId) -> Result<VoiceData> {
        self.enter("initialize_voice").await?;
        self.with_episode(id, |ep| {
            if ep.voice.approved {
                return Err(locked(StageKind::Voice));
            }
            let statuses: Vec<VoiceLineStatus> = ep
                .script
                .lines
                .iter()
                .map(|l| {
                    ep.voice
                        .status(&l.id)
                        .cloned()
                        .unwrap_or_else(|| VoiceLineStatus::pending(l.id.clone()))
                })
                .collect();
            Arc::make_mut(&mut ep.voice).line_statuses = statuses;
            ep.current_stage = StageKind::Voice.default_id();
            Ok((*ep.voice).clone())
        })
    }

    async fn generate_voice_line(&self, id: &EpisodeId, line_id: &str) -> Result<VoiceLineStatus> {
        self.enter("generate_voice_line").await?;
        self.with_episode(id, |ep| {
            if ep.voice.approved {
                return Err(locked(StageKind::Voice));
            }
            Self::generate_voice_in(ep, line_id)
        })
    }

    async fn revert_voice_line(&self, id: &EpisodeId, line_id: &str) -> Result<()> {
        self.enter("revert_voice_line").await?;
        self.with_episode(id, |ep| {
            if ep.voice.approved {
                return Err(locked(StageKind::Voice));
            }
            let index = ep
                .script
                .lines
                .iter()
                .position(|l| l.id == line_id)
                .ok_or_else(|| BackendError::NotFound(format!("Line {line_id} not found")))?;
            if let Some(later) = ep.script.lines[index + 1..]
                .iter()
                .find(|l| ep.voice.is_generated(&l.id))
            {
                return Err(rejected(format!(
                    "Must revert line {} first (revert from end)",
                    later.id
                )));
            }
            Arc::make_mut(&mut ep.voice).upsert(VoiceLineStatus::pending(line_id));
            Ok(())
        })
    }

    async fn set_voice_mode(&self, id: &EpisodeId, mode: GenerationMode) -> Result<GenerationMode> {
        self.enter("set_voice_mode").await?;
        self.with_episode(id, |ep| {
            if ep.voice.approved {
                return Err(locked(StageKind::Voice));
            }
            Arc::make_mut(&mut ep.voice).mode = mode;
            Ok(mode)
        })
    }

    async fn set_voice_speed(&self, id: &EpisodeId, speed: f64) -> Result<f64> {
        self.enter("set_voice_speed").await?;
        if speed.is_nan() {
            return Err(rejected("Speed must be a number"));
        }
        self.with_episode(id, |ep| {
            if ep.voice.approved {
                return Err(locked(StageKind::Voice));
            }
            let speed = speed.clamp(MIN_VOICE_SPEED, MAX_VOICE_SPEED);
            Arc::make_mut(&mut ep.voice).speed = speed;
            Ok(speed)
        })
    }

    async fn update_voice_lines(
        &self,
        id: &EpisodeId,
        lines: &[ScriptLine],
    ) -> Result<Vec<ScriptLine>> {
        self.enter("update_voice_lines").await?;
        self.with_episode(id, |ep| Self::lines_mutation(ep, lines, true))
    }

    async fn add_voice_line(
        &self,
        id: &EpisodeId,
        position: usize,
        line: &ScriptLine,
    ) -> Result<Vec<ScriptLine>> {
        self.enter("add_voice_line").await?;
        self.with_episode(id, |ep| Self::insert_line(ep, position, line, true))
    }

    async fn delete_voice_line(&self, id: &EpisodeId, line_id: &str) -> Result<Vec<ScriptLine>> {
        self.enter("delete_voice_line").await?;
        self.with_episode(id, |ep| Self::remove_line(ep, line_id, true))
    }

    async fn set_art_style(&self, id: &EpisodeId, art_style: &str) -> Result<String> {
        self.enter("set_art_style").await?;
        self.with_episode(id, |ep| {
            if ep.scenes.approved {
                return Err(locked(StageKind::Scenes));
            }
            ep.art_style = art_style.to_string();
            Ok(ep.art_style.clone())
        })
    }

    async fn generate_scene_breakdown(&self, id: &EpisodeId) -> Result<ScenesData> {
        self.enter("generate_scene_breakdown").await?;
        let per_scene = self.config.lines_per_scene.max(1);
        self.with_episode(id, |ep| {
            if ep.scenes.approved {
                return Err(locked(StageKind::Scenes));
            }
            if ep.script.lines.is_empty() {
                return Err(rejected("Script has no lines"));
            }
            let setting = ep
                .context
                .settings
                .keys()
                .next()
                .cloned()
                .unwrap_or_else(|| "home".into());
            let style = if ep.art_style.is_empty() {
                "storybook illustration".to_string()
            } else {
                ep.art_style.clone()
            };
            let mut scenes: Vec<Scene> = ep
                .script
                .lines
                .chunks(per_scene)
                .map(|chunk| {
                    let mut characters: Vec<String> =
                        chunk.iter().map(|l| l.character_id.clone()).collect();
                    characters.dedup();
                    Scene {
                        id: short_id("scene"),
                        order: 0,
                        prompt: format!("{style}: {} in the {setting}", characters.join(" and ")),
                        setting_id: setting.clone(),
                        character_ids: characters,
                        line_ids: chunk.iter().map(|l| l.id.clone()).collect(),
                        image_file: String::new(),
                        generated: false,
                    }
                })
                .collect();
            renumber(&mut scenes);
            let scenes_data = Arc::make_mut(&mut ep.scenes);
            scenes_data.scenes = scenes;
            ep.current_stage = StageKind::Scenes.default_id();
            Ok((*ep.scenes).clone())
        })
    }

    async fn update_scenes(&self, id: &EpisodeId, scenes: &[Scene]) -> Result<Vec<Scene>> {
        self.enter("update_scenes").await?;
        self.with_episode(id, |ep| {
            if ep.scenes.approved {
                return Err(locked(StageKind::Scenes));
            }
            for scene in scenes {
                if let Some(existing) = ep.scenes.scene(&scene.id) {
                    if existing.generated && existing.prompt != scene.prompt {
                        return Err(rejected(format!(
                            "Cannot edit prompt of scene {}: image already generated. Revert first.",
                            scene.id
                        )));
                    }
                }
            }
            Arc::make_mut(&mut ep.scenes).scenes = scenes.to_vec();
            Ok(scenes.to_vec())
        })
    }

    async fn add_scene(&self, id: &EpisodeId, scene: &Scene) -> Result<Vec<Scene>> {
        self.enter("add_scene").await?;
        self.with_episode(id, |ep| {
            if ep.scenes.approved {
                return Err(locked(StageKind::Scenes));
            }
            let mut scene = scene.clone();
            if scene.id.is_empty() || is_temp_id(&scene.id) {
                scene.id = short_id("scene");
            }
            scene.image_file.clear();
            scene.generated = false;
            let data = Arc::make_mut(&mut ep.scenes);
            data.scenes.push(scene);
            renumber(&mut data.scenes);
            Ok(data.scenes.clone())
        })
    }

    async fn delete_scene(&self, id: &EpisodeId, scene_id: &str) -> Result<Vec<Scene>> {
        self.enter("delete_scene").await?;
        self.with_episode(id, |ep| {
            if ep.scenes.approved {
                return Err(locked(StageKind::Scenes));
            }
            match ep.scenes.scene(scene_id) {
                None => return Err(BackendError::NotFound(format!("Scene {scene_id} not found"))),
                Some(s) if s.generated => {
                    return Err(rejected(format!(
                        "Cannot delete scene {scene_id}: image already generated. Revert first."
                    )))
                }
                Some(_) => {}
            }
            let data = Arc::make_mut(&mut ep.scenes);
            data.scenes.retain(|s| s.id != scene_id);
            renumber(&mut data.scenes);
            Ok(data.scenes.clone())
        })
    }

    async fn generate_scene_image(&self, id: &EpisodeId, scene_id: &str) -> Result<Scene> {
        self.enter("generate_scene_image").await?;
        self.with_episode(id, |ep| {
            if ep.scenes.approved {
                return Err(locked(StageKind::Scenes));
            }
            Self::generate_image_in(ep, scene_id)
        })
    }

    async fn revert_scene_image(&self, id: &EpisodeId, scene_id: &str) -> Result<()> {
        self.enter("revert_scene_image").await?;
        self.with_episode(id, |ep| {
            if ep.scenes.approved {
                return Err(locked(StageKind::Scenes));
            }
            let scene = Arc::make_mut(&mut ep.scenes)
                .scenes
                .iter_mut()
                .find(|s| s.id == scene_id)
                .ok_or_else(|| BackendError::NotFound(format!("Scene {scene_id} not found")))?;
            scene.image_file.clear();
            scene.generated = false;
            Ok(())
        })
    }

    async fn set_scenes_mode(
        &self,
        id: &EpisodeId,
        mode: GenerationMode,
    ) -> Result<GenerationMode> {
        self.enter("set_scenes_mode").await?;
        self.with_episode(id, |ep| {
            if ep.scenes.approved {
                return Err(locked(StageKind::Scenes));
            }
            Arc::make_mut(&mut ep.scenes).mode = mode;
            Ok(mode)
        })
    }

    async fn initialize_timeline(&self, id: &EpisodeId) -> Result<TimelineData> {
        self.enter("initialize_timeline").await?;
        self.with_episode(id, |ep| {
            if ep.timeline.approved {
                return Err(locked(StageKind::Timeline));
            }
            let clips = Self::layout_timeline(ep);
            let intro = ep.timeline.intro.clone().unwrap_or_else(|| IntroData {
                character_id: ep
                    .context
                    .characters
                    .keys()
                    .next()
                    .cloned()
                    .unwrap_or_default(),
                title_en: ep.title.clone(),
                ..IntroData::default()
            });
            let timeline = Arc::make_mut(&mut ep.timeline);
            timeline.total_duration_ms = estimated_duration_ms(&clips);
            timeline.clips = clips;
            timeline.intro = Some(intro);
            ep.current_stage = StageKind::Timeline.default_id();
            Ok((*ep.timeline).clone())
        })
    }

    async fn update_clips(
        &self,
        id: &EpisodeId,
        clips: &[TimelineClip],
    ) -> Result<Vec<TimelineClip>> {
        self.enter("update_clips").await?;
        self.with_episode(id, |ep| {
            if ep.timeline.approved {
                return Err(locked(StageKind::Timeline));
            }
            let timeline = Arc::make_mut(&mut ep.timeline);
            timeline.clips = clips.to_vec();
            timeline.total_duration_ms = estimated_duration_ms(clips);
            timeline.invalidate_export();
            Ok(clips.to_vec())
        })
    }

    async fn update_clip(
        &self,
        id: &EpisodeId,
        clip_id: &str,
        patch: &ClipPatch,
    ) -> Result<TimelineClip> {
        self.enter("update_clip").await?;
        self.with_episode(id, |ep| {
            if ep.timeline.approved {
                return Err(locked(StageKind::Timeline));
            }
            let timeline = Arc::make_mut(&mut ep.timeline);
            let clip = timeline
                .clips
                .iter_mut()
                .find(|c| c.id == clip_id)
                .ok_or_else(|| BackendError::NotFound(format!("Clip {clip_id} not found")))?;
            patch.apply(clip);
            let updated = clip.clone();
            timeline.total_duration_ms = estimated_duration_ms(&timeline.clips);
            timeline.invalidate_export();
            Ok(updated)
        })
    }

    async fn update_intro(&self, id: &EpisodeId, patch: &IntroPatch) -> Result<IntroData> {
        self.enter("update_intro").await?;
        self.with_episode(id, |ep| {
            if ep.timeline.approved {
                return Err(locked(StageKind::Timeline));
            }
            let intro = Arc::make_mut(&mut ep.timeline)
                .intro
                .get_or_insert_with(IntroData::default);
            intro.apply(patch);
            Ok(intro.clone())
        })
    }

    async fn export_timeline(&self, id: &EpisodeId) -> Result<ExportReceipt> {
        self.enter("export_timeline").await?;
        self.with_episode(id, |ep| {
            if ep.timeline.clips.is_empty() {
                return Err(rejected("No clips in timeline"));
            }
            let output_file = format!("output/{}.mp4", ep.id);
            let timeline = Arc::make_mut(&mut ep.timeline);
            timeline.output_file = output_file.clone();
            timeline.total_duration_ms = estimated_duration_ms(&timeline.clips);
            Ok(ExportReceipt {
                output_file,
                total_duration_ms: timeline.total_duration_ms,
            })
        })
    }

    async fn initialize_thumbnail(&self, id: &EpisodeId) -> Result<ThumbnailData> {
        self.enter("initialize_thumbnail").await?;
        self.with_episode(id, |ep| {
            if ep.thumbnail.approved {
                return Err(locked(StageKind::Thumbnail));
            }
            let prompt = format!("Cover art for \"{}\": {}", ep.title, ep.script.idea);
            Arc::make_mut(&mut ep.thumbnail).prompt = prompt;
            ep.current_stage = StageKind::Thumbnail.default_id();
            Ok((*ep.thumbnail).clone())
        })
    }

    async fn update_thumbnail_prompt(
        &self,
        id: &EpisodeId,
        prompt: &str,
    ) -> Result<ThumbnailData> {
        self.enter("update_thumbnail_prompt").await?;
        self.with_episode(id, |ep| {
            if ep.thumbnail.approved {
                return Err(locked(StageKind::Thumbnail));
            }
            Arc::make_mut(&mut ep.thumbnail).prompt = prompt.to_string();
            Ok((*ep.thumbnail).clone())
        })
    }

    async fn generate_thumbnail(&self, id: &EpisodeId) -> Result<ThumbnailData> {
        self.enter("generate_thumbnail").await?;
        self.with_episode(id, |ep| {
            if ep.thumbnail.approved {
                return Err(locked(StageKind::Thumbnail));
            }
            if ep.thumbnail.prompt.trim().is_empty() {
                return Err(rejected("Thumbnail prompt is empty"));
            }
            let thumb = Arc::make_mut(&mut ep.thumbnail);
            thumb.image_file = "thumbnail.png".into();
            thumb.generated = true;
            Ok(thumb.clone())
        })
    }

    async fn revert_thumbnail(&self, id: &EpisodeId) -> Result<()> {
        self.enter("revert_thumbnail").await?;
        self.with_episode(id, |ep| {
            if ep.thumbnail.approved {
                return Err(locked(StageKind::Thumbnail));
            }
            let thumb = Arc::make_mut(&mut ep.thumbnail);
            thumb.image_file.clear();
            thumb.generated = false;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn episode_with_script(backend: &MockBackend) -> EpisodeId {
        let summary = backend.create_episode("").await.unwrap();
        let id = summary.id;
        backend.load_context(&id).await.unwrap();
        let idea = backend.generate_idea(&id, "a picnic").await.unwrap();
        backend.generate_script(&id, &idea.idea).await.unwrap();
        id
    }

    #[tokio::test]
    async fn created_episodes_are_numbered() {
        let backend = MockBackend::default();
        let a = backend.create_episode("").await.unwrap();
        let b = backend.create_episode("Pilot").await.unwrap();
        assert_eq!(a.id.as_str(), "ep_001");
        assert_eq!(a.title, "Episode 1");
        assert_eq!(b.title, "Pilot");
        assert_eq!(backend.list_episodes().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn voice_generates_sequentially_and_reverts_from_end() {
        let backend = MockBackend::default();
        let id = episode_with_script(&backend).await;
        backend.initialize_voice(&id).await.unwrap();
        let ep = backend.episode(&id).unwrap();
        let l: Vec<String> = ep.script.lines.iter().map(|l| l.id.clone()).collect();

        let err = backend.generate_voice_line(&id, &l[1]).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));

        backend.generate_voice_line(&id, &l[0]).await.unwrap();
        let status = backend.generate_voice_line(&id, &l[1]).await.unwrap();
        assert!(status.generated);

        assert!(backend.revert_voice_line(&id, &l[0]).await.is_err());
        backend.revert_voice_line(&id, &l[1]).await.unwrap();
        assert!(!backend.episode(&id).unwrap().voice.is_generated(&l[1]));
    }

    #[tokio::test]
    async fn approved_script_rejects_edits() {
        let backend = MockBackend::default();
        let id = episode_with_script(&backend).await;
        backend.approve(&id, StageKind::Script).await.unwrap();
        let lines = backend.episode(&id).unwrap().script.lines.clone();
        let err = backend.update_lines(&id, &lines).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
    }

    #[tokio::test]
    async fn voiced_line_rejects_speaker_and_direction_edits() {
        let backend = MockBackend::default();
        let id = episode_with_script(&backend).await;
        backend.approve(&id, StageKind::Script).await.unwrap();
        backend.initialize_voice(&id).await.unwrap();
        let mut lines = backend.episode(&id).unwrap().script.lines.clone();
        backend.generate_voice_line(&id, &lines[0].id).await.unwrap();

        lines[0].direction = Some("whispering".into());
        let err = backend.update_voice_lines(&id, &lines).await.unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));

        lines[0].direction = None;
        lines[1].direction = Some("whispering".into());
        backend.update_voice_lines(&id, &lines).await.unwrap();
    }

    #[tokio::test]
    async fn timeline_layout_follows_voice_durations() {
        let backend = MockBackend::default();
        let id = episode_with_script(&backend).await;
        backend.initialize_voice(&id).await.unwrap();
        let lines = backend.episode(&id).unwrap().script.lines.clone();
        for line in &lines {
            backend.generate_voice_line(&id, &line.id).await.unwrap();
        }
        backend.generate_scene_breakdown(&id).await.unwrap();
        let data = backend.initialize_timeline(&id).await.unwrap();

        let ep = backend.episode(&id).unwrap();
        let first_scene = &ep.scenes.scenes[0];
        let d0 = ep.voice.status(&first_scene.line_ids[0]).unwrap().duration_ms;
        let d1 = ep.voice.status(&first_scene.line_ids[1]).unwrap().duration_ms;

        let scene_clip = &data.clips[0];
        assert_eq!(scene_clip.start_ms, 0);
        assert_eq!(scene_clip.duration_ms, SCENE_BASE_MS + d0 + d1);
        assert_eq!(scene_clip.zoom_end, DEFAULT_SCENE_ZOOM_END);

        let audio: Vec<_> = data.clips.iter().filter(|c| !c.is_scene()).collect();
        assert_eq!(audio[0].start_ms, SCENE_LEAD_IN_MS);
        assert_eq!(audio[1].start_ms, SCENE_LEAD_IN_MS + d0 + LINE_GAP_MS);
        assert_eq!(data.total_duration_ms, estimated_duration_ms(&data.clips));
        assert!(data.intro.is_some());
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let backend = MockBackend::default();
        backend.fail_next("list_stages", BackendError::Generation("boom".into()));
        assert!(backend.list_stages().await.is_err());
        assert_eq!(backend.list_stages().await.unwrap().len(), 6);
        assert_eq!(backend.call_count("list_stages"), 2);

        backend.set_offline(true);
        assert!(backend.list_episodes().await.unwrap_err().is_connectivity());
    }
}
