use async_trait::async_trait;
use std::any::Any;
use tracing::{debug, info};

use episode::ordered::lock_frontier;
use episode::{
    Episode, GenerationMode, ScriptLine, StageKind, VoiceLineStatus, MAX_VOICE_SPEED,
    MIN_VOICE_SPEED,
};

use super::lines::{self, LineChannel, LineEdit};
use crate::registry::{Phase, StageContext, StageWorkflow};
use crate::{Result, StudioError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoicePhase {
    Uninitialized,
    Initializing,
    Editing,
    /// One line (`Some`) or the whole batch (`None`) is being voiced.
    Generating(Option<String>),
    Approved,
}

/// Index just past the last line with audio. Lines before it are frozen.
pub fn voice_frontier(episode: &Episode) -> usize {
    lock_frontier(&episode.script.lines, |l| episode.voice.is_generated(&l.id))
}

/// First line, in script order, still lacking audio.
pub fn next_pending(episode: &Episode) -> Option<&ScriptLine> {
    episode
        .script
        .lines
        .iter()
        .find(|l| !episode.voice.is_generated(&l.id))
}

/// Per-line speech generation, strictly front to back.
pub struct VoiceWorkflow {
    cx: StageContext,
    phase: VoicePhase,
}

impl VoiceWorkflow {
    pub fn new(cx: StageContext) -> Self {
        Self {
            cx,
            phase: VoicePhase::Uninitialized,
        }
    }

    pub fn voice_phase(&self) -> &VoicePhase {
        &self.phase
    }

    fn expect_editing(&self, action: &'static str) -> Result<()> {
        if self.phase != VoicePhase::Editing {
            return Err(StudioError::invalid_phase(action, &self.phase));
        }
        Ok(())
    }

    /// Sync one status per script line with the backend.
    pub async fn initialize(&mut self) -> Result<()> {
        self.cx.unlocked(StageKind::Voice)?;
        let prior = self.phase.clone();
        self.phase = VoicePhase::Initializing;
        let data = match self.cx.backend.initialize_voice(self.cx.episode_id()).await {
            Ok(data) => data,
            Err(err) => {
                self.phase = prior;
                return Err(err.into());
            }
        };
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        self.cx.cache.set_voice(&self.cx.ticket, data)?;
        self.phase = VoicePhase::Editing;
        Ok(())
    }

    fn store(&self, status: VoiceLineStatus) -> Result<()> {
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        self.cx.cache.edit_voice(&self.cx.ticket, |v| v.upsert(status))?;
        Ok(())
    }

    /// Voice `line_id`. Only the first line without audio may be generated.
    pub async fn generate_line(&mut self, line_id: &str) -> Result<VoiceLineStatus> {
        let episode = self.cx.unlocked(StageKind::Voice)?;
        self.expect_editing("generate line")?;
        if episode.line(line_id).is_none() {
            return Err(StudioError::NotFound(format!("line {line_id}")));
        }
        if episode.voice.is_generated(line_id) {
            return Err(StudioError::LineLocked(line_id.to_string()));
        }
        if let Some(pending) = next_pending(&episode).filter(|l| l.id != line_id) {
            return Err(StudioError::InvalidPhase {
                action: "generate line",
                phase: format!("line {} is still pending", pending.id),
            });
        }

        self.phase = VoicePhase::Generating(Some(line_id.to_string()));
        let result = self
            .cx
            .backend
            .generate_voice_line(self.cx.episode_id(), line_id)
            .await;
        self.phase = VoicePhase::Editing;
        let status = result?;
        self.store(status.clone())?;
        debug!(line = line_id, duration_ms = status.duration_ms, "line voiced");
        Ok(status)
    }

    /// Voice every pending line in order, one request at a time. Stops at the
    /// first failure; lines voiced before it keep their audio.
    pub async fn generate_all(&mut self) -> Result<usize> {
        self.cx.unlocked(StageKind::Voice)?;
        self.expect_editing("generate all lines")?;
        self.phase = VoicePhase::Generating(None);
        let mut voiced = 0;
        loop {
            let episode = match self.cx.episode() {
                Ok(ep) => ep,
                Err(err) => {
                    self.phase = VoicePhase::Editing;
                    return Err(err);
                }
            };
            let Some(line_id) = next_pending(&episode).map(|l| l.id.clone()) else {
                break;
            };
            let status = match self
                .cx
                .backend
                .generate_voice_line(self.cx.episode_id(), &line_id)
                .await
            {
                Ok(status) => status,
                Err(err) => {
                    self.phase = VoicePhase::Editing;
                    return Err(err.into());
                }
            };
            if let Err(err) = self.store(status) {
                self.phase = VoicePhase::Editing;
                return Err(err);
            }
            voiced += 1;
        }
        self.phase = VoicePhase::Editing;
        info!(voiced, "voice batch finished");
        Ok(voiced)
    }

    /// Drop the audio of `line_id`, which must be the last voiced line.
    pub async fn revert_line(&mut self, line_id: &str) -> Result<()> {
        let episode = self.cx.unlocked(StageKind::Voice)?;
        self.expect_editing("revert line")?;
        let index = episode
            .script
            .lines
            .iter()
            .position(|l| l.id == line_id)
            .ok_or_else(|| StudioError::NotFound(format!("line {line_id}")))?;
        if !episode.voice.is_generated(line_id) {
            return Err(StudioError::InvalidPhase {
                action: "revert line",
                phase: format!("line {line_id} has no audio"),
            });
        }
        if voice_frontier(&episode) != index + 1 {
            return Err(StudioError::InvalidPhase {
                action: "revert line",
                phase: "a later line still has audio".into(),
            });
        }
        self.cx
            .backend
            .revert_voice_line(self.cx.episode_id(), line_id)
            .await?;
        self.store(VoiceLineStatus::pending(line_id))
    }

    /// Switching to auto voices every pending line straight away.
    pub async fn set_mode(&mut self, mode: GenerationMode) -> Result<usize> {
        self.cx.unlocked(StageKind::Voice)?;
        self.expect_editing("change mode")?;
        let mode = self
            .cx
            .backend
            .set_voice_mode(self.cx.episode_id(), mode)
            .await?;
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        self.cx.cache.edit_voice(&self.cx.ticket, |v| v.mode = mode)?;
        match mode {
            GenerationMode::Auto => self.generate_all().await,
            GenerationMode::Manual => Ok(0),
        }
    }

    /// Speaking rate, clamped to the supported range. Returns the stored value.
    pub async fn set_speed(&mut self, speed: f64) -> Result<f64> {
        self.cx.unlocked(StageKind::Voice)?;
        if speed.is_nan() {
            return Err(StudioError::InvalidPhase {
                action: "set speed",
                phase: "speed is not a number".into(),
            });
        }
        let clamped = speed.clamp(MIN_VOICE_SPEED, MAX_VOICE_SPEED);
        let stored = self
            .cx
            .backend
            .set_voice_speed(self.cx.episode_id(), clamped)
            .await?;
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        self.cx.cache.edit_voice(&self.cx.ticket, |v| v.speed = stored)?;
        Ok(stored)
    }

    /// Line list edits are manual-mode only.
    fn line_list(&self, action: &'static str) -> Result<std::sync::Arc<Episode>> {
        let episode = self.cx.unlocked(StageKind::Voice)?;
        self.expect_editing(action)?;
        if episode.voice.mode == GenerationMode::Auto {
            return Err(StudioError::ReadOnly(StageKind::Voice));
        }
        Ok(episode)
    }

    /// Edit a line. Lines before the voice frontier are read-only until reverted.
    pub async fn edit_line(&mut self, line_id: &str, change: &LineEdit) -> Result<()> {
        let episode = self.line_list("edit line")?;
        let frontier = voice_frontier(&episode);
        let locked: Vec<String> = episode.script.lines[..frontier]
            .iter()
            .map(|l| l.id.clone())
            .collect();
        lines::edit(&self.cx, LineChannel::Voice, line_id, change, move |l| {
            locked.contains(&l.id)
        })
        .await
    }

    pub async fn reorder_lines(&mut self, from: usize, to: usize) -> Result<bool> {
        let episode = self.line_list("reorder lines")?;
        let frontier = voice_frontier(&episode);
        lines::reorder(&self.cx, LineChannel::Voice, from, to, frontier).await
    }

    /// New lines go after the last voiced line.
    pub async fn add_line(&mut self, position: usize, character_id: &str) -> Result<String> {
        let episode = self.line_list("add line")?;
        let frontier = voice_frontier(&episode);
        let id = lines::add(&self.cx, LineChannel::Voice, position, character_id, frontier).await?;
        self.store(VoiceLineStatus::pending(id.clone()))?;
        Ok(id)
    }

    pub async fn delete_line(&mut self, line_id: &str) -> Result<()> {
        let episode = self.line_list("delete line")?;
        let voice = episode.voice.clone();
        lines::delete(&self.cx, LineChannel::Voice, line_id, move |l| {
            voice.is_generated(&l.id)
        })
        .await?;
        self.cx.cache.edit_voice(&self.cx.ticket, |v| {
            v.line_statuses.retain(|s| s.line_id != line_id)
        })?;
        Ok(())
    }
}

#[async_trait]
impl StageWorkflow for VoiceWorkflow {
    fn kind(&self) -> StageKind {
        StageKind::Voice
    }

    fn phase(&self) -> Phase {
        match self.phase {
            VoicePhase::Uninitialized => Phase::Draftless,
            VoicePhase::Initializing | VoicePhase::Generating(_) => Phase::Drafting,
            VoicePhase::Editing => Phase::Editable,
            VoicePhase::Approved => Phase::Locked,
        }
    }

    fn describe(&self) -> String {
        match &self.phase {
            VoicePhase::Generating(Some(line)) => format!("generating {line}"),
            VoicePhase::Generating(None) => "generating all".into(),
            other => format!("{other:?}").to_lowercase(),
        }
    }

    fn is_complete(&self, episode: &Episode) -> bool {
        !episode.script.lines.is_empty() && next_pending(episode).is_none()
    }

    fn resume(&mut self, episode: &Episode) {
        self.phase = if episode.voice.approved {
            VoicePhase::Approved
        } else if !episode.voice.line_statuses.is_empty() {
            VoicePhase::Editing
        } else {
            VoicePhase::Uninitialized
        };
    }

    async fn enter(&mut self) -> Result<()> {
        if self.cx.episode()?.voice.approved {
            self.phase = VoicePhase::Approved;
            return Ok(());
        }
        self.initialize().await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
