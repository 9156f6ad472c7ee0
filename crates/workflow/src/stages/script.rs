use async_trait::async_trait;
use std::any::Any;
use tracing::{info, warn};

use backend::{IdeaDraft, SeedCheck};
use episode::{Episode, StageKind, DEFAULT_SEED};

use super::lines::{self, LineChannel, LineEdit};
use crate::registry::{Phase, StageContext, StageWorkflow};
use crate::{Result, StudioError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptPhase {
    /// Waiting for a seed.
    Seed,
    CheckingSeed,
    /// The seed resembles earlier episodes; proceed or reseed.
    Conflicts(SeedCheck),
    GeneratingIdea,
    IdeaReview,
    GeneratingScript,
    Editing,
    Approved,
}

/// Seed → idea → script lines.
pub struct ScriptWorkflow {
    cx: StageContext,
    phase: ScriptPhase,
    seed: String,
    draft: Option<IdeaDraft>,
}

impl ScriptWorkflow {
    pub fn new(cx: StageContext) -> Self {
        Self {
            cx,
            phase: ScriptPhase::Seed,
            seed: String::new(),
            draft: None,
        }
    }

    pub fn script_phase(&self) -> &ScriptPhase {
        &self.phase
    }

    /// The idea proposal from the last generation, if any.
    pub fn draft(&self) -> Option<&IdeaDraft> {
        self.draft.as_ref()
    }

    fn expect(&self, action: &'static str, ok: bool) -> Result<()> {
        if !ok {
            return Err(StudioError::invalid_phase(action, &self.phase));
        }
        Ok(())
    }

    /// Check the seed for conflicts and, when clear, draft an idea. A blank seed
    /// falls back to the default prompt.
    pub async fn submit_seed(&mut self, seed: &str) -> Result<()> {
        self.cx.unlocked(StageKind::Script)?;
        self.expect("submit seed", self.phase == ScriptPhase::Seed)?;
        self.seed = match seed.trim() {
            "" => DEFAULT_SEED.to_string(),
            s => s.to_string(),
        };

        self.phase = ScriptPhase::CheckingSeed;
        let report = match self.cx.backend.check_seed(self.cx.episode_id(), &self.seed).await {
            Ok(report) => report,
            Err(err) => {
                self.phase = ScriptPhase::Seed;
                return Err(err.into());
            }
        };
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        if report.has_conflicts || !report.conflicts.is_empty() {
            warn!(seed = %self.seed, conflicts = report.conflicts.len(), "seed conflicts");
            self.phase = ScriptPhase::Conflicts(report);
            return Ok(());
        }
        self.generate_idea().await
    }

    /// Accept a conflicting seed anyway.
    pub async fn proceed_anyway(&mut self) -> Result<()> {
        self.expect(
            "proceed with seed",
            matches!(self.phase, ScriptPhase::Conflicts(_)),
        )?;
        self.generate_idea().await
    }

    /// Drop a conflicting seed and go back to seed entry.
    pub fn reseed(&mut self) -> Result<()> {
        self.expect("reseed", matches!(self.phase, ScriptPhase::Conflicts(_)))?;
        self.phase = ScriptPhase::Seed;
        Ok(())
    }

    async fn generate_idea(&mut self) -> Result<()> {
        self.phase = ScriptPhase::GeneratingIdea;
        let draft = match self
            .cx
            .backend
            .generate_idea(self.cx.episode_id(), &self.seed)
            .await
        {
            Ok(draft) => draft,
            Err(err) => {
                self.phase = ScriptPhase::Seed;
                return Err(err.into());
            }
        };
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        let seed = self.seed.clone();
        let idea = draft.idea.clone();
        self.cx.cache.edit_script(&self.cx.ticket, |s| {
            s.seed = seed;
            s.idea = idea;
        })?;
        self.draft = Some(draft);
        self.phase = ScriptPhase::IdeaReview;
        Ok(())
    }

    /// Local tweak to the idea text before the script is written.
    pub fn edit_idea(&mut self, idea: &str) -> Result<()> {
        self.cx.unlocked(StageKind::Script)?;
        self.expect("edit idea", self.phase == ScriptPhase::IdeaReview)?;
        let idea = idea.to_string();
        self.cx.cache.edit_script(&self.cx.ticket, |s| s.idea = idea)?;
        Ok(())
    }

    pub async fn generate_script(&mut self) -> Result<usize> {
        let episode = self.cx.unlocked(StageKind::Script)?;
        self.expect(
            "generate script",
            matches!(self.phase, ScriptPhase::IdeaReview | ScriptPhase::Editing),
        )?;
        let prior = self.phase.clone();
        let idea = episode.script.idea.clone();
        if idea.trim().is_empty() {
            return Err(StudioError::Incomplete(
                StageKind::Script,
                "no idea to write from".into(),
            ));
        }

        self.phase = ScriptPhase::GeneratingScript;
        let lines = match self
            .cx
            .backend
            .generate_script(self.cx.episode_id(), &idea)
            .await
        {
            Ok(lines) => lines,
            Err(err) => {
                self.phase = prior;
                return Err(err.into());
            }
        };
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        let count = lines.len();
        self.cx.cache.edit_script(&self.cx.ticket, |s| s.lines = lines)?;
        info!(lines = count, "script generated");
        self.phase = ScriptPhase::Editing;
        Ok(count)
    }

    /// Return to seed entry. Existing lines stay until a new script replaces them.
    pub fn start_over(&mut self) -> Result<()> {
        self.cx.unlocked(StageKind::Script)?;
        self.draft = None;
        self.phase = ScriptPhase::Seed;
        Ok(())
    }

    fn editing(&self, action: &'static str) -> Result<()> {
        self.expect(action, self.phase == ScriptPhase::Editing)
    }

    pub async fn edit_line(&mut self, line_id: &str, change: &LineEdit) -> Result<()> {
        self.editing("edit line")?;
        lines::edit(&self.cx, LineChannel::Script, line_id, change, |_| false).await
    }

    pub async fn reorder_lines(&mut self, from: usize, to: usize) -> Result<bool> {
        self.editing("reorder lines")?;
        lines::reorder(&self.cx, LineChannel::Script, from, to, 0).await
    }

    /// Insert a blank line for `character_id`; returns the backend-assigned id.
    pub async fn add_line(&mut self, position: usize, character_id: &str) -> Result<String> {
        self.editing("add line")?;
        lines::add(&self.cx, LineChannel::Script, position, character_id, 0).await
    }

    pub async fn delete_line(&mut self, line_id: &str) -> Result<()> {
        self.editing("delete line")?;
        lines::delete(&self.cx, LineChannel::Script, line_id, |_| false).await
    }
}

#[async_trait]
impl StageWorkflow for ScriptWorkflow {
    fn kind(&self) -> StageKind {
        StageKind::Script
    }

    fn phase(&self) -> Phase {
        match self.phase {
            ScriptPhase::Seed => Phase::Draftless,
            ScriptPhase::CheckingSeed
            | ScriptPhase::Conflicts(_)
            | ScriptPhase::GeneratingIdea
            | ScriptPhase::IdeaReview
            | ScriptPhase::GeneratingScript => Phase::Drafting,
            ScriptPhase::Editing => Phase::Editable,
            ScriptPhase::Approved => Phase::Locked,
        }
    }

    fn describe(&self) -> String {
        match &self.phase {
            ScriptPhase::Conflicts(report) => {
                format!("conflicts ({})", report.conflicts.len())
            }
            other => format!("{other:?}").to_lowercase(),
        }
    }

    fn is_complete(&self, episode: &Episode) -> bool {
        !episode.script.seed.is_empty()
            && !episode.script.idea.is_empty()
            && !episode.script.lines.is_empty()
    }

    fn resume(&mut self, episode: &Episode) {
        let script = &episode.script;
        self.seed = script.seed.clone();
        self.phase = if script.approved {
            ScriptPhase::Approved
        } else if !script.lines.is_empty() {
            ScriptPhase::Editing
        } else if !script.idea.is_empty() {
            ScriptPhase::IdeaReview
        } else {
            ScriptPhase::Seed
        };
    }

    async fn enter(&mut self) -> Result<()> {
        let episode = self.cx.episode()?;
        self.resume(&episode);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
