use async_trait::async_trait;
use std::any::Any;
use tracing::info;

use episode::{ContextData, Episode, StageKind};

use crate::registry::{Phase, StageContext, StageWorkflow};
use crate::{Result, StudioError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextPhase {
    Idle,
    Loading,
    Loaded,
    Approved,
}

/// Loads the character, setting and history reference data. Read-only.
pub struct ContextWorkflow {
    cx: StageContext,
    phase: ContextPhase,
}

impl ContextWorkflow {
    pub fn new(cx: StageContext) -> Self {
        Self {
            cx,
            phase: ContextPhase::Idle,
        }
    }

    pub fn context_phase(&self) -> ContextPhase {
        self.phase
    }

    /// Fetch the context and store it, keeping the local approval flag.
    pub async fn load(&mut self) -> Result<()> {
        let approved = self.cx.episode()?.context.approved;
        let prior = self.phase;
        self.phase = ContextPhase::Loading;
        let data = match self.cx.backend.load_context(self.cx.episode_id()).await {
            Ok(data) => data,
            Err(err) => {
                self.phase = prior;
                return Err(err.into());
            }
        };
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        info!(
            characters = data.characters.len(),
            settings = data.settings.len(),
            history = data.episode_history.len(),
            "context loaded"
        );
        self.cx.cache.set_context(
            &self.cx.ticket,
            ContextData {
                approved,
                ..data
            },
        )?;
        self.phase = if approved {
            ContextPhase::Approved
        } else {
            ContextPhase::Loaded
        };
        Ok(())
    }
}

#[async_trait]
impl StageWorkflow for ContextWorkflow {
    fn kind(&self) -> StageKind {
        StageKind::Context
    }

    fn phase(&self) -> Phase {
        match self.phase {
            ContextPhase::Idle => Phase::Draftless,
            ContextPhase::Loading => Phase::Drafting,
            ContextPhase::Loaded => Phase::Editable,
            ContextPhase::Approved => Phase::Locked,
        }
    }

    fn describe(&self) -> String {
        format!("{:?}", self.phase).to_lowercase()
    }

    fn is_complete(&self, _episode: &Episode) -> bool {
        matches!(self.phase, ContextPhase::Loaded | ContextPhase::Approved)
    }

    fn resume(&mut self, episode: &Episode) {
        self.phase = if episode.context.approved {
            ContextPhase::Approved
        } else if self.phase == ContextPhase::Approved {
            ContextPhase::Loaded
        } else {
            self.phase
        };
    }

    async fn enter(&mut self) -> Result<()> {
        if self.phase == ContextPhase::Approved {
            return Ok(());
        }
        self.load().await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
