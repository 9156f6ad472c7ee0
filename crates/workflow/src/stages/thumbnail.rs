use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;
use tracing::info;

use episode::{Episode, StageKind, ThumbnailData};

use crate::optimistic::optimistic;
use crate::registry::{Phase, StageContext, StageWorkflow};
use crate::{Result, StudioError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailPhase {
    Idle,
    /// The backend is drafting a prompt.
    Drafting,
    /// Prompt ready, no image.
    Editing,
    Generating,
    Ready,
    Approved,
}

/// Cover image: drafted prompt, then one generated image.
pub struct ThumbnailWorkflow {
    cx: StageContext,
    phase: ThumbnailPhase,
}

impl ThumbnailWorkflow {
    pub fn new(cx: StageContext) -> Self {
        Self {
            cx,
            phase: ThumbnailPhase::Idle,
        }
    }

    pub fn thumbnail_phase(&self) -> ThumbnailPhase {
        self.phase
    }

    fn accept(&self, data: ThumbnailData) -> Result<()> {
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        self.cx.cache.edit_thumbnail(&self.cx.ticket, |t| {
            t.prompt = data.prompt;
            t.image_file = data.image_file;
            t.generated = data.generated;
        })?;
        Ok(())
    }

    /// Have the backend draft a prompt from the episode.
    pub async fn draft_prompt(&mut self) -> Result<()> {
        self.cx.unlocked(StageKind::Thumbnail)?;
        let prior = self.phase;
        self.phase = ThumbnailPhase::Drafting;
        match self.cx.backend.initialize_thumbnail(self.cx.episode_id()).await {
            Ok(data) => {
                self.accept(data)?;
                self.phase = ThumbnailPhase::Editing;
                Ok(())
            }
            Err(err) => {
                self.phase = prior;
                Err(err.into())
            }
        }
    }

    /// Edit the prompt. Frozen while an image exists.
    pub async fn update_prompt(&mut self, prompt: &str) -> Result<()> {
        let episode = self.cx.unlocked(StageKind::Thumbnail)?;
        if episode.thumbnail.generated {
            return Err(StudioError::PromptLocked("thumbnail".into()));
        }
        if self.phase != ThumbnailPhase::Editing {
            return Err(StudioError::invalid_phase("edit prompt", self.phase));
        }
        let local = prompt.to_string();
        let data = optimistic(
            &self.cx.cache,
            &self.cx.ticket,
            |ep| Arc::make_mut(&mut ep.thumbnail).prompt = local,
            self.cx
                .backend
                .update_thumbnail_prompt(self.cx.episode_id(), prompt),
        )
        .await?;
        self.accept(data)
    }

    pub async fn generate(&mut self) -> Result<()> {
        self.cx.unlocked(StageKind::Thumbnail)?;
        if self.phase != ThumbnailPhase::Editing {
            return Err(StudioError::invalid_phase("generate thumbnail", self.phase));
        }
        self.phase = ThumbnailPhase::Generating;
        match self.cx.backend.generate_thumbnail(self.cx.episode_id()).await {
            Ok(data) => {
                self.accept(data)?;
                info!("thumbnail generated");
                self.phase = ThumbnailPhase::Ready;
                Ok(())
            }
            Err(err) => {
                self.phase = ThumbnailPhase::Editing;
                Err(err.into())
            }
        }
    }

    /// Drop the image so the prompt can be edited again.
    pub async fn revert(&mut self) -> Result<()> {
        self.cx.unlocked(StageKind::Thumbnail)?;
        if self.phase != ThumbnailPhase::Ready {
            return Err(StudioError::invalid_phase("revert thumbnail", self.phase));
        }
        self.cx
            .backend
            .revert_thumbnail(self.cx.episode_id())
            .await?;
        if !self.cx.is_relevant() {
            return Err(StudioError::Stale);
        }
        self.cx.cache.edit_thumbnail(&self.cx.ticket, |t| {
            t.image_file.clear();
            t.generated = false;
        })?;
        self.phase = ThumbnailPhase::Editing;
        Ok(())
    }

    /// Revert then generate again from the same prompt.
    pub async fn regenerate(&mut self) -> Result<()> {
        self.revert().await?;
        self.generate().await
    }
}

#[async_trait]
impl StageWorkflow for ThumbnailWorkflow {
    fn kind(&self) -> StageKind {
        StageKind::Thumbnail
    }

    fn phase(&self) -> Phase {
        match self.phase {
            ThumbnailPhase::Idle => Phase::Draftless,
            ThumbnailPhase::Drafting | ThumbnailPhase::Generating => Phase::Drafting,
            ThumbnailPhase::Editing | ThumbnailPhase::Ready => Phase::Editable,
            ThumbnailPhase::Approved => Phase::Locked,
        }
    }

    fn describe(&self) -> String {
        format!("{:?}", self.phase).to_lowercase()
    }

    fn is_complete(&self, episode: &Episode) -> bool {
        episode.thumbnail.generated
    }

    fn resume(&mut self, episode: &Episode) {
        let thumb = &episode.thumbnail;
        self.phase = if thumb.approved {
            ThumbnailPhase::Approved
        } else if thumb.generated {
            ThumbnailPhase::Ready
        } else if !thumb.prompt.is_empty() {
            ThumbnailPhase::Editing
        } else {
            ThumbnailPhase::Idle
        };
    }

    /// Drafts a prompt and generates from it when nothing exists yet.
    async fn enter(&mut self) -> Result<()> {
        let episode = self.cx.episode()?;
        self.resume(&episode);
        if self.phase != ThumbnailPhase::Idle {
            return Ok(());
        }
        self.draft_prompt().await?;
        self.generate().await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
