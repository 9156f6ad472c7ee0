//! Stage workflows and the table that maps catalog ids onto them.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use backend::Backend;
use episode::{CacheHandle, Episode, EpisodeId, StageId, StageKind, Ticket};

use crate::stages::{
    ContextWorkflow, ScenesWorkflow, ScriptWorkflow, ThumbnailWorkflow, TimelineWorkflow,
    VoiceWorkflow,
};
use crate::{Result, StudioError};

/// Phase shape shared by every stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Nothing generated yet.
    Draftless,
    /// A generation or load call is in flight, or a decision is pending.
    Drafting,
    Editable,
    /// Approved; only unapprove is legal.
    Locked,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draftless => write!(f, "draftless"),
            Self::Drafting => write!(f, "drafting"),
            Self::Editable => write!(f, "editable"),
            Self::Locked => write!(f, "locked"),
        }
    }
}

/// What a workflow needs to talk to the backend and the cache.
#[derive(Clone)]
pub struct StageContext {
    pub backend: Arc<dyn Backend>,
    pub cache: CacheHandle,
    pub ticket: Ticket,
}

impl StageContext {
    pub fn new(backend: Arc<dyn Backend>, cache: CacheHandle, ticket: Ticket) -> Self {
        Self {
            backend,
            cache,
            ticket,
        }
    }

    pub fn episode_id(&self) -> &EpisodeId {
        self.ticket.episode_id()
    }

    /// Current episode, provided this flow is still relevant.
    pub fn episode(&self) -> Result<Arc<Episode>> {
        if !self.cache.is_current(&self.ticket) {
            return Err(StudioError::Stale);
        }
        Ok(self.cache.get()?)
    }

    /// Current episode, failing if `kind` is approved.
    pub fn unlocked(&self, kind: StageKind) -> Result<Arc<Episode>> {
        let episode = self.episode()?;
        if episode.is_approved(kind) {
            return Err(StudioError::StageLocked(kind));
        }
        Ok(episode)
    }

    pub fn is_relevant(&self) -> bool {
        self.cache.is_current(&self.ticket)
    }
}

/// Phase machine for one stage.
#[async_trait]
pub trait StageWorkflow: Send + Sync {
    fn kind(&self) -> StageKind;

    fn phase(&self) -> Phase;

    /// Human-readable fine-grained phase.
    fn describe(&self) -> String;

    /// The condition `approve` checks.
    fn is_complete(&self, episode: &Episode) -> bool;

    /// Re-derive the phase from cached data, e.g. after opening an episode.
    fn resume(&mut self, episode: &Episode);

    /// Work done on entering the stage (loads, initialisation, auto-drafts).
    async fn enter(&mut self) -> Result<()>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub type WorkflowFactory = fn(StageContext) -> Box<dyn StageWorkflow>;

/// Explicit stage id → workflow table, built once at startup.
#[derive(Clone)]
pub struct StageRegistry {
    entries: HashMap<StageId, (StageKind, WorkflowFactory)>,
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(id, (kind, _))| (id, kind)))
            .finish()
    }
}

impl StageRegistry {
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The six built-in stages under their default ids.
    pub fn standard() -> Self {
        fn context_stage(cx: StageContext) -> Box<dyn StageWorkflow> {
            Box::new(ContextWorkflow::new(cx))
        }
        fn script_stage(cx: StageContext) -> Box<dyn StageWorkflow> {
            Box::new(ScriptWorkflow::new(cx))
        }
        fn voice_stage(cx: StageContext) -> Box<dyn StageWorkflow> {
            Box::new(VoiceWorkflow::new(cx))
        }
        fn scenes_stage(cx: StageContext) -> Box<dyn StageWorkflow> {
            Box::new(ScenesWorkflow::new(cx))
        }
        fn timeline_stage(cx: StageContext) -> Box<dyn StageWorkflow> {
            Box::new(TimelineWorkflow::new(cx))
        }
        fn thumbnail_stage(cx: StageContext) -> Box<dyn StageWorkflow> {
            Box::new(ThumbnailWorkflow::new(cx))
        }

        let table: [(StageKind, WorkflowFactory); 6] = [
            (StageKind::Context, context_stage),
            (StageKind::Script, script_stage),
            (StageKind::Voice, voice_stage),
            (StageKind::Scenes, scenes_stage),
            (StageKind::Timeline, timeline_stage),
            (StageKind::Thumbnail, thumbnail_stage),
        ];
        let mut registry = Self::empty();
        for (kind, factory) in table {
            registry.insert(kind.default_id(), kind, factory);
        }
        registry
    }

    pub fn insert(&mut self, id: StageId, kind: StageKind, factory: WorkflowFactory) {
        self.entries.insert(id, (kind, factory));
    }

    pub fn kind_of(&self, id: &StageId) -> Option<StageKind> {
        self.entries.get(id).map(|(kind, _)| *kind)
    }

    pub fn build(&self, id: &StageId, cx: StageContext) -> Result<Box<dyn StageWorkflow>> {
        let (_, factory) = self
            .entries
            .get(id)
            .ok_or_else(|| StudioError::UnknownStage(id.clone()))?;
        Ok(factory(cx))
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
