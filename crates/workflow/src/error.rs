use thiserror::Error;

use backend::BackendError;
use episode::{CacheError, OrderError, StageId, StageKind};
use timeline::TimelineError;

#[derive(Debug, Error)]
pub enum StudioError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Timeline(#[from] TimelineError),

    #[error("{0} is approved; unapprove it before editing")]
    StageLocked(StageKind),
    #[error("{stage} is not the current stage (current: {current})")]
    NotCurrentStage { stage: StageId, current: String },
    #[error("{0} is not complete: {1}")]
    Incomplete(StageKind, String),
    #[error("cannot {action} while {phase}")]
    InvalidPhase { action: &'static str, phase: String },
    #[error("line {0} already has generated audio; revert it first")]
    LineLocked(String),
    #[error("scene {0} already has an image; revert it first")]
    PromptLocked(String),
    #[error("{0} is read-only in auto mode")]
    ReadOnly(StageKind),
    #[error("invalid position: {0}")]
    InvalidIndex(#[from] OrderError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("no workflow registered for stage {0}")]
    UnknownStage(StageId),
    #[error("invalid stage catalog: {0}")]
    InvalidCatalog(String),
    #[error("result arrived after the episode was closed")]
    Stale,
    #[error("config error: {0}")]
    Config(String),
}

impl StudioError {
    /// True for "could not reach backend" failures.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Backend(e) if e.is_connectivity())
    }

    /// Failures of a generation call, which the user may simply retry.
    pub fn is_generation(&self) -> bool {
        matches!(self, Self::Backend(BackendError::Generation(_)))
    }

    pub fn invalid_phase(action: &'static str, phase: impl std::fmt::Debug) -> Self {
        Self::InvalidPhase {
            action,
            phase: format!("{phase:?}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, StudioError>;
