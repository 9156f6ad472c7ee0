//! Episode production workflow
//!
//! Drives an episode through the backend's stage catalog:
//! - approval rules over the catalog ([`ApprovalMachine`])
//! - one phase machine per stage ([`StageWorkflow`])
//! - optimistic edits against the shared episode cache ([`Transaction`])
pub mod approval;
pub mod catalog;
pub mod config;
mod error;
pub mod optimistic;
pub mod registry;
pub mod session;
pub mod stages;
pub mod studio;

pub use approval::{ApprovalMachine, Position};
pub use catalog::StageCatalog;
pub use config::StudioConfig;
pub use error::{Result, StudioError};
pub use optimistic::{optimistic, Transaction};
pub use registry::{Phase, StageContext, StageRegistry, StageWorkflow, WorkflowFactory};
pub use session::EpisodeSession;
pub use stages::*;
pub use studio::{Connectivity, Studio};
