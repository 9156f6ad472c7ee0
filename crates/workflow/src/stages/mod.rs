//! One phase machine per pipeline stage.
mod context;
mod lines;
mod scenes;
mod script;
mod thumbnail;
mod timeline;
mod voice;

pub use context::{ContextPhase, ContextWorkflow};
pub use lines::LineEdit;
pub use scenes::{SceneEdit, ScenesPhase, ScenesWorkflow};
pub use script::{ScriptPhase, ScriptWorkflow};
pub use thumbnail::{ThumbnailPhase, ThumbnailWorkflow};
pub use self::timeline::{captions_for, TimelinePhase, TimelineWorkflow};
pub use voice::{next_pending, voice_frontier, VoicePhase, VoiceWorkflow};
