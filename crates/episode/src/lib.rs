//! Episode data model, ordered-collection editing, and the client-side cache.

mod cache;
pub use cache::*;
mod model;
pub use model::*;
pub mod ordered;
pub use ordered::{OrderError, OrderedItem};

/// Seed used when the user submits an empty one.
pub const DEFAULT_SEED: &str = "surprise me with a creative family story";
