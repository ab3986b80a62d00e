//! Relay core: per-contact debounce and the turn pipeline behind it.

pub mod debounce;
pub mod pipeline;

pub use debounce::{BurstHandler, Debouncer, PendingRegistry};
pub use pipeline::TurnPipeline;
