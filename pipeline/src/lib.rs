//! Wires the fetch, cache and analysis crates into one runnable pipeline.

pub mod collector;
pub mod context;
pub mod pipeline;
pub mod retention;

pub use collector::{CollectOptions, Collection, Collector};
pub use context::PipelineContext;
pub use pipeline::{run, Pipeline};
pub use retention::{Prunable, RetentionManager, RetentionReport};
