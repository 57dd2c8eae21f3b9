// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod artifact;
pub mod config;
pub mod event;
pub mod pipeline;
pub mod sources;

// ---- Re-exports for stable public API ----
pub use crate::artifact::{RankedNarrative, RunArtifact};
pub use crate::config::PipelineConfig;
pub use crate::event::{Domain, RawEvent, RunContext, SignalEvent, SourceTag, TimeWindow};
pub use crate::pipeline::CancelFlag;

/// Run the full detection pipeline: events in, ranked narratives out.
/// Thin alias so callers don't have to reach into `pipeline::`.
pub fn run_pipeline(
    cfg: &PipelineConfig,
    ctx: &RunContext,
    raw_events: Vec<RawEvent>,
) -> anyhow::Result<RunArtifact> {
    pipeline::run(cfg, ctx, raw_events, &CancelFlag::new())
}
