// src/sources/mod.rs
//! Narrow interface to event producers. Live connectors (RPC, code-host,
//! social, blog feeds) live outside this crate; anything that can yield
//! `RawEvent`s plugs in here.

pub mod snapshot;

pub use snapshot::SnapshotSource;

use crate::event::RawEvent;
use anyhow::Result;

#[async_trait::async_trait]
pub trait EventSource {
    /// Fetch whatever the source currently has. Window filtering happens in
    /// the pipeline, not here.
    async fn fetch_events(&self) -> Result<Vec<RawEvent>>;
    fn name(&self) -> &'static str;
}

/// Collect from all sources. A failing source is logged and skipped; it
/// never fails the batch.
pub async fn collect_events(sources: &[Box<dyn EventSource>]) -> Vec<RawEvent> {
    let mut all = Vec::new();
    for source in sources {
        match source.fetch_events().await {
            Ok(mut events) => {
                tracing::info!(source = source.name(), events = events.len(), "source_complete");
                all.append(&mut events);
            }
            Err(e) => {
                tracing::warn!(source = source.name(), error = ?e, "source_failed");
            }
        }
    }
    all
}
