//! # Narrative Radar — Binary Entrypoint
//! Batch run: load configuration, collect events from snapshot sources,
//! run the detection pipeline, and write the JSON run artifact.
//!
//! The window ends "now" (or at `NARRATIVE_WINDOW_END`, RFC 3339, for
//! reproducible runs); window and baseline lengths come from the config.

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use narrative_radar::pipeline::CancelFlag;
use narrative_radar::sources::{collect_events, EventSource, SnapshotSource};
use narrative_radar::{pipeline, PipelineConfig, RunContext, TimeWindow};
use std::path::Path;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = PipelineConfig::load()?;

    let window_end = match std::env::var("NARRATIVE_WINDOW_END") {
        Ok(raw) => DateTime::parse_from_rfc3339(&raw)
            .context("NARRATIVE_WINDOW_END must be RFC 3339")?
            .with_timezone(&Utc),
        Err(_) => Utc::now(),
    };
    let window_start = window_end - Duration::days(cfg.analysis.window_days);
    let baseline_start = window_start - Duration::days(cfg.analysis.baseline_days);
    let ctx = RunContext {
        run_id: format!("run_{}", window_end.format("%Y%m%d%H%M%S")),
        generated_at: window_end,
        window: TimeWindow::new(window_start, window_end),
        baseline: TimeWindow::new(baseline_start, window_start),
    };

    let sources: Vec<Box<dyn EventSource>> =
        vec![Box::new(SnapshotSource::new(snapshot_dir()))];
    let raw_events = collect_events(&sources).await;
    info!(events = raw_events.len(), run_id = %ctx.run_id, "events_collected");

    let artifact = pipeline::run(&cfg, &ctx, raw_events, &CancelFlag::new())?;

    let reports_dir = Path::new("reports");
    std::fs::create_dir_all(reports_dir).context("creating reports directory")?;
    let out_path = reports_dir.join(format!("{}.json", artifact.run_id));
    std::fs::write(&out_path, artifact.to_json_string()?)
        .with_context(|| format!("writing {}", out_path.display()))?;

    info!(
        path = %out_path.display(),
        narratives = artifact.narratives.len(),
        "artifact_written"
    );
    for n in &artifact.narratives {
        println!(
            "#{}: {} (score {:.3}, confidence {:?})",
            n.rank, n.label, n.score, n.confidence.tier
        );
    }
    Ok(())
}

fn snapshot_dir() -> String {
    std::env::var("NARRATIVE_SNAPSHOT_DIR")
        .unwrap_or_else(|_| narrative_radar::sources::snapshot::DEFAULT_SNAPSHOT_DIR.to_string())
}
