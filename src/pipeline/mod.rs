// src/pipeline/mod.rs
//! Pipeline orchestration: Normalizer -> Clusterer -> Scorer -> Explainer,
//! applied in order against an immutable `RunContext`.
//!
//! The orchestrator owns the event and narrative tables; stages receive
//! read-only views and return freshly owned values. It performs no I/O:
//! callers hand it a fully materialized raw-event vector.

pub mod cluster;
pub mod explain;
pub mod normalize;
pub mod score;
pub mod text;

pub use cluster::{Clusterer, NarrativeCandidate};
pub use explain::{Confidence, ConfidenceTier, Explainer};
pub use normalize::{AliasMatcher, NormalizeCounters, Normalizer};
pub use score::{ScoreBreakdown, Scorer};

use crate::artifact::{round3, RankedNarrative, RunArtifact, RunCounters, StageTimings, Totals};
use crate::config::PipelineConfig;
use crate::event::{RawEvent, RunContext, SignalEvent};
use anyhow::bail;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// External cancellation signal, checked between stages only.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One-time metrics registration (so series show up for any exporter the
/// embedding process installs).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("radar_events_ingested_total", "Raw events handed to the pipeline.");
        describe_counter!("radar_events_kept_total", "Events kept after normalization + dedup.");
        describe_counter!("radar_events_dropped_total", "Events dropped as malformed or duplicate.");
        describe_counter!("radar_candidates_total", "Narrative candidates produced by clustering.");
        describe_counter!("radar_narratives_ranked_total", "Narratives in the final ranked list.");
        describe_gauge!("radar_last_run_ts", "Unix timestamp of the last pipeline run.");
    });
}

/// Run the full detection pipeline and produce the run artifact.
///
/// Configuration and context violations abort before any stage runs.
/// Per-event problems never fail the run; they are tallied in the
/// artifact's counters.
pub fn run(
    cfg: &PipelineConfig,
    ctx: &RunContext,
    raw_events: Vec<RawEvent>,
    cancel: &CancelFlag,
) -> anyhow::Result<RunArtifact> {
    cfg.validate()?;
    ctx.validate()?;
    ensure_metrics_described();

    info!(
        run_id = %ctx.run_id,
        window_start = %ctx.window.start,
        window_end = %ctx.window.end,
        baseline_start = %ctx.baseline.start,
        events = raw_events.len(),
        "pipeline_start"
    );
    let ingested = raw_events.len();
    counter!("radar_events_ingested_total").increment(ingested as u64);
    let mut timings = StageTimings::default();

    // ---- Normalization + dedup ----
    let started = Instant::now();
    let alias = AliasMatcher::compile(&cfg.aliases)?;
    let normalizer = Normalizer::new(&alias, cfg.dedup);
    let (events, normalize_counters) = normalizer.run(raw_events);
    timings.normalize_ms = started.elapsed().as_millis() as u64;

    // Partition into window and baseline; anything else is ignored but
    // counted.
    let mut window_events: Vec<SignalEvent> = Vec::new();
    let mut baseline_events: Vec<SignalEvent> = Vec::new();
    let mut outside_window = 0usize;
    for ev in events {
        if ctx.window.contains(ev.timestamp) {
            window_events.push(ev);
        } else if ctx.baseline.contains(ev.timestamp) {
            baseline_events.push(ev);
        } else {
            outside_window += 1;
        }
    }
    let after_dedup = window_events.len() + baseline_events.len();
    counter!("radar_events_kept_total").increment(after_dedup as u64);
    counter!("radar_events_dropped_total").increment(
        (normalize_counters.malformed
            + normalize_counters.exact_duplicates
            + normalize_counters.near_duplicates) as u64,
    );

    let counters = RunCounters { normalize: normalize_counters, outside_window };
    let mut source_summary: BTreeMap<String, usize> = BTreeMap::new();
    for ev in &window_events {
        *source_summary.entry(ev.source.as_str().to_string()).or_insert(0) += 1;
    }

    if window_events.is_empty() {
        info!(run_id = %ctx.run_id, "empty_window");
        return Ok(RunArtifact {
            run_id: ctx.run_id.clone(),
            generated_at: ctx.generated_at,
            window: ctx.window,
            baseline: ctx.baseline,
            source_summary,
            totals: Totals { ingested, after_dedup, candidates: 0, ranked: 0 },
            counters,
            timings,
            notes: Some(
                "no events remained in the analysis window after normalization and deduplication"
                    .to_string(),
            ),
            narratives: Vec::new(),
        });
    }

    check_cancel(cancel, "clustering")?;

    // ---- Candidate construction ----
    let started = Instant::now();
    let clusterer = Clusterer::new(cfg.clustering, cfg.analysis);
    let candidates = clusterer.generate_candidates(&window_events, ctx.window);
    timings.cluster_ms = started.elapsed().as_millis() as u64;
    let candidate_count = candidates.len();
    counter!("radar_candidates_total").increment(candidate_count as u64);

    let events_by_id: HashMap<&str, &SignalEvent> =
        window_events.iter().map(|e| (e.id.as_str(), e)).collect();
    for c in &candidates {
        if c.members.is_empty() {
            bail!("clustering produced a candidate with no members (label `{}`)", c.label);
        }
        if let Some(missing) = c.members.iter().find(|id| !events_by_id.contains_key(id.as_str())) {
            bail!(
                "clustering: candidate `{}` references unknown event id `{}`",
                c.label,
                missing
            );
        }
    }

    check_cancel(cancel, "scoring")?;

    // ---- Scoring & ranking ----
    let started = Instant::now();
    let scorer = Scorer::new(cfg);
    let ranked = scorer.rank(candidates, &events_by_id, &baseline_events, ctx.baseline.days());
    timings.score_ms = started.elapsed().as_millis() as u64;
    counter!("radar_narratives_ranked_total").increment(ranked.len() as u64);

    check_cancel(cancel, "explanation")?;

    // ---- Explanation & artifact assembly ----
    let started = Instant::now();
    let explainer = Explainer::new(cfg);
    let mut narratives = Vec::with_capacity(ranked.len());
    for (position, scored) in ranked.into_iter().enumerate() {
        let explanation = explainer.explain(&scored.candidate, &scored.score, &events_by_id);
        narratives.push(assemble_narrative(position + 1, scored, explanation));
    }
    timings.explain_ms = started.elapsed().as_millis() as u64;
    gauge!("radar_last_run_ts").set(ctx.generated_at.timestamp() as f64);

    info!(run_id = %ctx.run_id, narratives = narratives.len(), "pipeline_complete");
    Ok(RunArtifact {
        run_id: ctx.run_id.clone(),
        generated_at: ctx.generated_at,
        window: ctx.window,
        baseline: ctx.baseline,
        source_summary,
        totals: Totals {
            ingested,
            after_dedup,
            candidates: candidate_count,
            ranked: narratives.len(),
        },
        counters,
        timings,
        notes: None,
        narratives,
    })
}

fn check_cancel(cancel: &CancelFlag, next_stage: &str) -> anyhow::Result<()> {
    if cancel.is_cancelled() {
        bail!("run cancelled before {next_stage}");
    }
    Ok(())
}

/// Fold a scored candidate and its explanation into the artifact shape,
/// rounding every float on the way in.
fn assemble_narrative(
    rank: usize,
    scored: score::ScoredCandidate,
    explanation: explain::Explanation,
) -> RankedNarrative {
    let score::ScoredCandidate { candidate, score } = scored;

    let mut features = BTreeMap::new();
    features.insert("velocity".to_string(), round3(score.velocity));
    features.insert("breadth".to_string(), round3(score.breadth));
    features.insert("cross_domain".to_string(), round3(score.cross_domain));
    features.insert("novelty".to_string(), round3(score.novelty));
    features.insert("credibility".to_string(), round3(score.credibility));
    features.insert("spam_penalty".to_string(), round3(score.spam_penalty));
    features.insert(
        "single_source_penalty".to_string(),
        round3(score.single_source_penalty),
    );

    let score_breakdown: BTreeMap<String, f64> =
        score.contributions.iter().map(|(k, v)| (k.clone(), round3(*v))).collect();

    let evidence = explanation
        .evidence
        .into_iter()
        .map(|mut item| {
            item.relevance = round3(item.relevance);
            item
        })
        .collect();

    RankedNarrative {
        rank,
        label: candidate.label,
        description: candidate.description,
        entities: candidate.entities.into_iter().collect(),
        keywords: candidate.keywords,
        window: candidate.window,
        features,
        score: round3(score.composite),
        score_breakdown,
        confidence: Confidence {
            tier: explanation.confidence.tier,
            value: round3(explanation.confidence.value),
        },
        why_now: explanation.why_now,
        explanation: explanation.explanation,
        evidence,
        members: candidate.members,
        timeline: explanation.timeline,
    }
}
