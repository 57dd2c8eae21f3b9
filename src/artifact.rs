// src/artifact.rs
//! Run artifact: the single deterministic output value of a pipeline
//! execution, plus its stable JSON encoding.
//!
//! Stability contract: field order is struct order, every float is rounded
//! to 3 fractional digits before encoding, and narratives appear in rank
//! order. Re-running on identical input must re-encode byte-identically.

use crate::event::TimeWindow;
use crate::pipeline::explain::{Confidence, EvidenceItem, TimelinePoint};
use crate::pipeline::normalize::NormalizeCounters;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Round to 3 fractional digits; applied to every float before it enters
/// the artifact.
pub fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub ingested: usize,
    pub after_dedup: usize,
    pub candidates: usize,
    pub ranked: usize,
}

/// Per-stage wall-clock timings in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageTimings {
    pub normalize_ms: u64,
    pub cluster_ms: u64,
    pub score_ms: u64,
    pub explain_ms: u64,
}

/// Recoverable-issue tallies aggregated over the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    #[serde(flatten)]
    pub normalize: NormalizeCounters,
    /// Normalized events falling outside both window and baseline.
    pub outside_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedNarrative {
    pub rank: usize,
    pub label: String,
    pub description: String,
    pub entities: Vec<String>,
    pub keywords: Vec<String>,
    pub window: TimeWindow,
    /// Named feature scalars in [0,1].
    pub features: BTreeMap<String, f64>,
    pub score: f64,
    /// Named per-feature contributions to the composite (unclamped).
    pub score_breakdown: BTreeMap<String, f64>,
    pub confidence: Confidence,
    pub why_now: String,
    pub explanation: String,
    pub evidence: Vec<EvidenceItem>,
    /// Member event ids, ordered by (timestamp, id).
    pub members: Vec<String>,
    pub timeline: Vec<TimelinePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunArtifact {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub window: TimeWindow,
    pub baseline: TimeWindow,
    /// Window-event counts by source tag.
    pub source_summary: BTreeMap<String, usize>,
    pub totals: Totals,
    pub counters: RunCounters,
    pub timings: StageTimings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub narratives: Vec<RankedNarrative>,
}

impl RunArtifact {
    /// JSON encoding of the artifact, timings included.
    pub fn to_json_string(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Canonical encoding: identical input yields byte-identical output.
    /// Wall-clock stage timings are the one field that varies between
    /// otherwise identical runs, so they are zeroed here.
    pub fn canonical_json(&self) -> anyhow::Result<String> {
        let mut canonical = self.clone();
        canonical.timings = StageTimings::default();
        canonical.to_json_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round3_behaves_at_boundaries() {
        assert_eq!(round3(0.12345), 0.123);
        assert_eq!(round3(0.9996), 1.0);
        assert_eq!(round3(0.0), 0.0);
        assert_eq!(round3(1.0 / 3.0), 0.333);
    }
}
