// src/config.rs
//! Typed pipeline configuration loaded from TOML.
//!
//! Every tunable the stages read lives here and is immutable during a run.
//! A partial file works: missing sections fall back to the documented
//! defaults, which are also the values the test suite asserts against.

use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_CONFIG_PATH: &str = "NARRATIVE_CONFIG_PATH";

/// Tolerance for the feature-weight sum check.
const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub weights: FeatureWeights,
    #[serde(default)]
    pub penalties: PenaltyWeights,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub credibility: CredibilityConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    /// Canonical entity -> surface forms (case-insensitive).
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FeatureWeights {
    pub velocity: f64,
    pub breadth: f64,
    pub cross: f64,
    pub novelty: f64,
    pub credibility: f64,
}

impl Default for FeatureWeights {
    fn default() -> Self {
        Self {
            velocity: 0.25,
            breadth: 0.20,
            cross: 0.20,
            novelty: 0.20,
            credibility: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PenaltyWeights {
    pub spam: f64,
    pub single_source: f64,
}

impl Default for PenaltyWeights {
    fn default() -> Self {
        Self {
            spam: 0.10,
            single_source: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ClusteringConfig {
    /// An entity must appear in at least this many events to become a node.
    pub min_entity_support: usize,
    /// Keep co-occurrence edges with weight >= this.
    pub edge_threshold: f64,
    /// Agglomerative cut distance for text clustering (cosine distance).
    pub text_distance: f64,
    /// Minimum size for a text cluster to become a candidate.
    pub min_text_support: usize,
    /// Candidates below this many members are dropped.
    pub min_cluster_size: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_entity_support: 2,
            edge_threshold: 0.30,
            text_distance: 0.55,
            min_text_support: 3,
            min_cluster_size: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ScoringConfig {
    /// Acceleration at which velocity saturates.
    pub a_max: f64,
    #[serde(default)]
    pub diversity: DiversityDenominators,
    /// Lower bound for the novelty feature.
    pub novelty_floor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            a_max: 10.0,
            diversity: DiversityDenominators::default(),
            novelty_floor: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DiversityDenominators {
    pub entities: f64,
    pub sources: f64,
    pub authors: f64,
}

impl Default for DiversityDenominators {
    fn default() -> Self {
        Self {
            entities: 8.0,
            sources: 5.0,
            authors: 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredibilityConfig {
    #[serde(default)]
    pub source_priors: SourcePriors,
    /// Publishers treated as official blogs.
    #[serde(default)]
    pub official_blogs: Vec<String>,
    /// URL hosts that grant the github bonus.
    #[serde(default)]
    pub url_allowlist: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SourcePriors {
    pub onchain: f64,
    pub twitter_high_reach: f64,
    pub twitter_default: f64,
    pub twitter_follower_threshold: f64,
    pub blog_official: f64,
    pub blog_default: f64,
    pub github: f64,
    pub github_allowlist_bonus: f64,
}

impl Default for SourcePriors {
    fn default() -> Self {
        Self {
            onchain: 0.90,
            twitter_high_reach: 0.85,
            twitter_default: 0.55,
            twitter_follower_threshold: 10_000.0,
            blog_official: 0.75,
            blog_default: 0.60,
            github: 0.70,
            github_allowlist_bonus: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DedupConfig {
    /// Timestamp bucket for the exact-dedup key, in minutes.
    pub bucket_minutes: i64,
    /// Jaccard similarity at or above which a title is a near-duplicate.
    pub near_sim_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            bucket_minutes: 5,
            near_sim_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AnalysisConfig {
    /// Analysis window length in days (binary entrypoint only).
    pub window_days: i64,
    /// Baseline length in days; default is 3x the window.
    pub baseline_days: i64,
    /// Ranked list cap.
    pub max_narratives: usize,
    /// Narratives scoring below this composite are not reported.
    pub min_composite: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            window_days: 14,
            baseline_days: 42,
            max_narratives: 10,
            min_composite: 0.05,
        }
    }
}

impl PipelineConfig {
    /// Load from the path in `NARRATIVE_CONFIG_PATH`, or the default path.
    /// A missing file yields the built-in defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        if !path.exists() {
            let cfg = Self::default();
            cfg.validate()?;
            return Ok(cfg);
        }
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read pipeline config at {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        let cfg: PipelineConfig = toml::from_str(toml_str).context("invalid pipeline config")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject invalid configuration before any stage runs.
    pub fn validate(&self) -> anyhow::Result<()> {
        let w = &self.weights;
        for (name, v) in [
            ("weights.velocity", w.velocity),
            ("weights.breadth", w.breadth),
            ("weights.cross", w.cross),
            ("weights.novelty", w.novelty),
            ("weights.credibility", w.credibility),
            ("penalties.spam", self.penalties.spam),
            ("penalties.single_source", self.penalties.single_source),
        ] {
            if !v.is_finite() || v < 0.0 {
                bail!("config: `{name}` must be a non-negative number, got {v}");
            }
        }
        let sum = w.velocity + w.breadth + w.cross + w.novelty + w.credibility;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            bail!("config: feature weights must sum to 1.0 (got {sum:.4})");
        }

        let c = &self.clustering;
        if c.min_cluster_size == 0 || c.min_entity_support == 0 || c.min_text_support == 0 {
            bail!("config: clustering supports and cluster size must be >= 1");
        }
        if !(0.0..=1.0).contains(&c.edge_threshold) {
            bail!("config: `clustering.edge_threshold` must be in [0,1], got {}", c.edge_threshold);
        }
        if !(0.0..=1.0).contains(&c.text_distance) {
            bail!("config: `clustering.text_distance` must be in [0,1], got {}", c.text_distance);
        }

        let s = &self.scoring;
        if !(s.a_max > 0.0) {
            bail!("config: `scoring.a_max` must be > 0, got {}", s.a_max);
        }
        if !(0.0..=1.0).contains(&s.novelty_floor) {
            bail!("config: `scoring.novelty_floor` must be in [0,1], got {}", s.novelty_floor);
        }
        for (name, v) in [
            ("scoring.diversity.entities", s.diversity.entities),
            ("scoring.diversity.sources", s.diversity.sources),
            ("scoring.diversity.authors", s.diversity.authors),
        ] {
            if !(v >= 1.0) {
                bail!("config: `{name}` must be >= 1, got {v}");
            }
        }

        if self.dedup.bucket_minutes <= 0 {
            bail!("config: `dedup.bucket_minutes` must be > 0, got {}", self.dedup.bucket_minutes);
        }
        if !(0.0..=1.0).contains(&self.dedup.near_sim_threshold) {
            bail!(
                "config: `dedup.near_sim_threshold` must be in [0,1], got {}",
                self.dedup.near_sim_threshold
            );
        }

        let a = &self.analysis;
        if a.window_days <= 0 || a.baseline_days < a.window_days {
            bail!("config: analysis windows must satisfy 0 < window_days <= baseline_days");
        }
        if a.max_narratives == 0 {
            bail!("config: `analysis.max_narratives` must be >= 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().expect("defaults must validate");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
[clustering]
min_entity_support = 3
edge_threshold = 0.4
text_distance = 0.5
min_text_support = 4
min_cluster_size = 5

[aliases]
firedancer = ["firedancer", "fd client"]
"#,
        )
        .expect("partial config loads");
        assert_eq!(cfg.clustering.min_cluster_size, 5);
        assert!((cfg.weights.velocity - 0.25).abs() < 1e-9);
        assert_eq!(cfg.aliases["firedancer"].len(), 2);
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let err = PipelineConfig::from_toml_str(
            r#"
[weights]
velocity = 0.9
breadth = 0.9
cross = 0.2
novelty = 0.2
credibility = 0.15
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"), "got: {err}");
    }

    #[test]
    fn rejects_negative_threshold() {
        let err = PipelineConfig::from_toml_str(
            r#"
[scoring]
a_max = -3.0
novelty_floor = 0.2
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("a_max"), "got: {err}");
    }
}
