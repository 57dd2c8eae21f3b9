// src/event.rs
//! Core event model: source tags, raw connector records, and the canonical
//! `SignalEvent` the pipeline stages operate on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Closed set of signal sources. Declaration order is the canonical order
/// used wherever a deterministic iteration over tags is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    TxActivity,
    ProgramDeploy,
    TokenActivity,
    Github,
    Twitter,
    RssBlog,
}

/// All tags, in canonical order.
pub const ALL_SOURCE_TAGS: [SourceTag; 6] = [
    SourceTag::TxActivity,
    SourceTag::ProgramDeploy,
    SourceTag::TokenActivity,
    SourceTag::Github,
    SourceTag::Twitter,
    SourceTag::RssBlog,
];

impl SourceTag {
    /// Domain is a pure function of the source tag.
    pub fn domain(self) -> Domain {
        match self {
            SourceTag::TxActivity | SourceTag::ProgramDeploy | SourceTag::TokenActivity => {
                Domain::Onchain
            }
            SourceTag::Github | SourceTag::Twitter | SourceTag::RssBlog => Domain::Offchain,
        }
    }

    /// snake_case name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            SourceTag::TxActivity => "tx_activity",
            SourceTag::ProgramDeploy => "program_deploy",
            SourceTag::TokenActivity => "token_activity",
            SourceTag::Github => "github",
            SourceTag::Twitter => "twitter",
            SourceTag::RssBlog => "rss_blog",
        }
    }

    /// Human-readable label for evidence summaries.
    pub fn display_label(self) -> &'static str {
        match self {
            SourceTag::TxActivity => "Onchain Metrics",
            SourceTag::ProgramDeploy => "Onchain",
            SourceTag::TokenActivity => "Token Data",
            SourceTag::Github => "GitHub",
            SourceTag::Twitter => "X/Twitter",
            SourceTag::RssBlog => "Blog",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Onchain,
    Offchain,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Domain::Onchain => "onchain",
            Domain::Offchain => "offchain",
        })
    }
}

/// Loose record as produced by connectors / snapshot files. Anything beyond
/// `source` may be missing; the normalizer decides what is salvageable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub source: Option<SourceTag>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Connector-supplied entity hints; re-resolved against the alias table.
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Connector-assigned relevance prior in [0,1].
    #[serde(default)]
    pub relevance: Option<f64>,
}

/// Canonical event. Immutable once the normalizer has emitted it; later
/// stages refer to events by `id` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    pub id: String,
    pub source: SourceTag,
    pub domain: Domain,
    pub timestamp: DateTime<Utc>,
    pub title: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Canonical entity names only. Empty iff `unanchored`.
    pub entities: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, f64>,
    pub relevance: f64,
    /// No alias matched; eligible for text-cluster assignment only.
    pub unanchored: bool,
}

impl SignalEvent {
    /// Stable id: first 16 hex chars of sha256 over
    /// `(source, url, title, 5-minute timestamp bucket)`.
    pub fn compute_id(
        source: SourceTag,
        url: Option<&str>,
        title: &str,
        timestamp: DateTime<Utc>,
    ) -> String {
        use sha2::{Digest, Sha256};
        let bucket = timestamp.timestamp().div_euclid(300);
        let mut hasher = Sha256::new();
        hasher.update(source.as_str().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(url.unwrap_or("").as_bytes());
        hasher.update(b"\x1f");
        hasher.update(title.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(bucket.to_le_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(16);
        for b in digest.iter().take(8) {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }
}

/// Closed analysis interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window length in days, floored at one day so rates stay finite.
    pub fn days(&self) -> f64 {
        let secs = (self.end - self.start).num_seconds().max(0) as f64;
        (secs / 86_400.0).max(1.0)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Immutable run context carried through every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub window: TimeWindow,
    pub baseline: TimeWindow,
}

impl RunContext {
    /// Context invariants: baseline ends where the window starts, and the
    /// baseline is at least as long as the window.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.baseline.end != self.window.start {
            anyhow::bail!(
                "run context: baseline must end where the window starts (baseline end {}, window start {})",
                self.baseline.end,
                self.window.start
            );
        }
        if self.baseline.end - self.baseline.start < self.window.end - self.window.start {
            anyhow::bail!("run context: baseline shorter than analysis window");
        }
        Ok(())
    }
}
