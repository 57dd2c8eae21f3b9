// src/pipeline/explain.rs
//! Explanation stage: evidence ordering, prose, and confidence grading.
//! Nothing here alters scores; it only reads them.

use crate::config::PipelineConfig;
use crate::event::{Domain, SignalEvent, TimeWindow, ALL_SOURCE_TAGS};
use crate::pipeline::cluster::NarrativeCandidate;
use crate::pipeline::score::ScoreBreakdown;
use chrono::Duration;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const MAX_EVIDENCE: usize = 8;

/// One supporting event in the artifact, in presentation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceItem {
    pub event_id: String,
    pub summary: String,
    pub relevance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metric_highlight: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    Low,
    Moderate,
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Confidence {
    pub tier: ConfidenceTier,
    pub value: f64,
}

/// Daily member count, gaps filled with zeros across the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelinePoint {
    pub date: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Explanation {
    pub explanation: String,
    pub why_now: String,
    pub evidence: Vec<EvidenceItem>,
    pub confidence: Confidence,
    pub timeline: Vec<TimelinePoint>,
}

pub struct Explainer<'a> {
    cfg: &'a PipelineConfig,
}

impl<'a> Explainer<'a> {
    pub fn new(cfg: &'a PipelineConfig) -> Self {
        Self { cfg }
    }

    pub fn explain(
        &self,
        candidate: &NarrativeCandidate,
        score: &ScoreBreakdown,
        events_by_id: &HashMap<&str, &SignalEvent>,
    ) -> Explanation {
        let members: Vec<&SignalEvent> = candidate
            .members
            .iter()
            .filter_map(|id| events_by_id.get(id.as_str()).copied())
            .collect();

        Explanation {
            explanation: self.build_explanation(candidate, score, &members),
            why_now: self.build_why_now(score, &members),
            evidence: select_evidence(&members),
            confidence: grade_confidence(&members, score),
            timeline: build_timeline(&members, candidate.window),
        }
    }

    /// What the narrative is, with score-driven clauses.
    fn build_explanation(
        &self,
        candidate: &NarrativeCandidate,
        score: &ScoreBreakdown,
        members: &[&SignalEvent],
    ) -> String {
        let mut source_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for ev in members {
            *source_counts.entry(ev.source.as_str()).or_insert(0) += 1;
        }
        let mut by_count: Vec<(&str, usize)> = source_counts.into_iter().collect();
        by_count.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let source_str = by_count
            .iter()
            .take(3)
            .map(|(s, c)| format!("{} ({c})", s.replace('_', " ")))
            .collect::<Vec<_>>()
            .join(", ");

        let mut out = format!(
            "{} is an emerging narrative centered around {}. Over the analysis window, {} signal events were detected across {}.",
            candidate.label,
            if candidate.entities.is_empty() {
                candidate.keywords.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
            } else {
                candidate.entities.iter().take(5).cloned().collect::<Vec<_>>().join(", ")
            },
            members.len(),
            source_str
        );
        if score.cross_domain > 0.5 {
            out.push_str(
                " The narrative shows strong cross-domain corroboration, appearing in both onchain activity and offchain discourse.",
            );
        }
        if score.velocity > 0.6 {
            out.push_str(
                " Signal velocity is high, indicating rapid acceleration compared to the baseline period.",
            );
        }
        if score.novelty > 0.7 {
            out.push_str(
                " The cluster is relatively novel, suggesting an emerging rather than established trend.",
            );
        }
        out
    }

    /// "Why now" synthesis from feature values. Clauses are whole sentences
    /// so omitting any of them leaves no grammatical artifacts.
    fn build_why_now(&self, score: &ScoreBreakdown, members: &[&SignalEvent]) -> String {
        let mut parts: Vec<String> = Vec::new();

        if score.velocity >= 0.3 {
            parts.push(format!(
                "Signal velocity is at {:.0}% of maximum, indicating clear acceleration over the baseline period.",
                score.velocity * 100.0
            ));
        }

        if score.cross_domain >= 0.3 {
            let n_on = members.iter().filter(|e| e.domain == Domain::Onchain).count();
            let n_off = members.len() - n_on;
            parts.push(format!(
                "Cross-domain corroboration: {n_on} onchain and {n_off} offchain signals align on this narrative."
            ));
        }

        let latest = members
            .iter()
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        if let Some(latest) = latest {
            let snippet = truncate_chars(
                if latest.title.is_empty() { &latest.text } else { &latest.title },
                150,
            );
            let mut clause = format!("Most recent trigger: {snippet}");
            if let Some(url) = &latest.url {
                clause.push_str(&format!(" ({url})"));
            }
            clause.push('.');
            parts.push(clause);
        }

        if score.novelty >= 0.5 {
            parts.push(
                "New entities have entered this cluster recently, suggesting the narrative is still forming."
                    .to_string(),
            );
        }

        let authors: BTreeSet<&str> =
            members.iter().filter_map(|e| e.author.as_deref()).collect();
        let author_diversity =
            (authors.len() as f64 / self.cfg.scoring.diversity.authors).min(1.0);
        if author_diversity >= 0.3 {
            parts.push(format!(
                "{} distinct contributors are driving the signal, suggesting organic growth rather than a single promoter.",
                authors.len()
            ));
        }

        if parts.is_empty() {
            parts.push("Signals are steady across the analysis window.".to_string());
        }
        parts.join(" ")
    }
}

/// Evidence ordering: round-robin over source tags in canonical order,
/// each pass taking the highest-relevance unchosen event of that tag,
/// until the cap or exhaustion.
pub fn select_evidence(members: &[&SignalEvent]) -> Vec<EvidenceItem> {
    let mut by_tag: BTreeMap<_, Vec<&SignalEvent>> = BTreeMap::new();
    for &ev in members {
        by_tag.entry(ev.source).or_default().push(ev);
    }
    // Highest relevance last so we can pop; ties to the lower id for
    // determinism.
    for list in by_tag.values_mut() {
        list.sort_by(|a, b| {
            a.relevance
                .total_cmp(&b.relevance)
                .then_with(|| b.id.cmp(&a.id))
        });
    }

    let cap = MAX_EVIDENCE.min(members.len());
    let mut chosen = Vec::with_capacity(cap);
    while chosen.len() < cap {
        let mut picked_any = false;
        for tag in ALL_SOURCE_TAGS {
            if chosen.len() >= cap {
                break;
            }
            if let Some(list) = by_tag.get_mut(&tag) {
                if let Some(ev) = list.pop() {
                    chosen.push(ev);
                    picked_any = true;
                }
            }
        }
        if !picked_any {
            break;
        }
    }

    chosen
        .into_iter()
        .map(|ev| EvidenceItem {
            event_id: ev.id.clone(),
            summary: summarize(ev),
            relevance: ev.relevance,
            metric_highlight: highlight_metric(ev),
        })
        .collect()
}

fn summarize(ev: &SignalEvent) -> String {
    let body = if ev.title.is_empty() { &ev.text } else { &ev.title };
    format!("[{}] {}", ev.source.display_label(), truncate_chars(body, 200))
}

/// The most notable metrics of an event, rendered for the evidence card.
fn highlight_metric(ev: &SignalEvent) -> Option<String> {
    let mut highlights = Vec::new();
    let get = |k: &str| ev.metrics.get(k).copied().unwrap_or(0.0);
    if get("stars") > 0.0 {
        highlights.push(format!("{:.0} stars", get("stars")));
    }
    if get("forks") > 0.0 {
        highlights.push(format!("{:.0} forks", get("forks")));
    }
    if get("likes") > 0.0 {
        highlights.push(format!("{:.0} likes", get("likes")));
    }
    if get("retweets") > 0.0 {
        highlights.push(format!("{:.0} RTs", get("retweets")));
    }
    if ev.metrics.contains_key("avg_tps") {
        highlights.push(format!("{:.0} TPS", get("avg_tps")));
    }
    if get("balance_sol") > 0.0 {
        highlights.push(format!("{:.2} SOL", get("balance_sol")));
    }
    if highlights.is_empty() {
        None
    } else {
        highlights.truncate(3);
        Some(highlights.join(" | "))
    }
}

/// Confidence on a 0-100 point scale, then bucketed into tiers.
pub fn grade_confidence(members: &[&SignalEvent], score: &ScoreBreakdown) -> Confidence {
    let mut points: i32 = 0;

    points += match members.len() {
        n if n >= 10 => 40,
        n if n >= 5 => 25,
        n if n >= 3 => 10,
        _ => 0,
    };

    let domains: BTreeSet<Domain> = members.iter().map(|e| e.domain).collect();
    if domains.len() == 2 {
        points += 25;
    }

    let tags: BTreeSet<_> = members.iter().map(|e| e.source).collect();
    points += match tags.len() {
        n if n >= 3 => 15,
        2 => 8,
        _ => 0,
    };

    if score.single_source_penalty > 0.0 {
        points -= 30;
    }
    if score.spam_penalty > 0.0 {
        points -= 20;
    }

    let points = points.clamp(0, 100);
    let tier = if points >= 80 {
        ConfidenceTier::Strong
    } else if points >= 55 {
        ConfidenceTier::Moderate
    } else {
        ConfidenceTier::Low
    };
    Confidence { tier, value: points as f64 / 100.0 }
}

/// Per-day member counts across the window, gaps filled.
fn build_timeline(members: &[&SignalEvent], window: TimeWindow) -> Vec<TimelinePoint> {
    let mut daily: BTreeMap<String, usize> = BTreeMap::new();
    for ev in members {
        *daily.entry(ev.timestamp.format("%Y-%m-%d").to_string()).or_insert(0) += 1;
    }
    let mut out = Vec::new();
    let mut day = window.start.date_naive();
    let last = window.end.date_naive();
    while day <= last {
        let key = day.format("%Y-%m-%d").to_string();
        let count = daily.get(&key).copied().unwrap_or(0);
        out.push(TimelinePoint { date: key, count });
        day += Duration::days(1);
    }
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max).collect();
        out.push_str("...");
        out
    }
}
