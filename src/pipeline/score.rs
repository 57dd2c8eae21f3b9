// src/pipeline/score.rs
//! Composite scoring: per-narrative feature vector, spam and single-source
//! penalties, weighted composite, and the deterministic rank order.

use crate::config::PipelineConfig;
use crate::event::{Domain, SignalEvent, SourceTag};
use crate::pipeline::cluster::NarrativeCandidate;
use chrono::Duration;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;

const EPSILON: f64 = 1e-9;

/// Feature vector and composite for one narrative. Features are clamped to
/// [0,1]; `contributions` holds the unclamped weighted terms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub velocity: f64,
    pub breadth: f64,
    pub cross_domain: f64,
    pub novelty: f64,
    pub credibility: f64,
    pub spam_penalty: f64,
    pub single_source_penalty: f64,
    pub composite: f64,
    pub contributions: BTreeMap<String, f64>,
}

/// A candidate plus its score, in final rank order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub candidate: NarrativeCandidate,
    pub score: ScoreBreakdown,
}

pub struct Scorer<'a> {
    cfg: &'a PipelineConfig,
}

impl<'a> Scorer<'a> {
    pub fn new(cfg: &'a PipelineConfig) -> Self {
        Self { cfg }
    }

    /// Score every candidate and produce the ranked, filtered, capped list.
    /// Ordering: composite desc, then member count desc, then label asc,
    /// which is a strict total order for identical input.
    pub fn rank(
        &self,
        candidates: Vec<NarrativeCandidate>,
        events_by_id: &HashMap<&str, &SignalEvent>,
        baseline_events: &[SignalEvent],
        baseline_days: f64,
    ) -> Vec<ScoredCandidate> {
        let total = candidates.len();
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|candidate| {
                let score = self.score(&candidate, events_by_id, baseline_events, baseline_days);
                ScoredCandidate { candidate, score }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .composite
                .total_cmp(&a.score.composite)
                .then_with(|| b.candidate.members.len().cmp(&a.candidate.members.len()))
                .then_with(|| a.candidate.label.cmp(&b.candidate.label))
        });
        scored.retain(|s| s.score.composite > self.cfg.analysis.min_composite);
        scored.truncate(self.cfg.analysis.max_narratives);

        info!(
            candidates = total,
            ranked = scored.len(),
            top_score = scored.first().map(|s| s.score.composite).unwrap_or(0.0),
            "narratives_ranked"
        );
        scored
    }

    pub fn score(
        &self,
        candidate: &NarrativeCandidate,
        events_by_id: &HashMap<&str, &SignalEvent>,
        baseline_events: &[SignalEvent],
        baseline_days: f64,
    ) -> ScoreBreakdown {
        let members: Vec<&SignalEvent> = candidate
            .members
            .iter()
            .filter_map(|id| events_by_id.get(id.as_str()).copied())
            .collect();

        let velocity = self.velocity(candidate, &members, baseline_events, baseline_days);
        let breadth = self.breadth(&members);
        let cross_domain = self.cross_domain(&members);
        let novelty = self.novelty(candidate, baseline_events);
        let credibility = self.credibility(&members);
        let spam_penalty = spam_penalty(&members);
        let single_source_penalty = single_source_penalty(&members);

        let w = &self.cfg.weights;
        let p = &self.cfg.penalties;
        let mut contributions = BTreeMap::new();
        contributions.insert("velocity".to_string(), w.velocity * velocity);
        contributions.insert("breadth".to_string(), w.breadth * breadth);
        contributions.insert("cross_domain".to_string(), w.cross * cross_domain);
        contributions.insert("novelty".to_string(), w.novelty * novelty);
        contributions.insert("credibility".to_string(), w.credibility * credibility);
        contributions.insert("spam_penalty".to_string(), -p.spam * spam_penalty);
        contributions.insert(
            "single_source_penalty".to_string(),
            -p.single_source * single_source_penalty,
        );

        let composite = contributions.values().sum::<f64>().clamp(0.0, 1.0);

        ScoreBreakdown {
            velocity,
            breadth,
            cross_domain,
            novelty,
            credibility,
            spam_penalty,
            single_source_penalty,
            composite,
            contributions,
        }
    }

    /// Rate in window vs. rate of entity-overlapping baseline events,
    /// log-mapped so `a_max`x acceleration saturates at 1.0.
    fn velocity(
        &self,
        candidate: &NarrativeCandidate,
        members: &[&SignalEvent],
        baseline_events: &[SignalEvent],
        baseline_days: f64,
    ) -> f64 {
        let window_rate = members.len() as f64 / candidate.window.days();
        let overlapping = baseline_events
            .iter()
            .filter(|e| e.entities.iter().any(|ent| candidate.entities.contains(ent)))
            .count();
        let baseline_rate = overlapping as f64 / baseline_days.max(1.0);

        if baseline_rate == 0.0 {
            return if window_rate > 0.0 { 1.0 } else { 0.0 };
        }
        let acceleration = window_rate / baseline_rate.max(EPSILON);
        ((1.0 + acceleration).ln() / (1.0 + self.cfg.scoring.a_max).ln()).clamp(0.0, 1.0)
    }

    /// Mixture of entity, source, and author diversity within members.
    fn breadth(&self, members: &[&SignalEvent]) -> f64 {
        let mut entities: BTreeSet<&str> = BTreeSet::new();
        let mut sources: BTreeSet<SourceTag> = BTreeSet::new();
        let mut authors: BTreeSet<&str> = BTreeSet::new();
        for ev in members {
            entities.extend(ev.entities.iter().map(String::as_str));
            sources.insert(ev.source);
            if let Some(a) = &ev.author {
                authors.insert(a.as_str());
            }
        }
        let d = &self.cfg.scoring.diversity;
        let entity_diversity = (entities.len() as f64 / d.entities).min(1.0);
        let source_diversity = (sources.len() as f64 / d.sources).min(1.0);
        let author_diversity = (authors.len() as f64 / d.authors).min(1.0);
        entity_diversity * 0.40 + source_diversity * 0.30 + author_diversity * 0.30
    }

    /// Zero without both domains; otherwise balance mixed with offchain
    /// subtype spread.
    fn cross_domain(&self, members: &[&SignalEvent]) -> f64 {
        let n_on = members.iter().filter(|e| e.domain == Domain::Onchain).count();
        let n_off = members.len() - n_on;
        if n_on == 0 || n_off == 0 {
            return 0.0;
        }
        let balance = 2.0 * n_on.min(n_off) as f64 / (n_on + n_off) as f64;
        let offchain_tags: BTreeSet<SourceTag> = members
            .iter()
            .filter(|e| e.domain == Domain::Offchain)
            .map(|e| e.source)
            .collect();
        let spread = (offchain_tags.len() as f64 / 3.0).min(1.0);
        0.7 * balance + 0.3 * spread
    }

    /// Fraction of the narrative's entities absent from the baseline,
    /// floored so long-standing narratives don't collapse to zero.
    fn novelty(&self, candidate: &NarrativeCandidate, baseline_events: &[SignalEvent]) -> f64 {
        let floor = self.cfg.scoring.novelty_floor;
        if candidate.entities.is_empty() {
            return floor;
        }
        let baseline_entities: BTreeSet<&str> = baseline_events
            .iter()
            .flat_map(|e| e.entities.iter().map(String::as_str))
            .collect();
        let new = candidate
            .entities
            .iter()
            .filter(|e| !baseline_entities.contains(e.as_str()))
            .count();
        let ratio = new as f64 / candidate.entities.len() as f64;
        ratio.max(floor).min(1.0)
    }

    /// Mean of per-event source credibility priors.
    fn credibility(&self, members: &[&SignalEvent]) -> f64 {
        if members.is_empty() {
            return 0.0;
        }
        let priors = &self.cfg.credibility.source_priors;
        let sum: f64 = members
            .iter()
            .map(|ev| match ev.source {
                SourceTag::TxActivity | SourceTag::ProgramDeploy | SourceTag::TokenActivity => {
                    priors.onchain
                }
                SourceTag::Twitter => {
                    let followers = ev
                        .metrics
                        .get("author_followers")
                        .or_else(|| ev.metrics.get("followers"))
                        .copied()
                        .unwrap_or(0.0);
                    if followers >= priors.twitter_follower_threshold {
                        priors.twitter_high_reach
                    } else {
                        priors.twitter_default
                    }
                }
                SourceTag::RssBlog => {
                    let official = ev.author.as_deref().is_some_and(|a| {
                        self.cfg
                            .credibility
                            .official_blogs
                            .iter()
                            .any(|o| o.eq_ignore_ascii_case(a))
                    });
                    if official {
                        priors.blog_official
                    } else {
                        priors.blog_default
                    }
                }
                SourceTag::Github => {
                    let allowlisted = ev
                        .url
                        .as_deref()
                        .and_then(url_host)
                        .is_some_and(|host| {
                            self.cfg
                                .credibility
                                .url_allowlist
                                .iter()
                                .any(|d| d.eq_ignore_ascii_case(&host))
                        });
                    if allowlisted {
                        (priors.github + priors.github_allowlist_bonus).min(1.0)
                    } else {
                        priors.github
                    }
                }
            })
            .sum();
        (sum / members.len() as f64).clamp(0.0, 1.0)
    }
}

/// Max of the burst and author-dominance detectors.
fn spam_penalty(members: &[&SignalEvent]) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    let n = members.len() as f64;

    // Burst: densest 1-hour window as a fraction of all members.
    let mut timestamps: Vec<_> = members.iter().map(|e| e.timestamp).collect();
    timestamps.sort_unstable();
    let hour = Duration::hours(1);
    let mut burst: f64 = 0.0;
    for (i, start) in timestamps.iter().enumerate() {
        let in_window = timestamps[i..].iter().take_while(|t| **t - *start <= hour).count();
        burst = burst.max(in_window as f64 / n);
    }
    let burst_penalty = if burst > 0.5 { ((burst - 0.5) * 2.0).clamp(0.0, 1.0) } else { 0.0 };

    // Author dominance.
    let mut by_author: BTreeMap<&str, usize> = BTreeMap::new();
    for ev in members {
        if let Some(a) = &ev.author {
            *by_author.entry(a.as_str()).or_insert(0) += 1;
        }
    }
    let max_share = by_author.values().copied().max().unwrap_or(0) as f64 / n;
    let author_penalty =
        if max_share > 0.6 { ((max_share - 0.6) * 2.5).clamp(0.0, 1.0) } else { 0.0 };

    burst_penalty.max(author_penalty)
}

/// Penalty when one source tag dominates the membership.
fn single_source_penalty(members: &[&SignalEvent]) -> f64 {
    if members.is_empty() {
        return 0.0;
    }
    let mut by_source: BTreeMap<SourceTag, usize> = BTreeMap::new();
    for ev in members {
        *by_source.entry(ev.source).or_insert(0) += 1;
    }
    let max_share = by_source.values().copied().max().unwrap_or(0) as f64 / members.len() as f64;
    if max_share > 0.7 {
        ((max_share - 0.7) * (10.0 / 3.0)).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Host part of an http(s) URL, lowercased, without userinfo or port.
fn url_host(url: &str) -> Option<String> {
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn member(
        idx: u32,
        source: SourceTag,
        author: Option<&str>,
        minutes: i64,
    ) -> SignalEvent {
        SignalEvent {
            id: format!("m{idx:03}"),
            source,
            domain: source.domain(),
            timestamp: Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap()
                + Duration::minutes(minutes),
            title: format!("event {idx}"),
            text: String::new(),
            url: None,
            author: author.map(str::to_string),
            entities: BTreeSet::from(["firedancer".to_string()]),
            metrics: Default::default(),
            relevance: 0.5,
            unanchored: false,
        }
    }

    #[test]
    fn burst_penalty_matches_dense_half_hour() {
        // 7 of 10 members inside 30 minutes -> burst 0.7 -> penalty 0.4.
        let mut events = Vec::new();
        for i in 0..7 {
            events.push(member(i, SourceTag::Twitter, None, i as i64 * 4));
        }
        for i in 7..10 {
            events.push(member(i, SourceTag::Twitter, None, (i as i64 - 6) * 60 * 24));
        }
        let refs: Vec<&SignalEvent> = events.iter().collect();
        let p = spam_penalty(&refs);
        assert!(p >= 0.4 - 1e-9, "expected >= 0.4, got {p}");
    }

    #[test]
    fn no_burst_penalty_when_spread_out() {
        let events: Vec<SignalEvent> = (0..10)
            .map(|i| member(i, SourceTag::Twitter, None, i as i64 * 60 * 24 * 14 / 10))
            .collect();
        let refs: Vec<&SignalEvent> = events.iter().collect();
        assert_eq!(spam_penalty(&refs), 0.0);
    }

    #[test]
    fn author_dominance_penalty() {
        // 8 of 10 members by one author: share 0.8 -> (0.8-0.6)*2.5 = 0.5.
        let mut events = Vec::new();
        for i in 0..8 {
            events.push(member(i, SourceTag::Twitter, Some("whale"), i as i64 * 60 * 24));
        }
        events.push(member(8, SourceTag::Twitter, Some("a"), 8 * 60 * 24));
        events.push(member(9, SourceTag::Twitter, Some("b"), 9 * 60 * 24));
        let refs: Vec<&SignalEvent> = events.iter().collect();
        let p = spam_penalty(&refs);
        assert!((p - 0.5).abs() < 1e-9, "expected 0.5, got {p}");
    }

    #[test]
    fn single_source_penalty_at_eighty_percent() {
        // 8 of 10 from twitter: (0.8-0.7)*(10/3) = 1/3.
        let mut events = Vec::new();
        for i in 0..8 {
            events.push(member(i, SourceTag::Twitter, None, i as i64 * 60 * 24));
        }
        events.push(member(8, SourceTag::Github, None, 8 * 60 * 24));
        events.push(member(9, SourceTag::RssBlog, None, 9 * 60 * 24));
        let refs: Vec<&SignalEvent> = events.iter().collect();
        let p = single_source_penalty(&refs);
        assert!(p >= 1.0 / 3.0 - 1e-9, "expected >= 0.333, got {p}");
    }

    #[test]
    fn url_host_parses_common_shapes() {
        assert_eq!(url_host("https://github.com/org/repo"), Some("github.com".into()));
        assert_eq!(url_host("http://Example.COM:8080/x"), Some("example.com".into()));
        assert_eq!(url_host("ftp://nope"), None);
    }
}
