// tests/scoring_scenarios.rs
// Scorer behavior on hand-built narratives: cross-domain lift, spam and
// single-source penalties, novelty bounds, and the penalty direction rule.

use chrono::{Duration, TimeZone, Utc};
use narrative_radar::pipeline::score::Scorer;
use narrative_radar::pipeline::NarrativeCandidate;
use narrative_radar::{PipelineConfig, SignalEvent, SourceTag, TimeWindow};
use std::collections::{BTreeSet, HashMap};

fn window() -> TimeWindow {
    TimeWindow::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2025, 6, 15, 0, 0, 0).unwrap(),
    )
}

fn event(
    id: &str,
    source: SourceTag,
    hours_in: i64,
    entities: &[&str],
    author: Option<&str>,
) -> SignalEvent {
    SignalEvent {
        id: id.to_string(),
        source,
        domain: source.domain(),
        timestamp: window().start + Duration::hours(hours_in),
        title: format!("event {id}"),
        text: String::new(),
        url: None,
        author: author.map(str::to_string),
        entities: entities.iter().map(|s| s.to_string()).collect(),
        metrics: Default::default(),
        relevance: 0.5,
        unanchored: entities.is_empty(),
    }
}

fn candidate(label: &str, events: &[SignalEvent]) -> NarrativeCandidate {
    let entities: BTreeSet<String> =
        events.iter().flat_map(|e| e.entities.iter().cloned()).collect();
    NarrativeCandidate {
        label: label.to_string(),
        description: String::new(),
        entities,
        keywords: Vec::new(),
        members: events.iter().map(|e| e.id.clone()).collect(),
        window: window(),
    }
}

fn by_id(events: &[SignalEvent]) -> HashMap<&str, &SignalEvent> {
    events.iter().map(|e| (e.id.as_str(), e)).collect()
}

#[test]
fn cross_domain_beats_single_domain() {
    // A: 5 onchain + 5 offchain. B: 10 offchain. Same entities, spread, no
    // penalties. A must rank above B.
    let mut a_events = Vec::new();
    for i in 0..5 {
        a_events.push(event(&format!("a_on{i}"), SourceTag::TxActivity, i * 24, &["firedancer"], None));
    }
    for i in 0..5 {
        a_events.push(event(&format!("a_off{i}"), SourceTag::Twitter, (i + 5) * 24, &["firedancer"], None));
    }
    let mut b_events = Vec::new();
    for i in 0..5 {
        b_events.push(event(&format!("b_tw{i}"), SourceTag::Twitter, i * 24, &["firedancer"], None));
    }
    for i in 0..5 {
        b_events.push(event(&format!("b_gh{i}"), SourceTag::Github, (i + 5) * 24, &["firedancer"], None));
    }

    let all: Vec<SignalEvent> = a_events.iter().chain(b_events.iter()).cloned().collect();
    let cfg = PipelineConfig::default();
    let scorer = Scorer::new(&cfg);
    let lookup = by_id(&all);

    let score_a = scorer.score(&candidate("A", &a_events), &lookup, &[], 42.0);
    let score_b = scorer.score(&candidate("B", &b_events), &lookup, &[], 42.0);

    assert!(score_a.cross_domain > 0.0);
    assert_eq!(score_b.cross_domain, 0.0, "all-offchain narrative must have cross = 0");
    assert!(
        score_a.composite > score_b.composite,
        "cross-domain narrative must outrank: {} vs {}",
        score_a.composite,
        score_b.composite
    );
}

#[test]
fn spam_burst_penalty_fires_on_dense_window() {
    // 7 of 10 members within 30 minutes -> spam_penalty >= 0.4.
    let mut bursty = Vec::new();
    for i in 0..7i64 {
        let mut e = event(&format!("s{i}"), SourceTag::Twitter, 0, &["mev"], None);
        e.timestamp = window().start + Duration::minutes(i * 4);
        bursty.push(e);
    }
    for i in 7..10 {
        bursty.push(event(&format!("s{i}"), SourceTag::Twitter, i * 24, &["mev"], None));
    }
    let cfg = PipelineConfig::default();
    let scorer = Scorer::new(&cfg);
    let lookup = by_id(&bursty);
    let score = scorer.score(&candidate("burst", &bursty), &lookup, &[], 42.0);
    assert!(score.spam_penalty >= 0.4, "got {}", score.spam_penalty);

    // Same 10 members spread uniformly over 14 days -> no penalty.
    let spread: Vec<SignalEvent> = (0..10)
        .map(|i| event(&format!("u{i}"), SourceTag::Twitter, i * 33, &["mev"], None))
        .collect();
    let lookup = by_id(&spread);
    let score = scorer.score(&candidate("spread", &spread), &lookup, &[], 42.0);
    assert_eq!(score.spam_penalty, 0.0);
}

#[test]
fn single_source_dominance_penalty() {
    // 8 of 10 members from twitter -> penalty >= 0.33.
    let mut events = Vec::new();
    for i in 0..8 {
        events.push(event(&format!("tw{i}"), SourceTag::Twitter, i * 24, &["depin"], None));
    }
    events.push(event("gh0", SourceTag::Github, 24 * 11, &["depin"], None));
    events.push(event("bl0", SourceTag::RssBlog, 24 * 12, &["depin"], None));
    let cfg = PipelineConfig::default();
    let scorer = Scorer::new(&cfg);
    let lookup = by_id(&events);
    let score = scorer.score(&candidate("dominated", &events), &lookup, &[], 42.0);
    assert!(score.single_source_penalty >= 0.33, "got {}", score.single_source_penalty);
}

#[test]
fn novelty_spans_floor_to_full() {
    let cfg = PipelineConfig::default();
    let scorer = Scorer::new(&cfg);

    let members: Vec<SignalEvent> = (0..4)
        .map(|i| event(&format!("n{i}"), SourceTag::Twitter, i * 24, &["blinks"], None))
        .collect();
    let lookup = by_id(&members);
    let cand = candidate("novel", &members);

    // Entities entirely absent from baseline -> novelty = 1.0.
    let baseline_other: Vec<SignalEvent> = (0..6)
        .map(|i| event(&format!("b{i}"), SourceTag::Twitter, i, &["mev"], None))
        .collect();
    let s = scorer.score(&cand, &lookup, &baseline_other, 42.0);
    assert_eq!(s.novelty, 1.0);

    // Entities present in every baseline event -> novelty = floor.
    let baseline_same: Vec<SignalEvent> = (0..6)
        .map(|i| event(&format!("c{i}"), SourceTag::Twitter, i, &["blinks"], None))
        .collect();
    let s = scorer.score(&cand, &lookup, &baseline_same, 42.0);
    assert_eq!(s.novelty, cfg.scoring.novelty_floor);
}

#[test]
fn zero_baseline_with_window_activity_saturates_velocity() {
    let members: Vec<SignalEvent> = (0..5)
        .map(|i| event(&format!("v{i}"), SourceTag::Github, i * 24, &["svm"], None))
        .collect();
    let cfg = PipelineConfig::default();
    let scorer = Scorer::new(&cfg);
    let lookup = by_id(&members);
    let s = scorer.score(&candidate("fresh", &members), &lookup, &[], 42.0);
    assert_eq!(s.velocity, 1.0);
}

#[test]
fn higher_penalty_means_lower_score_all_else_equal() {
    // Identical member multiset; only the timestamps are rearranged to
    // trigger the burst detector. Every non-penalty feature is unchanged,
    // so the composite must strictly drop.
    let spread: Vec<SignalEvent> = (0..10)
        .map(|i| event(&format!("p{i}"), SourceTag::Twitter, i * 33, &["payments"], None))
        .collect();
    let mut bursty = spread.clone();
    for (i, e) in bursty.iter_mut().enumerate().take(8) {
        e.timestamp = window().start + Duration::minutes(i as i64 * 5);
    }

    let cfg = PipelineConfig::default();
    let scorer = Scorer::new(&cfg);

    let lookup = by_id(&spread);
    let clean = scorer.score(&candidate("clean", &spread), &lookup, &[], 42.0);
    let lookup = by_id(&bursty);
    let penalized = scorer.score(&candidate("bursty", &bursty), &lookup, &[], 42.0);

    assert_eq!(clean.velocity, penalized.velocity);
    assert_eq!(clean.breadth, penalized.breadth);
    assert_eq!(clean.credibility, penalized.credibility);
    assert!(penalized.spam_penalty > clean.spam_penalty);
    assert!(penalized.composite < clean.composite);
}

#[test]
fn features_and_composite_stay_in_unit_range() {
    let mut events = Vec::new();
    for i in 0..6 {
        events.push(event(&format!("x{i}"), SourceTag::Twitter, i * 4, &["mev", "jito"], Some("same_author")));
    }
    for i in 0..3 {
        events.push(event(&format!("y{i}"), SourceTag::TxActivity, i * 30, &["mev"], None));
    }
    let cfg = PipelineConfig::default();
    let scorer = Scorer::new(&cfg);
    let lookup = by_id(&events);
    let s = scorer.score(&candidate("mixed", &events), &lookup, &[], 42.0);
    for (name, v) in [
        ("velocity", s.velocity),
        ("breadth", s.breadth),
        ("cross_domain", s.cross_domain),
        ("novelty", s.novelty),
        ("credibility", s.credibility),
        ("spam_penalty", s.spam_penalty),
        ("single_source_penalty", s.single_source_penalty),
        ("composite", s.composite),
    ] {
        assert!((0.0..=1.0).contains(&v), "{name} out of range: {v}");
    }
}
