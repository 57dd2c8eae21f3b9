// src/pipeline/normalize.rs
//! Normalization + deduplication stage.
//!
//! Turns loose connector records into canonical `SignalEvent`s: cleans the
//! textual payloads, resolves entities against the alias table, drops
//! malformed records, and removes exact and near-duplicate events.

use crate::config::DedupConfig;
use crate::event::{RawEvent, SignalEvent};
use crate::pipeline::text::token_set_similarity;
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::info;

/// Near-duplicate comparison looks back this far within one source.
const NEAR_DUP_WINDOW_HOURS: i64 = 6;

/// Per-stage tallies, aggregated into the run artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeCounters {
    pub ingested: usize,
    pub malformed: usize,
    pub exact_duplicates: usize,
    pub near_duplicates: usize,
    pub unanchored: usize,
}

/// Compiled alias table: one case-insensitive word-boundary pattern per
/// canonical entity, plus a surface-form lookup for connector hints.
pub struct AliasMatcher {
    patterns: Vec<(String, Regex)>,
    surface_to_canonical: HashMap<String, String>,
}

impl AliasMatcher {
    pub fn compile(aliases: &BTreeMap<String, Vec<String>>) -> anyhow::Result<Self> {
        let mut patterns = Vec::with_capacity(aliases.len());
        let mut surface_to_canonical = HashMap::new();

        for (canonical, surface_forms) in aliases {
            let canonical = canonical.trim().to_lowercase();
            if canonical.is_empty() {
                continue;
            }
            let mut forms: BTreeSet<String> = surface_forms
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            forms.insert(canonical.clone());

            for form in &forms {
                surface_to_canonical.insert(form.clone(), canonical.clone());
            }

            let alternation = forms
                .iter()
                .map(|f| regex::escape(f))
                .collect::<Vec<_>>()
                .join("|");
            let re = Regex::new(&format!(r"(?i)\b(?:{alternation})\b"))
                .with_context(|| format!("alias pattern for `{canonical}`"))?;
            patterns.push((canonical, re));
        }

        Ok(Self { patterns, surface_to_canonical })
    }

    /// Canonical entities matched anywhere in `haystack`.
    pub fn scan(&self, haystack: &str) -> BTreeSet<String> {
        self.patterns
            .iter()
            .filter(|(_, re)| re.is_match(haystack))
            .map(|(canonical, _)| canonical.clone())
            .collect()
    }

    /// Resolve a connector-supplied entity hint; unknown hints are dropped
    /// so `entities` only ever holds curated canonical names.
    pub fn resolve_hint(&self, hint: &str) -> Option<String> {
        self.surface_to_canonical.get(&hint.trim().to_lowercase()).cloned()
    }
}

/// Character cap per textual payload; blog bodies can run long and
/// everything downstream (alias scan, TF-IDF, snippets) only needs the
/// head of the text.
const TEXT_CAP: usize = 2000;

/// Clean a textual payload from feed or API content in one pass over the
/// entity-decoded characters: skip markup, fold typographic quotes to
/// ASCII, collapse whitespace runs, and stop at the cap.
///
/// A `<` only opens markup when followed by a letter or `/`, so prose like
/// "a < b" survives intact.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let mut out = String::with_capacity(decoded.len().min(TEXT_CAP));
    let mut kept = 0usize;
    let mut in_markup = false;
    let mut pending_space = false;

    let mut chars = decoded.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_markup {
            in_markup = ch != '>';
            continue;
        }
        if ch == '<' && chars.peek().is_some_and(|c| c.is_ascii_alphabetic() || *c == '/') {
            in_markup = true;
            continue;
        }
        let ch = match ch {
            '\u{201C}' | '\u{201D}' | '\u{00AB}' | '\u{00BB}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        };
        if ch.is_whitespace() {
            // Collapse runs; a leading run is dropped entirely, and a
            // trailing run never gets flushed, so the result is trimmed.
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            kept += 1;
            pending_space = false;
        }
        out.push(ch);
        kept += 1;
        if kept >= TEXT_CAP {
            break;
        }
    }
    out
}

pub struct Normalizer<'a> {
    alias: &'a AliasMatcher,
    dedup: DedupConfig,
}

impl<'a> Normalizer<'a> {
    pub fn new(alias: &'a AliasMatcher, dedup: DedupConfig) -> Self {
        Self { alias, dedup }
    }

    /// Full stage: canonicalize, drop malformed, exact dedup, near dedup.
    /// Output is sorted by (timestamp, id) and immutable from here on.
    pub fn run(&self, raw_events: Vec<RawEvent>) -> (Vec<SignalEvent>, NormalizeCounters) {
        let mut counters = NormalizeCounters { ingested: raw_events.len(), ..Default::default() };

        // Canonicalize; malformed records are dropped, never fatal.
        let mut events = Vec::with_capacity(raw_events.len());
        for raw in raw_events {
            match self.canonicalize(raw) {
                Some(ev) => events.push(ev),
                None => counters.malformed += 1,
            }
        }

        // Exact dedup: first occurrence wins.
        let mut seen_keys: HashSet<[u8; 32]> = HashSet::with_capacity(events.len());
        let mut kept = Vec::with_capacity(events.len());
        for ev in events {
            if seen_keys.insert(self.exact_key(&ev)) {
                kept.push(ev);
            } else {
                counters.exact_duplicates += 1;
            }
        }

        // Near dedup runs in timestamp order over a per-source ring buffer
        // of retained titles with time-based eviction.
        kept.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        let horizon = Duration::hours(NEAR_DUP_WINDOW_HOURS);
        let mut recent: HashMap<crate::event::SourceTag, VecDeque<(DateTime<Utc>, String)>> =
            HashMap::new();
        let mut deduped = Vec::with_capacity(kept.len());
        for ev in kept {
            let window = recent.entry(ev.source).or_default();
            while let Some((ts, _)) = window.front() {
                if ev.timestamp - *ts > horizon {
                    window.pop_front();
                } else {
                    break;
                }
            }
            let is_dup = window
                .iter()
                .any(|(_, title)| token_set_similarity(title, &ev.title) >= self.dedup.near_sim_threshold);
            if is_dup {
                counters.near_duplicates += 1;
                continue;
            }
            window.push_back((ev.timestamp, ev.title.clone()));
            deduped.push(ev);
        }

        counters.unanchored = deduped.iter().filter(|e| e.unanchored).count();
        info!(
            ingested = counters.ingested,
            malformed = counters.malformed,
            exact_duplicates = counters.exact_duplicates,
            near_duplicates = counters.near_duplicates,
            kept = deduped.len(),
            "normalization_complete"
        );
        (deduped, counters)
    }

    /// One raw record -> canonical event, or `None` when malformed.
    fn canonicalize(&self, raw: RawEvent) -> Option<SignalEvent> {
        let source = raw.source?;
        let timestamp = raw.timestamp?;
        let title = normalize_text(&raw.title);
        let text = normalize_text(&raw.text);
        if title.is_empty() && text.is_empty() {
            return None;
        }

        let haystack = format!("{title} {text}");
        let mut entities = self.alias.scan(&haystack);
        for hint in &raw.entities {
            if let Some(canonical) = self.alias.resolve_hint(hint) {
                entities.insert(canonical);
            }
        }
        let unanchored = entities.is_empty();

        let url = raw.url.filter(|u| !u.trim().is_empty());
        let id = SignalEvent::compute_id(source, url.as_deref(), &title, timestamp);

        Some(SignalEvent {
            id,
            source,
            domain: source.domain(),
            timestamp,
            title,
            text,
            url,
            author: raw.author.filter(|a| !a.trim().is_empty()),
            entities,
            metrics: raw.metrics,
            relevance: raw.relevance.unwrap_or(0.5).clamp(0.0, 1.0),
            unanchored,
        })
    }

    /// Exact-dedup key: sha256 over normalized lowercase title, url, and the
    /// configured timestamp bucket.
    fn exact_key(&self, ev: &SignalEvent) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let bucket = ev.timestamp.timestamp().div_euclid(self.dedup.bucket_minutes * 60);
        let mut hasher = Sha256::new();
        hasher.update(ev.title.to_lowercase().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(ev.url.as_deref().unwrap_or("").as_bytes());
        hasher.update(b"\x1f");
        hasher.update(bucket.to_le_bytes());
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::SourceTag;
    use chrono::TimeZone;

    fn aliases() -> BTreeMap<String, Vec<String>> {
        let mut m = BTreeMap::new();
        m.insert("firedancer".to_string(), vec!["fd client".to_string()]);
        m.insert("jump-crypto".to_string(), vec!["jump crypto".to_string(), "jump".to_string()]);
        m
    }

    fn raw(source: SourceTag, ts_min: u32, title: &str) -> RawEvent {
        RawEvent {
            source: Some(source),
            timestamp: Some(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap() + Duration::minutes(ts_min as i64)),
            title: title.to_string(),
            text: String::new(),
            ..Default::default()
        }
    }

    fn normalizer_fixture(alias: &AliasMatcher) -> Normalizer<'_> {
        Normalizer::new(alias, DedupConfig::default())
    }

    #[test]
    fn alias_scan_matches_word_boundaries_case_insensitively() {
        let alias = AliasMatcher::compile(&aliases()).unwrap();
        let found = alias.scan("Jump Crypto demos the FD Client at Breakpoint");
        assert!(found.contains("firedancer"));
        assert!(found.contains("jump-crypto"));
        // No substring match inside a longer word.
        assert!(alias.scan("jumpy text").is_empty());
    }

    #[test]
    fn unknown_entity_hints_are_dropped() {
        let alias = AliasMatcher::compile(&aliases()).unwrap();
        let n = normalizer_fixture(&alias);
        let mut r = raw(SourceTag::Github, 0, "unrelated repo activity");
        r.entities = vec!["Jump".to_string(), "totally-unknown".to_string()];
        let (events, _) = n.run(vec![r]);
        let e: Vec<_> = events[0].entities.iter().cloned().collect();
        assert_eq!(e, vec!["jump-crypto"]);
    }

    #[test]
    fn malformed_events_are_counted_not_fatal() {
        let alias = AliasMatcher::compile(&aliases()).unwrap();
        let n = normalizer_fixture(&alias);
        let missing_ts = RawEvent {
            source: Some(SourceTag::Twitter),
            title: "has no timestamp".into(),
            ..Default::default()
        };
        let empty_text = raw(SourceTag::Twitter, 0, "   ");
        let ok = raw(SourceTag::Twitter, 1, "Firedancer update");
        let (events, counters) = n.run(vec![missing_ts, empty_text, ok]);
        assert_eq!(events.len(), 1);
        assert_eq!(counters.malformed, 2);
        assert_eq!(counters.ingested, 3);
    }

    #[test]
    fn near_duplicates_within_source_window_collapse() {
        let alias = AliasMatcher::compile(&aliases()).unwrap();
        let n = normalizer_fixture(&alias);
        let a = raw(SourceTag::RssBlog, 0, "Foo ships v1.0 on mainnet");
        let b = raw(SourceTag::RssBlog, 1, "Foo ships v1.0 on mainnet!");
        let (events, counters) = n.run(vec![a, b]);
        assert_eq!(events.len(), 1);
        assert_eq!(counters.near_duplicates, 1);
    }

    #[test]
    fn near_duplicates_across_sources_are_kept() {
        let alias = AliasMatcher::compile(&aliases()).unwrap();
        let n = normalizer_fixture(&alias);
        let a = raw(SourceTag::RssBlog, 0, "Foo ships v1.0 on mainnet");
        let b = raw(SourceTag::Twitter, 1, "Foo ships v1.0 on mainnet");
        let (events, counters) = n.run(vec![a, b]);
        assert_eq!(events.len(), 2);
        assert_eq!(counters.near_duplicates, 0);
    }

    #[test]
    fn normalizer_is_idempotent() {
        let alias = AliasMatcher::compile(&aliases()).unwrap();
        let n = normalizer_fixture(&alias);
        let inputs = vec![
            raw(SourceTag::Twitter, 0, "Firedancer testnet milestone"),
            raw(SourceTag::Twitter, 2, "Firedancer testnet milestone"),
            raw(SourceTag::Github, 5, "fd client release notes"),
        ];
        let (once, _) = n.run(inputs);
        let reraw: Vec<RawEvent> = once
            .iter()
            .map(|e| RawEvent {
                source: Some(e.source),
                timestamp: Some(e.timestamp),
                title: e.title.clone(),
                text: e.text.clone(),
                url: e.url.clone(),
                author: e.author.clone(),
                entities: e.entities.iter().cloned().collect(),
                metrics: e.metrics.clone(),
                relevance: Some(e.relevance),
            })
            .collect();
        let (twice, counters) = n.run(reraw);
        assert_eq!(once, twice);
        assert_eq!(counters.exact_duplicates, 0);
        assert_eq!(counters.near_duplicates, 0);
    }
}
