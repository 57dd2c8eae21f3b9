// src/pipeline/cluster.rs
//! Candidate construction: entity co-occurrence graph first, then text
//! clustering for the events no entity cluster claimed, then a merge pass.

use crate::config::{AnalysisConfig, ClusteringConfig};
use crate::event::{SignalEvent, TimeWindow};
use crate::pipeline::text::{agglomerative_clusters, content_tokens, title_case, TfidfVectorizer};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::info;

/// A candidate narrative, pre-scoring. Members are event ids ordered by
/// (timestamp, id); the event table stays owned by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrativeCandidate {
    pub label: String,
    pub description: String,
    pub entities: BTreeSet<String>,
    pub keywords: Vec<String>,
    pub members: Vec<String>,
    pub window: TimeWindow,
}

pub struct Clusterer {
    cfg: ClusteringConfig,
    max_candidates: usize,
}

impl Clusterer {
    pub fn new(cfg: ClusteringConfig, analysis: AnalysisConfig) -> Self {
        // A few extra candidates beyond the report cap so scoring has slack.
        Self { cfg, max_candidates: analysis.max_narratives + 5 }
    }

    pub fn generate_candidates(
        &self,
        events: &[SignalEvent],
        window: TimeWindow,
    ) -> Vec<NarrativeCandidate> {
        if events.is_empty() {
            return Vec::new();
        }

        let entity_clusters = self.entity_components(events);

        // Membership by entity intersection.
        let mut claimed: HashSet<usize> = HashSet::new();
        let mut clusters: Vec<(BTreeSet<String>, Vec<usize>)> = Vec::new();
        for component in entity_clusters {
            let mut member_idx = Vec::new();
            for (idx, ev) in events.iter().enumerate() {
                if ev.entities.iter().any(|e| component.contains(e)) {
                    member_idx.push(idx);
                    claimed.insert(idx);
                }
            }
            clusters.push((component, member_idx));
        }

        // Phase 2: text clusters over everything still unclaimed.
        let unclaimed: Vec<usize> =
            (0..events.len()).filter(|i| !claimed.contains(i)).collect();
        let text_clusters = self.text_clusters(events, &unclaimed);

        for assigned in text_clusters {
            let modal = modal_entity_set(events, &assigned);
            let target = if modal.is_empty() {
                None
            } else {
                // Merge into the overlapping entity cluster; ties toward the
                // larger cluster, then the lexicographically first entity.
                clusters
                    .iter()
                    .enumerate()
                    .filter(|(_, (ents, _))| !ents.is_disjoint(&modal))
                    .max_by(|(_, (ea, ma)), (_, (eb, mb))| {
                        ma.len()
                            .cmp(&mb.len())
                            .then_with(|| eb.iter().next().cmp(&ea.iter().next()))
                    })
                    .map(|(i, _)| i)
            };
            match target {
                Some(i) => {
                    let members = &mut clusters[i].1;
                    for idx in assigned {
                        if !members.contains(&idx) {
                            members.push(idx);
                        }
                    }
                }
                None => {
                    let entities: BTreeSet<String> = assigned
                        .iter()
                        .flat_map(|&i| events[i].entities.iter().cloned())
                        .collect();
                    clusters.push((entities, assigned));
                }
            }
        }

        // Drop undersized clusters, enrich, and order deterministically.
        let mut candidates: Vec<NarrativeCandidate> = clusters
            .into_iter()
            .filter(|(_, members)| members.len() >= self.cfg.min_cluster_size)
            .map(|(entities, members)| self.enrich(events, entities, members, window))
            .collect();
        candidates.sort_by(|a, b| {
            b.members
                .len()
                .cmp(&a.members.len())
                .then_with(|| a.label.cmp(&b.label))
        });
        candidates.truncate(self.max_candidates);

        info!(candidates = candidates.len(), "candidates_generated");
        candidates
    }

    /// Phase 1: co-occurrence graph over supported entities, thresholded
    /// edges, connected components. Unconnected supported entities stand
    /// alone as singleton components.
    fn entity_components(&self, events: &[SignalEvent]) -> Vec<BTreeSet<String>> {
        let mut entity_events: BTreeMap<&str, BTreeSet<usize>> = BTreeMap::new();
        for (idx, ev) in events.iter().enumerate() {
            for ent in &ev.entities {
                entity_events.entry(ent).or_default().insert(idx);
            }
        }
        let nodes: Vec<&str> = entity_events
            .iter()
            .filter(|(_, evs)| evs.len() >= self.cfg.min_entity_support)
            .map(|(&e, _)| e)
            .collect();

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for (i, &a) in nodes.iter().enumerate() {
            for &b in nodes.iter().skip(i + 1) {
                let ea = &entity_events[a];
                let eb = &entity_events[b];
                let inter = ea.intersection(eb).count() as f64;
                let weight = inter / ea.len().min(eb.len()) as f64;
                if weight >= self.cfg.edge_threshold {
                    adjacency.entry(a).or_default().push(b);
                    adjacency.entry(b).or_default().push(a);
                }
            }
        }

        // Connected components via DFS, in deterministic node order.
        let mut visited: HashSet<&str> = HashSet::new();
        let mut components = Vec::new();
        for &start in &nodes {
            if visited.contains(start) {
                continue;
            }
            let mut component = BTreeSet::new();
            let mut queue = vec![start];
            while let Some(node) = queue.pop() {
                if !visited.insert(node) {
                    continue;
                }
                component.insert(node.to_string());
                if let Some(neighbors) = adjacency.get(node) {
                    queue.extend(neighbors.iter().filter(|n| !visited.contains(*n)));
                }
            }
            components.push(component);
        }
        components
    }

    /// Phase 2: TF-IDF + average-linkage agglomerative clustering over the
    /// unclaimed events; keeps clusters meeting the text support floor.
    fn text_clusters(&self, events: &[SignalEvent], unclaimed: &[usize]) -> Vec<Vec<usize>> {
        if unclaimed.len() < self.cfg.min_text_support {
            return Vec::new();
        }
        let docs: Vec<String> = unclaimed
            .iter()
            .map(|&i| format!("{} {}", events[i].title, events[i].text))
            .collect();
        let vectors = TfidfVectorizer::default().fit_transform(&docs);
        agglomerative_clusters(&vectors, self.cfg.text_distance)
            .into_iter()
            .filter(|c| c.len() >= self.cfg.min_text_support)
            .map(|c| c.into_iter().map(|local| unclaimed[local]).collect())
            .collect()
    }

    fn enrich(
        &self,
        events: &[SignalEvent],
        entities: BTreeSet<String>,
        mut member_idx: Vec<usize>,
        window: TimeWindow,
    ) -> NarrativeCandidate {
        member_idx.sort_by(|&a, &b| {
            events[a]
                .timestamp
                .cmp(&events[b].timestamp)
                .then_with(|| events[a].id.cmp(&events[b].id))
        });
        member_idx.dedup();

        let keywords = extract_keywords(events, &member_idx);
        let label = make_label(events, &member_idx, &entities, &keywords);
        let description = make_description(events, &member_idx, &entities, &label);
        NarrativeCandidate {
            label,
            description,
            entities,
            keywords,
            members: member_idx.iter().map(|&i| events[i].id.clone()).collect(),
            window,
        }
    }
}

/// The most frequent matched-entity set among the cluster's events; empty
/// sets don't vote. Ties go to the lexicographically smallest set.
fn modal_entity_set(events: &[SignalEvent], member_idx: &[usize]) -> BTreeSet<String> {
    let mut counts: BTreeMap<Vec<String>, usize> = BTreeMap::new();
    for &i in member_idx {
        if events[i].entities.is_empty() {
            continue;
        }
        let key: Vec<String> = events[i].entities.iter().cloned().collect();
        *counts.entry(key).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|(ka, ca), (kb, cb)| ca.cmp(cb).then_with(|| kb.cmp(ka)))
        .map(|(k, _)| k.into_iter().collect())
        .unwrap_or_default()
}

/// Top non-stopword keywords across the cluster's texts.
fn extract_keywords(events: &[SignalEvent], member_idx: &[usize]) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for &i in member_idx {
        for tok in content_tokens(&format!("{} {}", events[i].title, events[i].text)) {
            *counts.entry(tok).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(10).map(|(w, _)| w).collect()
}

/// Label: the two entities with the highest intra-cluster event count,
/// `Title Case & Title Case`; ties break lexicographically.
fn make_label(
    events: &[SignalEvent],
    member_idx: &[usize],
    entities: &BTreeSet<String>,
    keywords: &[String],
) -> String {
    if entities.is_empty() {
        let parts: Vec<String> = keywords.iter().take(3).map(|k| title_case(k)).collect();
        return if parts.is_empty() {
            "Emerging Signal".to_string()
        } else {
            parts.join(" + ")
        };
    }

    let mut counts: Vec<(usize, &String)> = entities
        .iter()
        .map(|ent| {
            let n = member_idx
                .iter()
                .filter(|&&i| events[i].entities.contains(ent))
                .count();
            (n, ent)
        })
        .collect();
    counts.sort_by(|(ca, ea), (cb, eb)| cb.cmp(ca).then_with(|| ea.cmp(eb)));
    counts
        .iter()
        .take(2)
        .map(|(_, e)| title_case(e))
        .collect::<Vec<_>>()
        .join(" & ")
}

fn make_description(
    events: &[SignalEvent],
    member_idx: &[usize],
    entities: &BTreeSet<String>,
    label: &str,
) -> String {
    let mut source_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for &i in member_idx {
        *source_counts.entry(events[i].source.as_str()).or_insert(0) += 1;
    }
    let mut by_count: Vec<(&str, usize)> = source_counts.into_iter().collect();
    by_count.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let source_summary = by_count
        .iter()
        .map(|(s, c)| format!("{s}({c})"))
        .collect::<Vec<_>>()
        .join(", ");

    let around = if entities.is_empty() {
        label.to_string()
    } else {
        entities
            .iter()
            .take(3)
            .map(|e| title_case(e))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "Narrative cluster around {} with {} signal events from sources: {}.",
        around,
        member_idx.len(),
        source_summary
    )
}
