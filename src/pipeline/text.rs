// src/pipeline/text.rs
//! Self-contained text machinery for the clusterer and the near-duplicate
//! filter: tokenizer, stop words, token-set similarity, TF-IDF vectors and
//! average-linkage agglomerative clustering over cosine distance.
//!
//! The clustering path is bounded O(n^2) in the number of unanchored
//! events, which stays small in practice.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

/// Stop words for the Solana narrative context. Ecosystem-generic terms are
/// included so they never dominate a cluster vocabulary.
pub static STOP_WORDS: Lazy<BTreeSet<&'static str>> = Lazy::new(|| {
    [
        "solana", "sol", "crypto", "blockchain", "web3", "the", "and", "for", "with", "that",
        "this", "from", "https", "http", "com", "www", "just", "like", "new", "now", "get", "use",
        "make", "will", "can", "one", "also", "more", "been", "have", "has", "had", "about",
        "into", "than", "its", "out", "over", "all", "are", "but", "not", "you", "was", "they",
        "their", "what", "which", "when", "would", "there",
    ]
    .into_iter()
    .collect()
});

static RE_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r"https?://\S+").unwrap());
static RE_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"@\w+").unwrap());
static RE_NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9\s\-]").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Lowercase, strip URLs/mentions/punctuation, collapse whitespace, split.
pub fn tokenize(input: &str) -> Vec<String> {
    let lower = input.to_lowercase();
    let no_url = RE_URL.replace_all(&lower, "");
    let no_mention = RE_MENTION.replace_all(&no_url, "");
    let clean = RE_NON_ALNUM.replace_all(&no_mention, " ");
    let collapsed = RE_WS.replace_all(&clean, " ");
    collapsed
        .trim()
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tokens with stop words and one/two-character fragments removed.
pub fn content_tokens(input: &str) -> Vec<String> {
    tokenize(input)
        .into_iter()
        .filter(|t| t.len() > 2 && !STOP_WORDS.contains(t.as_str()))
        .collect()
}

/// Jaccard similarity over lowercased word tokens, stop words removed.
/// Two empty token sets count as identical.
pub fn token_set_similarity(a: &str, b: &str) -> f64 {
    let sa: BTreeSet<String> = content_tokens(a).into_iter().collect();
    let sb: BTreeSet<String> = content_tokens(b).into_iter().collect();
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let inter = sa.intersection(&sb).count() as f64;
    let union = sa.union(&sb).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        inter / union
    }
}

const MAX_FEATURES: usize = 500;

/// Sparse, l2-normalized TF-IDF vector (term index -> weight).
pub type TfidfVector = HashMap<usize, f64>;

/// TF-IDF over unigrams + bigrams with document-frequency filtering.
pub struct TfidfVectorizer {
    pub min_df: usize,
    pub max_df: f64,
}

impl Default for TfidfVectorizer {
    fn default() -> Self {
        Self { min_df: 2, max_df: 0.8 }
    }
}

impl TfidfVectorizer {
    /// Vectorize all documents at once. Returns one (possibly empty) vector
    /// per document; empty when no term survived the df filters.
    pub fn fit_transform(&self, docs: &[String]) -> Vec<TfidfVector> {
        let n = docs.len();
        if n == 0 {
            return Vec::new();
        }

        let token_lists: Vec<Vec<String>> = docs.iter().map(|d| Self::terms(d)).collect();

        // Document frequency per term.
        let mut df: HashMap<&str, usize> = HashMap::new();
        for tokens in &token_lists {
            let uniq: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();
            for t in uniq {
                *df.entry(t).or_insert(0) += 1;
            }
        }

        // Vocabulary: df filters, then top terms by (df desc, term asc) for a
        // deterministic cut, assigned indices in sorted term order.
        let max_df_abs = ((self.max_df * n as f64).floor() as usize).max(1);
        let mut kept: Vec<(&str, usize)> = df
            .iter()
            .filter(|(_, &c)| c >= self.min_df && c <= max_df_abs)
            .map(|(&t, &c)| (t, c))
            .collect();
        kept.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        kept.truncate(MAX_FEATURES);
        kept.sort_by(|a, b| a.0.cmp(b.0));

        let vocab: HashMap<&str, usize> =
            kept.iter().enumerate().map(|(i, &(t, _))| (t, i)).collect();
        let idf: Vec<f64> = kept
            .iter()
            .map(|&(_, dfc)| (((1 + n) as f64) / ((1 + dfc) as f64)).ln() + 1.0)
            .collect();

        token_lists
            .iter()
            .map(|tokens| {
                let mut counts: HashMap<usize, f64> = HashMap::new();
                for t in tokens {
                    if let Some(&idx) = vocab.get(t.as_str()) {
                        *counts.entry(idx).or_insert(0.0) += 1.0;
                    }
                }
                for (idx, v) in counts.iter_mut() {
                    *v *= idf[*idx];
                }
                let norm = counts.values().map(|v| v * v).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for v in counts.values_mut() {
                        *v /= norm;
                    }
                }
                counts
            })
            .collect()
    }

    /// Unigrams + bigrams over content tokens.
    fn terms(doc: &str) -> Vec<String> {
        let unigrams = content_tokens(doc);
        let mut terms = unigrams.clone();
        for pair in unigrams.windows(2) {
            terms.push(format!("{} {}", pair[0], pair[1]));
        }
        terms
    }
}

/// Cosine distance between two l2-normalized sparse vectors, clamped to [0,1].
pub fn cosine_distance(a: &TfidfVector, b: &TfidfVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(i, va)| large.get(i).map(|vb| va * vb))
        .sum();
    (1.0 - dot.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

/// Average-linkage agglomerative clustering cut at `max_distance`.
///
/// Returns clusters as sorted lists of input indices. Merge order is
/// deterministic: closest pair first, ties to the lowest index pair.
pub fn agglomerative_clusters(vectors: &[TfidfVector], max_distance: f64) -> Vec<Vec<usize>> {
    let n = vectors.len();
    if n == 0 {
        return Vec::new();
    }

    // Pairwise distance matrix (symmetric, diagonal unused).
    let mut dist = vec![vec![0.0f64; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = cosine_distance(&vectors[i], &vectors[j]);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    let mut clusters: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();

    loop {
        if clusters.len() <= 1 {
            break;
        }
        // Find the closest cluster pair by average linkage.
        let mut best: Option<(usize, usize, f64)> = None;
        for a in 0..clusters.len() {
            for b in (a + 1)..clusters.len() {
                let mut sum = 0.0;
                for &i in &clusters[a] {
                    for &j in &clusters[b] {
                        sum += dist[i][j];
                    }
                }
                let avg = sum / (clusters[a].len() * clusters[b].len()) as f64;
                let better = match best {
                    None => true,
                    Some((_, _, cur)) => avg < cur - 1e-12,
                };
                if better {
                    best = Some((a, b, avg));
                }
            }
        }
        match best {
            Some((a, b, d)) if d <= max_distance => {
                let merged = clusters.remove(b);
                clusters[a].extend(merged);
                clusters[a].sort_unstable();
            }
            _ => break,
        }
    }

    clusters.sort_by(|a, b| a[0].cmp(&b[0]));
    clusters
}

/// `Title Case` over a canonical entity name (dashes become spaces).
pub fn title_case(entity: &str) -> String {
    entity
        .split(['-', ' '])
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
