//! Ranking stored entries against a query vector.
//!
//! Primary path is cosine similarity over tf-idf vectors with a score
//! threshold. When no candidate clears the threshold the ranker retries
//! with plain lexical overlap so a user with stored entries never gets an
//! empty result just because vector overlap was thin.

use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::store::MemoryEntry;
use crate::vectorize::{self, TermVector};

/// Which retrieval path produced the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankMode {
    Vector,
    Lexical,
    Empty,
}

impl RankMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RankMode::Vector => "vector",
            RankMode::Lexical => "lexical",
            RankMode::Empty => "empty",
        }
    }
}

/// An entry with its computed relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct RankedEntry {
    #[serde(flatten)]
    pub entry: MemoryEntry,
    pub score: f64,
}

/// Cosine similarity between two sparse vectors. Zero when either is empty.
pub fn cosine(a: &TermVector, b: &TermVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small
        .iter()
        .filter_map(|(t, w)| large.get(t).map(|v| w * v))
        .sum();
    if dot == 0.0 {
        return 0.0;
    }
    let norm_a: f64 = a.values().map(|w| w * w).sum::<f64>().sqrt();
    let norm_b: f64 = b.values().map(|w| w * w).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Shared-token overlap normalized by query length: the fallback signal
/// when tf-idf vectors share too little vocabulary. Raw tokens, no
/// stopword removal — on this path every shared word counts.
fn lexical_overlap(query_tokens: &HashSet<String>, entry: &MemoryEntry) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let entry_tokens: HashSet<String> = vectorize::tokenize(&entry.combined_text())
        .into_iter()
        .collect();
    let shared = query_tokens.intersection(&entry_tokens).count();
    shared as f64 / query_tokens.len() as f64
}

/// Score `candidates` against the query and return the top `k`.
///
/// Ordering is strictly (score desc, timestamp desc, id desc) — equal
/// scores break toward the more recent entry, and the result is
/// deterministic for a fixed entry set and query.
pub fn rank(
    query_vector: &TermVector,
    query_text: &str,
    candidates: Vec<MemoryEntry>,
    k: usize,
    threshold: f64,
) -> (Vec<RankedEntry>, RankMode) {
    if candidates.is_empty() || k == 0 {
        return (Vec::new(), RankMode::Empty);
    }

    let mut scored: Vec<RankedEntry> = candidates
        .iter()
        .map(|entry| RankedEntry {
            score: cosine(query_vector, &entry.term_vector),
            entry: entry.clone(),
        })
        .filter(|r| r.score >= threshold)
        .collect();

    let mode = if scored.is_empty() {
        // Insufficient shared vocabulary for the vector path — rescore
        // everything by lexical overlap. Zero-overlap entries stay in so
        // the caller always gets something back, ordered by recency.
        debug!(candidates = candidates.len(), "vector scores below threshold, using lexical overlap");
        let query_tokens: HashSet<String> =
            vectorize::tokenize(query_text).into_iter().collect();
        scored = candidates
            .into_iter()
            .map(|entry| RankedEntry {
                score: lexical_overlap(&query_tokens, &entry),
                entry,
            })
            .collect();
        RankMode::Lexical
    } else {
        RankMode::Vector
    };

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.entry.timestamp.cmp(&a.entry.timestamp))
            .then_with(|| b.entry.id.cmp(&a.entry.id))
    });
    scored.truncate(k);
    (scored, mode)
}
