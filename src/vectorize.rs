//! Text → sparse weighted-term vectors.
//!
//! Term weight = raw term frequency in the text × smoothed inverse corpus
//! frequency drawn from [`CorpusStats`] at call time. Stopwords and
//! single-character tokens are dropped before weighting.

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use crate::corpus::CorpusStats;

/// Sparse term → weight mapping. BTreeMap keeps iteration (and therefore
/// float accumulation in cosine) deterministic across calls.
pub type TermVector = BTreeMap<String, f64>;

// Roughly the high-frequency end of the usual English stopword list.
const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as",
    "at", "be", "because", "been", "before", "but", "by", "can", "could",
    "did", "do", "does", "for", "from", "had", "has", "have", "he", "her",
    "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "me",
    "more", "most", "my", "no", "not", "of", "on", "or", "our", "she", "so",
    "some", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "to", "up", "was", "we", "were", "what", "when", "where",
    "which", "who", "why", "will", "with", "within", "would", "you", "your",
];

fn stopwords() -> &'static HashSet<&'static str> {
    static INSTANCE: OnceLock<HashSet<&'static str>> = OnceLock::new();
    INSTANCE.get_or_init(|| STOPWORDS.iter().copied().collect())
}

/// Lowercased alphanumeric tokens, no filtering. This is the shared base
/// tokenization; the lexical-overlap fallback uses it directly.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Tokens that carry content: stopwords and single characters removed.
pub fn content_terms(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() >= 2 && !stopwords().contains(t.as_str()))
        .collect()
}

/// Distinct content terms, for document-frequency bookkeeping.
pub fn distinct_terms(text: &str) -> HashSet<String> {
    content_terms(text).into_iter().collect()
}

fn term_counts(text: &str) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for t in content_terms(text) {
        *counts.entry(t).or_insert(0) += 1;
    }
    counts
}

/// Embed free text as a sparse tf-idf vector against the current corpus.
///
/// Returns an empty vector when the text has no content terms; callers
/// treat that as inconclusive and fall back to lexical overlap.
pub fn embed(corpus: &CorpusStats, text: &str) -> TermVector {
    term_counts(text)
        .into_iter()
        .map(|(term, tf)| {
            let w = tf as f64 * corpus.idf(&term);
            (term, w)
        })
        .collect()
}

/// Count one stored document's terms into the corpus. Called exactly once
/// per stored entry, after the entry has been durably written.
pub fn update_corpus(corpus: &CorpusStats, text: &str) {
    let terms = distinct_terms(text);
    corpus.add_document(terms.iter().map(String::as_str));
}

/// Reverse of [`update_corpus`], for explicit deletion.
pub fn remove_from_corpus(corpus: &CorpusStats, text: &str) {
    let terms = distinct_terms(text);
    corpus.remove_document(terms.iter().map(String::as_str));
}
