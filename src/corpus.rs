//! Process-wide document-frequency statistics.
//!
//! One instance is shared by all users (term weights are corpus-global).
//! The table is an explicit component handed to the store at construction,
//! so tests can substitute their own deterministic instance.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Term → document-frequency table plus total document count.
///
/// Counters only grow on `add_document` and only shrink on
/// `remove_document` (explicit deletion); reads never mutate.
#[derive(Debug, Default)]
pub struct CorpusStats {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    docs: u64,
    df: HashMap<String, u64>,
}

impl CorpusStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of documents counted so far.
    pub fn doc_count(&self) -> u64 {
        self.inner.read().docs
    }

    /// How many documents contain `term`. Zero for never-seen terms.
    pub fn doc_frequency(&self, term: &str) -> u64 {
        self.inner.read().df.get(term).copied().unwrap_or(0)
    }

    /// Number of distinct terms tracked.
    pub fn term_count(&self) -> usize {
        self.inner.read().df.len()
    }

    /// Count one document. `terms` must already be deduplicated.
    pub fn add_document<'a, I>(&self, terms: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut inner = self.inner.write();
        inner.docs += 1;
        for t in terms {
            *inner.df.entry(t.to_string()).or_insert(0) += 1;
        }
    }

    /// Undo one `add_document`. Used when a user's entries are cleared.
    pub fn remove_document<'a, I>(&self, terms: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut inner = self.inner.write();
        inner.docs = inner.docs.saturating_sub(1);
        for t in terms {
            if let Some(count) = inner.df.get_mut(t) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    inner.df.remove(t);
                }
            }
        }
    }

    /// Smoothed inverse document frequency: `ln((1 + N) / (1 + df)) + 1`.
    ///
    /// A term with df = 0 gets the largest idf possible for the current
    /// corpus, so novel vocabulary is treated as maximally informative
    /// instead of being zeroed out.
    pub fn idf(&self, term: &str) -> f64 {
        let inner = self.inner.read();
        let df = inner.df.get(term).copied().unwrap_or(0);
        ((1.0 + inner.docs as f64) / (1.0 + df as f64)).ln() + 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn empty_corpus_idf_is_one() {
        let c = CorpusStats::new();
        assert_eq!(c.doc_count(), 0);
        assert!((c.idf("anything") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unseen_term_has_max_idf() {
        let c = CorpusStats::new();
        c.add_document(["rust", "memory"]);
        c.add_document(["rust", "agent"]);
        let seen = c.idf("rust");
        let rare = c.idf("memory");
        let novel = c.idf("xylophone");
        assert!(novel > rare);
        assert!(rare > seen);
        // ln((1+2)/(1+0)) + 1 for the novel term
        assert!((novel - (3.0_f64.ln() + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn remove_document_undoes_add() {
        let c = CorpusStats::new();
        c.add_document(["alpha", "beta"]);
        c.add_document(["alpha"]);
        c.remove_document(["alpha", "beta"]);
        assert_eq!(c.doc_count(), 1);
        assert_eq!(c.doc_frequency("alpha"), 1);
        assert_eq!(c.doc_frequency("beta"), 0);
        assert_eq!(c.term_count(), 1);
    }

    #[test]
    fn concurrent_updates_lose_no_increments() {
        let c = Arc::new(CorpusStats::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = Arc::clone(&c);
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    c.add_document(["shared", "term"]);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.doc_count(), 800);
        assert_eq!(c.doc_frequency("shared"), 800);
    }
}
