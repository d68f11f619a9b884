//! Runtime tunables. All have defaults; nothing is required to be set.

use std::path::PathBuf;

use tracing::warn;

use crate::profile::TopicTable;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.2;
pub const DEFAULT_K: usize = 5;
pub const DEFAULT_CHAR_BUDGET: usize = 2000;

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Candidates scoring below this cosine similarity are discarded.
    pub similarity_threshold: f64,
    /// Default number of entries returned by retrieve_context.
    pub default_k: usize,
    /// Default character budget for assembled context blocks.
    pub char_budget: usize,
    pub topics: TopicTable,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            default_k: DEFAULT_K,
            char_budget: DEFAULT_CHAR_BUDGET,
            topics: TopicTable::default(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "unparsable env value, using default");
            None
        }
    }
}

impl MemoryConfig {
    /// Read tunables from `MNEMO_*` env vars, falling back to defaults.
    ///
    /// `MNEMO_TOPICS` may point at a JSON file of `{"topic": [keywords]}`;
    /// a missing or malformed file logs a warning and keeps the built-in
    /// table rather than failing startup.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(t) = env_parsed::<f64>("MNEMO_SIMILARITY_THRESHOLD") {
            cfg.similarity_threshold = t.clamp(0.0, 1.0);
        }
        if let Some(k) = env_parsed::<usize>("MNEMO_DEFAULT_K") {
            cfg.default_k = k.max(1);
        }
        if let Some(b) = env_parsed::<usize>("MNEMO_CHAR_BUDGET") {
            cfg.char_budget = b;
        }
        if let Ok(path) = std::env::var("MNEMO_TOPICS") {
            match TopicTable::from_file(&PathBuf::from(&path)) {
                Ok(table) => cfg.topics = table,
                Err(e) => warn!(path = %path, error = %e, "failed to load topic table, using built-in"),
            }
        }
        cfg
    }
}
