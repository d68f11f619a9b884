//! Per-user aggregate statistics and topic assignment.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::store::MemoryEntry;

/// Pure aggregate over a user's stored entries. Never outlives
/// re-derivation: clearing the entries resets the profile with them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub user_id: String,
    pub interaction_count: u64,
    pub topic_frequency: BTreeMap<String, u64>,
    /// Timestamp (unix ms) of the most recent entry. None until the first
    /// store — a user with no history is a valid, empty profile.
    pub last_active: Option<i64>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            interaction_count: 0,
            topic_frequency: BTreeMap::new(),
            last_active: None,
        }
    }

    /// Fold one stored entry into the aggregate.
    pub fn record(&mut self, entry: &MemoryEntry) {
        self.interaction_count += 1;
        for topic in &entry.topics {
            *self.topic_frequency.entry(topic.clone()).or_insert(0) += 1;
        }
        self.last_active = Some(entry.timestamp);
    }

    /// Rebuild the aggregate from scratch. Used when a persisted profile
    /// record is unreadable — the entries are the source of truth.
    pub fn rederive(user_id: &str, entries: impl Iterator<Item = MemoryEntry>) -> Self {
        let mut profile = Self::new(user_id);
        let mut ordered: Vec<MemoryEntry> = entries.collect();
        ordered.sort_by_key(|e| (e.timestamp, e.id));
        for e in &ordered {
            profile.record(e);
        }
        profile
    }
}

/// Fixed keyword → topic table. Assignment is a deterministic function of
/// the entry text; the table is configurable but never changes mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicTable {
    topics: BTreeMap<String, Vec<String>>,
}

impl Default for TopicTable {
    fn default() -> Self {
        let mut topics = BTreeMap::new();
        let mut add = |topic: &str, keywords: &[&str]| {
            topics.insert(
                topic.to_string(),
                keywords.iter().map(|k| k.to_string()).collect(),
            );
        };
        add("technical", &["api", "code", "programming", "development", "software"]);
        add("product", &["features", "specifications", "capabilities", "functions"]);
        add("support", &["help", "issue", "problem", "error", "troubleshoot"]);
        add("information", &["what", "how", "when", "where", "why", "explain"]);
        add("configuration", &["setup", "config", "settings", "install", "configure"]);
        Self { topics }
    }
}

impl TopicTable {
    /// Load a table from a JSON file of `{"topic": ["keyword", ...]}`.
    pub fn from_file(path: &Path) -> Result<Self, MemoryError> {
        let raw = std::fs::read_to_string(path)?;
        let topics: BTreeMap<String, Vec<String>> = serde_json::from_str(&raw)?;
        if topics.is_empty() {
            return Err(MemoryError::Validation("topic table must not be empty".into()));
        }
        Ok(Self { topics })
    }

    /// Assign coarse topic labels to a piece of text. An entry matching
    /// nothing is tagged "general".
    pub fn assign(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        let mut matched: Vec<String> = self
            .topics
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k.as_str())))
            .map(|(topic, _)| topic.clone())
            .collect();
        if matched.is_empty() {
            matched.push("general".to_string());
        }
        matched
    }
}
