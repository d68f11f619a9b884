//! Assembling ranked entries into a bounded context block.

use serde::{Deserialize, Serialize};

use crate::rank::{RankMode, RankedEntry};

/// How much of a stored response is shown per rendered entry. The full
/// response stays in the store; this only bounds the rendering.
const RESPONSE_PREVIEW_CHARS: usize = 200;

const HEADER: &str = "## Relevant conversation history";

/// The bounded, formatted text handed to the downstream agent call,
/// plus the ids of the entries that made it in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextBlock {
    pub text: String,
    pub entry_ids: Vec<u64>,
    /// Which retrieval path produced the entries ("vector", "lexical",
    /// or "empty" when the user has no usable history).
    pub search_mode: String,
}

impl ContextBlock {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            entry_ids: Vec::new(),
            search_mode: RankMode::Empty.as_str().to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entry_ids.is_empty()
    }
}

/// Truncate to `max` characters, appending "…" if anything was cut.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}…")
    }
}

fn format_date(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn render_entry(index: usize, ranked: &RankedEntry) -> String {
    format!(
        "Memory {} ({}, similarity: {:.2}):\nUser asked: {}\nAgent responded: {}",
        index,
        format_date(ranked.entry.timestamp),
        ranked.score,
        ranked.entry.query_text,
        truncate_chars(&ranked.entry.response_text, RESPONSE_PREVIEW_CHARS),
    )
}

/// Append entries in rank order until the next one would push the rendered
/// text past `char_budget`. The overflowing entry is dropped whole — no
/// partial-entry truncation. An empty input yields an explicitly empty
/// block, not an error.
pub fn assemble(ranked: &[RankedEntry], char_budget: usize, mode: RankMode) -> ContextBlock {
    if ranked.is_empty() {
        return ContextBlock::empty();
    }

    let mut text = String::new();
    let mut used_chars = 0usize;
    let mut entry_ids = Vec::new();

    for (i, r) in ranked.iter().enumerate() {
        let rendered = render_entry(i + 1, r);
        let mut cost = rendered.chars().count();
        if entry_ids.is_empty() {
            // header + blank line, paid together with the first entry
            cost += HEADER.chars().count() + 2;
        } else {
            cost += 2; // separating blank line
        }
        if used_chars + cost > char_budget {
            break;
        }
        if entry_ids.is_empty() {
            text.push_str(HEADER);
        }
        text.push_str("\n\n");
        text.push_str(&rendered);
        used_chars += cost;
        entry_ids.push(r.entry.id);
    }

    if entry_ids.is_empty() {
        // even the best entry didn't fit the budget
        return ContextBlock::empty();
    }

    ContextBlock {
        text,
        entry_ids,
        search_mode: mode.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEntry;

    fn ranked(id: u64, score: f64, query: &str, response: &str) -> RankedEntry {
        RankedEntry {
            entry: MemoryEntry {
                id,
                user_id: "u1".into(),
                thread_id: "t1".into(),
                timestamp: 1_700_000_000_000,
                query_text: query.into(),
                response_text: response.into(),
                term_vector: Default::default(),
                topics: vec!["general".into()],
            },
            score,
        }
    }

    #[test]
    fn empty_input_yields_empty_block() {
        let block = assemble(&[], 2000, RankMode::Vector);
        assert!(block.is_empty());
        assert_eq!(block.text, "");
        assert_eq!(block.search_mode, "empty");
    }

    #[test]
    fn renders_score_and_date_inline() {
        let entries = vec![ranked(1, 0.87, "return policy?", "30 days.")];
        let block = assemble(&entries, 2000, RankMode::Vector);
        assert_eq!(block.entry_ids, vec![1]);
        assert!(block.text.contains("similarity: 0.87"));
        assert!(block.text.contains("2023-11-14"));
        assert!(block.text.contains("User asked: return policy?"));
        assert_eq!(block.search_mode, "vector");
    }

    #[test]
    fn budget_is_never_exceeded() {
        let entries: Vec<RankedEntry> = (0..20)
            .map(|i| ranked(i, 0.5, "a question with some words", "a reasonably long answer body"))
            .collect();
        for budget in [0, 50, 120, 400, 1000] {
            let block = assemble(&entries, budget, RankMode::Vector);
            assert!(
                block.text.chars().count() <= budget,
                "budget {budget} exceeded: {}",
                block.text.chars().count()
            );
        }
    }

    #[test]
    fn overflowing_entry_is_dropped_whole() {
        let entries = vec![
            ranked(1, 0.9, "short", "ok"),
            ranked(2, 0.8, "q", &"x".repeat(500)),
            ranked(3, 0.7, "also short", "ok"),
        ];
        let block = assemble(&entries, 150, RankMode::Vector);
        assert_eq!(block.entry_ids, vec![1], "stop at first overflow, no partial render");
        assert!(!block.text.contains("xxx"));
    }

    #[test]
    fn long_responses_are_previewed() {
        let long = "word ".repeat(200);
        let entries = vec![ranked(1, 0.9, "q", &long)];
        let block = assemble(&entries, 5000, RankMode::Vector);
        assert!(block.text.contains('…'));
        assert!(block.text.chars().count() < 400);
    }

    #[test]
    fn tiny_budget_yields_empty_block() {
        let entries = vec![ranked(1, 0.9, "question", "answer")];
        let block = assemble(&entries, 10, RankMode::Vector);
        assert!(block.is_empty());
    }
}
