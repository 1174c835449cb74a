//! Deduplicated, insertion-ordered store of extracted facts.
//!
//! A fact's identity is the SHA-256 of its normalized text, so the same claim
//! reported by two sources is stored once and keeps its first source. The
//! 1-based insertion position is the fact's citation number and never changes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use unicode_normalization::UnicodeNormalization;

use super::truncate_chars;

/// Content-derived fact identity (hex SHA-256 of the normalized text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactId(String);

impl FactId {
    /// Derive the id for a claim.
    pub fn for_text(text: &str) -> Self {
        let digest = Sha256::digest(normalize(text).as_bytes());
        Self(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize claim text for identity: NFKC, lowercase, whitespace collapsed.
pub fn normalize(text: &str) -> String {
    let folded = text.nfkc().collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// An atomic claim with the source it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub text: String,
    pub source: String,
}

impl Fact {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        let text = text.into().trim().to_string();
        Self {
            id: FactId::for_text(&text),
            text,
            source: source.into(),
        }
    }
}

/// Result of a [`FactStore::merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    /// Facts newly appended, in insertion order.
    pub added: Vec<Fact>,
    /// Candidates dropped because their id was already present.
    pub duplicates: usize,
}

/// The growing knowledge set for one research task.
#[derive(Debug, Clone, Default)]
pub struct FactStore {
    facts: Vec<Fact>,
    index: HashMap<FactId, usize>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge candidate facts, keeping the first occurrence of every id.
    ///
    /// Blank candidates are ignored. Duplicates inside `candidates` collapse
    /// the same way as duplicates of already stored facts. Ids are derived
    /// from the text here; a candidate's own `id` is not trusted.
    pub fn merge(&mut self, candidates: impl IntoIterator<Item = Fact>) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();
        for candidate in candidates {
            if candidate.text.trim().is_empty() {
                continue;
            }
            let fact = Fact::new(candidate.text, candidate.source);
            if self.index.contains_key(&fact.id) {
                outcome.duplicates += 1;
                continue;
            }
            self.index.insert(fact.id.clone(), self.facts.len());
            self.facts.push(fact.clone());
            outcome.added.push(fact);
        }
        outcome
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.facts.iter()
    }

    pub fn as_slice(&self) -> &[Fact] {
        &self.facts
    }

    pub fn get(&self, id: &FactId) -> Option<&Fact> {
        self.index.get(id).map(|&i| &self.facts[i])
    }

    pub fn contains(&self, id: &FactId) -> bool {
        self.index.contains_key(id)
    }

    /// Citation number (1-based) of a stored fact.
    pub fn position(&self, id: &FactId) -> Option<usize> {
        self.index.get(id).map(|i| i + 1)
    }

    /// Fact cited as `[n]`.
    pub fn by_citation(&self, n: usize) -> Option<&Fact> {
        n.checked_sub(1).and_then(|i| self.facts.get(i))
    }

    /// Distinct sources in first-seen order.
    pub fn unique_sources(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.facts
            .iter()
            .map(|f| f.source.as_str())
            .filter(|s| seen.insert(*s))
            .collect()
    }

    /// Compact bullet list for prompts, each fact cut to `max_chars`.
    pub fn digest(&self, max_chars: usize) -> String {
        self.facts
            .iter()
            .map(|f| format!("- {}", truncate_chars(&f.text, max_chars)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalization() {
        assert_eq!(
            normalize("  Paris   is\tthe CAPITAL\nof France "),
            "paris is the capital of france"
        );
        assert_eq!(
            FactId::for_text("Paris is the capital"),
            FactId::for_text("paris  IS the   capital")
        );
        assert_ne!(
            FactId::for_text("Paris is the capital"),
            FactId::for_text("Paris was the capital")
        );
        assert_eq!(FactId::for_text("x").as_str().len(), 64);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut store = FactStore::new();
        let first = store.merge([Fact::new("Water boils at 100 C", "https://a.test")]);
        assert_eq!(first.added.len(), 1);
        assert_eq!(first.duplicates, 0);

        let second = store.merge([Fact::new("Water boils at 100 C", "https://a.test")]);
        assert!(second.added.is_empty());
        assert_eq!(second.duplicates, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_first_source_wins() {
        let mut store = FactStore::new();
        store.merge([Fact::new("The Seine flows through Paris.", "https://one.test")]);
        let outcome = store.merge([Fact::new("the seine  flows through paris.", "https://two.test")]);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.by_citation(1).unwrap().source, "https://one.test");
        assert_eq!(store.by_citation(1).unwrap().text, "The Seine flows through Paris.");
    }

    #[test]
    fn test_merge_rederives_mismatched_ids() {
        let mut store = FactStore::new();
        let forged = Fact {
            id: FactId::for_text("Paris is the capital of France."),
            text: "Berlin is in Germany.".to_string(),
            source: "https://a.test".to_string(),
        };
        let outcome = store.merge([forged]);
        assert_eq!(outcome.added[0].id, FactId::for_text("Berlin is in Germany."));

        let outcome = store.merge([Fact::new("Paris is the capital of France.", "https://b.test")]);
        assert_eq!(outcome.added.len(), 1);
        assert_eq!(outcome.duplicates, 0);
        assert_eq!(store.len(), 2);
        assert!(store.contains(&FactId::for_text("Paris is the capital of France.")));
        assert!(store.contains(&FactId::for_text("Berlin is in Germany.")));
    }

    #[test]
    fn test_in_batch_duplicates_collapse() {
        let mut store = FactStore::new();
        let outcome = store.merge([
            Fact::new("A", "s1"),
            Fact::new("B", "s1"),
            Fact::new("a", "s2"),
            Fact::new("   ", "s3"),
        ]);
        assert_eq!(outcome.added.len(), 2);
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_citation_positions_are_stable() {
        let mut store = FactStore::new();
        store.merge([Fact::new("first", "s1"), Fact::new("second", "s2")]);
        store.merge([Fact::new("third", "s1")]);

        let second = FactId::for_text("second");
        assert_eq!(store.position(&second), Some(2));
        assert_eq!(store.by_citation(3).unwrap().text, "third");
        assert!(store.by_citation(0).is_none());
        assert!(store.by_citation(4).is_none());
        assert!(store.contains(&second));
        assert_eq!(store.get(&second).unwrap().source, "s2");
        assert_eq!(store.unique_sources(), vec!["s1", "s2"]);
    }

    #[test]
    fn test_digest_truncates_each_fact() {
        let mut store = FactStore::new();
        store.merge([Fact::new("x".repeat(300), "s"), Fact::new("short", "s")]);
        let digest = store.digest(200);
        let lines: Vec<&str> = digest.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].chars().count(), 2 + 200 + 3);
        assert_eq!(lines[1], "- short");
    }
}
