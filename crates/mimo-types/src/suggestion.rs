//! Proactive relationship suggestions and the per-session history that
//! suppresses repeats.

use crate::triple::{EntityRef, Triple, TripleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// A relationship worth surfacing to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub triple_id: TripleId,
    pub subject: EntityRef,
    pub predicate: String,
    pub object: EntityRef,
    pub confidence: f32,
}

impl Suggestion {
    pub fn from_triple(triple: &Triple) -> Self {
        Self {
            triple_id: triple.id,
            subject: triple.subject(),
            predicate: triple.predicate.clone(),
            object: triple.object(),
            confidence: triple.confidence,
        }
    }

    /// Identity used for repeat suppression.
    pub fn key(&self) -> String {
        format!(
            "{}:{}|{}|{}:{}",
            self.subject.entity_type,
            self.subject.id,
            self.predicate,
            self.object.entity_type,
            self.object.id
        )
    }

    /// Human-readable form, e.g. `ada works at acme`.
    pub fn phrase(&self) -> String {
        let predicate: String = self
            .predicate
            .chars()
            .map(|c| if c == '_' || c == '-' { ' ' } else { c })
            .collect();
        format!("{} {} {}", self.subject.id, predicate, self.object.id)
    }
}

impl std::fmt::Display for Suggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:.2})", self.phrase(), self.confidence)
    }
}

/// Session state held by the caller between suggestion rounds.
#[derive(Debug, Clone)]
pub struct SuggestionHistory {
    capacity: usize,
    recent: VecDeque<String>,
    last_discussed: HashMap<String, DateTime<Utc>>,
}

impl Default for SuggestionHistory {
    fn default() -> Self {
        Self::new(10)
    }
}

impl SuggestionHistory {
    /// Remember at most `capacity` recent suggestions.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            recent: VecDeque::with_capacity(capacity),
            last_discussed: HashMap::new(),
        }
    }

    /// Record a suggestion as made, evicting the oldest past capacity.
    pub fn record(&mut self, suggestion: &Suggestion) {
        if self.capacity == 0 {
            return;
        }
        let key = suggestion.key();
        self.recent.retain(|k| k != &key);
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(key);
    }

    /// Whether this suggestion is among the recent ones.
    pub fn was_suggested(&self, suggestion: &Suggestion) -> bool {
        let key = suggestion.key();
        self.recent.iter().any(|k| k == &key)
    }

    /// Note that `entity_id` came up in conversation at `at`.
    pub fn mark_discussed(&mut self, entity_id: impl Into<String>, at: DateTime<Utc>) {
        self.last_discussed.insert(entity_id.into(), at);
    }

    pub fn last_discussed(&self, entity_id: &str) -> Option<DateTime<Utc>> {
        self.last_discussed.get(entity_id).copied()
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }
}
