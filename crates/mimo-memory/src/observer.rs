//! Proactive suggestions over the relationships of mentioned entities.

use crate::query::QueryEngine;
use chrono::{DateTime, Duration, Utc};
use mimo_types::config::ObserverConfig;
use mimo_types::suggestion::{Suggestion, SuggestionHistory};
use mimo_types::triple::{EntityRef, Triple};
use std::collections::HashSet;
use tracing::debug;

/// Filters relationship edges down to a few relevant, fresh, unrepeated suggestions.
#[derive(Debug, Clone, Default)]
pub struct Observer {
    config: ObserverConfig,
}

impl Observer {
    pub fn new(config: ObserverConfig) -> Self {
        Self { config }
    }

    /// A history sized for this observer's repeat window.
    pub fn new_history(&self) -> SuggestionHistory {
        SuggestionHistory::new(self.config.history_len)
    }

    /// Suggest up to `max_suggestions` relationships touching `mentioned`.
    ///
    /// A relationship qualifies when its confidence meets the floor, the entity
    /// at its other end was not discussed within the cooldown, its phrase is not
    /// already in `conversation`, and it is not among the recent suggestions.
    /// Returned suggestions are recorded in `history`.
    pub fn suggest(
        &self,
        engine: &QueryEngine,
        mentioned: &[EntityRef],
        conversation: &str,
        history: &mut SuggestionHistory,
        graph_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<Suggestion> {
        let conversation = conversation.to_lowercase();
        let cooldown = Duration::seconds(self.config.cooldown_secs);
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for entity in mentioned {
            let rels = engine.get_relationships(entity, graph_id);
            for triple in rels.outgoing.iter().chain(rels.incoming.iter()) {
                if triple.confidence < self.config.min_confidence {
                    continue;
                }
                let suggestion = Suggestion::from_triple(triple);
                if !seen.insert(suggestion.key()) {
                    continue;
                }
                let other = other_end(triple, entity);
                if let Some(at) = history.last_discussed(&other.id) {
                    if now - at <= cooldown {
                        continue;
                    }
                }
                if conversation.contains(&suggestion.phrase().to_lowercase()) {
                    continue;
                }
                if history.was_suggested(&suggestion) {
                    continue;
                }
                candidates.push(suggestion);
            }
        }

        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key().cmp(&b.key()))
        });
        candidates.truncate(self.config.max_suggestions);
        for suggestion in &candidates {
            history.record(suggestion);
        }
        debug!(
            mentioned = mentioned.len(),
            returned = candidates.len(),
            "Observer suggestions"
        );
        candidates
    }
}

fn other_end(triple: &Triple, entity: &EntityRef) -> EntityRef {
    let subject = triple.subject();
    if &subject == entity {
        triple.object()
    } else {
        subject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::run_migrations;
    use crate::repository::TripleRepository;
    use mimo_types::triple::{NewTriple, DEFAULT_GRAPH_ID};
    use rusqlite::Connection;
    use std::sync::{Arc, Mutex};

    fn setup() -> (TripleRepository, QueryEngine) {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        (
            TripleRepository::new(conn.clone(), 500),
            QueryEngine::new(conn),
        )
    }

    fn fact(repo: &TripleRepository, subject: &str, pred: &str, object: &str, confidence: f32) {
        let attrs = NewTriple::new(subject, "person", pred, object, "org");
        repo.create(attrs.with_confidence(confidence)).unwrap();
    }

    fn ada() -> Vec<EntityRef> {
        vec![EntityRef::new("ada", "person")]
    }

    #[test]
    fn test_confidence_floor_and_cap() {
        let (repo, engine) = setup();
        fact(&repo, "ada", "works_at", "acme", 0.99);
        fact(&repo, "ada", "founded", "initech", 0.95);
        fact(&repo, "ada", "advises", "globex", 0.92);
        fact(&repo, "ada", "likes", "hooli", 0.85);

        let observer = Observer::default();
        let mut history = observer.new_history();
        let now = Utc::now();
        let out = observer.suggest(&engine, &ada(), "", &mut history, DEFAULT_GRAPH_ID, now);
        let objects: Vec<&str> = out.iter().map(|s| s.object.id.as_str()).collect();
        assert_eq!(objects, vec!["acme", "initech"]);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_recent_suggestions_are_not_repeated() {
        let (repo, engine) = setup();
        fact(&repo, "ada", "works_at", "acme", 0.99);
        fact(&repo, "ada", "founded", "initech", 0.95);
        fact(&repo, "ada", "advises", "globex", 0.92);

        let observer = Observer::default();
        let mut history = observer.new_history();
        let now = Utc::now();
        let first = observer.suggest(&engine, &ada(), "", &mut history, DEFAULT_GRAPH_ID, now);
        assert_eq!(first.len(), 2);
        let second = observer.suggest(&engine, &ada(), "", &mut history, DEFAULT_GRAPH_ID, now);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].object.id, "globex");
        let third = observer.suggest(&engine, &ada(), "", &mut history, DEFAULT_GRAPH_ID, now);
        assert!(third.is_empty());
    }

    #[test]
    fn test_verbatim_mentions_are_skipped() {
        let (repo, engine) = setup();
        fact(&repo, "ada", "works_at", "acme", 0.99);
        fact(&repo, "ada", "founded", "initech", 0.95);

        let observer = Observer::default();
        let mut history = observer.new_history();
        let out = observer.suggest(
            &engine,
            &ada(),
            "I heard Ada works at Acme these days.",
            &mut history,
            DEFAULT_GRAPH_ID,
            Utc::now(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].object.id, "initech");
    }

    #[test]
    fn test_cooldown_on_recently_discussed_entity() {
        let (repo, engine) = setup();
        fact(&repo, "ada", "works_at", "acme", 0.99);

        let observer = Observer::default();
        let now = Utc::now();
        let mut history = observer.new_history();
        history.mark_discussed("acme", now - Duration::seconds(60));
        assert!(observer
            .suggest(&engine, &ada(), "", &mut history, DEFAULT_GRAPH_ID, now)
            .is_empty());

        history.mark_discussed("acme", now - Duration::seconds(301));
        let out = observer.suggest(&engine, &ada(), "", &mut history, DEFAULT_GRAPH_ID, now);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_incoming_edges_and_dedup_across_mentions() {
        let (repo, engine) = setup();
        fact(&repo, "ada", "works_at", "acme", 0.99);

        let observer = Observer::default();
        let mut history = observer.new_history();
        let mentioned = vec![EntityRef::new("ada", "person"), EntityRef::new("acme", "org")];
        let now = Utc::now();
        let out = observer.suggest(&engine, &mentioned, "", &mut history, DEFAULT_GRAPH_ID, now);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].subject.id, "ada");
    }
}
