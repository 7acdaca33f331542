//! Triple repository backed by SQLite.
//!
//! Owns validation and the natural-key uniqueness rule
//! `(subject_hash, predicate, object_id, object_type)`, enforced per graph so
//! tenants never collide with or overwrite each other. Every write either
//! succeeds or returns an error; nothing is silently dropped except natural-key
//! duplicates inside `batch_create`.

use crate::sql::{
    encode_map, expiry_millis, lock, now_millis, query_triples, row_to_triple, storage_err,
    TRIPLE_COLUMNS,
};
use chrono::{DateTime, Utc};
use mimo_types::error::{MimoError, MimoResult};
use mimo_types::triple::{
    subject_hash, validate_confidence, NewTriple, Triple, TripleId, TripleStats,
    DEFAULT_GRAPH_ID,
};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const INSERT_SQL: &str = "INSERT INTO triples (id, subject_hash, subject_id, subject_type, \
     predicate, object_id, object_type, confidence, source, ttl, expires_at, metadata, context, \
     graph_id, inferred_by_rule_id, inserted_at, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)";

/// Filters for `get_by_predicate`.
#[derive(Debug, Clone)]
pub struct PredicateFilter {
    pub graph_id: String,
    pub limit: Option<usize>,
    pub min_confidence: Option<f32>,
}

impl Default for PredicateFilter {
    fn default() -> Self {
        Self {
            graph_id: DEFAULT_GRAPH_ID.to_string(),
            limit: None,
            min_confidence: None,
        }
    }
}

/// Triple repository backed by SQLite.
#[derive(Clone)]
pub struct TripleRepository {
    conn: Arc<Mutex<Connection>>,
    /// Rows per write transaction in `batch_create`.
    batch_chunk_size: usize,
}

impl TripleRepository {
    /// Create a new repository wrapping the given connection.
    pub fn new(conn: Arc<Mutex<Connection>>, batch_chunk_size: usize) -> Self {
        Self {
            conn,
            batch_chunk_size: batch_chunk_size.max(1),
        }
    }

    /// Insert a new triple, failing with `Conflict` if its natural key exists.
    pub fn create(&self, attrs: NewTriple) -> MimoResult<Triple> {
        attrs.validate()?;
        let triple = build_triple(attrs, now_millis());
        let conn = lock(&self.conn)?;
        let mut stmt = conn.prepare_cached(INSERT_SQL).map_err(storage_err)?;
        execute_insert(&mut stmt, &triple).map_err(|e| match e {
            MimoError::Conflict(_) => MimoError::Conflict(format!(
                "triple ({}:{}) -[{}]-> ({}:{}) already exists in graph '{}'",
                triple.subject_type,
                triple.subject_id,
                triple.predicate,
                triple.object_type,
                triple.object_id,
                triple.graph_id
            )),
            other => other,
        })?;
        debug!(id = %triple.id, predicate = %triple.predicate, "Created triple");
        Ok(triple)
    }

    /// Insert a triple, or merge into the existing row on natural-key collision.
    ///
    /// Collisions are only detected within the triple's own graph. A merge
    /// replaces `confidence`, `source`, `ttl`, `metadata` and `updated_at`;
    /// the id and `inserted_at` of the stored row are kept.
    pub fn upsert(&self, attrs: NewTriple) -> MimoResult<Triple> {
        attrs.validate()?;
        let triple = build_triple(attrs, now_millis());
        let ttl = triple.ttl;
        let conn = lock(&self.conn)?;
        conn.prepare_cached(&format!(
            "{INSERT_SQL}
             ON CONFLICT(graph_id, subject_hash, predicate, object_id, object_type) DO UPDATE SET
                confidence = excluded.confidence,
                source = excluded.source,
                ttl = excluded.ttl,
                expires_at = CASE WHEN excluded.ttl IS NULL THEN NULL
                             ELSE triples.inserted_at + excluded.ttl * 1000 END,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at"
        ))
        .map_err(storage_err)
        .and_then(|mut stmt| execute_insert(&mut stmt, &triple))?;

        let stored = conn
            .query_row(
                &format!(
                    "SELECT {TRIPLE_COLUMNS} FROM triples
                     WHERE graph_id = ?1 AND subject_hash = ?2 AND predicate = ?3
                       AND object_id = ?4 AND object_type = ?5"
                ),
                rusqlite::params![
                    triple.graph_id,
                    triple.subject_hash,
                    triple.predicate,
                    triple.object_id,
                    triple.object_type
                ],
                row_to_triple,
            )
            .map_err(storage_err)?;
        debug!(id = %stored.id, ttl = ?ttl, "Upserted triple");
        Ok(stored)
    }

    /// Bulk-insert triples, skipping rows whose natural key already exists.
    ///
    /// Every row is validated before anything is written. Returns the number
    /// of rows considered, which is not necessarily the number inserted.
    ///
    /// Rows are committed in transactions of `batch_chunk_size`. If a chunk
    /// fails, that chunk is rolled back but earlier chunks stay committed;
    /// the error message reports how many rows were committed before it.
    pub fn batch_create(&self, rows: Vec<NewTriple>) -> MimoResult<usize> {
        for (idx, attrs) in rows.iter().enumerate() {
            attrs
                .validate()
                .map_err(|e| MimoError::Validation(format!("row {idx}: {e}")))?;
        }
        let considered = rows.len();
        let now = now_millis();
        let mut inserted = 0usize;

        let mut committed = 0usize;
        for chunk in rows.chunks(self.batch_chunk_size) {
            // Lock per chunk so readers can interleave between transactions.
            let chunk_inserted = self.insert_chunk(chunk, now).map_err(|e| {
                warn!(error = %e, committed, "Batch insert aborted mid-way");
                with_committed(e, committed)
            })?;
            inserted += chunk_inserted;
            committed += chunk.len();
        }

        debug!(considered, inserted, "Batch insert complete");
        Ok(considered)
    }

    /// Insert one chunk in its own transaction; returns the rows inserted.
    fn insert_chunk(&self, chunk: &[NewTriple], now: i64) -> MimoResult<usize> {
        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction().map_err(storage_err)?;
        let mut inserted = 0usize;
        {
            let mut stmt = tx
                .prepare_cached(&INSERT_SQL.replacen("INSERT", "INSERT OR IGNORE", 1))
                .map_err(storage_err)?;
            for attrs in chunk {
                let triple = build_triple(attrs.clone(), now);
                inserted += execute_insert(&mut stmt, &triple)?;
            }
        }
        tx.commit().map_err(storage_err)?;
        Ok(inserted)
    }

    /// Fetch a triple by id.
    pub fn get(&self, id: TripleId) -> MimoResult<Option<Triple>> {
        let conn = lock(&self.conn)?;
        conn.query_row(
            &format!("SELECT {TRIPLE_COLUMNS} FROM triples WHERE id = ?1"),
            rusqlite::params![id.0.to_string()],
            row_to_triple,
        )
        .optional()
        .map_err(storage_err)
    }

    /// All triples whose subject is `(subject_id, subject_type)`.
    pub fn get_by_subject(
        &self,
        subject_id: &str,
        subject_type: &str,
        graph_id: &str,
    ) -> MimoResult<Vec<Triple>> {
        let conn = lock(&self.conn)?;
        let hash = subject_hash(subject_id, subject_type);
        query_triples(
            &conn,
            &format!(
                "SELECT {TRIPLE_COLUMNS} FROM triples
                 WHERE subject_hash = ?1 AND graph_id = ?2
                 ORDER BY predicate, object_id"
            ),
            rusqlite::params![hash, graph_id],
        )
    }

    /// Triples with the given predicate, highest confidence first.
    pub fn get_by_predicate(
        &self,
        predicate: &str,
        filter: &PredicateFilter,
    ) -> MimoResult<Vec<Triple>> {
        let conn = lock(&self.conn)?;
        let min_conf = filter.min_confidence.unwrap_or(0.0) as f64;
        // SQLite treats a negative LIMIT as unbounded.
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        query_triples(
            &conn,
            &format!(
                "SELECT {TRIPLE_COLUMNS} FROM triples
                 WHERE predicate = ?1 AND graph_id = ?2 AND confidence >= ?3
                 ORDER BY confidence DESC, inserted_at ASC
                 LIMIT ?4"
            ),
            rusqlite::params![predicate, filter.graph_id, min_conf, limit],
        )
    }

    /// All triples whose object is `(object_id, object_type)`.
    pub fn get_by_object(
        &self,
        object_id: &str,
        object_type: &str,
        graph_id: &str,
    ) -> MimoResult<Vec<Triple>> {
        let conn = lock(&self.conn)?;
        query_triples(
            &conn,
            &format!(
                "SELECT {TRIPLE_COLUMNS} FROM triples
                 WHERE object_id = ?1 AND object_type = ?2 AND graph_id = ?3
                 ORDER BY subject_id, predicate"
            ),
            rusqlite::params![object_id, object_type, graph_id],
        )
    }

    /// Set the confidence of an existing triple.
    pub fn update_confidence(&self, id: TripleId, confidence: f32) -> MimoResult<Triple> {
        validate_confidence(confidence)?;
        let conn = lock(&self.conn)?;
        let changed = conn
            .execute(
                "UPDATE triples SET confidence = ?1, updated_at = ?2 WHERE id = ?3",
                rusqlite::params![confidence as f64, now_millis(), id.0.to_string()],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(MimoError::NotFound(format!("triple {id}")));
        }
        conn.query_row(
            &format!("SELECT {TRIPLE_COLUMNS} FROM triples WHERE id = ?1"),
            rusqlite::params![id.0.to_string()],
            row_to_triple,
        )
        .map_err(storage_err)
    }

    /// Delete a triple by id.
    pub fn delete(&self, id: TripleId) -> MimoResult<()> {
        let conn = lock(&self.conn)?;
        let changed = conn
            .execute(
                "DELETE FROM triples WHERE id = ?1",
                rusqlite::params![id.0.to_string()],
            )
            .map_err(storage_err)?;
        if changed == 0 {
            return Err(MimoError::NotFound(format!("triple {id}")));
        }
        Ok(())
    }

    /// Delete every triple of a subject. Returns the number removed.
    pub fn delete_by_subject(
        &self,
        subject_id: &str,
        subject_type: &str,
        graph_id: &str,
    ) -> MimoResult<usize> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "DELETE FROM triples WHERE subject_hash = ?1 AND graph_id = ?2",
            rusqlite::params![subject_hash(subject_id, subject_type), graph_id],
        )
        .map_err(storage_err)
    }

    /// Delete all triples whose TTL has elapsed.
    ///
    /// Never fails: a storage error is logged and reported as zero cleaned.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    /// Delete triples with `inserted_at + ttl < now`.
    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let result = lock(&self.conn).and_then(|conn| {
            conn.execute(
                "DELETE FROM triples WHERE expires_at IS NOT NULL AND expires_at < ?1",
                rusqlite::params![now.timestamp_millis()],
            )
            .map_err(storage_err)
        });
        match result {
            Ok(cleaned) => {
                if cleaned > 0 {
                    debug!(cleaned, "Removed expired triples");
                }
                cleaned
            }
            Err(e) => {
                warn!(error = %e, "Expired triple cleanup failed");
                0
            }
        }
    }

    /// Totals, predicate histogram, and mean confidence for a graph.
    pub fn stats(&self, graph_id: &str) -> MimoResult<TripleStats> {
        let conn = lock(&self.conn)?;
        let (total, average_confidence): (i64, Option<f64>) = conn
            .query_row(
                "SELECT COUNT(*), AVG(confidence) FROM triples WHERE graph_id = ?1",
                rusqlite::params![graph_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(storage_err)?;

        let mut stmt = conn
            .prepare_cached(
                "SELECT predicate, COUNT(*) FROM triples WHERE graph_id = ?1 GROUP BY predicate",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(rusqlite::params![graph_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(storage_err)?;
        let mut by_predicate = HashMap::new();
        for row in rows {
            let (predicate, count) = row.map_err(storage_err)?;
            by_predicate.insert(predicate, count as u64);
        }

        Ok(TripleStats {
            total: total as u64,
            by_predicate,
            average_confidence: average_confidence.unwrap_or(0.0),
        })
    }
}

/// Annotate a batch failure with the rows already committed.
fn with_committed(e: MimoError, committed: usize) -> MimoError {
    let note = |msg: String| format!("{msg} ({committed} rows committed before failure)");
    match e {
        MimoError::Conflict(m) => MimoError::Conflict(note(m)),
        MimoError::StorageUnavailable(m) => MimoError::StorageUnavailable(note(m)),
        MimoError::Storage(m) => MimoError::Storage(note(m)),
        MimoError::Serialization(m) => MimoError::Serialization(note(m)),
        other => other,
    }
}

fn build_triple(attrs: NewTriple, now_ms: i64) -> Triple {
    let now = crate::sql::from_millis(now_ms);
    Triple {
        id: TripleId::new(),
        subject_hash: subject_hash(&attrs.subject_id, &attrs.subject_type),
        subject_id: attrs.subject_id,
        subject_type: attrs.subject_type,
        predicate: attrs.predicate,
        object_id: attrs.object_id,
        object_type: attrs.object_type,
        confidence: attrs.confidence,
        source: attrs.source,
        ttl: attrs.ttl,
        metadata: attrs.metadata,
        context: attrs.context,
        graph_id: attrs.graph_id,
        inferred_by_rule_id: attrs.inferred_by_rule_id,
        inserted_at: now,
        updated_at: now,
    }
}

/// Bind a triple to a statement prepared from `INSERT_SQL` (or a variant).
fn execute_insert(stmt: &mut rusqlite::Statement<'_>, triple: &Triple) -> MimoResult<usize> {
    let inserted_at = triple.inserted_at.timestamp_millis();
    let metadata = encode_map(&triple.metadata)?;
    let context = encode_map(&triple.context)?;
    stmt.execute(rusqlite::params![
        triple.id.0.to_string(),
        triple.subject_hash,
        triple.subject_id,
        triple.subject_type,
        triple.predicate,
        triple.object_id,
        triple.object_type,
        triple.confidence as f64,
        triple.source,
        triple.ttl,
        expiry_millis(inserted_at, triple.ttl),
        metadata,
        context,
        triple.graph_id,
        triple.inferred_by_rule_id,
        inserted_at,
    ])
    .map_err(storage_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::run_migrations;

    fn setup() -> TripleRepository {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        TripleRepository::new(Arc::new(Mutex::new(conn)), 500)
    }

    fn works_at(person: &str, company: &str) -> NewTriple {
        NewTriple::new(person, "person", "works_at", company, "organization")
    }

    #[test]
    fn test_create_computes_subject_hash() {
        let repo = setup();
        let triple = repo.create(works_at("alice", "acme")).unwrap();
        assert_eq!(triple.subject_hash, subject_hash("alice", "person"));

        let fetched = repo.get(triple.id).unwrap().unwrap();
        assert_eq!(fetched, triple);
    }

    #[test]
    fn test_create_rejects_duplicate_natural_key() {
        let repo = setup();
        repo.create(works_at("alice", "acme")).unwrap();
        let err = repo
            .create(works_at("alice", "acme").with_confidence(0.4))
            .unwrap_err();
        assert!(matches!(err, MimoError::Conflict(_)));
    }

    #[test]
    fn test_upsert_replaces_confidence_in_place() {
        let repo = setup();
        let first = repo
            .upsert(works_at("alice", "acme").with_confidence(0.6).with_source("chat"))
            .unwrap();
        let second = repo
            .upsert(works_at("alice", "acme").with_confidence(0.95).with_ttl(60))
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.confidence, 0.95);
        assert_eq!(second.source, None);
        assert_eq!(second.ttl, Some(60));
        assert_eq!(second.inserted_at, first.inserted_at);
        assert_eq!(repo.stats(DEFAULT_GRAPH_ID).unwrap().total, 1);
    }

    #[test]
    fn test_confidence_bounds_on_write() {
        let repo = setup();
        assert!(matches!(
            repo.create(works_at("a", "x").with_confidence(-0.1)),
            Err(MimoError::Validation(_))
        ));
        assert!(matches!(
            repo.upsert(works_at("a", "x").with_confidence(1.5)),
            Err(MimoError::Validation(_))
        ));
        assert!(repo.create(works_at("a", "x").with_confidence(0.0)).is_ok());
        assert!(repo.upsert(works_at("b", "x").with_confidence(1.0)).is_ok());
    }

    #[test]
    fn test_create_rejects_non_positive_ttl() {
        let repo = setup();
        assert!(matches!(
            repo.create(works_at("a", "x").with_ttl(0)),
            Err(MimoError::Validation(_))
        ));
    }

    #[test]
    fn test_batch_create_skips_duplicates() {
        let repo = setup();
        repo.create(works_at("p0", "acme")).unwrap();
        let rows: Vec<NewTriple> = (0..1200)
            .map(|i| works_at(&format!("p{}", i % 1000), "acme"))
            .collect();
        let considered = repo.batch_create(rows).unwrap();
        assert_eq!(considered, 1200);
        assert_eq!(repo.stats(DEFAULT_GRAPH_ID).unwrap().total, 1000);
    }

    #[test]
    fn test_batch_create_validates_all_rows_first() {
        let repo = setup();
        let rows = vec![
            works_at("a", "acme"),
            works_at("b", "acme").with_confidence(2.0),
        ];
        assert!(matches!(
            repo.batch_create(rows),
            Err(MimoError::Validation(_))
        ));
        assert_eq!(repo.stats(DEFAULT_GRAPH_ID).unwrap().total, 0);
    }

    #[test]
    fn test_lookup_by_subject_predicate_object() {
        let repo = setup();
        repo.create(works_at("alice", "acme").with_confidence(0.8)).unwrap();
        repo.create(works_at("bob", "acme").with_confidence(0.9)).unwrap();
        repo.create(NewTriple::new("alice", "person", "knows", "bob", "person"))
            .unwrap();

        assert_eq!(
            repo.get_by_subject("alice", "person", DEFAULT_GRAPH_ID)
                .unwrap()
                .len(),
            2
        );
        assert!(repo
            .get_by_subject("alice", "project", DEFAULT_GRAPH_ID)
            .unwrap()
            .is_empty());
        assert_eq!(
            repo.get_by_object("acme", "organization", DEFAULT_GRAPH_ID)
                .unwrap()
                .len(),
            2
        );

        let by_pred = repo
            .get_by_predicate("works_at", &PredicateFilter::default())
            .unwrap();
        assert_eq!(by_pred[0].subject_id, "bob");
        assert_eq!(by_pred[1].subject_id, "alice");

        let filtered = repo
            .get_by_predicate(
                "works_at",
                &PredicateFilter {
                    min_confidence: Some(0.85),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(filtered.len(), 1);

        let limited = repo
            .get_by_predicate(
                "works_at",
                &PredicateFilter {
                    limit: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_graph_scoping() {
        let repo = setup();
        repo.create(works_at("alice", "acme").with_graph("tenant-a"))
            .unwrap();
        assert!(repo
            .get_by_subject("alice", "person", DEFAULT_GRAPH_ID)
            .unwrap()
            .is_empty());
        assert_eq!(
            repo.get_by_subject("alice", "person", "tenant-a")
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_natural_key_is_per_graph() {
        let repo = setup();
        let a = repo
            .create(works_at("alice", "acme").with_graph("tenant-a").with_confidence(0.9))
            .unwrap();

        let b = repo
            .upsert(works_at("alice", "acme").with_graph("tenant-b").with_confidence(0.1))
            .unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(b.graph_id, "tenant-b");
        let kept = repo.get_by_subject("alice", "person", "tenant-a").unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);

        assert!(repo
            .create(works_at("alice", "acme").with_graph("tenant-c"))
            .is_ok());
        assert!(matches!(
            repo.create(works_at("alice", "acme").with_graph("tenant-a")),
            Err(MimoError::Conflict(_))
        ));
    }

    #[test]
    fn test_create_rejects_unrepresentable_ttl() {
        let repo = setup();
        assert!(matches!(
            repo.create(works_at("a", "x").with_ttl(i64::MAX)),
            Err(MimoError::Validation(_))
        ));
    }

    #[test]
    fn test_batch_create_failure_keeps_earlier_chunks() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_boom BEFORE INSERT ON triples
             WHEN NEW.subject_id = 'boom'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )
        .unwrap();
        let repo = TripleRepository::new(Arc::new(Mutex::new(conn)), 2);

        let rows = vec![
            works_at("a", "acme"),
            works_at("b", "acme"),
            works_at("boom", "acme"),
            works_at("c", "acme"),
        ];
        let err = repo.batch_create(rows).unwrap_err();
        assert!(err.to_string().contains("2 rows committed"));
        assert_eq!(repo.stats(DEFAULT_GRAPH_ID).unwrap().total, 2);
    }

    #[test]
    fn test_update_confidence_and_not_found() {
        let repo = setup();
        let triple = repo.create(works_at("alice", "acme")).unwrap();
        let updated = repo.update_confidence(triple.id, 0.3).unwrap();
        assert_eq!(updated.confidence, 0.3);

        assert!(matches!(
            repo.update_confidence(TripleId::new(), 0.3),
            Err(MimoError::NotFound(_))
        ));
        assert!(matches!(
            repo.update_confidence(triple.id, 1.2),
            Err(MimoError::Validation(_))
        ));
    }

    #[test]
    fn test_delete_and_delete_by_subject() {
        let repo = setup();
        let t = repo.create(works_at("alice", "acme")).unwrap();
        repo.create(NewTriple::new("alice", "person", "knows", "bob", "person"))
            .unwrap();
        repo.create(works_at("bob", "acme")).unwrap();

        repo.delete(t.id).unwrap();
        assert!(repo.get(t.id).unwrap().is_none());
        assert!(matches!(repo.delete(t.id), Err(MimoError::NotFound(_))));

        let removed = repo
            .delete_by_subject("alice", "person", DEFAULT_GRAPH_ID)
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.stats(DEFAULT_GRAPH_ID).unwrap().total, 1);
    }

    #[test]
    fn test_ttl_expiry_boundary() {
        let repo = setup();
        let t = repo.create(works_at("alice", "acme").with_ttl(1)).unwrap();
        repo.create(works_at("bob", "acme")).unwrap();

        let inserted = t.inserted_at;
        assert_eq!(repo.cleanup_expired_at(inserted), 0);
        assert_eq!(
            repo.cleanup_expired_at(inserted + chrono::Duration::milliseconds(1000)),
            0
        );
        assert_eq!(
            repo.cleanup_expired_at(inserted + chrono::Duration::milliseconds(1001)),
            1
        );
        assert!(repo.get(t.id).unwrap().is_none());
        assert_eq!(repo.cleanup_expired(), 0);
    }

    #[test]
    fn test_upsert_recomputes_expiry_from_insert_time() {
        let repo = setup();
        let t = repo.create(works_at("alice", "acme").with_ttl(1)).unwrap();
        repo.upsert(works_at("alice", "acme").with_ttl(100)).unwrap();
        assert_eq!(
            repo.cleanup_expired_at(t.inserted_at + chrono::Duration::seconds(50)),
            0
        );
        repo.upsert(works_at("alice", "acme")).unwrap();
        assert_eq!(
            repo.cleanup_expired_at(t.inserted_at + chrono::Duration::days(365)),
            0
        );
    }

    #[test]
    fn test_cleanup_survives_missing_table() {
        let repo = setup();
        lock(&repo.conn)
            .unwrap()
            .execute_batch("DROP TABLE triples")
            .unwrap();
        assert_eq!(repo.cleanup_expired(), 0);
    }

    #[test]
    fn test_stats() {
        let repo = setup();
        repo.create(works_at("alice", "acme").with_confidence(0.5)).unwrap();
        repo.create(works_at("bob", "acme").with_confidence(1.0)).unwrap();
        repo.create(NewTriple::new("alice", "person", "knows", "bob", "person"))
            .unwrap();

        let stats = repo.stats(DEFAULT_GRAPH_ID).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_predicate.get("works_at"), Some(&2));
        assert_eq!(stats.by_predicate.get("knows"), Some(&1));
        assert!((stats.average_confidence - 0.8333).abs() < 0.001);

        let empty = repo.stats("other").unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.average_confidence, 0.0);
    }
}
