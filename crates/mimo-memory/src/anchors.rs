//! Entity anchors: vector-searchable memory records linking mentions to ids.
//!
//! Anchors are stored in the `memories` table under the `entity_anchor`
//! category, with their unit-length embedding as a little-endian f32 BLOB.
//! Search embeds the query text, filters candidates by graph and type in SQL,
//! and keeps the top hits by cosine similarity.

use crate::sql::{lock, now_millis, storage_err};
use crate::vector::{
    cosine_similarity, embedding_from_bytes, embedding_to_bytes, normalize_vector, top_k,
};
use async_trait::async_trait;
use mimo_types::error::{MimoError, MimoResult};
use mimo_types::resolution::{AnchorFilter, AnchorHit, EntityAnchor, ENTITY_ANCHOR_CATEGORY};
use mimo_types::triple::DEFAULT_GRAPH_ID;
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// Computes text embeddings. Implemented outside this crate.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Compute the embedding for a single text.
    async fn embed_one(&self, text: &str) -> MimoResult<Vec<f32>>;
}

/// The vector search capability the resolver needs.
#[async_trait]
pub trait AnchorIndex: Send + Sync {
    /// Ranked hits for `text` satisfying `filter`, best first.
    ///
    /// The filter is applied before `limit`, so anchors outside the requested
    /// graph or type never crowd out matching ones.
    async fn search(
        &self,
        text: &str,
        filter: &AnchorFilter,
        limit: usize,
    ) -> MimoResult<Vec<AnchorHit>>;

    /// Persist an anchor. Returns `false` when an anchor with the same
    /// `(ref, content, graph_id)` already exists and nothing was written.
    async fn insert_anchor(&self, anchor: &EntityAnchor) -> MimoResult<bool>;
}

/// Anchor index backed by the SQLite `memories` table.
#[derive(Clone)]
pub struct SqliteAnchorIndex {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<dyn Embedder>,
}

impl SqliteAnchorIndex {
    /// Create a new anchor index wrapping the given connection.
    pub fn new(conn: Arc<Mutex<Connection>>, embedder: Arc<dyn Embedder>) -> Self {
        Self { conn, embedder }
    }

    /// All anchors that resolve to `entity_ref`, oldest first.
    pub fn anchors_for(&self, entity_ref: &str) -> MimoResult<Vec<EntityAnchor>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT content, metadata FROM memories
                 WHERE category = ?1 AND json_extract(metadata, '$.ref') = ?2
                 ORDER BY created_at, rowid",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(rusqlite::params![ENTITY_ANCHOR_CATEGORY, entity_ref], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(storage_err)?;

        let mut anchors = Vec::new();
        for row in rows {
            let (content, meta_str) = row.map_err(storage_err)?;
            let meta: HashMap<String, serde_json::Value> =
                serde_json::from_str(&meta_str).unwrap_or_default();
            let field = |key: &str| {
                meta.get(key)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            anchors.push(EntityAnchor {
                content,
                graph_id: field("graph_id"),
                entity_type: field("entity_type"),
                entity_ref: field("ref"),
            });
        }
        Ok(anchors)
    }
}

#[async_trait]
impl AnchorIndex for SqliteAnchorIndex {
    async fn search(
        &self,
        text: &str,
        filter: &AnchorFilter,
        limit: usize,
    ) -> MimoResult<Vec<AnchorHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let query = normalize_vector(&self.embedder.embed_one(text).await?)?;

        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT metadata, embedding FROM memories
                 WHERE category = ?1 AND embedding IS NOT NULL
                   AND json_extract(metadata, '$.ref') IS NOT NULL
                   AND (?2 IS NULL
                        OR COALESCE(json_extract(metadata, '$.graph_id'), ?4) = ?2)
                   AND (?3 IS NULL OR json_extract(metadata, '$.entity_type') = ?3)",
            )
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(
                rusqlite::params![
                    filter.category,
                    filter.graph_id,
                    filter.entity_type,
                    DEFAULT_GRAPH_ID
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .map_err(storage_err)?;

        let mut scanned = 0usize;
        let mut scored = Vec::new();
        for row in rows {
            let (meta_str, embedding_bytes) = row.map_err(storage_err)?;
            scanned += 1;
            let embedding = embedding_from_bytes(&embedding_bytes);
            if embedding.len() != query.len() {
                continue;
            }
            scored.push((meta_str, cosine_similarity(&query, &embedding)));
        }
        drop(stmt);
        drop(conn);

        let mut hits = Vec::new();
        for (meta_str, score) in top_k(scored, limit) {
            let metadata: HashMap<String, serde_json::Value> =
                serde_json::from_str(&meta_str).unwrap_or_default();
            let Some(entity_ref) = metadata.get("ref").and_then(|v| v.as_str()) else {
                continue;
            };
            hits.push(AnchorHit {
                entity_ref: entity_ref.to_string(),
                score,
                metadata,
            });
        }
        debug!(
            "Anchor search: {} results from {} candidates",
            hits.len(),
            scanned
        );
        Ok(hits)
    }

    async fn insert_anchor(&self, anchor: &EntityAnchor) -> MimoResult<bool> {
        // Embed before taking the lock; the existence check and insert then
        // run under one guard so concurrent duplicates collapse to one row.
        let embedding = normalize_vector(&self.embedder.embed_one(&anchor.content).await?)?;
        let meta_str = serde_json::to_string(&anchor.metadata())
            .map_err(|e| MimoError::Serialization(e.to_string()))?;

        let conn = lock(&self.conn)?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM memories
                 WHERE category = ?1 AND content = ?2
                   AND json_extract(metadata, '$.ref') = ?3
                   AND json_extract(metadata, '$.graph_id') = ?4
                 LIMIT 1",
                rusqlite::params![
                    ENTITY_ANCHOR_CATEGORY,
                    anchor.content,
                    anchor.entity_ref,
                    anchor.graph_id
                ],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        if existing.is_some() {
            return Ok(false);
        }

        conn.execute(
            "INSERT INTO memories (id, content, category, metadata, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                Uuid::new_v4().to_string(),
                anchor.content,
                ENTITY_ANCHOR_CATEGORY,
                meta_str,
                embedding_to_bytes(&embedding),
                now_millis(),
            ],
        )
        .map_err(storage_err)?;
        debug!(
            entity_ref = %anchor.entity_ref,
            graph_id = %anchor.graph_id,
            "Stored entity anchor"
        );
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::migration::run_migrations;
    use mimo_types::resolution::ExpectedType;

    /// Deterministic embedder hashing character trigrams into a fixed-width vector.
    pub(crate) struct TrigramEmbedder;

    #[async_trait]
    impl Embedder for TrigramEmbedder {
        async fn embed_one(&self, text: &str) -> MimoResult<Vec<f32>> {
            let padded: Vec<char> = format!("  {}  ", text.to_lowercase()).chars().collect();
            let mut v = vec![0.0f32; 64];
            for w in padded.windows(3) {
                let mut h: u32 = 2166136261;
                for c in w {
                    h = (h ^ *c as u32).wrapping_mul(16777619);
                }
                v[(h % 64) as usize] += 1.0;
            }
            Ok(v)
        }
    }

    pub(crate) fn setup_index() -> SqliteAnchorIndex {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        SqliteAnchorIndex::new(Arc::new(Mutex::new(conn)), Arc::new(TrigramEmbedder))
    }

    fn entities() -> AnchorFilter {
        AnchorFilter::category(ENTITY_ANCHOR_CATEGORY)
    }

    fn anchor(content: &str, entity_ref: &str, graph_id: &str) -> EntityAnchor {
        EntityAnchor {
            content: content.to_string(),
            graph_id: graph_id.to_string(),
            entity_type: "person".to_string(),
            entity_ref: entity_ref.to_string(),
        }
    }

    #[tokio::test]
    async fn test_search_ranks_exact_mention_first() {
        let index = setup_index();
        index
            .insert_anchor(&anchor("Ada Lovelace", "person:ada_lovelace", "global"))
            .await
            .unwrap();
        index
            .insert_anchor(&anchor("Alan Turing", "person:alan_turing", "global"))
            .await
            .unwrap();

        let hits = index
            .search("Ada Lovelace", &entities(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].entity_ref, "person:ada_lovelace");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
        assert!(hits[1].score < hits[0].score);
        assert_eq!(hits[0].graph_id(), "global");
        assert_eq!(hits[0].entity_type(), Some("person"));
    }

    #[tokio::test]
    async fn test_search_respects_category_and_limit() {
        let index = setup_index();
        for i in 0..5 {
            index
                .insert_anchor(&anchor(
                    &format!("Person {i}"),
                    &format!("person:p{i}"),
                    "global",
                ))
                .await
                .unwrap();
        }
        let hits = index
            .search("Person 1", &entities(), 3)
            .await
            .unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].entity_ref, "person:p1");
        let episodic = AnchorFilter::category("episodic");
        assert!(index.search("Person 1", &episodic, 3).await.unwrap().is_empty());
        assert!(index.search("Person 1", &entities(), 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_insert_anchor_is_idempotent() {
        let index = setup_index();
        let a = anchor("Ada", "person:ada", "global");
        assert!(index.insert_anchor(&a).await.unwrap());
        assert!(!index.insert_anchor(&a).await.unwrap());
        assert!(index
            .insert_anchor(&anchor("Ada", "person:ada", "tenant"))
            .await
            .unwrap());
        assert!(index
            .insert_anchor(&anchor("Countess of Lovelace", "person:ada", "global"))
            .await
            .unwrap());

        let stored = index.anchors_for("person:ada").unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0], a);
    }

    #[tokio::test]
    async fn test_search_filters_graph_and_type_before_limit() {
        let index = setup_index();
        for i in 0..5 {
            index
                .insert_anchor(&anchor("Ada", &format!("person:ada_{i}"), &format!("t{i}")))
                .await
                .unwrap();
        }
        index
            .insert_anchor(&anchor("Ada Byron", "person:ada", "global"))
            .await
            .unwrap();
        let mut org = anchor("Ada", "org:ada", "global");
        org.entity_type = "org".to_string();
        index.insert_anchor(&org).await.unwrap();

        let filter = AnchorFilter::entities(&ExpectedType::of("person"), "global");
        let hits = index.search("Ada", &filter, 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_ref, "person:ada");

        let auto = AnchorFilter::entities(&ExpectedType::Auto, "global");
        let hits = index.search("Ada", &auto, 1).await.unwrap();
        assert_eq!(hits[0].entity_ref, "org:ada");
    }

    #[tokio::test]
    async fn test_stored_embeddings_are_unit_length() {
        let index = setup_index();
        index
            .insert_anchor(&anchor("Ada Lovelace", "person:ada_lovelace", "global"))
            .await
            .unwrap();
        let conn = lock(&index.conn).unwrap();
        let bytes: Vec<u8> = conn
            .query_row("SELECT embedding FROM memories", [], |row| row.get(0))
            .unwrap();
        let norm: f32 = embedding_from_bytes(&bytes).iter().map(|x| x * x).sum();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
