//! SemanticSubstrate: opens the database and wires the stores together.

use crate::anchors::{Embedder, SqliteAnchorIndex};
use crate::enrichment::spawn_anchor_worker;
use crate::migration::run_migrations;
use crate::observer::Observer;
use crate::query::QueryEngine;
use crate::repository::TripleRepository;
use crate::resolver::EntityResolver;
use crate::sql::storage_err;
use mimo_types::config::SemanticConfig;
use mimo_types::error::{MimoError, MimoResult};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// The semantic store over a single shared SQLite connection.
pub struct SemanticSubstrate {
    conn: Arc<Mutex<Connection>>,
    config: SemanticConfig,
    repository: TripleRepository,
    query: QueryEngine,
}

impl SemanticSubstrate {
    /// Open or create the database at `db_path`.
    pub fn open(db_path: &Path, config: SemanticConfig) -> MimoResult<Self> {
        config.validate()?;
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path).map_err(storage_err)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(storage_err)?;
        conn.busy_timeout(Duration::from_millis(config.storage.busy_timeout_ms))
            .map_err(storage_err)?;
        run_migrations(&conn).map_err(storage_err)?;
        info!(path = %db_path.display(), journal_mode = %mode, "Opened semantic store");
        Ok(Self::from_connection(conn, config))
    }

    /// Open the database at the configured path (`~/.mimo/semantic.db` by default).
    pub fn open_default(config: SemanticConfig) -> MimoResult<Self> {
        let path = config.storage.resolved_db_path();
        Self::open(&path, config)
    }

    /// Create an in-memory substrate (for testing).
    pub fn open_in_memory() -> MimoResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        run_migrations(&conn).map_err(storage_err)?;
        Ok(Self::from_connection(conn, SemanticConfig::default()))
    }

    fn from_connection(conn: Connection, config: SemanticConfig) -> Self {
        let conn = Arc::new(Mutex::new(conn));
        Self {
            repository: TripleRepository::new(
                Arc::clone(&conn),
                config.storage.batch_chunk_size,
            ),
            query: QueryEngine::new(Arc::clone(&conn)),
            conn,
            config,
        }
    }

    pub fn repository(&self) -> &TripleRepository {
        &self.repository
    }

    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    pub fn config(&self) -> &SemanticConfig {
        &self.config
    }

    /// Anchor index over this database's `memories` table.
    pub fn anchor_index(&self, embedder: Arc<dyn Embedder>) -> SqliteAnchorIndex {
        SqliteAnchorIndex::new(Arc::clone(&self.conn), embedder)
    }

    /// A resolver with its anchor enrichment worker.
    ///
    /// Must be called inside a tokio runtime. The worker stops once the
    /// resolver and all its clones are dropped.
    pub fn resolver(&self, embedder: Arc<dyn Embedder>) -> EntityResolver {
        let index = Arc::new(self.anchor_index(embedder));
        let (sender, _worker) =
            spawn_anchor_worker(index.clone(), self.config.resolver.enrichment_queue_capacity);
        EntityResolver::new(index).with_enrichment(sender)
    }

    pub fn observer(&self) -> Observer {
        Observer::new(self.config.observer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchors::tests::TrigramEmbedder;
    use mimo_types::resolution::{ExpectedType, Resolution, ResolveOptions};
    use mimo_types::triple::{ClosureOptions, EntityRef, NewTriple, DEFAULT_GRAPH_ID};

    #[test]
    fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("semantic.db");
        {
            let store = SemanticSubstrate::open(&path, SemanticConfig::default()).unwrap();
            store
                .repository()
                .create(NewTriple::new("ada", "person", "works_at", "acme", "org"))
                .unwrap();
        }
        let store = SemanticSubstrate::open(&path, SemanticConfig::default()).unwrap();
        let rels = store
            .query()
            .get_relationships(&EntityRef::new("ada", "person"), DEFAULT_GRAPH_ID);
        assert_eq!(rels.outgoing.len(), 1);
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SemanticConfig::default();
        config.storage.batch_chunk_size = 0;
        let result = SemanticSubstrate::open(&dir.path().join("semantic.db"), config);
        assert!(matches!(result, Err(MimoError::Config(_))));
    }

    #[test]
    fn test_components_share_one_database() {
        let store = SemanticSubstrate::open_in_memory().unwrap();
        store
            .repository()
            .batch_create(vec![
                NewTriple::new("a", "node", "next", "b", "node"),
                NewTriple::new("b", "node", "next", "c", "node"),
            ])
            .unwrap();
        let reached = store.query().transitive_closure(
            &EntityRef::new("a", "node"),
            "next",
            &ClosureOptions::from_config(&store.config().query),
        );
        assert_eq!(reached.len(), 2);
    }

    #[tokio::test]
    async fn test_resolver_uses_store_anchors() {
        let store = SemanticSubstrate::open_in_memory().unwrap();
        let resolver = store.resolver(Arc::new(TrigramEmbedder));
        let opts = ResolveOptions::from_config(&store.config().resolver);
        let first = resolver
            .resolve_entity("Acme Corp", &ExpectedType::of("org"), &opts)
            .await
            .unwrap();
        assert_eq!(first, Resolution::Resolved("org:acme_corp".into()));

        let index = store.anchor_index(Arc::new(TrigramEmbedder));
        assert_eq!(index.anchors_for("org:acme_corp").unwrap().len(), 1);
    }
}
