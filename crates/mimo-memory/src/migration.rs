//! SQLite schema creation and migration.
//!
//! Creates the triple table, its traversal indexes, and the vector-searchable
//! memory table on first boot.

use rusqlite::Connection;

/// Current schema version.
const SCHEMA_VERSION: u32 = 3;

/// Run all migrations to bring the database up to date.
pub fn run_migrations(conn: &Connection) -> Result<(), rusqlite::Error> {
    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    if current_version < 2 {
        migrate_v2(conn)?;
    }

    if current_version < 3 {
        migrate_v3(conn)?;
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Get the current schema version from the database.
fn get_schema_version(conn: &Connection) -> u32 {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0)
}

/// Set the schema version in the database.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "user_version", version)
}

/// Version 1: triples, memories, and the natural-key constraint.
fn migrate_v1(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        -- SPO facts
        CREATE TABLE IF NOT EXISTS triples (
            id TEXT PRIMARY KEY,
            subject_hash TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            subject_type TEXT NOT NULL,
            predicate TEXT NOT NULL,
            object_id TEXT NOT NULL,
            object_type TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 1.0
                CHECK (confidence >= 0.0 AND confidence <= 1.0),
            source TEXT,
            ttl INTEGER CHECK (ttl IS NULL OR ttl > 0),
            expires_at INTEGER,
            metadata TEXT NOT NULL DEFAULT '{}',
            context TEXT NOT NULL DEFAULT '{}',
            graph_id TEXT NOT NULL DEFAULT 'global',
            inferred_by_rule_id TEXT,
            inserted_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (subject_hash, predicate, object_id, object_type)
        );
        CREATE INDEX IF NOT EXISTS idx_triples_subject
            ON triples(subject_hash, predicate, object_id);
        CREATE INDEX IF NOT EXISTS idx_triples_object
            ON triples(object_id, subject_hash, predicate);
        CREATE INDEX IF NOT EXISTS idx_triples_predicate ON triples(predicate);
        CREATE INDEX IF NOT EXISTS idx_triples_expires
            ON triples(expires_at) WHERE expires_at IS NOT NULL;

        -- Vector-searchable memory records (entity anchors live here)
        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            category TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            embedding BLOB DEFAULT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category);

        -- Migration tracking
        CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL,
            description TEXT
        );

        INSERT OR IGNORE INTO migrations (version, applied_at, description)
        VALUES (1, datetime('now'), 'Initial schema');
        ",
    )?;
    Ok(())
}

/// Version 2: indexes for id-addressed path search and per-graph aggregates.
fn migrate_v2(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_triples_subject_id ON triples(subject_id, predicate);
        CREATE INDEX IF NOT EXISTS idx_triples_graph_type ON triples(graph_id, subject_type);

        INSERT OR IGNORE INTO migrations (version, applied_at, description)
        VALUES (2, datetime('now'), 'Add path search and aggregate indexes');
        ",
    )?;
    Ok(())
}

/// Version 3: scope the natural key to its graph.
///
/// SQLite cannot alter a table constraint, so the table is rebuilt and its
/// indexes recreated.
fn migrate_v3(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        BEGIN;
        CREATE TABLE triples_v3 (
            id TEXT PRIMARY KEY,
            subject_hash TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            subject_type TEXT NOT NULL,
            predicate TEXT NOT NULL,
            object_id TEXT NOT NULL,
            object_type TEXT NOT NULL,
            confidence REAL NOT NULL DEFAULT 1.0
                CHECK (confidence >= 0.0 AND confidence <= 1.0),
            source TEXT,
            ttl INTEGER CHECK (ttl IS NULL OR ttl > 0),
            expires_at INTEGER,
            metadata TEXT NOT NULL DEFAULT '{}',
            context TEXT NOT NULL DEFAULT '{}',
            graph_id TEXT NOT NULL DEFAULT 'global',
            inferred_by_rule_id TEXT,
            inserted_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE (graph_id, subject_hash, predicate, object_id, object_type)
        );
        INSERT INTO triples_v3 SELECT
            id, subject_hash, subject_id, subject_type, predicate, object_id, object_type,
            confidence, source, ttl, expires_at, metadata, context, graph_id,
            inferred_by_rule_id, inserted_at, updated_at
        FROM triples;
        DROP TABLE triples;
        ALTER TABLE triples_v3 RENAME TO triples;

        CREATE INDEX IF NOT EXISTS idx_triples_subject
            ON triples(subject_hash, predicate, object_id);
        CREATE INDEX IF NOT EXISTS idx_triples_object
            ON triples(object_id, subject_hash, predicate);
        CREATE INDEX IF NOT EXISTS idx_triples_predicate ON triples(predicate);
        CREATE INDEX IF NOT EXISTS idx_triples_expires
            ON triples(expires_at) WHERE expires_at IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_triples_subject_id ON triples(subject_id, predicate);
        CREATE INDEX IF NOT EXISTS idx_triples_graph_type ON triples(graph_id, subject_type);

        INSERT OR IGNORE INTO migrations (version, applied_at, description)
        VALUES (3, datetime('now'), 'Scope natural key to graph_id');
        COMMIT;
        ",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"triples".to_string()));
        assert!(tables.contains(&"memories".to_string()));
        assert!(tables.contains(&"migrations".to_string()));
    }

    #[test]
    fn test_migration_creates_traversal_indexes() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND tbl_name='triples'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for name in [
            "idx_triples_subject",
            "idx_triples_object",
            "idx_triples_predicate",
            "idx_triples_subject_id",
        ] {
            assert!(indexes.contains(&name.to_string()), "missing {name}");
        }
    }

    #[test]
    fn test_v3_rebuild_keeps_rows_and_scopes_key() {
        let conn = Connection::open_in_memory().unwrap();
        migrate_v1(&conn).unwrap();
        migrate_v2(&conn).unwrap();
        set_schema_version(&conn, 2).unwrap();
        conn.execute(
            "INSERT INTO triples (id, subject_hash, subject_id, subject_type, predicate,
                 object_id, object_type, graph_id, inserted_at, updated_at)
             VALUES ('t1', 'h', 'a', 'node', 'rel', 'b', 'node', 'tenant_a', 0, 0)",
            [],
        )
        .unwrap();

        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);

        let kept: i64 = conn
            .query_row("SELECT COUNT(*) FROM triples WHERE id = 't1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(kept, 1);
        conn.execute(
            "INSERT INTO triples (id, subject_hash, subject_id, subject_type, predicate,
                 object_id, object_type, graph_id, inserted_at, updated_at)
             VALUES ('t2', 'h', 'a', 'node', 'rel', 'b', 'node', 'tenant_b', 0, 0)",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO triples (id, subject_hash, subject_id, subject_type, predicate,
                 object_id, object_type, graph_id, inserted_at, updated_at)
             VALUES ('t3', 'h', 'a', 'node', 'rel', 'b', 'node', 'tenant_b', 0, 0)",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_migration_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), SCHEMA_VERSION);
    }
}
