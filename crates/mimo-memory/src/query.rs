//! Graph queries over the triple store.
//!
//! Every operation here is a read. Storage failures are logged and degrade to
//! an empty result (`NoPath`, empty map), so callers can always treat the
//! output as "what is known", never as an error.
//!
//! Traversals expand level by level using the `(subject_hash, predicate, ..)`
//! and `(object_id, ..)` indexes, one indexed lookup per frontier node.
//! Logically expired triples are skipped.

use crate::sql::{lock, not_expired, now_millis, query_triples, storage_err, TRIPLE_COLUMNS};
use mimo_types::error::MimoResult;
use mimo_types::triple::{
    subject_hash, ClosureOptions, Direction, Entity, EntityRef, PathOptions, PathResult,
    PatternClause, Relationships, Term, Triple,
};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Max bound parameters per `IN (...)` lookup.
const IN_CHUNK: usize = 500;

/// Read-side query engine backed by SQLite.
#[derive(Clone)]
pub struct QueryEngine {
    conn: Arc<Mutex<Connection>>,
}

impl QueryEngine {
    /// Create a new query engine wrapping the given connection.
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// All entities reachable from `start` via `predicate` edges.
    ///
    /// The root is excluded. Each reachable node appears once, carrying the
    /// first path discovered for it; results are ordered by ascending depth.
    pub fn transitive_closure(
        &self,
        start: &EntityRef,
        predicate: &str,
        opts: &ClosureOptions,
    ) -> Vec<Entity> {
        self.try_transitive_closure(start, predicate, opts)
            .unwrap_or_else(|e| {
                warn!(error = %e, start = %start.id, predicate, "Transitive closure failed");
                Vec::new()
            })
    }

    fn try_transitive_closure(
        &self,
        start: &EntityRef,
        predicate: &str,
        opts: &ClosureOptions,
    ) -> MimoResult<Vec<Entity>> {
        let conn = lock(&self.conn)?;
        let now = now_millis();
        let min_conf = opts.min_confidence as f64;
        let sql = match opts.direction {
            Direction::Forward => format!(
                "SELECT object_id, object_type FROM triples
                 WHERE subject_hash = ?1 AND predicate = ?2 AND confidence >= ?3
                   AND graph_id = ?4 AND {}
                 ORDER BY confidence DESC, object_id",
                not_expired(5)
            ),
            Direction::Backward => format!(
                "SELECT subject_id, subject_type FROM triples
                 WHERE object_id = ?1 AND object_type = ?2 AND predicate = ?3
                   AND confidence >= ?4 AND graph_id = ?5 AND {}
                 ORDER BY confidence DESC, subject_id",
                not_expired(6)
            ),
        };
        let mut stmt = conn.prepare_cached(&sql).map_err(storage_err)?;
        let read_pair = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, String)> {
            Ok((row.get(0)?, row.get(1)?))
        };

        let mut visited: HashSet<(String, String)> = HashSet::new();
        visited.insert((start.id.clone(), start.entity_type.clone()));
        let mut frontier = vec![Entity {
            id: start.id.clone(),
            entity_type: start.entity_type.clone(),
            depth: 0,
            path: vec![start.id.clone()],
        }];
        let mut reached = Vec::new();

        for depth in 1..=opts.max_depth {
            let mut next = Vec::new();
            for node in &frontier {
                let neighbors = match opts.direction {
                    Direction::Forward => stmt.query_map(
                        rusqlite::params![
                            subject_hash(&node.id, &node.entity_type),
                            predicate,
                            min_conf,
                            opts.graph_id,
                            now
                        ],
                        read_pair,
                    ),
                    Direction::Backward => stmt.query_map(
                        rusqlite::params![
                            node.id,
                            node.entity_type,
                            predicate,
                            min_conf,
                            opts.graph_id,
                            now
                        ],
                        read_pair,
                    ),
                }
                .map_err(storage_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(storage_err)?;

                for (id, entity_type) in neighbors {
                    // Never step back onto the current path.
                    if node.path.contains(&id) {
                        continue;
                    }
                    if !visited.insert((id.clone(), entity_type.clone())) {
                        continue;
                    }
                    let mut path = node.path.clone();
                    path.push(id.clone());
                    let entity = Entity {
                        id,
                        entity_type,
                        depth,
                        path,
                    };
                    reached.push(entity.clone());
                    next.push(entity);
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        debug!(
            start = %start.id,
            predicate,
            reached = reached.len(),
            "Transitive closure complete"
        );
        Ok(reached)
    }

    /// Full neighborhoods of every subject satisfying all clauses.
    ///
    /// Each clause yields a set of subject identities; the sets are
    /// intersected and every triple of each surviving subject is returned,
    /// not only the edges that matched.
    pub fn pattern_match(&self, clauses: &[PatternClause], graph_id: &str) -> Vec<Triple> {
        if clauses.is_empty() {
            return Vec::new();
        }
        self.try_pattern_match(clauses, graph_id)
            .unwrap_or_else(|e| {
                warn!(error = %e, clauses = clauses.len(), "Pattern match failed");
                Vec::new()
            })
    }

    fn try_pattern_match(
        &self,
        clauses: &[PatternClause],
        graph_id: &str,
    ) -> MimoResult<Vec<Triple>> {
        let conn = lock(&self.conn)?;
        let now = now_millis();

        let mut subjects: Option<HashSet<String>> = None;
        for clause in clauses {
            let matched = clause_subjects(&conn, clause, graph_id, now)?;
            let narrowed = match subjects {
                None => matched,
                Some(prev) => prev.intersection(&matched).cloned().collect(),
            };
            if narrowed.is_empty() {
                return Ok(Vec::new());
            }
            subjects = Some(narrowed);
        }

        let mut hashes: Vec<String> = subjects.unwrap_or_default().into_iter().collect();
        hashes.sort();

        let mut triples = Vec::new();
        for chunk in hashes.chunks(IN_CHUNK) {
            let placeholders: Vec<String> =
                (0..chunk.len()).map(|i| format!("?{}", i + 3)).collect();
            let sql = format!(
                "SELECT {TRIPLE_COLUMNS} FROM triples
                 WHERE graph_id = ?1 AND {} AND subject_hash IN ({})
                 ORDER BY subject_id, predicate, object_id",
                not_expired(2),
                placeholders.join(", ")
            );
            let mut params: Vec<&dyn rusqlite::types::ToSql> =
                vec![&graph_id as &dyn rusqlite::types::ToSql, &now];
            params.extend(chunk.iter().map(|h| h as &dyn rusqlite::types::ToSql));
            triples.extend(query_triples(&conn, &sql, &params)?);
        }
        Ok(triples)
    }

    /// Fewest-hop path from `from_id` to `to_id` along forward `predicate` edges.
    ///
    /// Single-direction breadth-first search bounded by `max_depth`; expansion
    /// stops on first arrival at the destination.
    pub fn find_path(
        &self,
        from_id: &str,
        to_id: &str,
        predicate: &str,
        opts: &PathOptions,
    ) -> PathResult {
        self.try_find_path(from_id, to_id, predicate, opts)
            .unwrap_or_else(|e| {
                warn!(error = %e, from = from_id, to = to_id, "Path search failed");
                PathResult::NoPath
            })
    }

    fn try_find_path(
        &self,
        from_id: &str,
        to_id: &str,
        predicate: &str,
        opts: &PathOptions,
    ) -> MimoResult<PathResult> {
        if from_id == to_id {
            return Ok(PathResult::Found {
                path: vec![from_id.to_string()],
            });
        }
        let conn = lock(&self.conn)?;
        let now = now_millis();
        let min_conf = opts.min_confidence as f64;
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT DISTINCT object_id FROM triples
                 WHERE subject_id = ?1 AND predicate = ?2 AND confidence >= ?3
                   AND graph_id = ?4 AND {}
                 ORDER BY object_id",
                not_expired(5)
            ))
            .map_err(storage_err)?;

        // child -> parent, for path reconstruction
        let mut parents: HashMap<String, String> = HashMap::new();
        let mut visited: HashSet<String> = HashSet::from([from_id.to_string()]);
        let mut frontier = vec![from_id.to_string()];

        for _ in 0..opts.max_depth {
            let mut next = Vec::new();
            for node in &frontier {
                let neighbors = stmt
                    .query_map(
                        rusqlite::params![node, predicate, min_conf, opts.graph_id, now],
                        |row| row.get::<_, String>(0),
                    )
                    .map_err(storage_err)?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(storage_err)?;
                for id in neighbors {
                    if !visited.insert(id.clone()) {
                        continue;
                    }
                    parents.insert(id.clone(), node.clone());
                    if id == to_id {
                        return Ok(PathResult::Found {
                            path: reconstruct(&parents, from_id, to_id),
                        });
                    }
                    next.push(id);
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(PathResult::NoPath)
    }

    /// Outgoing and incoming edges of an entity. Unknown entities yield empty lists.
    pub fn get_relationships(&self, entity: &EntityRef, graph_id: &str) -> Relationships {
        self.try_get_relationships(entity, graph_id)
            .unwrap_or_else(|e| {
                warn!(error = %e, entity = %entity.id, "Relationship lookup failed");
                Relationships::default()
            })
    }

    fn try_get_relationships(
        &self,
        entity: &EntityRef,
        graph_id: &str,
    ) -> MimoResult<Relationships> {
        let conn = lock(&self.conn)?;
        let now = now_millis();
        let hash = subject_hash(&entity.id, &entity.entity_type);
        let outgoing = query_triples(
            &conn,
            &format!(
                "SELECT {TRIPLE_COLUMNS} FROM triples
                 WHERE subject_hash = ?1 AND graph_id = ?2 AND {}
                 ORDER BY confidence DESC, predicate",
                not_expired(3)
            ),
            rusqlite::params![hash, graph_id, now],
        )?;
        let incoming = query_triples(
            &conn,
            &format!(
                "SELECT {TRIPLE_COLUMNS} FROM triples
                 WHERE object_id = ?1 AND object_type = ?2 AND graph_id = ?3 AND {}
                 ORDER BY confidence DESC, predicate",
                not_expired(4)
            ),
            rusqlite::params![entity.id, entity.entity_type, graph_id, now],
        )?;
        Ok(Relationships { outgoing, incoming })
    }

    /// Triple counts grouped by subject type.
    pub fn count_by_type(&self, graph_id: &str) -> HashMap<String, u64> {
        self.try_count_by_type(graph_id).unwrap_or_else(|e| {
            warn!(error = %e, graph_id, "Count by type failed");
            HashMap::new()
        })
    }

    fn try_count_by_type(&self, graph_id: &str) -> MimoResult<HashMap<String, u64>> {
        let conn = lock(&self.conn)?;
        let mut stmt = conn
            .prepare_cached(&format!(
                "SELECT subject_type, COUNT(*) FROM triples
                 WHERE graph_id = ?1 AND {}
                 GROUP BY subject_type",
                not_expired(2)
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(rusqlite::params![graph_id, now_millis()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(storage_err)?;
        let mut counts = HashMap::new();
        for row in rows {
            let (subject_type, count) = row.map_err(storage_err)?;
            counts.insert(subject_type, count as u64);
        }
        Ok(counts)
    }
}

/// Subject hashes satisfying a single clause.
fn clause_subjects(
    conn: &Connection,
    clause: &PatternClause,
    graph_id: &str,
    now: i64,
) -> MimoResult<HashSet<String>> {
    let mut sql = format!(
        "SELECT DISTINCT subject_hash FROM triples
         WHERE graph_id = ?1 AND predicate = ?2 AND {}",
        not_expired(3)
    );
    let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
        Box::new(graph_id.to_string()),
        Box::new(clause.predicate.clone()),
        Box::new(now),
    ];
    let mut idx = 4;

    match &clause.subject {
        Term::Any => {}
        Term::Id(id) => {
            sql.push_str(&format!(" AND subject_id = ?{idx}"));
            params.push(Box::new(id.clone()));
            idx += 1;
        }
        Term::Entity(entity) => {
            sql.push_str(&format!(" AND subject_hash = ?{idx}"));
            params.push(Box::new(subject_hash(&entity.id, &entity.entity_type)));
            idx += 1;
        }
    }
    match &clause.object {
        Term::Any => {}
        Term::Id(id) => {
            sql.push_str(&format!(" AND object_id = ?{idx}"));
            params.push(Box::new(id.clone()));
        }
        Term::Entity(entity) => {
            sql.push_str(&format!(" AND object_id = ?{idx} AND object_type = ?{}", idx + 1));
            params.push(Box::new(entity.id.clone()));
            params.push(Box::new(entity.entity_type.clone()));
        }
    }

    let mut stmt = conn.prepare(&sql).map_err(storage_err)?;
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))
        .map_err(storage_err)?;
    rows.collect::<Result<HashSet<_>, _>>().map_err(storage_err)
}

fn reconstruct(parents: &HashMap<String, String>, from_id: &str, to_id: &str) -> Vec<String> {
    let mut path = vec![to_id.to_string()];
    let mut cursor = to_id;
    while cursor != from_id {
        match parents.get(cursor) {
            Some(parent) => {
                path.push(parent.clone());
                cursor = parent;
            }
            None => break,
        }
    }
    path.reverse();
    path
}
