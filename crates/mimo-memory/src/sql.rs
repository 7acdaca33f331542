//! Row mapping and error classification shared by the triple stores.

use chrono::{DateTime, Utc};
use mimo_types::error::{MimoError, MimoResult};
use mimo_types::triple::{Triple, TripleId};
use rusqlite::{Connection, ErrorCode, Row};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Column list matching `row_to_triple`.
pub(crate) const TRIPLE_COLUMNS: &str = "id, subject_hash, subject_id, subject_type, predicate, \
     object_id, object_type, confidence, source, ttl, metadata, context, graph_id, \
     inferred_by_rule_id, inserted_at, updated_at";

/// SQL fragment excluding logically expired rows; binds `now` in millis.
pub(crate) fn not_expired(param: usize) -> String {
    format!("(expires_at IS NULL OR expires_at >= ?{param})")
}

pub(crate) fn lock(conn: &Mutex<Connection>) -> MimoResult<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| MimoError::Internal(e.to_string()))
}

/// Map a rusqlite error onto the store's error taxonomy.
pub(crate) fn storage_err(e: rusqlite::Error) -> MimoError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) => match err.code {
            ErrorCode::ConstraintViolation => MimoError::Conflict(e.to_string()),
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen => {
                MimoError::StorageUnavailable(e.to_string())
            }
            _ => MimoError::Storage(e.to_string()),
        },
        _ => MimoError::Storage(e.to_string()),
    }
}

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

/// `inserted_at + ttl`, in millis.
pub(crate) fn expiry_millis(inserted_at_ms: i64, ttl: Option<i64>) -> Option<i64> {
    ttl.map(|secs| inserted_at_ms.saturating_add(secs.saturating_mul(1000)))
}

pub(crate) fn encode_map(map: &HashMap<String, serde_json::Value>) -> MimoResult<String> {
    serde_json::to_string(map).map_err(|e| MimoError::Serialization(e.to_string()))
}

pub(crate) fn row_to_triple(row: &Row<'_>) -> rusqlite::Result<Triple> {
    let id_str: String = row.get(0)?;
    let id = uuid::Uuid::parse_str(&id_str).map(TripleId).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let confidence: f64 = row.get(7)?;
    let meta_str: String = row.get(10)?;
    let ctx_str: String = row.get(11)?;
    let inserted_ms: i64 = row.get(14)?;
    let updated_ms: i64 = row.get(15)?;
    Ok(Triple {
        id,
        subject_hash: row.get(1)?,
        subject_id: row.get(2)?,
        subject_type: row.get(3)?,
        predicate: row.get(4)?,
        object_id: row.get(5)?,
        object_type: row.get(6)?,
        confidence: confidence as f32,
        source: row.get(8)?,
        ttl: row.get(9)?,
        metadata: serde_json::from_str(&meta_str).unwrap_or_default(),
        context: serde_json::from_str(&ctx_str).unwrap_or_default(),
        graph_id: row.get(12)?,
        inferred_by_rule_id: row.get(13)?,
        inserted_at: from_millis(inserted_ms),
        updated_at: from_millis(updated_ms),
    })
}

/// Run a prepared triple query and collect the rows.
pub(crate) fn query_triples(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> MimoResult<Vec<Triple>> {
    let mut stmt = conn.prepare_cached(sql).map_err(storage_err)?;
    let rows = stmt
        .query_map(params, row_to_triple)
        .map_err(storage_err)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(storage_err)
}
