//! Triple data model: SPO facts, insert attributes, and traversal result shapes.

use crate::config::QueryConfig;
use crate::error::{MimoError, MimoResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// Namespace used when a caller does not name one.
pub const DEFAULT_GRAPH_ID: &str = "global";

/// Maximum accepted predicate length.
pub const MAX_PREDICATE_LEN: usize = 255;

/// Longest accepted TTL: 100 years, in seconds.
pub const MAX_TTL_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Unique identifier for a stored triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripleId(pub Uuid);

impl TripleId {
    /// Create a new random TripleId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a TripleId from its hyphenated string form.
    pub fn parse(s: &str) -> MimoResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| MimoError::Validation(format!("invalid triple id '{s}': {e}")))
    }
}

impl Default for TripleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TripleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic digest of a subject identity.
///
/// Both components are length-prefixed before hashing so `("ab", "c")` and
/// `("a", "bc")` never produce the same input stream.
pub fn subject_hash(subject_id: &str, subject_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((subject_id.len() as u64).to_le_bytes());
    hasher.update(subject_id.as_bytes());
    hasher.update((subject_type.len() as u64).to_le_bytes());
    hasher.update(subject_type.as_bytes());
    hex::encode(hasher.finalize())
}

/// A stored Subject-Predicate-Object fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    /// Unique ID.
    pub id: TripleId,
    /// `subject_hash(subject_id, subject_type)`, maintained by the repository.
    pub subject_hash: String,
    pub subject_id: String,
    pub subject_type: String,
    pub predicate: String,
    pub object_id: String,
    pub object_type: String,
    /// Certainty of the fact, in `[0.0, 1.0]`.
    pub confidence: f32,
    /// Free-text provenance.
    pub source: Option<String>,
    /// Lifetime in seconds, measured from `inserted_at`.
    pub ttl: Option<i64>,
    /// Arbitrary annotations.
    pub metadata: HashMap<String, serde_json::Value>,
    /// Richer provenance (inference method, confidence rationale).
    pub context: HashMap<String, serde_json::Value>,
    /// Tenant namespace.
    pub graph_id: String,
    /// Rule that derived this triple, set by the inference engine.
    pub inferred_by_rule_id: Option<String>,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Triple {
    /// Instant after which the triple is logically expired, if it has a TTL.
    ///
    /// A TTL too large to represent never expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = chrono::Duration::try_seconds(self.ttl?)?;
        self.inserted_at.checked_add_signed(ttl)
    }

    /// A triple is expired once `inserted_at + ttl < now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|at| at < now)
    }

    /// The subject side of this triple as an entity reference.
    pub fn subject(&self) -> EntityRef {
        EntityRef::new(&self.subject_id, &self.subject_type)
    }

    /// The object side of this triple as an entity reference.
    pub fn object(&self) -> EntityRef {
        EntityRef::new(&self.object_id, &self.object_type)
    }
}

/// Attributes for inserting a triple.
///
/// Carries no `subject_hash`; the repository derives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTriple {
    pub subject_id: String,
    pub subject_type: String,
    pub predicate: String,
    pub object_id: String,
    pub object_type: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub ttl: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub context: HashMap<String, serde_json::Value>,
    #[serde(default = "default_graph_id")]
    pub graph_id: String,
    #[serde(default)]
    pub inferred_by_rule_id: Option<String>,
}

fn default_confidence() -> f32 {
    1.0
}

fn default_graph_id() -> String {
    DEFAULT_GRAPH_ID.to_string()
}

impl NewTriple {
    /// Build insert attributes for `(subject) -[predicate]-> (object)` with
    /// confidence 1.0 in the default graph.
    pub fn new(
        subject_id: impl Into<String>,
        subject_type: impl Into<String>,
        predicate: impl Into<String>,
        object_id: impl Into<String>,
        object_type: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            subject_type: subject_type.into(),
            predicate: predicate.into(),
            object_id: object_id.into(),
            object_type: object_type.into(),
            confidence: default_confidence(),
            source: None,
            ttl: None,
            metadata: HashMap::new(),
            context: HashMap::new(),
            graph_id: default_graph_id(),
            inferred_by_rule_id: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl = Some(ttl_secs);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_graph(mut self, graph_id: impl Into<String>) -> Self {
        self.graph_id = graph_id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Digest of this triple's subject identity.
    pub fn subject_hash(&self) -> String {
        subject_hash(&self.subject_id, &self.subject_type)
    }

    /// Check required fields, confidence range, TTL sign, and predicate shape.
    pub fn validate(&self) -> MimoResult<()> {
        for (field, value) in [
            ("subject_id", &self.subject_id),
            ("subject_type", &self.subject_type),
            ("object_id", &self.object_id),
            ("object_type", &self.object_type),
            ("graph_id", &self.graph_id),
        ] {
            if value.trim().is_empty() {
                return Err(MimoError::Validation(format!("{field} is required")));
            }
        }
        validate_predicate(&self.predicate)?;
        validate_confidence(self.confidence)?;
        if let Some(ttl) = self.ttl {
            if ttl <= 0 {
                return Err(MimoError::Validation(format!(
                    "ttl must be positive, got {ttl}"
                )));
            }
            if ttl > MAX_TTL_SECS {
                return Err(MimoError::Validation(format!(
                    "ttl must not exceed {MAX_TTL_SECS} seconds, got {ttl}"
                )));
            }
        }
        Ok(())
    }
}

/// Confidence must be a finite value in `[0.0, 1.0]`.
pub fn validate_confidence(confidence: f32) -> MimoResult<()> {
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(MimoError::Validation(format!(
            "confidence must be within [0.0, 1.0], got {confidence}"
        )));
    }
    Ok(())
}

/// Predicates start with an ASCII letter and use only `[A-Za-z0-9_:.-]`.
pub fn validate_predicate(predicate: &str) -> MimoResult<()> {
    if predicate.is_empty() {
        return Err(MimoError::Validation("predicate is required".to_string()));
    }
    if predicate.len() > MAX_PREDICATE_LEN {
        return Err(MimoError::Validation(format!(
            "predicate exceeds {MAX_PREDICATE_LEN} characters"
        )));
    }
    let mut chars = predicate.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'));
    if !starts_with_letter || !rest_ok {
        return Err(MimoError::Validation(format!(
            "malformed predicate '{predicate}'"
        )));
    }
    Ok(())
}

/// A typed reference to a graph node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    pub entity_type: String,
}

impl EntityRef {
    pub fn new(id: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
        }
    }
}

/// A node reached during traversal. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub entity_type: String,
    /// Hop count from the traversal root (root = 0).
    pub depth: u32,
    /// Ids from the root to this entity, inclusive on both ends.
    pub path: Vec<String>,
}

/// Which way edges are followed during transitive closure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// subject -> object
    #[default]
    Forward,
    /// object -> subject
    Backward,
}

/// Options for transitive closure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureOptions {
    pub max_depth: u32,
    pub min_confidence: f32,
    pub direction: Direction,
    pub graph_id: String,
}

impl Default for ClosureOptions {
    fn default() -> Self {
        Self {
            max_depth: 5,
            min_confidence: 0.7,
            direction: Direction::Forward,
            graph_id: default_graph_id(),
        }
    }
}

impl ClosureOptions {
    /// Defaults taken from the `[query]` config section.
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            min_confidence: config.min_confidence,
            ..Default::default()
        }
    }

    pub fn max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn graph(mut self, graph_id: impl Into<String>) -> Self {
        self.graph_id = graph_id.into();
        self
    }
}

/// Options for path search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathOptions {
    pub max_depth: u32,
    pub min_confidence: f32,
    pub graph_id: String,
}

impl Default for PathOptions {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_confidence: 0.7,
            graph_id: default_graph_id(),
        }
    }
}

impl PathOptions {
    /// Defaults taken from the `[query]` config section.
    pub fn from_config(config: &QueryConfig) -> Self {
        Self {
            max_depth: config.path_max_depth,
            min_confidence: config.path_min_confidence,
            ..Default::default()
        }
    }

    pub fn max_depth(mut self, max_depth: u32) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn graph(mut self, graph_id: impl Into<String>) -> Self {
        self.graph_id = graph_id.into();
        self
    }
}

/// One side of a pattern clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Term {
    /// Wildcard.
    Any,
    /// Match on id regardless of type.
    Id(String),
    /// Match on id and type.
    Entity(EntityRef),
}

/// A single `(subject, predicate, object)` constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternClause {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
}

impl PatternClause {
    pub fn new(subject: Term, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object,
        }
    }

    /// `(:any, predicate, object)`: every subject with this edge to `object`.
    pub fn any_subject(predicate: impl Into<String>, object: Term) -> Self {
        Self::new(Term::Any, predicate, object)
    }

    /// `(subject, predicate, :any)`: any edge of this predicate from `subject`.
    pub fn any_object(subject: Term, predicate: impl Into<String>) -> Self {
        Self::new(subject, predicate, Term::Any)
    }
}

/// Outcome of a path search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathResult {
    /// Ids from source to destination, inclusive.
    Found { path: Vec<String> },
    /// Destination unreachable within the depth bound.
    NoPath,
}

impl PathResult {
    /// Number of edges on the path, if one was found.
    pub fn hops(&self) -> Option<usize> {
        match self {
            PathResult::Found { path } => Some(path.len().saturating_sub(1)),
            PathResult::NoPath => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, PathResult::Found { .. })
    }
}

impl std::fmt::Display for PathResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathResult::Found { path } => write!(f, "{}", path.join(" -> ")),
            PathResult::NoPath => write!(f, "no path"),
        }
    }
}

/// Edges touching an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Relationships {
    /// Triples where the entity is the subject.
    pub outgoing: Vec<Triple>,
    /// Triples where the entity is the object.
    pub incoming: Vec<Triple>,
}

/// Summary counts over a graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TripleStats {
    pub total: u64,
    pub by_predicate: HashMap<String, u64>,
    pub average_confidence: f64,
}
