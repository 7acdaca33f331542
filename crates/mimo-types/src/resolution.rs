//! Entity resolution types: anchors, candidates, options, and outcomes.

use crate::config::ResolverConfig;
use crate::error::{MimoError, MimoResult};
use crate::triple::DEFAULT_GRAPH_ID;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Memory category under which entity anchors are stored.
pub const ENTITY_ANCHOR_CATEGORY: &str = "entity_anchor";

/// Prefix used for canonical ids when the caller does not know the type.
pub const AUTO_TYPE_PREFIX: &str = "entity";

/// Maximum slug length in a canonical id.
pub const MAX_SLUG_LEN: usize = 50;

/// Entity type a mention is expected to resolve to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedType {
    /// Accept anchors of any type.
    Auto,
    /// Only accept anchors whose stored `entity_type` matches.
    Type(String),
}

impl ExpectedType {
    pub fn of(entity_type: impl Into<String>) -> Self {
        ExpectedType::Type(entity_type.into())
    }

    /// Prefix for newly minted canonical ids.
    pub fn prefix(&self) -> &str {
        match self {
            ExpectedType::Auto => AUTO_TYPE_PREFIX,
            ExpectedType::Type(t) => t,
        }
    }

    /// Whether an anchor of `entity_type` satisfies this expectation.
    pub fn accepts(&self, entity_type: &str) -> bool {
        match self {
            ExpectedType::Auto => true,
            ExpectedType::Type(t) => t == entity_type,
        }
    }
}

impl std::fmt::Display for ExpectedType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpectedType::Auto => write!(f, "auto"),
            ExpectedType::Type(t) => write!(f, "{t}"),
        }
    }
}

/// A vector-searchable record linking a mention to a canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityAnchor {
    /// Canonical or observed mention text.
    pub content: String,
    pub graph_id: String,
    pub entity_type: String,
    /// Canonical entity id this anchor resolves to.
    #[serde(rename = "ref")]
    pub entity_ref: String,
}

impl EntityAnchor {
    /// Metadata map stored alongside the anchor content.
    pub fn metadata(&self) -> HashMap<String, serde_json::Value> {
        let mut meta = HashMap::new();
        meta.insert("graph_id".to_string(), self.graph_id.clone().into());
        meta.insert("entity_type".to_string(), self.entity_type.clone().into());
        meta.insert("ref".to_string(), self.entity_ref.clone().into());
        meta
    }
}

/// One ranked hit from the vector search collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorHit {
    #[serde(rename = "ref")]
    pub entity_ref: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AnchorHit {
    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Graph the anchor belongs to; anchors without one count as the default graph.
    pub fn graph_id(&self) -> &str {
        self.meta_str("graph_id").unwrap_or(DEFAULT_GRAPH_ID)
    }

    pub fn entity_type(&self) -> Option<&str> {
        self.meta_str("entity_type")
    }
}

/// Which anchors a vector search may return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorFilter {
    pub category: String,
    /// Restrict to one graph; anchors without a graph count as the default graph.
    #[serde(default)]
    pub graph_id: Option<String>,
    #[serde(default)]
    pub entity_type: Option<String>,
}

impl AnchorFilter {
    /// Every anchor in `category`.
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            graph_id: None,
            entity_type: None,
        }
    }

    /// Entity anchors in `graph_id` accepted by `expected`.
    pub fn entities(expected: &ExpectedType, graph_id: &str) -> Self {
        let entity_type = match expected {
            ExpectedType::Auto => None,
            ExpectedType::Type(t) => Some(t.clone()),
        };
        Self {
            category: ENTITY_ANCHOR_CATEGORY.to_string(),
            graph_id: Some(graph_id.to_string()),
            entity_type,
        }
    }

    /// Whether `hit` satisfies the graph and type constraints.
    pub fn matches(&self, hit: &AnchorHit) -> bool {
        if let Some(graph_id) = &self.graph_id {
            if hit.graph_id() != graph_id {
                return false;
            }
        }
        match &self.entity_type {
            Some(t) => hit.entity_type() == Some(t.as_str()),
            None => true,
        }
    }
}

/// Options for a single resolution call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveOptions {
    pub graph_id: String,
    /// Minimum similarity for a candidate to count as a match.
    pub min_score: f32,
    /// Score gap the top candidate needs over the runner-up to win outright.
    pub clear_margin: f32,
    /// How many hits to request from the vector search.
    pub limit: usize,
    /// Record the mention as a new anchor when it resolves to an existing id.
    pub create_anchor: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            graph_id: DEFAULT_GRAPH_ID.to_string(),
            min_score: 0.85,
            clear_margin: 0.1,
            limit: 10,
            create_anchor: false,
        }
    }
}

impl ResolveOptions {
    /// Defaults taken from the `[resolver]` config section.
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self {
            min_score: config.min_score,
            clear_margin: config.clear_margin,
            limit: config.candidate_limit,
            ..Default::default()
        }
    }

    pub fn graph(mut self, graph_id: impl Into<String>) -> Self {
        self.graph_id = graph_id.into();
        self
    }

    pub fn with_anchor_enrichment(mut self) -> Self {
        self.create_anchor = true;
        self
    }
}

/// Result of resolving a mention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The mention maps to this canonical id (existing or newly created).
    Resolved(String),
    /// Several candidates are too close to call; highest score first.
    Ambiguous(Vec<String>),
}

impl Resolution {
    /// Turn an ambiguous outcome into `MimoError::AmbiguousResolution`.
    pub fn into_canonical(self) -> MimoResult<String> {
        match self {
            Resolution::Resolved(id) => Ok(id),
            Resolution::Ambiguous(candidates) => Err(MimoError::AmbiguousResolution { candidates }),
        }
    }
}

/// Trim and collapse internal whitespace runs to a single space.
pub fn normalize_mention(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lowercase, join alphanumeric runs with single underscores, cap at 50 chars.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_sep = false;
    for c in text.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('_');
            }
            pending_sep = false;
            slug.push(c);
        } else {
            pending_sep = true;
        }
    }
    let truncated: String = slug.chars().take(MAX_SLUG_LEN).collect();
    truncated.trim_end_matches('_').to_string()
}

/// Canonical id for a new entity: `"{type_prefix}:{slug(text)}"`.
pub fn canonical_id(expected: &ExpectedType, text: &str) -> MimoResult<String> {
    let slug = slugify(text);
    if slug.is_empty() {
        return Err(MimoError::Validation(format!(
            "cannot derive a canonical id from '{text}'"
        )));
    }
    Ok(format!("{}:{slug}", expected.prefix()))
}
