//! Entity resolution: map a free-text mention to a canonical entity id.
//!
//! Candidates come from the anchor index. A mention resolves to an existing
//! id only when one candidate clearly wins. With several candidates and no
//! clear winner the caller gets them back as ambiguous. A mention with no
//! candidate, or a single weak one, mints a new canonical id whose anchor is
//! written before returning.

use crate::anchors::AnchorIndex;
use crate::enrichment::AnchorSender;
use mimo_types::error::{MimoError, MimoResult};
use mimo_types::resolution::{
    canonical_id, normalize_mention, AnchorFilter, AnchorHit, EntityAnchor, ExpectedType,
    Resolution, ResolveOptions,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Cumulative resolution counters.
#[derive(Debug, Default)]
pub struct ResolverStats {
    resolved: AtomicU64,
    ambiguous: AtomicU64,
    failed: AtomicU64,
    created: AtomicU64,
}

impl ResolverStats {
    /// Calls that returned a canonical id, including newly created ones.
    pub fn resolved(&self) -> u64 {
        self.resolved.load(Ordering::Relaxed)
    }

    pub fn ambiguous(&self) -> u64 {
        self.ambiguous.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Calls that minted a new canonical id.
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }
}

/// Resolves mentions against the entity anchor index.
#[derive(Clone)]
pub struct EntityResolver {
    index: Arc<dyn AnchorIndex>,
    enrichment: Option<AnchorSender>,
    stats: Arc<ResolverStats>,
}

impl EntityResolver {
    pub fn new(index: Arc<dyn AnchorIndex>) -> Self {
        Self {
            index,
            enrichment: None,
            stats: Arc::new(ResolverStats::default()),
        }
    }

    /// Route enrichment anchors through a background worker queue.
    pub fn with_enrichment(mut self, sender: AnchorSender) -> Self {
        self.enrichment = Some(sender);
        self
    }

    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }

    /// Resolve `text` to a canonical id, an ambiguous candidate list, or an error.
    pub async fn resolve_entity(
        &self,
        text: &str,
        expected: &ExpectedType,
        opts: &ResolveOptions,
    ) -> MimoResult<Resolution> {
        let started = Instant::now();
        let result = self.try_resolve(text, expected, opts).await;

        let outcome = match &result {
            Ok(Resolution::Resolved(_)) => {
                self.stats.resolved.fetch_add(1, Ordering::Relaxed);
                "resolved"
            }
            Ok(Resolution::Ambiguous(_)) => {
                self.stats.ambiguous.fetch_add(1, Ordering::Relaxed);
                "ambiguous"
            }
            Err(_) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                "failed"
            }
        };
        info!(
            target: "mimo::resolution",
            latency_ms = started.elapsed().as_millis() as u64,
            outcome,
            entity_type = %expected,
            graph_id = %opts.graph_id,
            "Entity resolution"
        );
        result
    }

    async fn try_resolve(
        &self,
        text: &str,
        expected: &ExpectedType,
        opts: &ResolveOptions,
    ) -> MimoResult<Resolution> {
        let mention = normalize_mention(text);
        if mention.is_empty() {
            return Err(MimoError::Validation(
                "entity mention must not be empty".to_string(),
            ));
        }

        let filter = AnchorFilter::entities(expected, &opts.graph_id);
        let hits = self.index.search(&mention, &filter, opts.limit).await?;
        let candidates = rank_candidates(hits, &filter);

        match candidates.as_slice() {
            [] => self.create_entity(&mention, expected, opts).await,
            [only] if only.score >= opts.min_score => {
                self.resolved_existing(only, &mention, expected, opts);
                Ok(Resolution::Resolved(only.entity_ref.clone()))
            }
            [_] => self.create_entity(&mention, expected, opts).await,
            [top, second, ..] => {
                if top.score >= opts.min_score && top.score - second.score > opts.clear_margin {
                    self.resolved_existing(top, &mention, expected, opts);
                    Ok(Resolution::Resolved(top.entity_ref.clone()))
                } else {
                    debug!(
                        mention = %mention,
                        candidates = candidates.len(),
                        "Ambiguous entity mention"
                    );
                    Ok(Resolution::Ambiguous(
                        candidates.iter().map(|c| c.entity_ref.clone()).collect(),
                    ))
                }
            }
        }
    }

    /// Mint `{type}:{slug}` and store its anchor before returning.
    async fn create_entity(
        &self,
        mention: &str,
        expected: &ExpectedType,
        opts: &ResolveOptions,
    ) -> MimoResult<Resolution> {
        let id = canonical_id(expected, mention)?;
        let anchor = EntityAnchor {
            content: mention.to_string(),
            graph_id: opts.graph_id.clone(),
            entity_type: expected.prefix().to_string(),
            entity_ref: id.clone(),
        };
        if let Err(e) = self.index.insert_anchor(&anchor).await {
            warn!(error = %e, entity_ref = %id, "Failed to store anchor for new entity");
        }
        self.stats.created.fetch_add(1, Ordering::Relaxed);
        debug!(entity_ref = %id, "Created entity");
        Ok(Resolution::Resolved(id))
    }

    /// Queue an extra anchor for the mention when enrichment is requested.
    ///
    /// Without a worker queue the anchor is written by a task on the current
    /// tokio runtime. Outside a runtime it is skipped with a warning.
    fn resolved_existing(
        &self,
        hit: &AnchorHit,
        mention: &str,
        expected: &ExpectedType,
        opts: &ResolveOptions,
    ) {
        if !opts.create_anchor {
            return;
        }
        let anchor = EntityAnchor {
            content: mention.to_string(),
            graph_id: opts.graph_id.clone(),
            entity_type: hit
                .entity_type()
                .unwrap_or_else(|| expected.prefix())
                .to_string(),
            entity_ref: hit.entity_ref.clone(),
        };
        match &self.enrichment {
            Some(sender) => {
                sender.enqueue(anchor);
            }
            None => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let index = Arc::clone(&self.index);
                    handle.spawn(async move {
                        if let Err(e) = index.insert_anchor(&anchor).await {
                            warn!(
                                error = %e,
                                entity_ref = %anchor.entity_ref,
                                "Failed to store enrichment anchor"
                            );
                        }
                    });
                }
                Err(_) => {
                    warn!(
                        entity_ref = %anchor.entity_ref,
                        "No tokio runtime; skipping enrichment anchor"
                    );
                }
            },
        }
    }
}

/// Keep hits accepted by `filter`, one per ref, best first.
fn rank_candidates(hits: Vec<AnchorHit>, filter: &AnchorFilter) -> Vec<AnchorHit> {
    let mut best: HashMap<String, AnchorHit> = HashMap::new();
    for hit in hits {
        if !filter.matches(&hit) {
            continue;
        }
        match best.get(&hit.entity_ref) {
            Some(existing) if existing.score >= hit.score => {}
            _ => {
                best.insert(hit.entity_ref.clone(), hit);
            }
        }
    }
    let mut ranked: Vec<AnchorHit> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entity_ref.cmp(&b.entity_ref))
    });
    ranked
}
