//! Background anchor enrichment.
//!
//! Extra anchors for already-resolved mentions are written off the request
//! path by a dedicated task. The queue is bounded; when it is full the job is
//! dropped and logged, since losing an enrichment anchor never affects the
//! canonical id a caller received.

use crate::anchors::AnchorIndex;
use mimo_types::resolution::EntityAnchor;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Handle for queueing anchors to the enrichment worker.
#[derive(Clone)]
pub struct AnchorSender {
    tx: mpsc::Sender<EntityAnchor>,
}

impl AnchorSender {
    /// Queue an anchor without waiting. Returns `false` if it was dropped.
    pub fn enqueue(&self, anchor: EntityAnchor) -> bool {
        match self.tx.try_send(anchor) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(anchor)) => {
                warn!(
                    entity_ref = %anchor.entity_ref,
                    "Anchor enrichment queue full, dropping job"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(anchor)) => {
                warn!(
                    entity_ref = %anchor.entity_ref,
                    "Anchor enrichment worker stopped, dropping job"
                );
                false
            }
        }
    }
}

/// Spawn the enrichment worker on the current tokio runtime.
///
/// The worker exits once every `AnchorSender` clone has been dropped and the
/// queue is drained.
pub fn spawn_anchor_worker(
    index: Arc<dyn AnchorIndex>,
    capacity: usize,
) -> (AnchorSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<EntityAnchor>(capacity.max(1));
    let handle = tokio::spawn(async move {
        while let Some(anchor) = rx.recv().await {
            match index.insert_anchor(&anchor).await {
                Ok(true) => debug!(
                    entity_ref = %anchor.entity_ref,
                    graph_id = %anchor.graph_id,
                    "Enrichment anchor stored"
                ),
                Ok(false) => debug!(
                    entity_ref = %anchor.entity_ref,
                    "Enrichment anchor already present"
                ),
                Err(e) => warn!(
                    error = %e,
                    entity_ref = %anchor.entity_ref,
                    "Failed to store enrichment anchor"
                ),
            }
        }
        info!("Anchor enrichment worker stopped");
    });
    (AnchorSender { tx }, handle)
}
