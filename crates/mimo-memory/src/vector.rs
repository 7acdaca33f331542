//! Vector math for anchor search: similarity, normalization and top-k selection.

use mimo_types::error::{MimoError, MimoResult};
use std::cmp::Ordering;

/// Cosine similarity; 0.0 for mismatched, empty or zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        dot / denom
    }
}

/// Scale `v` to unit length. A zero vector is returned unchanged.
pub fn normalize_vector(v: &[f32]) -> MimoResult<Vec<f32>> {
    if v.is_empty() {
        return Err(MimoError::Validation("cannot normalize an empty vector".into()));
    }
    let magnitude = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude == 0.0 {
        return Ok(v.to_vec());
    }
    Ok(v.iter().map(|x| x / magnitude).collect())
}

/// Similarity of `query` to every vector in `corpus`, in corpus order.
pub fn batch_similarity(query: &[f32], corpus: &[Vec<f32>]) -> MimoResult<Vec<f32>> {
    check_corpus(query, corpus)?;
    Ok(corpus.iter().map(|v| cosine_similarity(query, v)).collect())
}

/// The `k` corpus entries most similar to `query`, as `(index, score)` best first.
pub fn top_k_similar(
    query: &[f32],
    corpus: &[Vec<f32>],
    k: usize,
) -> MimoResult<Vec<(usize, f32)>> {
    let scores = batch_similarity(query, corpus)?;
    Ok(top_k(scores.into_iter().enumerate().collect(), k))
}

/// Keep the `k` highest-scoring items, best first, without sorting the rest.
pub(crate) fn top_k<T>(mut scored: Vec<(T, f32)>, k: usize) -> Vec<(T, f32)> {
    let k = k.min(scored.len());
    if k == 0 {
        return Vec::new();
    }
    let by_score_desc =
        |a: &(T, f32), b: &(T, f32)| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal);
    if k < scored.len() {
        scored.select_nth_unstable_by(k - 1, by_score_desc);
        scored.truncate(k);
    }
    scored.sort_by(by_score_desc);
    scored
}

fn check_corpus(query: &[f32], corpus: &[Vec<f32>]) -> MimoResult<()> {
    if query.is_empty() {
        return Err(MimoError::Validation("query vector is empty".into()));
    }
    if corpus.is_empty() {
        return Err(MimoError::Validation("corpus is empty".into()));
    }
    if let Some(bad) = corpus.iter().find(|v| v.len() != query.len()) {
        return Err(MimoError::Validation(format!(
            "dimension mismatch: query has {}, corpus vector has {}",
            query.len(),
            bad.len()
        )));
    }
    Ok(())
}

/// Serialize embedding to bytes for SQLite BLOB storage.
pub(crate) fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Deserialize embedding from bytes.
pub(crate) fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
