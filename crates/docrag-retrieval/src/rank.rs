//! Cosine scoring and top-k selection over a candidate pool.

use tracing::debug;

use docrag_core::error::{Error, Result};
use docrag_core::types::{Chunk, SearchHit, SearchResult};

/// `dot(a, b) / (|a| * |b|)`, or 0.0 when either side has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0f64, 0f64, 0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    // + 0.0 folds -0.0 into 0.0 so it ties with other zero scores
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32 + 0.0
}

/// Scores every candidate against `query` and keeps the best `limit`,
/// highest score first. Equal scores keep their input order.
pub fn rank(query: &[f32], candidates: &[Chunk], limit: usize) -> Result<SearchResult> {
    let Some(first) = candidates.first() else { return Ok(SearchResult::default()) };
    if limit == 0 {
        return Ok(SearchResult::default());
    }
    let dim = first.dim();
    if let Some(bad) = candidates.iter().find(|c| c.dim() != dim) {
        return Err(Error::DimensionMismatch { expected: dim, actual: bad.dim() });
    }
    if query.len() != dim {
        return Err(Error::DimensionMismatch { expected: dim, actual: query.len() });
    }

    let mut scored: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(query, &c.vector)))
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(limit);

    let hits: Vec<SearchHit> = scored
        .into_iter()
        .map(|(i, score)| {
            let c = &candidates[i];
            SearchHit { id: c.id.clone(), text: c.text.clone(), metadata: c.metadata.clone(), score }
        })
        .collect();
    debug!(candidates = candidates.len(), returned = hits.len(), top = hits.first().map(|h| h.score), "ranked");
    Ok(SearchResult { hits })
}
