//! Nearest-question matching with a confidence threshold.
//!
//! Scans every stored vector with cosine similarity and keeps the single
//! best match. The running maximum is only replaced on strict improvement,
//! so ties resolve to the lowest index (first occurrence wins).

use crate::semantic::embeddings::{EmbeddingError, Encoder};

/// What the caller should do with the best match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Score met the threshold; surface the stored entry verbatim.
    Confident,
    /// Score fell short. The best match is diagnostic only and must
    /// not be rendered to the user.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub best_index: usize,
    /// Cosine similarity in [-1, 1]
    pub best_score: f32,
    pub decision: Decision,
}

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("cannot match against an empty knowledge base")]
    EmptyStore,

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
}

/// Find the most similar stored vector. Pure function of its inputs.
pub fn best_match(
    query_vector: &[f32],
    vectors: &[Vec<f32>],
    threshold: f32,
) -> Result<MatchResult, MatchError> {
    if vectors.is_empty() {
        return Err(MatchError::EmptyStore);
    }

    let query_norm = l2_norm(query_vector);

    let mut best_index = 0;
    let mut best_score = f32::NEG_INFINITY;
    for (idx, vector) in vectors.iter().enumerate() {
        let score = cosine_similarity(query_vector, vector, query_norm);
        if score > best_score {
            best_score = score;
            best_index = idx;
        }
    }

    let decision = if best_score >= threshold {
        Decision::Confident
    } else {
        Decision::Fallback
    };

    Ok(MatchResult {
        best_index,
        best_score,
        decision,
    })
}

/// Encode `query` and match it against the stored vectors.
pub fn match_query(
    encoder: &dyn Encoder,
    query: &str,
    vectors: &[Vec<f32>],
    threshold: f32,
) -> Result<MatchResult, MatchError> {
    let query_vector = encoder.encode(query)?;
    best_match(&query_vector, vectors, threshold)
}

/// Compute L2 norm of a vector.
fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Compute cosine similarity between two vectors.
/// Assumes query_norm is precomputed for efficiency.
fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if query_norm < f32::EPSILON || target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot_product / (query_norm * target_norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_store_is_an_error() {
        let result = best_match(&[1.0, 0.0], &[], 0.8);
        assert!(matches!(result, Err(MatchError::EmptyStore)));
    }

    #[test]
    fn test_exact_match_is_confident() {
        let vectors = vec![vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 0.0]];

        let result = best_match(&[1.0, 0.0, 0.0], &vectors, 0.99).unwrap();
        assert_eq!(result.best_index, 1);
        assert!((result.best_score - 1.0).abs() < 1e-6);
        assert_eq!(result.decision, Decision::Confident);
    }

    #[test]
    fn test_below_threshold_is_fallback() {
        let vectors = vec![vec![0.0, 1.0, 0.0]];

        let result = best_match(&[1.0, 0.1, 0.0], &vectors, 0.8).unwrap();
        assert_eq!(result.best_index, 0);
        assert_eq!(result.decision, Decision::Fallback);
    }

    #[test]
    fn test_score_at_threshold_is_confident() {
        let vectors = vec![vec![1.0, 0.0]];

        // identical direction scores 1.0 against a threshold of exactly 1.0
        let result = best_match(&[2.0, 0.0], &vectors, 1.0).unwrap();
        assert_eq!(result.decision, Decision::Confident);
    }

    #[test]
    fn test_ties_resolve_to_first_occurrence() {
        let duplicate = vec![0.6, 0.8, 0.0];
        let vectors = vec![duplicate.clone(), duplicate.clone(), duplicate];

        let result = best_match(&[0.6, 0.8, 0.0], &vectors, 0.5).unwrap();
        assert_eq!(result.best_index, 0);
    }

    #[test]
    fn test_scale_does_not_affect_score() {
        let vectors = vec![vec![10.0, 0.0]];

        let result = best_match(&[0.1, 0.0], &vectors, 0.99).unwrap();
        assert!((result.best_score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_norm_query_falls_back() {
        let vectors = vec![vec![1.0, 0.0]];

        let result = best_match(&[0.0, 0.0], &vectors, 0.8).unwrap();
        assert_eq!(result.best_score, 0.0);
        assert_eq!(result.decision, Decision::Fallback);
    }
}
