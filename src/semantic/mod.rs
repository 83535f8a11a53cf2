//! Semantic matching infrastructure.
//!
//! Uses fastembed-rs for generating embeddings and an in-order cosine
//! similarity scan to find the closest known question.
//!
//! # Architecture
//!
//! - `embeddings`: Wraps fastembed behind the `Encoder` trait
//! - `matcher`: Best-match search with the confidence-threshold decision

pub mod embeddings;
pub mod matcher;

pub use embeddings::{EmbeddingError, EmbeddingModel, Encoder};
pub use matcher::{Decision, MatchError, MatchResult};
