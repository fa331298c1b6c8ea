//! # Inference
//!
//! - **adapter**: majority-vote prediction over the segments of one request
//! - **model**: the candle CNN, artifact resolution and loading

pub mod adapter;
pub mod model;

pub use adapter::{majority_vote, InferenceAdapter, SegmentClassifier};
pub use model::{load_classifier, resolve_artifact, AccentNet, CnnClassifier, ModelArtifact};
