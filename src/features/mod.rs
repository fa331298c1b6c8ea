//! # Feature Extraction
//!
//! MFCC matrices, the fixed-width segments cut from them, and the extractor that
//! produces them from waveforms.

pub mod matrix;
pub mod mfcc;
pub mod segment;

pub use matrix::{FeatureMatrix, Segment};
pub use mfcc::MfccExtractor;
pub use segment::Segmenter;
