//! # Feature Pipelines
//!
//! - **cache**: on-disk, write-through MFCC store
//! - **parallel**: batch feature computation over a worker pool (training data)
//! - **request**: trim and featurize a single upload (serving)

pub mod cache;
pub mod parallel;
pub mod request;

pub use cache::{AudioFeatureComputer, FeatureCache, FeatureComputer};
pub use parallel::{BatchOutput, ParallelPipeline, PipelineOptions, SkippedItem};
pub use request::RequestPipeline;
