//! # Accent Classifier
//!
//! Audio feature pipeline and HTTP service for spoken-accent classification.
//!
//! ## Layout:
//! - **audio**: decoding, resampling and silence trimming
//! - **features**: MFCC extraction, the feature matrix codec and segmentation
//! - **pipeline**: the feature cache, the parallel batch pipeline and the per-request path
//! - **dataset**: speaker metadata, labels and training array preparation
//! - **inference**: the candle CNN and the majority-vote adapter
//! - **handlers**, **health**, **middleware**, **state**: the actix-web service
//! - **config**, **error**, **device**: shared plumbing

pub mod audio;
pub mod config;
pub mod dataset;
pub mod device;
pub mod error;
pub mod features;
pub mod handlers;
pub mod health;
pub mod inference;
pub mod middleware;
pub mod pipeline;
pub mod state;
