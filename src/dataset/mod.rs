//! # Dataset Preparation
//!
//! - **metadata**: the speaker CSV, language/residence filtering, seeded split
//! - **labels**: closed class sets and their TOML form
//! - **builder**: the `prepare` command that writes training arrays

pub mod builder;
pub mod labels;
pub mod metadata;

pub use builder::{prepare, PrepareSummary};
pub use labels::LabelSet;
pub use metadata::{MetadataFilter, SpeakerRecord};
