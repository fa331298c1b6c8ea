//! # Audio Input
//!
//! Everything that touches raw audio before feature extraction:
//! - **Waveform**: mono samples at a known rate
//! - **Loader**: decode, downmix and resample to the pipeline rate
//! - **Trimmer**: strip leading/trailing silence from uploads, converting non-WAV
//!   input with an external tool first

pub mod loader;
pub mod trimmer;
pub mod waveform;

#[cfg(test)]
pub(crate) mod testing;

pub use loader::WaveformLoader;
pub use trimmer::{SilenceTrimmer, TrimOutcome};
pub use waveform::Waveform;
