//! # Request-Time Pipeline
//!
//! Turns one uploaded file into segments ready for the classifier:
//! trim → load → reject empty audio → extract → segment.
//!
//! Uploads are unique files, so nothing here goes through the feature cache.

use crate::audio::{SilenceTrimmer, WaveformLoader};
use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::features::{MfccExtractor, Segment, Segmenter};
use std::path::Path;
use tracing::debug;

#[derive(Debug)]
pub struct RequestPipeline {
    trimmer: SilenceTrimmer,
    loader: WaveformLoader,
    extractor: MfccExtractor,
    segmenter: Segmenter,
}

impl RequestPipeline {
    pub fn new(
        trimmer: SilenceTrimmer,
        loader: WaveformLoader,
        extractor: MfccExtractor,
        segmenter: Segmenter,
    ) -> Self {
        Self {
            trimmer,
            loader,
            extractor,
            segmenter,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            SilenceTrimmer::new(config.trim.clone()),
            WaveformLoader::new(config.features.sample_rate),
            MfccExtractor::new(config.features.clone()),
            Segmenter::new(config.features.segment_width),
        )
    }

    pub fn segment_width(&self) -> usize {
        self.segmenter.width()
    }

    /// Segments for one upload. Blocking: call from `spawn_blocking`.
    ///
    /// An upload that trims down to nothing is `empty_audio`, one that is too short
    /// for a single segment is `insufficient_audio`.
    pub fn segments_for_upload(&self, path: &Path) -> Result<Vec<Segment>, PipelineError> {
        let trimmed = self.trimmer.trim(path, None)?;
        if trimmed.kept_frames == 0 {
            return Err(PipelineError::EmptyAudio {
                path: path.to_path_buf(),
            });
        }

        let waveform = self.loader.load(&trimmed.path)?;
        if waveform.is_empty() {
            return Err(PipelineError::EmptyAudio {
                path: path.to_path_buf(),
            });
        }

        let matrix = self.extractor.extract(&waveform);
        let segments = self.segmenter.segment(&matrix);
        if segments.is_empty() {
            return Err(PipelineError::InsufficientAudio {
                frames: matrix.n_frames(),
                required: self.segmenter.width(),
            });
        }
        debug!(
            path = %path.display(),
            seconds = waveform.duration_secs(),
            frames = matrix.n_frames(),
            segments = segments.len(),
            "prepared upload"
        );
        Ok(segments)
    }
}
