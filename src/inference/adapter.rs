//! # Inference Adapter
//!
//! Classifies every segment of one request and reduces the per-segment classes to a
//! single prediction by majority vote.
//!
//! A tie goes to the class that appeared first among the segment predictions.

use crate::dataset::LabelSet;
use crate::error::PipelineError;
use crate::features::Segment;
use std::sync::Arc;
use tracing::debug;

/// Anything that maps segments to class indices.
pub trait SegmentClassifier: Send + Sync {
    fn classify(&self, segments: &[Segment]) -> Result<Vec<u32>, PipelineError>;

    /// `(n_coefficients, width)` of the segments this classifier accepts.
    fn input_shape(&self) -> (usize, usize);
}

/// Loaded once at startup and shared read-only by every request.
pub struct InferenceAdapter {
    classifier: Arc<dyn SegmentClassifier>,
    labels: LabelSet,
    model_name: String,
}

impl InferenceAdapter {
    pub fn new(
        classifier: Arc<dyn SegmentClassifier>,
        labels: LabelSet,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            classifier,
            labels,
            model_name: model_name.into(),
        }
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Majority class over all segments.
    ///
    /// An empty slice is `insufficient_audio` and never reaches the classifier.
    pub fn predict(&self, segments: &[Segment]) -> Result<u32, PipelineError> {
        let (_, width) = self.classifier.input_shape();
        if segments.is_empty() {
            return Err(PipelineError::InsufficientAudio {
                frames: 0,
                required: width,
            });
        }

        let classes = self.classifier.classify(segments)?;
        let winner = majority_vote(&classes).ok_or_else(|| {
            PipelineError::Model("classifier returned no predictions".to_string())
        })?;
        debug!(segments = segments.len(), votes = ?classes, winner, "majority vote");
        Ok(winner)
    }

    /// Like [`InferenceAdapter::predict`], decoded to the class name.
    pub fn predict_label(&self, segments: &[Segment]) -> Result<String, PipelineError> {
        let class = self.predict(segments)?;
        self.labels
            .name(class)
            .map(str::to_string)
            .ok_or_else(|| PipelineError::Model(format!("class {} is not in the label set", class)))
    }
}

/// Most frequent value, ties broken by first occurrence.
pub fn majority_vote(classes: &[u32]) -> Option<u32> {
    let mut counts: Vec<(u32, usize)> = Vec::new();
    for &class in classes {
        match counts.iter_mut().find(|(c, _)| *c == class) {
            Some((_, n)) => *n += 1,
            None => counts.push((class, 1)),
        }
    }
    // max_by_key keeps the last maximum, so walk in reverse to keep the first one
    counts
        .iter()
        .rev()
        .max_by_key(|(_, n)| *n)
        .map(|(class, _)| *class)
}
