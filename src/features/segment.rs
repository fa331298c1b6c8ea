//! # Segmentation
//!
//! Cuts feature matrices into non-overlapping, fixed-width segments along the frame
//! axis. The trailing partial segment is dropped, so a matrix with fewer frames than
//! the width contributes nothing. That is a silent exclusion, not an error.

use crate::error::PipelineError;
use crate::features::{FeatureMatrix, Segment};

#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    width: usize,
}

impl Segmenter {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// `floor(n_frames / width)` segments, left to right.
    pub fn segment(&self, matrix: &FeatureMatrix) -> Vec<Segment> {
        if self.width == 0 {
            return Vec::new();
        }
        let count = matrix.n_frames() / self.width;
        (0..count)
            .map(|i| matrix.slice_frames(i * self.width, self.width))
            .collect()
    }

    /// Segment every matrix and repeat its label once per segment it produced.
    ///
    /// The outputs always have equal length, with `labels[i]` belonging to the
    /// parent of `segments[i]`.
    pub fn segment_with_labels<L: Clone>(
        &self,
        matrices: &[FeatureMatrix],
        labels: &[L],
    ) -> Result<(Vec<Segment>, Vec<L>), PipelineError> {
        if matrices.len() != labels.len() {
            return Err(PipelineError::LabelMismatch {
                features: matrices.len(),
                labels: labels.len(),
            });
        }

        let mut segments = Vec::new();
        let mut segment_labels = Vec::new();
        for (matrix, label) in matrices.iter().zip(labels) {
            let pieces = self.segment(matrix);
            segment_labels.extend(std::iter::repeat(label.clone()).take(pieces.len()));
            segments.extend(pieces);
        }
        Ok((segments, segment_labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix_with_frames(frames: usize, fill: f32) -> FeatureMatrix {
        FeatureMatrix::new(13, frames, vec![fill; 13 * frames]).unwrap()
    }

    #[test]
    fn test_76_frames_give_two_segments() {
        let segments = Segmenter::new(30).segment(&matrix_with_frames(76, 1.0));
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.shape() == (13, 30)));
    }

    #[test]
    fn test_short_matrix_yields_nothing() {
        assert!(Segmenter::new(30).segment(&matrix_with_frames(29, 0.0)).is_empty());
        assert_eq!(Segmenter::new(30).segment(&matrix_with_frames(30, 0.0)).len(), 1);
    }

    #[test]
    fn test_segments_cover_consecutive_frames() {
        let data: Vec<f32> = (0..2 * 7).map(|v| v as f32).collect();
        let matrix = FeatureMatrix::new(2, 7, data).unwrap();
        let segments = Segmenter::new(3).segment(&matrix);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].data(), &[0.0, 1.0, 2.0, 7.0, 8.0, 9.0]);
        assert_eq!(segments[1].data(), &[3.0, 4.0, 5.0, 10.0, 11.0, 12.0]);
    }

    #[test]
    fn test_labels_follow_their_parent() {
        let matrices = vec![
            matrix_with_frames(65, 1.0),
            matrix_with_frames(10, 2.0),
            matrix_with_frames(31, 3.0),
        ];
        let (segments, labels) = Segmenter::new(30)
            .segment_with_labels(&matrices, &[0u32, 1, 2])
            .unwrap();

        assert_eq!(segments.len(), labels.len());
        assert_eq!(labels, vec![0, 0, 2]);
        assert_eq!(segments[2].data()[0], 3.0);
    }

    #[test]
    fn test_length_mismatch_is_rejected() {
        let err = Segmenter::new(30)
            .segment_with_labels(&[matrix_with_frames(40, 0.0)], &[0u32, 1])
            .unwrap_err();
        assert_eq!(err.kind(), "label_mismatch");
    }
}
