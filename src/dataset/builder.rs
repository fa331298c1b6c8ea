//! # Training Array Builder
//!
//! `prepare` turns the speaker table and the audio directory into training arrays:
//!
//! 1. load and filter metadata, assign labels, split train/test
//! 2. compute MFCCs for both splits on the worker pool (through the cache)
//! 3. cut segments, each inheriting its speaker's label
//! 4. write `train.safetensors` and `test.safetensors` (`x: [n, 1, n_mfcc, width]`
//!    f32, `y: [n]` u32) plus `labels.toml`
//!
//! It also logs the class distribution and the majority-class accuracy a model has
//! to beat.

use crate::config::{AppConfig, LabelScheme};
use crate::dataset::metadata::{self, MetadataFilter, SpeakerRecord};
use crate::dataset::LabelSet;
use crate::features::{Segment, Segmenter};
use crate::pipeline::{FeatureCache, ParallelPipeline, PipelineOptions, SkippedItem};
use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What one `prepare` run produced.
#[derive(Debug)]
pub struct PrepareSummary {
    pub labels: LabelSet,
    pub train_segments: usize,
    pub test_segments: usize,
    pub skipped: Vec<SkippedItem>,
    /// Segment count per class name over the training split.
    pub class_counts: BTreeMap<String, usize>,
    pub output_dir: PathBuf,
}

impl PrepareSummary {
    /// Accuracy of always predicting the most common training class.
    pub fn baseline_accuracy(&self) -> f64 {
        let max = self.class_counts.values().copied().max().unwrap_or(0);
        if self.train_segments == 0 {
            0.0
        } else {
            max as f64 / self.train_segments as f64
        }
    }
}

pub async fn prepare(config: &AppConfig) -> Result<PrepareSummary> {
    let dataset = &config.dataset;
    let records = metadata::load(&dataset.metadata_csv)?;
    let records = MetadataFilter::from_config(dataset).apply(records);
    if records.is_empty() {
        anyhow::bail!("no speakers left after filtering {}", dataset.metadata_csv.display());
    }

    let labels = match dataset.label_scheme {
        LabelScheme::Binary => LabelSet::binary(&dataset.target_language),
        LabelScheme::SourceLanguage => {
            LabelSet::from_observed(records.iter().map(|r| r.native_language.as_str()))
        }
    };
    info!(scheme = ?labels.scheme, classes = ?labels.classes, "label set");

    let (train, test) = metadata::split(&records, dataset.test_size, dataset.seed);
    info!(train = train.len(), test = test.len(), "split speakers");

    let pipeline = ParallelPipeline::new(
        FeatureCache::from_config(config),
        PipelineOptions::from_config(config),
    );
    let segmenter = Segmenter::new(config.features.segment_width);

    let mut skipped = Vec::new();
    let (train_x, train_y) = featurize(&pipeline, &segmenter, &labels, &train, &mut skipped).await?;
    let (test_x, test_y) = featurize(&pipeline, &segmenter, &labels, &test, &mut skipped).await?;

    std::fs::create_dir_all(&dataset.output_dir)
        .with_context(|| format!("creating {}", dataset.output_dir.display()))?;
    let (rows, cols) = (config.features.n_mfcc, config.features.segment_width);
    write_split(&dataset.output_dir.join("train.safetensors"), &train_x, &train_y, rows, cols)?;
    write_split(&dataset.output_dir.join("test.safetensors"), &test_x, &test_y, rows, cols)?;
    labels.save(&dataset.output_dir.join("labels.toml"))?;

    let mut class_counts = BTreeMap::new();
    for class in &train_y {
        let name = labels.name(*class).unwrap_or("?").to_string();
        *class_counts.entry(name).or_insert(0usize) += 1;
    }

    let summary = PrepareSummary {
        labels,
        train_segments: train_x.len(),
        test_segments: test_x.len(),
        skipped,
        class_counts,
        output_dir: dataset.output_dir.clone(),
    };
    info!(
        train_segments = summary.train_segments,
        test_segments = summary.test_segments,
        skipped = summary.skipped.len(),
        distribution = ?summary.class_counts,
        baseline = format!("{:.3}", summary.baseline_accuracy()),
        "training arrays written to {}",
        summary.output_dir.display()
    );
    Ok(summary)
}

async fn featurize(
    pipeline: &ParallelPipeline,
    segmenter: &Segmenter,
    labels: &LabelSet,
    speakers: &[SpeakerRecord],
    skipped: &mut Vec<SkippedItem>,
) -> Result<(Vec<Segment>, Vec<u32>)> {
    let mut ids = Vec::with_capacity(speakers.len());
    let mut classes = Vec::with_capacity(speakers.len());
    for speaker in speakers {
        match labels.label_for(&speaker.native_language) {
            Some(class) => {
                ids.push(speaker.language_num.clone());
                classes.push(class);
            }
            None => warn!(speaker = %speaker.language_num, "language outside the label set"),
        }
    }

    let batch = pipeline.process(&ids, &classes).await?;
    skipped.extend(batch.skipped);

    let dropped = batch
        .features
        .iter()
        .filter(|m| m.n_frames() < segmenter.width())
        .count();
    if dropped > 0 {
        warn!(dropped, "recordings shorter than one segment were excluded");
    }

    Ok(segmenter.segment_with_labels(&batch.features, &batch.labels)?)
}

fn write_split(path: &Path, segments: &[Segment], labels: &[u32], rows: usize, cols: usize) -> Result<()> {
    let device = Device::Cpu;
    let mut x = Vec::with_capacity(segments.len() * rows * cols);
    for segment in segments {
        x.extend_from_slice(segment.data());
    }
    let x = Tensor::from_vec(x, (segments.len(), 1, rows, cols), &device)?;
    let y = Tensor::from_vec(labels.to_vec(), labels.len(), &device)?;

    let tensors = HashMap::from([("x".to_string(), x), ("y".to_string(), y)]);
    candle_core::safetensors::save(&tensors, path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
