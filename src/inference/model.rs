//! # Accent Classifier Model
//!
//! A small convolutional network over single MFCC segments, implemented with
//! candle.
//!
//! ## Topology
//! ```text
//! [N, 1, n_mfcc, width]
//!   → conv 3×3 (1→32), ReLU, max-pool 2
//!   → conv 3×3 (32→64), ReLU, max-pool 2
//!   → flatten → dense 128, ReLU → dense num_classes
//! ```
//! Convolutions use no padding. For 13×30 segments the flattened size is
//! 64 × 1 × 6 = 384.
//!
//! ## Model Loading Process:
//! 1. Resolve `<models_dir>/<model_type>/<model_id>.safetensors` and the
//!    `<model_id>.labels.toml` next to it
//! 2. If they are not on disk and a remote repository is configured, download both
//!    from HuggingFace
//! 3. Memory-map the weights and build the network on the selected device
//! 4. Warm up with a zero batch so the first request does not pay for lazy setup

use crate::config::{FeatureConfig, ModelConfig};
use crate::dataset::LabelSet;
use crate::error::PipelineError;
use crate::features::Segment;
use crate::inference::SegmentClassifier;
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{Conv2d, Conv2dConfig, Linear, Module, VarBuilder};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONV1_CHANNELS: usize = 32;
const CONV2_CHANNELS: usize = 64;
const HIDDEN: usize = 128;

/// Spatial size after conv(3) → pool(2) → conv(3) → pool(2), if it stays positive.
fn reduced(size: usize) -> Option<usize> {
    let after_first = size.checked_sub(2)? / 2;
    let after_second = after_first.checked_sub(2)? / 2;
    (after_second > 0).then_some(after_second)
}

/// The network itself. Layer names match the weight file: `conv1`, `conv2`, `fc1`, `fc2`.
#[derive(Debug)]
pub struct AccentNet {
    conv1: Conv2d,
    conv2: Conv2d,
    fc1: Linear,
    fc2: Linear,
}

impl AccentNet {
    pub fn new(
        vb: VarBuilder,
        rows: usize,
        cols: usize,
        num_classes: usize,
    ) -> Result<Self, PipelineError> {
        let (h, w) = match (reduced(rows), reduced(cols)) {
            (Some(h), Some(w)) => (h, w),
            _ => {
                return Err(PipelineError::Model(format!(
                    "segment shape {}x{} is too small for the network",
                    rows, cols
                )))
            }
        };
        let cfg = Conv2dConfig::default();
        Ok(Self {
            conv1: candle_nn::conv2d(1, CONV1_CHANNELS, 3, cfg, vb.pp("conv1"))?,
            conv2: candle_nn::conv2d(CONV1_CHANNELS, CONV2_CHANNELS, 3, cfg, vb.pp("conv2"))?,
            fc1: candle_nn::linear(CONV2_CHANNELS * h * w, HIDDEN, vb.pp("fc1"))?,
            fc2: candle_nn::linear(HIDDEN, num_classes, vb.pp("fc2"))?,
        })
    }

    /// Logits `[N, num_classes]` for input `[N, 1, rows, cols]`.
    pub fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = self.conv1.forward(xs)?.relu()?.max_pool2d(2)?;
        let xs = self.conv2.forward(&xs)?.relu()?.max_pool2d(2)?;
        let xs = xs.flatten_from(1)?;
        let xs = self.fc1.forward(&xs)?.relu()?;
        self.fc2.forward(&xs)
    }
}

/// [`AccentNet`] bound to a device and input shape.
#[derive(Debug)]
pub struct CnnClassifier {
    net: AccentNet,
    device: Device,
    rows: usize,
    cols: usize,
    num_classes: usize,
}

impl CnnClassifier {
    pub fn new(net: AccentNet, device: Device, rows: usize, cols: usize, num_classes: usize) -> Self {
        Self {
            net,
            device,
            rows,
            cols,
            num_classes,
        }
    }

    /// Memory-map weights from a safetensors file.
    pub fn load(
        weights: &Path,
        device: &Device,
        rows: usize,
        cols: usize,
        num_classes: usize,
    ) -> Result<Self, PipelineError> {
        let start = std::time::Instant::now();
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device).map_err(|e| {
                PipelineError::Model(format!("cannot read weights {}: {}", weights.display(), e))
            })?
        };
        let net = AccentNet::new(vb, rows, cols, num_classes)?;
        let classifier = Self::new(net, device.clone(), rows, cols, num_classes);
        classifier.warm_up()?;
        info!(
            weights = %weights.display(),
            classes = num_classes,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "classifier loaded"
        );
        Ok(classifier)
    }

    fn warm_up(&self) -> Result<(), PipelineError> {
        let zeros = Tensor::zeros((1, 1, self.rows, self.cols), DType::F32, &self.device)?;
        self.net.forward(&zeros)?;
        debug!("classifier warm-up done");
        Ok(())
    }

    fn to_batch(&self, segments: &[Segment]) -> Result<Tensor, PipelineError> {
        let mut data = Vec::with_capacity(segments.len() * self.rows * self.cols);
        for segment in segments {
            if segment.shape() != (self.rows, self.cols) {
                return Err(PipelineError::Model(format!(
                    "segment shape {:?} does not match model input {:?}",
                    segment.shape(),
                    (self.rows, self.cols)
                )));
            }
            data.extend_from_slice(segment.data());
        }
        Ok(Tensor::from_vec(
            data,
            (segments.len(), 1, self.rows, self.cols),
            &self.device,
        )?)
    }
}

impl SegmentClassifier for CnnClassifier {
    fn classify(&self, segments: &[Segment]) -> Result<Vec<u32>, PipelineError> {
        if segments.is_empty() {
            return Ok(Vec::new());
        }
        let batch = self.to_batch(segments)?;
        let logits = self.net.forward(&batch)?;
        let classes = logits.argmax(D::Minus1)?.to_vec1::<u32>()?;
        debug_assert!(classes.iter().all(|c| (*c as usize) < self.num_classes));
        Ok(classes)
    }

    fn input_shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

/// Paths of a model's weights and label set.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifact {
    pub weights: PathBuf,
    pub labels: PathBuf,
}

impl ModelArtifact {
    /// Relative location inside `models_dir` or a remote repository.
    pub fn relative(model: &ModelConfig) -> (String, String) {
        (
            format!("{}/{}.safetensors", model.model_type, model.model_id),
            format!("{}/{}.labels.toml", model.model_type, model.model_id),
        )
    }

    pub fn local(model: &ModelConfig) -> Self {
        let dir = model.models_dir.join(&model.model_type);
        Self {
            weights: dir.join(format!("{}.safetensors", model.model_id)),
            labels: dir.join(format!("{}.labels.toml", model.model_id)),
        }
    }

    pub fn exists(&self) -> bool {
        self.weights.is_file() && self.labels.is_file()
    }
}

/// Find the model on disk, downloading it when a remote repository is configured.
pub async fn resolve_artifact(model: &ModelConfig) -> Result<ModelArtifact, PipelineError> {
    let local = ModelArtifact::local(model);
    if local.exists() {
        return Ok(local);
    }

    let Some(repo_id) = model.remote_repo.as_deref() else {
        return Err(PipelineError::Model(format!(
            "model artifact not found at {}",
            local.weights.display()
        )));
    };

    info!(repo = repo_id, model_type = %model.model_type, model_id = %model.model_id, "fetching model from hub");
    let mut builder = hf_hub::api::tokio::ApiBuilder::new().with_progress(false);
    if let Ok(token) = std::env::var("HF_TOKEN") {
        builder = builder.with_token(Some(token));
    }
    let api = builder
        .build()
        .map_err(|e| PipelineError::Model(format!("cannot create hub client: {}", e)))?;
    let repo = api.model(repo_id.to_string());

    let (weights_name, labels_name) = ModelArtifact::relative(model);
    let weights = repo
        .get(&weights_name)
        .await
        .map_err(|e| PipelineError::Model(format!("download of {} failed: {}", weights_name, e)))?;
    let labels = repo
        .get(&labels_name)
        .await
        .map_err(|e| PipelineError::Model(format!("download of {} failed: {}", labels_name, e)))?;
    Ok(ModelArtifact { weights, labels })
}

/// Load the label set and classifier for `artifact`.
pub fn load_classifier(
    artifact: &ModelArtifact,
    features: &FeatureConfig,
    device: &Device,
) -> Result<(CnnClassifier, LabelSet), PipelineError> {
    let labels = LabelSet::load(&artifact.labels).map_err(|e| PipelineError::Model(format!("{:#}", e)))?;
    let classifier = CnnClassifier::load(
        &artifact.weights,
        device,
        features.n_mfcc,
        features.segment_width,
        labels.len(),
    )?;
    Ok((classifier, labels))
}
