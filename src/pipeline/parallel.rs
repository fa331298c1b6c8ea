//! # Parallel Batch Pipeline
//!
//! Runs [`FeatureCache::get_or_compute`] over many audio sources on a fixed-size
//! worker pool.
//!
//! ## How it works
//! - each identifier resolves to `<audio_dir>/<id>.<ext>`
//! - a `tokio::sync::Semaphore` with `workers` permits bounds concurrency
//! - the CPU/IO-heavy work runs in `spawn_blocking`, optionally under a per-item
//!   deadline
//! - results are joined positionally, so output order is input order however the
//!   items finish
//!
//! ## Failure policy
//! - **fail_fast**: the first failing item aborts the batch with `batch_abort`,
//!   naming the item. Items still waiting for a worker are never started.
//! - **skip**: failing items are logged, reported in [`BatchOutput::skipped`], and
//!   dropped together with their label so features and labels stay aligned.

use crate::config::{AppConfig, FailurePolicy};
use crate::error::PipelineError;
use crate::features::FeatureMatrix;
use crate::pipeline::FeatureCache;
use futures_util::future::{join_all, try_join_all};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub workers: usize,
    pub failure_policy: FailurePolicy,
    pub item_timeout: Option<Duration>,
    pub audio_dir: PathBuf,
    pub audio_extension: String,
}

impl PipelineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            workers: config.pipeline.effective_workers(),
            failure_policy: config.pipeline.failure_policy,
            item_timeout: match config.pipeline.item_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            audio_dir: config.dataset.audio_dir.clone(),
            audio_extension: config.dataset.audio_extension.clone(),
        }
    }
}

/// An item dropped under the `skip` policy.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedItem {
    pub identifier: String,
    pub kind: &'static str,
    pub message: String,
}

/// Features and labels in input order, minus any skipped items.
#[derive(Debug)]
pub struct BatchOutput<L> {
    pub features: Vec<FeatureMatrix>,
    pub labels: Vec<L>,
    pub skipped: Vec<SkippedItem>,
}

pub struct ParallelPipeline {
    cache: FeatureCache,
    options: PipelineOptions,
}

impl ParallelPipeline {
    pub fn new(cache: FeatureCache, options: PipelineOptions) -> Self {
        Self { cache, options }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn source_path(&self, identifier: &str) -> PathBuf {
        self.options
            .audio_dir
            .join(format!("{}.{}", identifier, self.options.audio_extension))
    }

    /// Compute features for every identifier, keeping `labels` aligned.
    pub async fn process<L: Clone>(
        &self,
        identifiers: &[String],
        labels: &[L],
    ) -> Result<BatchOutput<L>, PipelineError> {
        if identifiers.len() != labels.len() {
            return Err(PipelineError::LabelMismatch {
                features: identifiers.len(),
                labels: labels.len(),
            });
        }

        let workers = self.options.workers.max(1);
        info!(
            items = identifiers.len(),
            workers,
            policy = ?self.options.failure_policy,
            "starting feature batch"
        );
        let semaphore = Arc::new(Semaphore::new(workers));

        match self.options.failure_policy {
            FailurePolicy::FailFast => {
                let jobs = identifiers.iter().map(|id| {
                    let job = self.run_item(&semaphore, id);
                    async move {
                        job.await.map_err(|source| PipelineError::BatchAbort {
                            identifier: id.clone(),
                            source: Box::new(source),
                        })
                    }
                });
                let features = try_join_all(jobs).await?;
                info!(items = features.len(), "feature batch complete");
                Ok(BatchOutput {
                    features,
                    labels: labels.to_vec(),
                    skipped: Vec::new(),
                })
            }
            FailurePolicy::Skip => {
                let jobs = identifiers.iter().map(|id| self.run_item(&semaphore, id));
                let results = join_all(jobs).await;

                let mut output = BatchOutput {
                    features: Vec::with_capacity(results.len()),
                    labels: Vec::with_capacity(results.len()),
                    skipped: Vec::new(),
                };
                for ((id, label), result) in identifiers.iter().zip(labels).zip(results) {
                    match result {
                        Ok(matrix) => {
                            output.features.push(matrix);
                            output.labels.push(label.clone());
                        }
                        Err(e) => {
                            warn!(identifier = %id, kind = e.kind(), error = %e, "skipping item");
                            output.skipped.push(SkippedItem {
                                identifier: id.clone(),
                                kind: e.kind(),
                                message: e.to_string(),
                            });
                        }
                    }
                }
                info!(
                    items = output.features.len(),
                    skipped = output.skipped.len(),
                    "feature batch complete"
                );
                Ok(output)
            }
        }
    }

    fn run_item(
        &self,
        semaphore: &Arc<Semaphore>,
        identifier: &str,
    ) -> impl std::future::Future<Output = Result<FeatureMatrix, PipelineError>> {
        let semaphore = Arc::clone(semaphore);
        let cache = self.cache.clone();
        let path = self.source_path(identifier);
        let timeout = self.options.item_timeout;
        let label = identifier.to_string();

        async move {
            let permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| PipelineError::io(&path, "worker pool shut down"))?;

            // the permit lives as long as the computation, even after a timeout gave up on it
            let task_path = path.clone();
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                cache.get_or_compute(&task_path)
            });

            let joined = match timeout {
                Some(limit) => match tokio::time::timeout(limit, handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        return Err(PipelineError::timeout(format!("item '{}'", label), limit))
                    }
                },
                None => handle.await,
            };
            joined.map_err(|e| worker_failure(&path, e))?
        }
    }
}

fn worker_failure(path: &Path, err: tokio::task::JoinError) -> PipelineError {
    PipelineError::io(path, format!("worker task failed: {}", err))
}
