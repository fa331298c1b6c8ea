//! # Application State
//!
//! Everything the HTTP handlers share: the immutable configuration, the loaded
//! classifier, the per-request feature pipeline, an HTTP client for `/bot`, and the
//! request metrics.
//!
//! The classifier and pipeline are built once at startup and only ever read, so they
//! sit behind a plain `Arc`. Metrics change on every request and use `Arc<RwLock<_>>`.

use crate::config::AppConfig;
use crate::inference::InferenceAdapter;
use crate::pipeline::RequestPipeline;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub inference: Arc<InferenceAdapter>,
    pub request_pipeline: Arc<RequestPipeline>,
    pub http: reqwest::Client,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

#[derive(Debug, Default)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Predictions currently running (upload or `/bot`).
    pub active_predictions: u32,
    /// Completed predictions per returned label.
    pub predictions_by_label: HashMap<String, u64>,
    /// Keyed by `"{method} {path}"`.
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        inference: InferenceAdapter,
        request_pipeline: RequestPipeline,
    ) -> Self {
        Self {
            config: Arc::new(config),
            inference: Arc::new(inference),
            request_pipeline: Arc::new(request_pipeline),
            http: reqwest::Client::new(),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    // A panic while holding the lock only ever leaves counters half-updated.
    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Marks a prediction as running until the returned guard is dropped.
    pub fn begin_prediction(&self) -> PredictionGuard {
        self.metrics_write().active_predictions += 1;
        PredictionGuard {
            metrics: self.metrics.clone(),
        }
    }

    pub fn record_prediction(&self, label: &str) {
        *self
            .metrics_write()
            .predictions_by_label
            .entry(label.to_string())
            .or_insert(0) += 1;
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics_read();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_predictions: metrics.active_predictions,
            predictions_by_label: metrics.predictions_by_label.clone(),
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Decrements `active_predictions` on drop, so early returns and timeouts are counted.
pub struct PredictionGuard {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for PredictionGuard {
    fn drop(&mut self) {
        let mut metrics = self
            .metrics
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        metrics.active_predictions = metrics.active_predictions.saturating_sub(1);
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::dataset::LabelSet;
    use crate::error::PipelineError;
    use crate::features::Segment;
    use crate::inference::SegmentClassifier;

    /// Answers the same class for every segment.
    pub struct ConstantClassifier(pub u32);

    impl SegmentClassifier for ConstantClassifier {
        fn classify(&self, segments: &[Segment]) -> Result<Vec<u32>, PipelineError> {
            Ok(vec![self.0; segments.len()])
        }

        fn input_shape(&self) -> (usize, usize) {
            (13, 30)
        }
    }

    pub fn state_with(config: AppConfig, class: u32) -> AppState {
        let adapter = InferenceAdapter::new(
            Arc::new(ConstantClassifier(class)),
            LabelSet::binary("english"),
            "cnn/test",
        );
        let pipeline = RequestPipeline::from_config(&config);
        AppState::new(config, adapter, pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::state_with;
    use super::*;

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = state_with(AppConfig::default(), 0);
        state.record_endpoint_request("POST /predict", 100, false);
        state.record_endpoint_request("POST /predict", 300, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /predict"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 200.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_prediction_guard_releases_on_drop() {
        let state = state_with(AppConfig::default(), 0);
        {
            let _first = state.begin_prediction();
            let _second = state.begin_prediction();
            assert_eq!(state.get_metrics_snapshot().active_predictions, 2);
        }
        assert_eq!(state.get_metrics_snapshot().active_predictions, 0);

        state.record_prediction("english");
        state.record_prediction("english");
        assert_eq!(state.get_metrics_snapshot().predictions_by_label["english"], 2);
    }
}
