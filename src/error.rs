//! # Error Handling
//!
//! Two layers of errors live here:
//!
//! - [`PipelineError`]: typed failures of the audio feature pipeline. Every
//!   operation in `audio`, `features`, `pipeline` and `inference` returns
//!   `Result<_, PipelineError>`, so callers can match on the failure kind instead of
//!   parsing strings.
//! - [`AppError`]: the HTTP-facing error. It wraps pipeline errors and request
//!   validation problems and knows how to render itself as a JSON response.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### thiserror
//! - **`#[derive(Error)]`**: generates `std::error::Error` and `Display` from attributes
//! - **`#[source]`**: keeps the underlying cause reachable through `Error::source()`
//!
//! ### Traits for Error Conversion
//! - **From trait**: Automatically converts between error types so `?` just works
//! - **ResponseError trait**: Converts errors to HTTP responses
//!
//! ## Response shape
//! Every failure on the prediction routes has the same body:
//! ```json
//! {
//!   "success": false,
//!   "error": { "kind": "empty_audio", "message": "...", "timestamp": "2025-01-01T12:00:00Z" }
//! }
//! ```

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures of the feature pipeline, one variant per error kind.
///
/// None of these are retried internally. The batch pipeline decides per policy
/// whether an item failure aborts the batch or is skipped.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing, unreadable or undecodable audio source.
    #[error("cannot read audio at {path}: {message}")]
    Io { path: PathBuf, message: String },

    /// The external converter is unavailable or exited unsuccessfully.
    #[error("conversion of {path} failed: {message}")]
    Conversion { path: PathBuf, message: String },

    /// Trimming removed every sample.
    #[error("no audible signal left in {path} after trimming silence")]
    EmptyAudio { path: PathBuf },

    /// Fewer frames than one full segment.
    #[error("audio too short: {frames} frames, need at least {required}")]
    InsufficientAudio { frames: usize, required: usize },

    /// Persisting a cache artifact failed. Any previous valid entry is untouched.
    #[error("cannot write cache entry {path}")]
    CacheWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Fail-fast batch abort naming the first failing item.
    #[error("batch aborted at '{identifier}': {source}")]
    BatchAbort {
        identifier: String,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("{what} timed out after {after:?}")]
    Timeout { what: String, after: Duration },

    #[error("{features} feature matrices but {labels} labels")]
    LabelMismatch { features: usize, labels: usize },

    /// Model loading or inference failure.
    #[error("model error: {0}")]
    Model(String),

    /// Retrieving a remote audio resource failed.
    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        PipelineError::Io {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn conversion(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        PipelineError::Conversion {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        PipelineError::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Stable snake_case tag used in logs and in the HTTP error body.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Io { .. } => "io_error",
            PipelineError::Conversion { .. } => "conversion_error",
            PipelineError::EmptyAudio { .. } => "empty_audio",
            PipelineError::InsufficientAudio { .. } => "insufficient_audio",
            PipelineError::CacheWrite { .. } => "cache_write_error",
            PipelineError::BatchAbort { .. } => "batch_abort",
            PipelineError::Timeout { .. } => "timeout",
            PipelineError::LabelMismatch { .. } => "label_mismatch",
            PipelineError::Model(_) => "model_error",
            PipelineError::Download { .. } => "download_error",
        }
    }

    /// HTTP status used when this error reaches a client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Io { .. }
            | PipelineError::EmptyAudio { .. }
            | PipelineError::InsufficientAudio { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Download { .. } => StatusCode::BAD_GATEWAY,
            PipelineError::Conversion { .. }
            | PipelineError::CacheWrite { .. }
            | PipelineError::BatchAbort { .. }
            | PipelineError::LabelMismatch { .. }
            | PipelineError::Model(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<candle_core::Error> for PipelineError {
    fn from(err: candle_core::Error) -> Self {
        PipelineError::Model(err.to_string())
    }
}

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Pipeline**: anything the feature pipeline or the model reported
/// - **BadRequest**: client sent invalid or incomplete data (400)
/// - **NotFound**: requested resource doesn't exist (404)
/// - **Internal**: server-side problems outside the pipeline (500)
#[derive(Debug)]
pub enum AppError {
    Pipeline(PipelineError),
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Pipeline(err) => write!(f, "{}", err),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl AppError {
    fn kind(&self) -> &'static str {
        match self {
            AppError::Pipeline(err) => err.kind(),
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal_error",
        }
    }
}

/// Renders every error with the stable `{"success": false, "error": {...}}` body.
///
/// The message is the `Display` text only. Debug formatting and error chains stay in
/// the server log.
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Pipeline(err) => err.status_code(),
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        AppError::Pipeline(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::MessageBody;

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(PipelineError::io("a.wav", "missing").kind(), "io_error");
        assert_eq!(
            PipelineError::timeout("item a", Duration::from_secs(1)).kind(),
            "timeout"
        );
        let abort = PipelineError::BatchAbort {
            identifier: "english1".into(),
            source: Box::new(PipelineError::EmptyAudio { path: "x".into() }),
        };
        assert_eq!(abort.kind(), "batch_abort");
        assert!(abort.to_string().contains("english1"));
    }

    #[test]
    fn test_error_response_shape() {
        let err = AppError::from(PipelineError::InsufficientAudio {
            frames: 12,
            required: 30,
        });
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let bytes = response.into_body().try_into_bytes().unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["kind"], "insufficient_audio");
        assert!(body["error"]["timestamp"].is_string());
    }

    #[test]
    fn test_bad_request_maps_to_400() {
        let err = AppError::BadRequest("no file".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
