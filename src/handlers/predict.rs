//! # Prediction Handlers
//!
//! ## Available Endpoints:
//! - `GET /` - welcome text
//! - `POST /predict` - multipart upload, audio in the `file` field
//! - `POST /bot` - JSON `{"path": "<url>"}`, the audio is downloaded first
//!
//! Both prediction routes answer `{"success": true, "predictions": "<label>"}`.
//! Failures use the `AppError` body.

use crate::error::{AppError, AppResult, PipelineError};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct BotRequest {
    /// URL of the audio to classify.
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub predictions: String,
}

pub async fn index() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Accent classifier is running. POST audio to /predict.")
}

pub async fn predict(state: web::Data<AppState>, mut payload: Multipart) -> AppResult<HttpResponse> {
    let _running = state.begin_prediction();
    let max_bytes = state.config.server.max_upload_bytes;

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let (field_name, filename) = match field.content_disposition() {
            Some(disposition) => (
                disposition.get_name().unwrap_or_default().to_string(),
                disposition.get_filename().map(str::to_string),
            ),
            None => continue,
        };

        if field_name != "file" {
            // drain unrelated fields so the stream can advance
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
            }
            continue;
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
            if bytes.len() + chunk.len() > max_bytes {
                return Err(AppError::BadRequest(format!(
                    "File too large (max: {} bytes)",
                    max_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        upload = Some((filename.unwrap_or_else(|| "upload.wav".to_string()), bytes));
    }

    let (filename, bytes) =
        upload.ok_or_else(|| AppError::BadRequest("No file part named 'file'".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
    }

    let path = save_upload(&state.config.server.upload_dir, &filename, &bytes).await?;
    info!(file = %filename, bytes = bytes.len(), "received upload");
    respond(&state, &path).await
}

pub async fn bot(state: web::Data<AppState>, request: web::Json<BotRequest>) -> AppResult<HttpResponse> {
    let _running = state.begin_prediction();
    let url = request.into_inner().path;
    if url.trim().is_empty() {
        return Err(AppError::BadRequest("'path' must not be empty".to_string()));
    }

    let bytes = download(&state, &url).await?;
    let filename = url
        .rsplit('/')
        .next()
        .and_then(|last| last.split(['?', '#']).next())
        .filter(|name| !name.is_empty())
        .unwrap_or("remote.wav")
        .to_string();

    let path = save_upload(&state.config.server.upload_dir, &filename, &bytes).await?;
    info!(url = %url, bytes = bytes.len(), "downloaded audio");
    respond(&state, &path).await
}

/// Route table shared by `main` and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into()),
    )
    .route("/", web::get().to(index))
    .route("/predict", web::post().to(predict))
    .route("/bot", web::post().to(bot))
    .route("/health", web::get().to(crate::health::health_check))
    .service(
        web::scope("/api/v1")
            .route("/health", web::get().to(crate::health::health_check))
            .route("/metrics", web::get().to(crate::health::detailed_metrics)),
    );
}

async fn respond(state: &web::Data<AppState>, path: &Path) -> AppResult<HttpResponse> {
    let label = run_prediction(state, path).await?;
    state.record_prediction(&label);
    Ok(HttpResponse::Ok().json(PredictionResponse {
        success: true,
        predictions: label,
    }))
}

/// Trim, featurize and classify on the blocking pool, bounded by the request deadline.
///
/// The blocking task owns the upload and removes it when it finishes, so a
/// request that times out never deletes files the task is still reading.
async fn run_prediction(state: &web::Data<AppState>, path: &Path) -> AppResult<String> {
    let pipeline = state.request_pipeline.clone();
    let inference = state.inference.clone();
    let upload = UploadCleanup(path.to_path_buf());
    let deadline = Duration::from_secs(state.config.server.request_timeout_secs);

    let work = tokio::task::spawn_blocking(move || {
        let upload = upload;
        let segments = pipeline.segments_for_upload(&upload.0)?;
        inference.predict_label(&segments)
    });

    let joined = tokio::time::timeout(deadline, work)
        .await
        .map_err(|_| PipelineError::timeout(format!("prediction for {}", path.display()), deadline))?;
    let label = joined.map_err(|e| AppError::Internal(format!("prediction task failed: {}", e)))??;
    debug!(path = %path.display(), label = %label, "prediction");
    Ok(label)
}

async fn download(state: &AppState, url: &str) -> Result<Vec<u8>, PipelineError> {
    let deadline = Duration::from_secs(state.config.server.download_timeout_secs);
    let to_error = |err: reqwest::Error| {
        if err.is_timeout() {
            PipelineError::timeout(format!("download of {}", url), deadline)
        } else {
            PipelineError::Download {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    };

    let response = state
        .http
        .get(url)
        .timeout(deadline)
        .send()
        .await
        .map_err(to_error)?;
    if !response.status().is_success() {
        return Err(PipelineError::Download {
            url: url.to_string(),
            message: format!("server answered {}", response.status()),
        });
    }

    let max_bytes = state.config.server.max_upload_bytes;
    let too_large = || PipelineError::Download {
        url: url.to_string(),
        message: format!("resource is larger than {} bytes", max_bytes),
    };
    if response.content_length().is_some_and(|len| len > max_bytes as u64) {
        return Err(too_large());
    }

    let mut bytes = Vec::new();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(to_error)?;
        if bytes.len() + chunk.len() > max_bytes {
            return Err(too_large());
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Stores the bytes under a unique `{timestamp}_{uuid}_{name}` file in the upload dir.
async fn save_upload(dir: &Path, filename: &str, bytes: &[u8]) -> Result<PathBuf, PipelineError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| PipelineError::io(dir, e))?;
    let name = format!(
        "{}_{}_{}",
        chrono::Utc::now().format("%Y%m%d%H%M%S"),
        uuid::Uuid::new_v4().simple(),
        sanitize_filename(filename)
    );
    let path = dir.join(name);
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| PipelineError::io(&path, e))?;
    Ok(path)
}

/// Removes the upload and the WAV the trimmer may have produced next to it on drop.
struct UploadCleanup(PathBuf);

impl Drop for UploadCleanup {
    fn drop(&mut self) {
        let converted = self.0.with_extension("wav");
        for file in [self.0.as_path(), converted.as_path()] {
            if let Err(e) = std::fs::remove_file(file) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %file.display(), error = %e, "could not remove upload");
                }
            }
        }
    }
}

/// Keeps the last path component, replacing anything outside `[A-Za-z0-9._-]`.
pub fn sanitize_filename(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
