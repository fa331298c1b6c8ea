use accent_classifier::config::AppConfig;
use accent_classifier::dataset::LabelSet;
use accent_classifier::error::PipelineError;
use accent_classifier::features::Segment;
use accent_classifier::handlers;
use accent_classifier::inference::{InferenceAdapter, SegmentClassifier};
use accent_classifier::middleware::MetricsMiddleware;
use accent_classifier::pipeline::RequestPipeline;
use accent_classifier::state::AppState;
use actix_web::{test, web, App};
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;

const BOUNDARY: &str = "----accent-test-boundary";

/// Votes `other` for every segment.
struct OtherClassifier;

impl SegmentClassifier for OtherClassifier {
    fn classify(&self, segments: &[Segment]) -> Result<Vec<u32>, PipelineError> {
        Ok(vec![1; segments.len()])
    }

    fn input_shape(&self) -> (usize, usize) {
        (13, 30)
    }
}

fn state(upload_dir: &std::path::Path) -> AppState {
    let mut config = AppConfig::default();
    config.server.download_timeout_secs = 2;
    state_with(config, upload_dir)
}

fn state_with(mut config: AppConfig, upload_dir: &std::path::Path) -> AppState {
    config.server.upload_dir = upload_dir.to_path_buf();
    let adapter = InferenceAdapter::new(
        Arc::new(OtherClassifier),
        LabelSet::binary("english"),
        "cnn/test",
    );
    let pipeline = RequestPipeline::from_config(&config);
    AppState::new(config, adapter, pipeline)
}

/// 16-bit mono WAV: silence, a 440 Hz tone, silence.
fn tone_wav(sample_rate: u32, tone_secs: f32, padding_secs: f32) -> Vec<u8> {
    let pad = (padding_secs * sample_rate as f32) as usize;
    let tone = (tone_secs * sample_rate as f32) as usize;
    let mut samples = vec![0i16; pad];
    samples.extend((0..tone).map(|i| {
        let t = i as f32 / sample_rate as f32;
        (0.5 * (2.0 * std::f32::consts::PI * 440.0 * t).sin() * i16::MAX as f32) as i16
    }));
    samples.extend(std::iter::repeat(0i16).take(pad));

    let mut out = Cursor::new(Vec::new());
    wav::write(
        wav::Header::new(1, 1, sample_rate, 16),
        &wav::BitDepth::Sixteen(samples),
        &mut out,
    )
    .unwrap();
    out.into_inner()
}

fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: audio/wav\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(body: Vec<u8>) -> test::TestRequest {
    test::TestRequest::post()
        .uri("/predict")
        .insert_header((
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        ))
        .set_payload(body)
}

#[actix_web::test]
async fn predict_returns_majority_label() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(dir.path())))
            .configure(handlers::configure),
    )
    .await;

    let body = multipart_body("file", "speaker.wav", &tone_wav(24_000, 2.5, 0.5));
    let resp = test::call_service(&app, multipart_request(body).to_request()).await;
    assert_eq!(resp.status(), 200);

    let json: Value = test::read_body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["predictions"], "other");

    // the upload is removed once answered
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[actix_web::test]
async fn timed_out_prediction_still_removes_upload() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.server.request_timeout_secs = 0;
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state_with(config, dir.path())))
            .configure(handlers::configure),
    )
    .await;

    let body = multipart_body("file", "speaker.wav", &tone_wav(24_000, 2.5, 0.5));
    let resp = test::call_service(&app, multipart_request(body).to_request()).await;
    assert_eq!(resp.status(), 504);
    let json: Value = test::read_body_json(resp).await;
    assert_eq!(json["error"]["kind"], "timeout");

    // the abandoned blocking task cleans up once it finishes
    let mut remaining = usize::MAX;
    for _ in 0..100 {
        remaining = std::fs::read_dir(dir.path()).unwrap().count();
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert_eq!(remaining, 0);
}

#[actix_web::test]
async fn predict_without_file_is_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(dir.path())))
            .configure(handlers::configure),
    )
    .await;

    let body = multipart_body("audio", "speaker.wav", b"RIFF");
    let resp = test::call_service(&app, multipart_request(body).to_request()).await;
    assert_eq!(resp.status(), 400);

    let json: Value = test::read_body_json(resp).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["kind"], "bad_request");
    assert!(json["error"]["timestamp"].is_string());
}

#[actix_web::test]
async fn predict_too_short_is_unprocessable() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(dir.path())))
            .configure(handlers::configure),
    )
    .await;

    let body = multipart_body("file", "short.wav", &tone_wav(24_000, 0.5, 0.0));
    let resp = test::call_service(&app, multipart_request(body).to_request()).await;
    assert_eq!(resp.status(), 422);

    let json: Value = test::read_body_json(resp).await;
    assert_eq!(json["error"]["kind"], "insufficient_audio");
}

#[actix_web::test]
async fn bot_reports_unreachable_source() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(dir.path())))
            .configure(handlers::configure),
    )
    .await;

    // nothing listens on port 9 of the loopback interface
    let req = test::TestRequest::post()
        .uri("/bot")
        .set_json(serde_json::json!({ "path": "http://127.0.0.1:9/clip.wav" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status() == 502 || resp.status() == 504);

    let json: Value = test::read_body_json(resp).await;
    assert_eq!(json["success"], false);
    let kind = json["error"]["kind"].as_str().unwrap();
    assert!(kind == "download_error" || kind == "timeout");
}

#[actix_web::test]
async fn bot_rejects_malformed_json() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(dir.path())))
            .configure(handlers::configure),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/bot")
        .insert_header(("content-type", "application/json"))
        .set_payload("{\"url\": 3}")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let json: Value = test::read_body_json(resp).await;
    assert_eq!(json["error"]["kind"], "bad_request");
}

#[actix_web::test]
async fn health_and_metrics_describe_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state(dir.path())))
            .wrap(MetricsMiddleware)
            .configure(handlers::configure),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/").to_request()).await;
    assert_eq!(resp.status(), 200);

    let req = test::TestRequest::get().uri("/api/v1/health").to_request();
    let json: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["model"]["name"], "cnn/test");
    assert_eq!(json["model"]["classes"][0], "english");
    assert_eq!(json["features"]["segment_width"], 30);

    let req = test::TestRequest::get().uri("/api/v1/metrics").to_request();
    let json: Value = test::call_and_read_body_json(&app, req).await;
    assert!(json["overall"]["total_requests"].as_u64().unwrap() >= 2);
    let endpoints = json["endpoints"].as_array().unwrap();
    assert!(endpoints.iter().any(|e| e["endpoint"] == "GET /api/v1/health"));
}
