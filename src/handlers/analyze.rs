//! # Audio Analysis Endpoint
//!
//! `POST /analyze` accepts a multipart upload and runs the whole pipeline:
//!
//! 1. read the `file` field (and an optional `session_id`)
//! 2. repair the container header for streamed chunks
//! 3. transcode to canonical WAV
//! 4. submit, poll and fetch emotion predictions
//!
//! ## Response:
//! ```json
//! {
//!   "emotions": [{"name": "Calmness", "score": 0.41}],
//!   "duration": 3.2,
//!   "job_id": "7a1e...",
//!   "timing": {
//!     "file_save": 0.004,
//!     "processing": 0.180,
//!     "analysis": {"submit": 0.3, "poll": 2.1, "predict": 0.2, "total": 2.6, "attempts": 3},
//!     "total": 2.79
//!   }
//! }
//! ```

use crate::error::{AppError, AppResult};
use crate::prosody::{AnalysisTiming, EmotionScore};
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::stream::StreamExt;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

pub const SESSION_HEADER: &str = "X-Session-Id";

const FILE_FIELD: &str = "file";
const SESSION_FIELD: &str = "session_id";
const MAX_SESSION_ID_BYTES: usize = 256;

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub emotions: Vec<EmotionScore>,
    pub duration: f64,
    pub job_id: String,
    pub timing: PipelineTiming,
}

/// Seconds spent per stage of one request.
#[derive(Debug, Serialize)]
pub struct PipelineTiming {
    pub file_save: f64,
    pub processing: f64,
    pub analysis: AnalysisPhases,
    pub total: f64,
}

#[derive(Debug, Serialize)]
pub struct AnalysisPhases {
    #[serde(flatten)]
    pub timing: AnalysisTiming,
    pub attempts: u32,
}

/// Fields pulled out of the multipart form.
#[derive(Debug, Default)]
struct UploadForm {
    file: Option<Vec<u8>>,
    filename: Option<String>,
    session_id: Option<String>,
}

async fn read_field(field: &mut Field, limit: usize, what: &str) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Failed to read {}: {}", what, e)))?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::BadRequest(format!(
                "{} too large (max: {} bytes)",
                what, limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn read_form(payload: &mut Multipart, max_upload_bytes: usize) -> AppResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::BadRequest(format!("Invalid multipart form: {}", e)))?;

        let (name, filename) = match field.content_disposition() {
            Some(cd) => (
                cd.get_name().unwrap_or_default().to_string(),
                cd.get_filename().map(str::to_string),
            ),
            None => continue,
        };

        match name.as_str() {
            FILE_FIELD => {
                form.file = Some(read_field(&mut field, max_upload_bytes, "File").await?);
                form.filename = filename;
            }
            SESSION_FIELD => {
                let raw = read_field(&mut field, MAX_SESSION_ID_BYTES, "Session id").await?;
                let id = String::from_utf8_lossy(&raw).trim().to_string();
                if !id.is_empty() {
                    form.session_id = Some(id);
                }
            }
            other => debug!(field = other, "Ignoring unknown form field"),
        }
    }

    Ok(form)
}

fn session_from_header(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub async fn analyze_audio(
    state: web::Data<AppState>,
    req: HttpRequest,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let started = Instant::now();

    let form = read_form(&mut payload, state.config.audio.max_upload_bytes).await?;
    let upload = form
        .file
        .ok_or_else(|| AppError::BadRequest("No audio file provided".to_string()))?;
    if upload.is_empty() {
        return Err(AppError::BadRequest("Uploaded audio file is empty".to_string()));
    }

    let session_id = form.session_id.or_else(|| session_from_header(&req));
    info!(
        filename = form.filename.as_deref().unwrap_or("unknown"),
        bytes = upload.len(),
        session = session_id.as_deref().unwrap_or("none"),
        "Received audio upload"
    );

    let guard = state.begin_analysis();

    let (audio_bytes, action) = state.headers.repair(session_id.as_deref(), upload);
    debug!(action = ?action, bytes = audio_bytes.len(), "Header repair");
    let file_save = started.elapsed().as_secs_f64();

    let transcode_started = Instant::now();
    let audio = state.transcoder.to_wav(&audio_bytes).await?;
    let processing = transcode_started.elapsed().as_secs_f64();

    let result = state.analyzer.analyze(&audio).await?;
    guard.succeed();

    let response = AnalyzeResponse {
        emotions: result.emotions,
        duration: result.duration,
        job_id: result.job_id,
        timing: PipelineTiming {
            file_save,
            processing,
            analysis: AnalysisPhases {
                timing: result.timing,
                attempts: result.poll_attempts,
            },
            total: started.elapsed().as_secs_f64(),
        },
    };

    info!(
        job_id = %response.job_id,
        emotions = response.emotions.len(),
        total_secs = response.timing.total,
        "Analysis complete"
    );

    Ok(HttpResponse::Ok().json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::header::EBML_MAGIC;
    use crate::audio::wav::tests::encode_wav;
    use crate::config::AppConfig;
    use crate::handlers;
    use crate::prosody::job::{JobStatus, JobStatusReport};
    use crate::prosody::predictions::tests::payload;
    use crate::prosody::testing::FakeApi;
    use crate::state::tests::{test_config, test_state_with, FakeTranscoder};
    use actix_web::http::{header, StatusCode};
    use actix_web::{test, App};
    use serde_json::{json, Value};
    use std::sync::Arc;

    const BOUNDARY: &str = "prosody-test-boundary";

    enum Part<'a> {
        File(&'a [u8]),
        Text(&'a str, &'a str),
    }

    fn multipart_request(parts: &[Part<'_>]) -> test::TestRequest {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match part {
                Part::File(data) => {
                    body.extend_from_slice(
                        b"Content-Disposition: form-data; name=\"file\"; filename=\"chunk.webm\"\r\n\
                          Content-Type: audio/webm\r\n\r\n",
                    );
                    body.extend_from_slice(data);
                }
                Part::Text(name, value) => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                            .as_bytes(),
                    );
                    body.extend_from_slice(value.as_bytes());
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        test::TestRequest::post()
            .uri("/analyze")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    fn webm_chunk(len: usize) -> Vec<u8> {
        let mut chunk = EBML_MAGIC.to_be_bytes().to_vec();
        chunk.extend((0..len - 4).map(|i| (i % 251) as u8));
        chunk
    }

    fn completed_api() -> Arc<FakeApi> {
        Arc::new(
            FakeApi::new(vec![Ok(JobStatusReport::new(JobStatus::Completed))]).with_predictions(
                payload(json!([
                    {"name": "Calmness", "score": 0.41},
                    {"name": "Joy", "score": 0.22},
                ])),
            ),
        )
    }

    fn clip_transcoder() -> Arc<FakeTranscoder> {
        Arc::new(FakeTranscoder::returning(encode_wav(1, 44_100, 88_200)))
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state))
                    .configure(handlers::configure),
            )
            .await
        };
    }

    async fn detail_of(resp: actix_web::dev::ServiceResponse) -> String {
        let body: Value = test::read_body_json(resp).await;
        body["detail"].as_str().unwrap_or_default().to_string()
    }

    #[actix_web::test]
    async fn test_missing_file_is_400_and_never_transcodes() {
        let transcoder = clip_transcoder();
        let api = completed_api();
        let app = app!(test_state_with(test_config(), transcoder.clone(), api.clone()));

        let req = multipart_request(&[Part::Text("session_id", "abc")]).to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(detail_of(resp).await, "No audio file provided");
        assert!(transcoder.inputs.lock().unwrap().is_empty());
        assert_eq!(api.submit_calls(), 0);
    }

    #[actix_web::test]
    async fn test_empty_file_is_400() {
        let transcoder = clip_transcoder();
        let app = app!(test_state_with(test_config(), transcoder.clone(), completed_api()));

        let resp = test::call_service(&app, multipart_request(&[Part::File(b"")]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(transcoder.inputs.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_oversized_file_is_400() {
        let mut config: AppConfig = test_config();
        config.audio.max_upload_bytes = 1024;
        let transcoder = clip_transcoder();
        let app = app!(test_state_with(config, transcoder.clone(), completed_api()));

        let chunk = webm_chunk(2048);
        let resp = test::call_service(&app, multipart_request(&[Part::File(&chunk)]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(detail_of(resp).await.contains("too large"));
        assert!(transcoder.inputs.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn test_success_response_shape() {
        let app = app!(test_state_with(test_config(), clip_transcoder(), completed_api()));

        let chunk = webm_chunk(6000);
        let resp = test::call_service(&app, multipart_request(&[Part::File(&chunk)]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["job_id"], "job-123");
        assert_eq!(body["duration"], 2.0);
        assert_eq!(
            body["emotions"],
            json!([{"name": "Calmness", "score": 0.41}, {"name": "Joy", "score": 0.22}])
        );

        let timing = &body["timing"];
        for key in ["file_save", "processing", "total"] {
            assert!(timing[key].is_f64(), "missing timing.{}", key);
        }
        for key in ["submit", "poll", "predict", "total"] {
            assert!(timing["analysis"][key].is_f64(), "missing timing.analysis.{}", key);
        }
        assert_eq!(timing["analysis"]["attempts"], 1);
    }

    #[actix_web::test]
    async fn test_headerless_chunk_gets_session_header() {
        let transcoder = clip_transcoder();
        let app = app!(test_state_with(test_config(), transcoder.clone(), completed_api()));

        let first = webm_chunk(6000);
        let second = vec![0x55u8; 3000];

        let req = multipart_request(&[Part::Text("session_id", "s1"), Part::File(&first)]);
        assert!(test::call_service(&app, req.to_request()).await.status().is_success());

        let req = multipart_request(&[Part::File(&second)]).insert_header((SESSION_HEADER, "s1"));
        assert!(test::call_service(&app, req.to_request()).await.status().is_success());

        let inputs = transcoder.inputs.lock().unwrap();
        assert_eq!(inputs[0], first);
        let mut expected = first[..4096].to_vec();
        expected.extend_from_slice(&second);
        assert_eq!(inputs[1], expected);
    }

    #[actix_web::test]
    async fn test_sessions_do_not_share_headers() {
        let transcoder = clip_transcoder();
        let app = app!(test_state_with(test_config(), transcoder.clone(), completed_api()));

        let first = webm_chunk(6000);
        let orphan = vec![0x55u8; 100];

        let req = multipart_request(&[Part::Text("session_id", "a"), Part::File(&first)]);
        test::call_service(&app, req.to_request()).await;
        let req = multipart_request(&[Part::Text("session_id", "b"), Part::File(&orphan)]);
        test::call_service(&app, req.to_request()).await;

        let inputs = transcoder.inputs.lock().unwrap();
        assert_eq!(inputs[1], orphan);
    }

    #[actix_web::test]
    async fn test_transcode_failure_is_500_with_stderr() {
        let transcoder = Arc::new(FakeTranscoder::failing("Invalid data found when processing input"));
        let api = completed_api();
        let state = test_state_with(test_config(), transcoder, api.clone());
        let app = app!(state.clone());

        let chunk = webm_chunk(100);
        let resp = test::call_service(&app, multipart_request(&[Part::File(&chunk)]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            detail_of(resp).await,
            "Audio processing failed: FFmpeg conversion failed: Invalid data found when processing input"
        );
        assert_eq!(api.submit_calls(), 0);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.analyses_failed, 1);
        assert_eq!(metrics.active_analyses, 0);
    }

    #[actix_web::test]
    async fn test_rejected_job_is_500() {
        let api = Arc::new(FakeApi::new(vec![Ok(
            JobStatusReport::new(JobStatus::Rejected).with_message("unsupported audio"),
        )]));
        let app = app!(test_state_with(test_config(), clip_transcoder(), api.clone()));

        let chunk = webm_chunk(100);
        let resp = test::call_service(&app, multipart_request(&[Part::File(&chunk)]).to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            detail_of(resp).await,
            "Prosody analysis job was rejected: unsupported audio"
        );
        assert!(!api.predictions_fetched());
    }
}
