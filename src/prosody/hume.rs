//! Hume batch API transport.

use crate::audio::WavAudio;
use crate::config::HumeConfig;
use crate::prosody::error::{describe_upstream_body, ProsodyError};
use crate::prosody::job::{JobStatusBody, JobStatusReport};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

const API_KEY_HEADER: &str = "X-Hume-Api-Key";

/// The three calls the analyzer needs from a batch job API.
#[async_trait]
pub trait ProsodyApi: Send + Sync {
    /// Submit a job for `audio`; returns the job id.
    async fn submit_job(&self, audio: &WavAudio) -> Result<String, ProsodyError>;
    async fn job_status(&self, job_id: &str) -> Result<JobStatusReport, ProsodyError>;
    /// Raw predictions payload. A body that is not JSON comes back as `Null`.
    async fn predictions(&self, job_id: &str) -> Result<Value, ProsodyError>;
}

/// Models requested for every job.
pub fn job_config() -> Value {
    json!({
        "models": {
            "prosody": {
                "granularity": "utterance"
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

pub struct HumeClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl HumeClient {
    pub fn new(config: &HumeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/{}", self.base_url, job_id)
    }

    /// Error detail for a non-200 response.
    async fn error_detail(response: Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), body = %body, "Prosody API returned an error");
        describe_upstream_body(status.as_u16(), &body)
    }
}

#[async_trait]
impl ProsodyApi for HumeClient {
    async fn submit_job(&self, audio: &WavAudio) -> Result<String, ProsodyError> {
        let file = Part::bytes(audio.bytes().to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = Form::new()
            .text("json", job_config().to_string())
            .part("file", file);

        debug!(wav_bytes = audio.len_bytes(), "Submitting prosody job");
        let response = self
            .client
            .post(&self.base_url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            let detail = Self::error_detail(response).await;
            return Err(ProsodyError::Submit(detail));
        }

        let body: SubmitResponse = response
            .json()
            .await
            .map_err(|e| ProsodyError::InvalidResponse(format!("missing job_id: {}", e)))?;
        info!(job_id = %body.job_id, "Prosody job submitted");
        Ok(body.job_id)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatusReport, ProsodyError> {
        let response = self
            .client
            .get(self.job_url(job_id))
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            let detail = Self::error_detail(response).await;
            return Err(ProsodyError::Status(detail));
        }

        let body: JobStatusBody = response
            .json()
            .await
            .map_err(|e| ProsodyError::InvalidResponse(format!("bad job status: {}", e)))?;
        Ok(body.into())
    }

    async fn predictions(&self, job_id: &str) -> Result<Value, ProsodyError> {
        let response = self
            .client
            .get(format!("{}/predictions", self.job_url(job_id)))
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            let detail = Self::error_detail(response).await;
            return Err(ProsodyError::Predictions(detail));
        }

        let text = response.text().await?;
        Ok(parse_predictions_body(&text))
    }
}

/// Lenient JSON parse; anything unparseable becomes `Null`.
pub fn parse_predictions_body(text: &str) -> Value {
    match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Predictions body is not JSON");
            Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::tests::encode_wav;
    use crate::prosody::error::UPSTREAM_RETRY_MESSAGE;
    use actix_multipart::Multipart;
    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use futures_util::StreamExt;
    use std::sync::Mutex;

    /// What the local jobs server saw.
    #[derive(Default)]
    struct Seen {
        requests: Mutex<Vec<String>>,
        api_keys: Mutex<Vec<String>>,
        accepts: Mutex<Vec<String>>,
        parts: Mutex<Vec<(String, Option<String>, Vec<u8>)>>,
    }

    impl Seen {
        fn record(&self, req: &HttpRequest) {
            let header = |name: &str| {
                req.headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            };
            self.requests
                .lock()
                .unwrap()
                .push(format!("{} {}", req.method(), req.path()));
            self.api_keys.lock().unwrap().push(header(API_KEY_HEADER));
            self.accepts.lock().unwrap().push(header("accept"));
        }
    }

    async fn submit_ok(req: HttpRequest, seen: web::Data<Seen>, mut form: Multipart) -> HttpResponse {
        seen.record(&req);
        while let Some(Ok(mut field)) = form.next().await {
            let (name, filename) = match field.content_disposition() {
                Some(cd) => (
                    cd.get_name().unwrap_or_default().to_string(),
                    cd.get_filename().map(str::to_string),
                ),
                None => continue,
            };
            let mut bytes = Vec::new();
            while let Some(Ok(chunk)) = field.next().await {
                bytes.extend_from_slice(&chunk);
            }
            seen.parts.lock().unwrap().push((name, filename, bytes));
        }
        HttpResponse::Ok().json(json!({ "job_id": "job-42" }))
    }

    async fn status_ok(req: HttpRequest, seen: web::Data<Seen>) -> HttpResponse {
        seen.record(&req);
        HttpResponse::Ok().json(json!({ "job_id": "job-42", "state": { "status": "COMPLETED" } }))
    }

    async fn predictions_ok(req: HttpRequest, seen: web::Data<Seen>) -> HttpResponse {
        seen.record(&req);
        HttpResponse::Ok().json(json!([{ "source": { "type": "file" } }]))
    }

    async fn unauthorized() -> HttpResponse {
        HttpResponse::Unauthorized().body(r#"{"message":"Invalid API key"}"#)
    }

    async fn not_found() -> HttpResponse {
        HttpResponse::NotFound().body(r#"{"message":"Job not found"}"#)
    }

    async fn bad_gateway() -> HttpResponse {
        HttpResponse::BadGateway()
            .content_type("text/html")
            .body("<!DOCTYPE html><html><head><title>502 Bad Gateway</title></head></html>")
    }

    fn healthy_routes(cfg: &mut web::ServiceConfig) {
        cfg.route("/jobs", web::post().to(submit_ok))
            .route("/jobs/{id}", web::get().to(status_ok))
            .route("/jobs/{id}/predictions", web::get().to(predictions_ok));
    }

    fn failing_routes(cfg: &mut web::ServiceConfig) {
        cfg.route("/jobs", web::post().to(unauthorized))
            .route("/jobs/{id}", web::get().to(not_found))
            .route("/jobs/{id}/predictions", web::get().to(bad_gateway));
    }

    /// Serve `routes` on an ephemeral port; returns the jobs base URL.
    fn serve(routes: fn(&mut web::ServiceConfig), seen: web::Data<Seen>) -> String {
        let server = HttpServer::new(move || App::new().app_data(seen.clone()).configure(routes))
            .workers(1)
            .disable_signals()
            .bind(("127.0.0.1", 0))
            .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        format!("http://{}/jobs", addr)
    }

    fn client_for(base_url: String) -> HumeClient {
        HumeClient::new(&HumeConfig {
            api_key: "secret-key".to_string(),
            base_url,
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[actix_web::test]
    async fn test_client_submits_polls_and_fetches() {
        let seen = web::Data::new(Seen::default());
        let client = client_for(serve(healthy_routes, seen.clone()));
        let audio = WavAudio::from_bytes(encode_wav(1, 44_100, 4_410)).unwrap();

        let job_id = client.submit_job(&audio).await.unwrap();
        assert_eq!(job_id, "job-42");

        let report = client.job_status(&job_id).await.unwrap();
        assert_eq!(report.status, crate::prosody::job::JobStatus::Completed);

        let predictions = client.predictions(&job_id).await.unwrap();
        assert_eq!(predictions[0]["source"]["type"], "file");

        assert_eq!(
            *seen.requests.lock().unwrap(),
            vec!["POST /jobs", "GET /jobs/job-42", "GET /jobs/job-42/predictions"]
        );
        assert!(seen.api_keys.lock().unwrap().iter().all(|k| k == "secret-key"));
        assert!(seen.accepts.lock().unwrap().iter().all(|a| a == "application/json"));

        let parts = seen.parts.lock().unwrap();
        assert_eq!(parts.len(), 2);
        let (name, filename, body) = &parts[0];
        assert_eq!(name, "json");
        assert_eq!(filename, &None);
        assert_eq!(String::from_utf8_lossy(body), job_config().to_string());
        let (name, filename, body) = &parts[1];
        assert_eq!(name, "file");
        assert_eq!(filename.as_deref(), Some("audio.wav"));
        assert_eq!(body.as_slice(), audio.bytes());
    }

    #[actix_web::test]
    async fn test_client_maps_error_responses_per_call() {
        let client = client_for(serve(failing_routes, web::Data::new(Seen::default())));
        let audio = WavAudio::from_bytes(encode_wav(1, 44_100, 441)).unwrap();

        let err = client.submit_job(&audio).await.unwrap_err();
        assert!(matches!(err, ProsodyError::Submit(_)));
        assert_eq!(err.to_string(), r#"Failed to submit job: {"message":"Invalid API key"}"#);

        let err = client.job_status("job-42").await.unwrap_err();
        assert!(matches!(err, ProsodyError::Status(_)));
        assert_eq!(err.to_string(), r#"Failed to get job status: {"message":"Job not found"}"#);

        let err = client.predictions("job-42").await.unwrap_err();
        match err {
            ProsodyError::Predictions(detail) => assert_eq!(detail, UPSTREAM_RETRY_MESSAGE),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_job_config_requests_utterance_prosody() {
        assert_eq!(
            job_config().to_string(),
            r#"{"models":{"prosody":{"granularity":"utterance"}}}"#
        );
    }

    #[test]
    fn test_client_normalizes_base_url() {
        let config = HumeConfig {
            api_key: "key".to_string(),
            base_url: "https://api.hume.ai/v0/batch/jobs/".to_string(),
            request_timeout_secs: 5,
        };
        let client = HumeClient::new(&config).unwrap();
        assert_eq!(client.job_url("abc"), "https://api.hume.ai/v0/batch/jobs/abc");
    }

    #[test]
    fn test_non_json_predictions_become_null() {
        assert_eq!(parse_predictions_body("<html>oops</html>"), Value::Null);
        assert_eq!(parse_predictions_body("[]"), serde_json::json!([]));
    }

    #[test]
    fn test_submit_response_requires_job_id() {
        assert!(serde_json::from_str::<SubmitResponse>(r#"{"job_id":"abc"}"#).is_ok());
        assert!(serde_json::from_str::<SubmitResponse>(r#"{"id":"abc"}"#).is_err());
    }
}
