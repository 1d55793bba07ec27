use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::error::{Result, StudioError};
use crate::generation::{InferenceService, JobSpec};

pub const REPLICATE_API_ROOT: &str = "https://api.replicate.com";
/// zsxkib/flux-pulid
pub const FLUX_PULID_VERSION: &str =
    "8baa7ef2255075b46f4d91cd238c21d31181b3e6a864463f967960bb0112525b";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

async fn assert_ok_response(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(StudioError::generation(format!(
        "Replicate request failed: {status} {text}"
    )))
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: Option<String>,
    status: Option<String>,
    output: Option<PredictionOutput>,
    error: Option<serde_json::Value>,
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PredictionOutput {
    Many(Vec<String>),
    One(String),
}

impl PredictionOutput {
    fn into_urls(self) -> Vec<String> {
        match self {
            PredictionOutput::Many(urls) => urls,
            PredictionOutput::One(url) => vec![url],
        }
    }
}

enum PredictionState {
    Done(Vec<String>),
    /// Prediction id and the URL to re-read it from.
    Pending(String, String),
}

#[derive(Clone, Debug)]
pub struct ReplicateClient {
    client: Client,
    api_root: String,
    api_token: String,
    model_version: String,
    poll_interval: Duration,
}

impl ReplicateClient {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_root: REPLICATE_API_ROOT.to_string(),
            api_token: api_token.into(),
            model_version: FLUX_PULID_VERSION.to_string(),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }

    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = version.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn interpret(&self, prediction: Prediction) -> Result<PredictionState> {
        let status = prediction
            .status
            .ok_or_else(|| StudioError::generation("Replicate did not return a prediction status"))?;
        match status.as_str() {
            "succeeded" => {
                let urls = prediction
                    .output
                    .map(PredictionOutput::into_urls)
                    .ok_or_else(|| StudioError::generation("Replicate returned no output"))?;
                Ok(PredictionState::Done(urls))
            }
            "failed" | "canceled" => {
                let message = match prediction.error {
                    Some(serde_json::Value::String(text)) => text,
                    Some(other) => other.to_string(),
                    None => "unknown error".to_string(),
                };
                Err(StudioError::generation(format!(
                    "Replicate prediction {status}: {message}"
                )))
            }
            _ => {
                let id = prediction.id.ok_or_else(|| {
                    StudioError::generation("Replicate did not return a prediction id")
                })?;
                let get_url = prediction
                    .urls
                    .and_then(|urls| urls.get)
                    .filter(|url| !url.trim().is_empty())
                    .unwrap_or_else(|| format!("{}/v1/predictions/{id}", self.api_root));
                Ok(PredictionState::Pending(id, get_url))
            }
        }
    }

    /// Re-reads the prediction from `get_url` until it settles. There is no
    /// deadline.
    async fn wait_for_prediction(&self, id: &str, get_url: &str) -> Result<Vec<String>> {
        let mut poll_count = 0u32;
        loop {
            sleep(self.poll_interval).await;
            poll_count += 1;
            let response = self
                .client
                .get(get_url)
                .bearer_auth(&self.api_token)
                .send()
                .await?;
            let response = assert_ok_response(response).await?;
            let prediction: Prediction = response.json().await?;
            debug!(%id, poll_count, status = ?prediction.status, "polled prediction");
            if let PredictionState::Done(urls) = self.interpret(prediction)? {
                return Ok(urls);
            }
        }
    }
}

#[async_trait]
impl InferenceService for ReplicateClient {
    async fn submit(&self, job: &JobSpec) -> Result<Vec<String>> {
        if self.api_token.trim().is_empty() {
            return Err(StudioError::generation("missing REPLICATE_API_TOKEN"));
        }
        let response = self
            .client
            .post(format!("{}/v1/predictions", self.api_root))
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&json!({
                "version": self.model_version,
                "input": job,
            }))
            .send()
            .await?;
        let response = assert_ok_response(response).await?;
        let prediction: Prediction = response.json().await?;

        match self.interpret(prediction)? {
            PredictionState::Done(urls) => {
                info!(count = urls.len(), "Replicate prediction finished");
                Ok(urls)
            }
            PredictionState::Pending(id, get_url) => {
                warn!(%id, %get_url, "Replicate prediction still running after wait, polling");
                self.wait_for_prediction(&id, &get_url).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::Value;

    use super::*;
    use crate::generation::GenerationParams;

    #[derive(Clone, Default)]
    struct MockState {
        polls: Arc<AtomicUsize>,
        request: Arc<Mutex<Option<(HeaderMap, Value)>>>,
        create_reply: Arc<Mutex<Value>>,
    }

    async fn create(
        State(state): State<MockState>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        *state.request.lock().unwrap() = Some((headers, body));
        let reply = state.create_reply.lock().unwrap().clone();
        (StatusCode::CREATED, Json(reply))
    }

    async fn fetch(State(state): State<MockState>, Path(id): Path<String>) -> Json<Value> {
        let polls = state.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if polls < 2 {
            Json(json!({"id": id, "status": "processing", "output": null}))
        } else {
            Json(json!({"id": id, "status": "succeeded", "output": ["https://cdn.test/out-0.webp"]}))
        }
    }

    async fn fetch_from_get_url(
        State(state): State<MockState>,
        Path(id): Path<String>,
    ) -> Json<Value> {
        state.polls.fetch_add(1, Ordering::SeqCst);
        Json(json!({"id": id, "status": "succeeded", "output": ["https://cdn.test/from-get.png"]}))
    }

    async fn mock(reply: Value) -> (String, MockState) {
        let state = MockState::default();
        *state.create_reply.lock().unwrap() = reply;
        let router = Router::new()
            .route("/v1/predictions", post(create))
            .route("/v1/predictions/{id}", get(fetch))
            .route("/poll/{id}", get(fetch_from_get_url))
            .with_state(state.clone());
        (crate::test_support::spawn_server(router).await, state)
    }

    fn client(root: &str) -> ReplicateClient {
        ReplicateClient::new("r8_test")
            .with_api_root(format!("{root}/"))
            .with_poll_interval(Duration::from_millis(5))
    }

    fn job() -> JobSpec {
        JobSpec::new(&GenerationParams::default(), b"face")
    }

    #[tokio::test]
    async fn immediate_success_returns_output() {
        let (root, state) = mock(json!({
            "id": "p1",
            "status": "succeeded",
            "output": ["https://cdn.test/out-0.png", "https://cdn.test/out-1.png"]
        }))
        .await;

        let urls = client(&root).submit(&job()).await.unwrap();
        assert_eq!(urls, vec!["https://cdn.test/out-0.png", "https://cdn.test/out-1.png"]);
        assert_eq!(state.polls.load(Ordering::SeqCst), 0);

        let (headers, body) = state.request.lock().unwrap().clone().unwrap();
        assert_eq!(headers["authorization"], "Bearer r8_test");
        assert_eq!(headers["prefer"], "wait");
        assert_eq!(body["version"], FLUX_PULID_VERSION);
        assert_eq!(body["input"]["main_face_image"], "data:image/jpeg;base64,ZmFjZQ==");
        assert_eq!(body["input"]["output_format"], "png");
    }

    #[tokio::test]
    async fn pending_prediction_is_polled_until_done() {
        let (root, state) = mock(json!({"id": "p2", "status": "starting", "output": null})).await;

        let urls = client(&root).submit(&job()).await.unwrap();
        assert_eq!(urls, vec!["https://cdn.test/out-0.webp"]);
        assert_eq!(state.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pending_prediction_follows_its_get_url() {
        let (root, state) = mock(Value::Null).await;
        *state.create_reply.lock().unwrap() = json!({
            "id": "p5",
            "status": "processing",
            "output": null,
            "urls": {"get": format!("{root}/poll/p5")}
        });

        let urls = client(&root).submit(&job()).await.unwrap();
        assert_eq!(urls, vec!["https://cdn.test/from-get.png"]);
        assert_eq!(state.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn single_url_output_is_accepted() {
        let (root, _) = mock(json!({
            "id": "p3",
            "status": "succeeded",
            "output": "https://cdn.test/only.png"
        }))
        .await;
        let urls = client(&root).submit(&job()).await.unwrap();
        assert_eq!(urls, vec!["https://cdn.test/only.png"]);
    }

    #[tokio::test]
    async fn failed_prediction_reports_service_error() {
        let (root, _) = mock(json!({
            "id": "p4",
            "status": "failed",
            "error": "NSFW content detected"
        }))
        .await;
        let err = client(&root).submit(&job()).await.unwrap_err();
        assert!(matches!(err, StudioError::Generation(_)));
        assert!(err.to_string().contains("NSFW content detected"));
    }

    #[tokio::test]
    async fn http_errors_and_missing_token_fail() {
        let router = Router::new().route(
            "/v1/predictions",
            post(|| async { (StatusCode::UNAUTHORIZED, "bad token") }),
        );
        let root = crate::test_support::spawn_server(router).await;
        let err = client(&root).submit(&job()).await.unwrap_err();
        assert!(err.to_string().contains("401"));

        let err = ReplicateClient::new("  ").submit(&job()).await.unwrap_err();
        assert!(err.to_string().contains("REPLICATE_API_TOKEN"));
    }
}
