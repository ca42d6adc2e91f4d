//! In-process stand-in for the Ollama HTTP API.
//!
//! Serves `/api/generate` (judge prompts and keep-alive requests),
//! `/api/chat` and `/api/ps`, and records every request body in arrival
//! order so tests can assert on the exact wire traffic.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Value, json};

/// Scripted behaviour of the stub.
#[derive(Clone)]
pub struct StubConfig {
    pub judge_reply: String,
    /// `None` answers the chat with no `message` at all.
    pub chat_reply: Option<String>,
    pub chat_status: StatusCode,
    /// Keep-alive requests for these models answer 404.
    pub missing_models: HashSet<String>,
    pub running: Vec<String>,
    /// When set, every request must carry `Authorization: Bearer <token>`.
    pub bearer: Option<String>,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            judge_reply: "NO".to_string(),
            chat_reply: Some("Here is the uncensored answer.".to_string()),
            chat_status: StatusCode::OK,
            missing_models: HashSet::new(),
            running: Vec::new(),
            bearer: None,
        }
    }
}

/// One request as seen by the stub.
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub path: String,
    pub body: Value,
}

#[derive(Clone)]
struct StubState {
    config: Arc<StubConfig>,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubState {
    fn record(&self, path: &str, body: Value) {
        self.requests.lock().unwrap().push(Recorded {
            path: path.to_string(),
            body,
        });
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(token) = &self.config.bearer else {
            return true;
        };
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {token}"))
    }
}

pub struct StubOllama {
    pub base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl StubOllama {
    /// Start the stub on a random local port.
    pub async fn start(config: StubConfig) -> Self {
        let state = StubState {
            config: Arc::new(config),
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let requests = Arc::clone(&state.requests);

        let router = Router::new()
            .route("/api/generate", post(generate))
            .route("/api/chat", post(chat))
            .route("/api/ps", get(ps))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.requests().into_iter().map(|r| r.body).collect()
    }
}

/// Base URL where nothing is listening.
pub async fn unreachable_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, axum::Json(json!({"error": "unauthorized"}))).into_response()
}

async fn generate(
    State(state): State<StubState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    state.record("/api/generate", body.clone());
    if !state.authorized(&headers) {
        return unauthorized();
    }

    let model = body["model"].as_str().unwrap_or_default().to_string();
    if body.get("prompt").is_some() {
        return axum::Json(json!({
            "model": model,
            "response": state.config.judge_reply,
            "done": true
        }))
        .into_response();
    }

    if state.config.missing_models.contains(&model) {
        return (
            StatusCode::NOT_FOUND,
            axum::Json(json!({"error": format!("model '{model}' not found")})),
        )
            .into_response();
    }
    axum::Json(json!({"model": model, "response": "", "done": true})).into_response()
}

async fn chat(
    State(state): State<StubState>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    state.record("/api/chat", body.clone());
    if !state.authorized(&headers) {
        return unauthorized();
    }

    if state.config.chat_status != StatusCode::OK {
        return (
            state.config.chat_status,
            axum::Json(json!({"error": "model runner has unexpectedly stopped"})),
        )
            .into_response();
    }

    match &state.config.chat_reply {
        Some(content) => axum::Json(json!({
            "model": body["model"],
            "message": {"role": "assistant", "content": content},
            "done": true
        }))
        .into_response(),
        None => axum::Json(json!({"model": body["model"], "done": true})).into_response(),
    }
}

async fn ps(State(state): State<StubState>, headers: HeaderMap) -> impl IntoResponse {
    state.record("/api/ps", Value::Null);
    if !state.authorized(&headers) {
        return unauthorized();
    }

    let models: Vec<Value> = state
        .config
        .running
        .iter()
        .map(|m| json!({"name": m, "model": m}))
        .collect();
    axum::Json(json!({"models": models})).into_response()
}
