//! Ollama inference runtime.
//!
//! Speaks Ollama's native API rather than its OpenAI-compatible surface,
//! because residency control (`keep_alive`) and the resident-model listing
//! (`/api/ps`) only exist there.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::SwapConfig;
use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, GenerateRequest, InferenceRuntime, KeepAlive, MessageContent, Role,
};

/// Provider name constant to avoid magic strings.
const PROVIDER_NAME: &str = "ollama";

/// Ollama HTTP runtime.
pub struct OllamaRuntime {
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl OllamaRuntime {
    /// Create a new runtime client from the swap configuration.
    pub fn new(config: &SwapConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("Failed to build reqwest client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Construct API URL for a given path.
    /// Strips a trailing `/api` from base_url to avoid double `/api` issues.
    fn api_url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/api").unwrap_or(base);
        format!("{}/api/{}", base, path.trim_start_matches('/'))
    }

    /// Add Authorization header if API key is present.
    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {}", key.expose_secret())),
            None => request,
        }
    }

    /// Send a request and return the body text of a successful response.
    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        model: Option<&str>,
    ) -> Result<String, LlmError> {
        let request = self.add_auth_header(request);

        let response = request.send().await.map_err(|e| {
            tracing::debug!("Ollama request failed: {}", e);
            LlmError::RequestFailed {
                provider: PROVIDER_NAME.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        let response_text = response.text().await.map_err(|e| LlmError::RequestFailed {
            provider: PROVIDER_NAME.to_string(),
            reason: format!("Failed to read response body: {}", e),
        })?;

        tracing::debug!("Ollama response status: {}", status);

        if status.is_success() {
            return Ok(response_text);
        }

        Err(match (status, model) {
            (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => LlmError::AuthFailed {
                provider: PROVIDER_NAME.to_string(),
            },
            (StatusCode::NOT_FOUND, Some(model)) => LlmError::ModelNotAvailable {
                provider: PROVIDER_NAME.to_string(),
                model: model.to_string(),
            },
            _ => LlmError::RequestFailed {
                provider: PROVIDER_NAME.to_string(),
                reason: format!("HTTP {}: {}", status, excerpt(&response_text)),
            },
        })
    }

    async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &T,
        model: &str,
    ) -> Result<R, LlmError> {
        let url = self.api_url(path);
        tracing::debug!("Sending request to Ollama: {}", url);

        let text = self.send(self.client.post(&url).json(body), Some(model)).await?;
        parse_body(&text)
    }
}

fn parse_body<R: DeserializeOwned>(text: &str) -> Result<R, LlmError> {
    serde_json::from_str(text).map_err(|e| LlmError::InvalidResponse {
        provider: PROVIDER_NAME.to_string(),
        reason: format!("JSON parse error: {}. Raw: {}", e, excerpt(text)),
    })
}

fn excerpt(text: &str) -> &str {
    &text[..crate::util::floor_char_boundary(text, 200)]
}

#[async_trait]
impl InferenceRuntime for OllamaRuntime {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError> {
        let body = GenerateBody {
            model: &request.model,
            prompt: &request.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };
        let response: GenerateResponse = self.post_json("generate", &body, &request.model).await?;
        Ok(response.response)
    }

    async fn set_keep_alive(&self, model: &str, keep_alive: KeepAlive) -> Result<(), LlmError> {
        let body = KeepAliveBody {
            model,
            keep_alive: keep_alive.wire_value(),
        };
        let url = self.api_url("generate");
        // The body of a residency response carries nothing we need.
        self.send(self.client.post(&url).json(&body), Some(model))
            .await
            .map(|_| ())
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<Option<String>, LlmError> {
        let body = ChatBody {
            model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            stream: false,
        };
        let response: ChatResponse = self.post_json("chat", &body, model).await?;
        Ok(response.message.and_then(|m| m.content))
    }

    async fn running_models(&self) -> Result<Vec<String>, LlmError> {
        let url = self.api_url("ps");
        let text = self.send(self.client.get(&url), None).await?;
        let response: PsResponse = parse_body(&text)?;
        Ok(response
            .models
            .into_iter()
            .filter_map(|m| m.model.or(m.name))
            .collect())
    }
}

// Ollama native API types

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Serialize)]
struct KeepAliveBody<'a> {
    model: &'a str,
    keep_alive: i64,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a Role,
    content: &'a MessageContent,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PsResponse {
    #[serde(default)]
    models: Vec<PsModel>,
}

#[derive(Debug, Deserialize)]
struct PsModel {
    name: Option<String>,
    model: Option<String>,
}
