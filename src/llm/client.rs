//! Failure policy and worker offloading around an [`InferenceRuntime`].
//!
//! Each runtime call is submitted to its own tokio task and awaited, so the
//! caller suspends at exactly one well-defined point per call. What a
//! failure means differs per call:
//!
//! | Call | On failure |
//! |------|------------|
//! | [`classify`](InferenceClient::classify) | error returned, caller decides |
//! | [`set_residency`](InferenceClient::set_residency) | logged, reported in [`ResidencyOutcome`] |
//! | [`generate`](InferenceClient::generate) | diagnostic text in [`GenerationOutcome`] |

use std::future::Future;
use std::sync::Arc;

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, GenerateRequest, InferenceRuntime, KeepAlive};

/// Prefix of the text substituted when replacement generation fails.
pub const GENERATION_FAILED_PREFIX: &str = "System Error: Failed to swap models.";

/// Substituted when the runtime answered but sent no content.
pub const MISSING_REPLACEMENT: &str = "Error generating replacement.";

/// Result of a load/unload request. Never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidencyOutcome {
    pub model: String,
    pub keep_alive: KeepAlive,
    pub succeeded: bool,
    /// Error description when `succeeded` is false.
    pub error: Option<String>,
}

/// Result of replacement generation. `content` is always usable as a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub content: String,
    pub failed: bool,
}

/// Inference client used by the classifier and the swap orchestrator.
#[derive(Clone)]
pub struct InferenceClient {
    runtime: Arc<dyn InferenceRuntime>,
}

impl InferenceClient {
    pub fn new(runtime: Arc<dyn InferenceRuntime>) -> Self {
        Self { runtime }
    }

    /// Deterministic, length-capped generation for judging.
    pub async fn classify(
        &self,
        model: &str,
        prompt: String,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let runtime = Arc::clone(&self.runtime);
        let request = GenerateRequest {
            model: model.to_string(),
            prompt,
            temperature: 0.0,
            max_tokens,
        };
        offload(async move { runtime.generate(request).await }).await
    }

    /// Load (`keep_loaded = true`, pinned indefinitely) or evict a model.
    pub async fn set_residency(&self, model: &str, keep_loaded: bool) -> ResidencyOutcome {
        let keep_alive = KeepAlive::from_keep_loaded(keep_loaded);
        let runtime = Arc::clone(&self.runtime);
        let owned_model = model.to_string();
        let result =
            offload(async move { runtime.set_keep_alive(&owned_model, keep_alive).await }).await;

        match result {
            Ok(()) => {
                match keep_alive {
                    KeepAlive::Evict => tracing::debug!(model, "Unloaded model"),
                    KeepAlive::Pin => tracing::debug!(model, "Reloaded model"),
                }
                ResidencyOutcome {
                    model: model.to_string(),
                    keep_alive,
                    succeeded: true,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(
                    runtime = self.runtime.name(),
                    model,
                    keep_alive = %keep_alive,
                    error = %e,
                    "Residency change failed, continuing"
                );
                ResidencyOutcome {
                    model: model.to_string(),
                    keep_alive,
                    succeeded: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Full chat completion from `model` over `history`.
    pub async fn generate(&self, model: &str, history: &[ChatMessage]) -> GenerationOutcome {
        tracing::debug!(model, messages = history.len(), "Generating replacement");

        let runtime = Arc::clone(&self.runtime);
        let owned_model = model.to_string();
        let history = history.to_vec();
        let result = offload(async move { runtime.chat(&owned_model, &history).await }).await;

        match result {
            Ok(Some(content)) => GenerationOutcome {
                content,
                failed: false,
            },
            Ok(None) => {
                tracing::warn!(model, "Replacement reply carried no content");
                GenerationOutcome {
                    content: MISSING_REPLACEMENT.to_string(),
                    failed: true,
                }
            }
            Err(e) => {
                tracing::error!(
                    runtime = self.runtime.name(),
                    model,
                    error = %e,
                    "Replacement generation failed"
                );
                GenerationOutcome {
                    content: format!("{} {}", GENERATION_FAILED_PREFIX, e),
                    failed: true,
                }
            }
        }
    }

    /// Models the runtime reports as resident.
    pub async fn running_models(&self) -> Result<Vec<String>, LlmError> {
        let runtime = Arc::clone(&self.runtime);
        offload(async move { runtime.running_models().await }).await
    }
}

/// Run `fut` on a worker task and wait for it.
async fn offload<T, F>(fut: F) -> Result<T, LlmError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, LlmError>> + Send + 'static,
{
    tokio::spawn(fut).await.unwrap_or_else(|e| {
        let reason = if e.is_panic() {
            format!("inference task panicked: {}", e)
        } else if e.is_cancelled() {
            format!("inference task was cancelled: {}", e)
        } else {
            format!("inference task failed to join: {}", e)
        };
        tracing::error!("{}", reason);
        Err(LlmError::WorkerFailed { reason })
    })
}
