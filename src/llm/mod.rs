//! Inference runtime integration.
//!
//! - [`InferenceRuntime`]: the request/response seam (one method per
//!   runtime endpoint)
//! - [`OllamaRuntime`]: Ollama's native HTTP API
//! - [`InferenceClient`]: worker offloading plus per-call failure policy

mod client;
mod ollama;
mod provider;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{
    GENERATION_FAILED_PREFIX, GenerationOutcome, InferenceClient, MISSING_REPLACEMENT,
    ResidencyOutcome,
};
pub use ollama::OllamaRuntime;
pub use provider::{
    ChatMessage, GenerateRequest, InferenceRuntime, KeepAlive, MessageContent, Role,
};

use std::sync::Arc;

use crate::config::SwapConfig;
use crate::error::LlmError;

/// Create the inference runtime described by `config`.
pub fn create_runtime(config: &SwapConfig) -> Result<Arc<dyn InferenceRuntime>, LlmError> {
    let runtime = OllamaRuntime::new(config)?;
    tracing::info!(
        "Using Ollama runtime (base_url: {}, judge: {}, secondary: {})",
        config.base_url,
        config.judge_model,
        config.secondary_model
    );
    Ok(Arc::new(runtime))
}
