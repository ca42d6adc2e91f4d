//! Host-facing outlet filter.
//!
//! The host hands over a finished chat body after each assistant turn and
//! gets the same body back, with the last message's content replaced when
//! the turn was a refusal.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::SwapConfig;
use crate::error::Error;
use crate::llm::{ChatMessage, InferenceClient, InferenceRuntime, create_runtime};
use crate::orchestrator::{SwapOrchestrator, SwapReport};
use crate::progress::{ProgressReporter, ProgressSink};

/// Chat body as exchanged with the host.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OutletBody {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    /// Model that produced the last message (the primary).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Other top-level keys, returned untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Refusal filter bound to one inference runtime.
#[derive(Clone)]
pub struct RefusalFilter {
    config: SwapConfig,
    client: InferenceClient,
    orchestrator: SwapOrchestrator,
}

impl RefusalFilter {
    /// Build a filter talking to the Ollama runtime named in `config`.
    pub fn new(config: SwapConfig) -> Result<Self, Error> {
        config.validate()?;
        let runtime = create_runtime(&config)?;
        Ok(Self::with_runtime(config, runtime))
    }

    /// Build a filter over an existing runtime.
    pub fn with_runtime(config: SwapConfig, runtime: Arc<dyn InferenceRuntime>) -> Self {
        let client = InferenceClient::new(runtime);
        let orchestrator = SwapOrchestrator::new(client.clone(), &config);
        Self {
            config,
            client,
            orchestrator,
        }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    pub fn client(&self) -> &InferenceClient {
        &self.client
    }

    /// Inspect a finished turn and swap in a replacement if it was refused.
    pub async fn outlet(
        &self,
        body: OutletBody,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> OutletBody {
        self.outlet_with_report(body, sink).await.0
    }

    /// Like [`outlet`](Self::outlet), also returning what happened.
    ///
    /// The report is `None` when the body was passed through without
    /// running the orchestrator.
    pub async fn outlet_with_report(
        &self,
        mut body: OutletBody,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> (OutletBody, Option<SwapReport>) {
        if body.messages.is_empty() {
            return (body, None);
        }

        let Some(primary) = body.model.clone().filter(|m| !m.trim().is_empty()) else {
            tracing::warn!("Outlet body has no model, skipping refusal check");
            return (body, None);
        };

        let progress = ProgressReporter::new(sink);
        let report = self
            .orchestrator
            .run(&mut body.messages, &primary, &progress)
            .await;
        (body, Some(report))
    }

    /// [`outlet`](Self::outlet) over raw JSON.
    pub async fn outlet_json(
        &self,
        body: serde_json::Value,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Result<serde_json::Value, Error> {
        let body: OutletBody = serde_json::from_value(body)?;
        let body = self.outlet(body, sink).await;
        Ok(serde_json::to_value(body)?)
    }
}
