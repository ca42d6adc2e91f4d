//! Test-only runtime that scripts replies and records every call in order.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, GenerateRequest, InferenceRuntime, KeepAlive};

/// One recorded runtime call.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCall {
    Generate {
        model: String,
        prompt: String,
        temperature: f32,
        max_tokens: u32,
    },
    KeepAlive {
        model: String,
        keep_alive: KeepAlive,
    },
    Chat {
        model: String,
        messages: Vec<ChatMessage>,
    },
    RunningModels,
}

enum ChatScript {
    Reply(Option<String>),
    Fail,
    Panic,
}

/// Scripted [`InferenceRuntime`].
pub struct MockRuntime {
    calls: Mutex<Vec<RuntimeCall>>,
    judge_reply: String,
    judge_fails: bool,
    failing_keep_alive: HashSet<String>,
    chat: ChatScript,
    chat_delay: Option<Duration>,
    running: Vec<String>,
}

impl MockRuntime {
    /// Runtime whose judge always answers `reply`; chat answers "replacement answer".
    pub fn judging(reply: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            judge_reply: reply.to_string(),
            judge_fails: false,
            failing_keep_alive: HashSet::new(),
            chat: ChatScript::Reply(Some("replacement answer".to_string())),
            chat_delay: None,
            running: Vec::new(),
        }
    }

    pub fn judge_fails(mut self) -> Self {
        self.judge_fails = true;
        self
    }

    /// Every load/unload of `model` fails.
    pub fn failing_keep_alive(mut self, model: &str) -> Self {
        self.failing_keep_alive.insert(model.to_string());
        self
    }

    pub fn chat_reply(mut self, reply: Option<&str>) -> Self {
        self.chat = ChatScript::Reply(reply.map(str::to_string));
        self
    }

    pub fn chat_fails(mut self) -> Self {
        self.chat = ChatScript::Fail;
        self
    }

    pub fn chat_panics(mut self) -> Self {
        self.chat = ChatScript::Panic;
        self
    }

    /// Chat replies arrive only after `delay`.
    pub fn chat_delay(mut self, delay: Duration) -> Self {
        self.chat_delay = Some(delay);
        self
    }

    pub fn running(mut self, models: &[&str]) -> Self {
        self.running = models.iter().map(|m| m.to_string()).collect();
        self
    }

    /// Snapshot of the calls made so far.
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than judge requests, i.e. the swap sequence.
    pub fn swap_calls(&self) -> Vec<RuntimeCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, RuntimeCall::Generate { .. }))
            .collect()
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl InferenceRuntime for MockRuntime {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<String, LlmError> {
        self.record(RuntimeCall::Generate {
            model: request.model,
            prompt: request.prompt,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        });
        if self.judge_fails {
            return Err(LlmError::RequestFailed {
                provider: "mock".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.judge_reply.clone())
    }

    async fn set_keep_alive(&self, model: &str, keep_alive: KeepAlive) -> Result<(), LlmError> {
        self.record(RuntimeCall::KeepAlive {
            model: model.to_string(),
            keep_alive,
        });
        if self.failing_keep_alive.contains(model) {
            return Err(LlmError::ModelNotAvailable {
                provider: "mock".to_string(),
                model: model.to_string(),
            });
        }
        Ok(())
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<Option<String>, LlmError> {
        self.record(RuntimeCall::Chat {
            model: model.to_string(),
            messages: messages.to_vec(),
        });
        if let Some(delay) = self.chat_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.chat {
            ChatScript::Reply(reply) => Ok(reply.clone()),
            ChatScript::Fail => Err(LlmError::RequestFailed {
                provider: "mock".to_string(),
                reason: "HTTP 500 Internal Server Error: out of memory".to_string(),
            }),
            ChatScript::Panic => panic!("runtime blew up"),
        }
    }

    async fn running_models(&self) -> Result<Vec<String>, LlmError> {
        self.record(RuntimeCall::RunningModels);
        Ok(self.running.clone())
    }
}
