//! Refusal detection and model swap sequence.
//!
//! ```text
//! Idle ─► Classifying ─┬─► NotRefusal ─────────────────────────────────────────► Done
//!                      └─► RefusalDetected ─► UnloadingPrimary ─► GeneratingReplacement
//!                              ─► UnloadingSecondary ─► RestoringPrimary ─► Done
//! ```
//!
//! Once a refusal is detected every step runs, in order, whatever happened
//! in the step before: residency calls never fail from the orchestrator's
//! point of view and generation always yields some text. The steps after
//! detection run on a spawned task, so the primary model is reloaded on
//! every path that evicted it, including a caller that gives up mid-swap.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::Instrument;
use uuid::Uuid;

use crate::classifier::RefusalClassifier;
use crate::config::SwapConfig;
use crate::llm::{
    ChatMessage, GENERATION_FAILED_PREFIX, GenerationOutcome, InferenceClient, MessageContent,
    ResidencyOutcome,
};
use crate::progress::ProgressReporter;

const STATUS_CHECKING: &str = "Checking response for refusal...";
const STATUS_COMPLETE: &str = "Model swap complete.";

/// Position in the swap sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    Idle,
    Classifying,
    NotRefusal,
    RefusalDetected,
    UnloadingPrimary,
    GeneratingReplacement,
    UnloadingSecondary,
    RestoringPrimary,
    Done,
}

/// What one invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapReport {
    pub refusal_detected: bool,
    /// The last message's content was overwritten.
    pub replaced: bool,
    /// The replacement is diagnostic text rather than a model answer.
    pub generation_failed: bool,
    /// Load/unload outcomes in the order they were issued.
    pub residency: Vec<ResidencyOutcome>,
    /// `Some(true)` when a post-swap check found the primary resident and
    /// the secondary gone; `None` when no check ran or the check failed.
    pub residency_verified: Option<bool>,
    /// Every state entered, starting with `Idle`.
    pub states: Vec<SwapState>,
}

impl SwapReport {
    fn new() -> Self {
        Self {
            refusal_detected: false,
            replaced: false,
            generation_failed: false,
            residency: Vec::new(),
            residency_verified: None,
            states: vec![SwapState::Idle],
        }
    }

    fn enter(&mut self, state: SwapState) {
        tracing::debug!(?state, "swap state");
        self.states.push(state);
    }
}

/// Drives classify → unload primary → generate → unload secondary → reload primary.
///
/// Clones share the swap lock, so one orchestrator (and its clones) should
/// be created per inference runtime.
#[derive(Clone)]
pub struct SwapOrchestrator {
    client: InferenceClient,
    classifier: RefusalClassifier,
    secondary_model: String,
    verify_residency: bool,
    swap_lock: Option<Arc<Mutex<()>>>,
}

impl SwapOrchestrator {
    pub fn new(client: InferenceClient, config: &SwapConfig) -> Self {
        let classifier = RefusalClassifier::new(client.clone(), config);
        Self {
            client,
            classifier,
            secondary_model: config.secondary_model.clone(),
            verify_residency: config.verify_residency,
            swap_lock: config.serialize_swaps.then(|| Arc::new(Mutex::new(()))),
        }
    }

    /// Check the last message of `messages` and, if it is a refusal,
    /// replace its content with an answer from the secondary model.
    ///
    /// Only the last message's `content` is ever modified. An empty
    /// conversation is returned untouched without any status events.
    ///
    /// Once a refusal is detected the swap runs on its own task. Dropping
    /// the returned future after that point leaves the message untouched,
    /// but the swap still completes and the primary is still reloaded.
    pub async fn run(
        &self,
        messages: &mut [ChatMessage],
        primary_model: &str,
        progress: &ProgressReporter,
    ) -> SwapReport {
        if messages.is_empty() {
            return SwapReport::new();
        }

        let span = tracing::info_span!(
            "refusal_swap",
            swap_id = %Uuid::new_v4(),
            primary = primary_model,
        );
        self.run_sequence(messages, primary_model, progress)
            .instrument(span)
            .await
    }

    async fn run_sequence(
        &self,
        messages: &mut [ChatMessage],
        primary: &str,
        progress: &ProgressReporter,
    ) -> SwapReport {
        let mut report = SwapReport::new();
        let Some((candidate, history)) = messages.split_last_mut() else {
            return report;
        };

        report.enter(SwapState::Classifying);
        progress.emit(STATUS_CHECKING, false).await;

        // Non-text content (null, multimodal parts) is never judged.
        if !self.classifier.is_refusal(candidate.text()).await {
            report.enter(SwapState::NotRefusal);
            progress.emit("", true).await;
            report.enter(SwapState::Done);
            return report;
        }

        report.refusal_detected = true;
        report.enter(SwapState::RefusalDetected);
        tracing::info!(
            "Refusal detected from {}. Initiating swap sequence.",
            primary
        );

        let job = SwapJob {
            client: self.client.clone(),
            primary: primary.to_string(),
            secondary: self.secondary_model.clone(),
            history: history.to_vec(),
            progress: progress.clone(),
            verify_residency: self.verify_residency,
            swap_lock: self.swap_lock.clone(),
        };
        let states_before = report.states.clone();

        let (mut report, generation) =
            match tokio::spawn(job.execute(report).in_current_span()).await {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!(error = %e, "Swap task failed");
                    let report = SwapReport {
                        refusal_detected: true,
                        states: states_before,
                        ..SwapReport::new()
                    };
                    let generation = GenerationOutcome {
                        content: format!("{} swap task failed: {}", GENERATION_FAILED_PREFIX, e),
                        failed: true,
                    };
                    (report, generation)
                }
            };

        candidate.content = MessageContent::Text(generation.content);
        report.replaced = true;
        report.generation_failed = generation.failed;
        report.enter(SwapState::Done);

        tracing::info!(
            generation_failed = report.generation_failed,
            residency_failures = report.residency.iter().filter(|r| !r.succeeded).count(),
            "Model swap complete"
        );
        report
    }
}

/// Everything the swap needs, owned, so it can outlive the caller's future.
struct SwapJob {
    client: InferenceClient,
    primary: String,
    secondary: String,
    history: Vec<ChatMessage>,
    progress: ProgressReporter,
    verify_residency: bool,
    swap_lock: Option<Arc<Mutex<()>>>,
}

impl SwapJob {
    /// Evict primary, generate, evict secondary, reload primary.
    async fn execute(self, mut report: SwapReport) -> (SwapReport, GenerationOutcome) {
        let Self {
            client,
            primary,
            secondary,
            history,
            progress,
            verify_residency,
            swap_lock,
        } = self;

        let guard = match swap_lock {
            Some(lock) => Some(lock.lock_owned().await),
            None => None,
        };

        report.enter(SwapState::UnloadingPrimary);
        progress
            .emit(format!("Refusal detected. Unloading {}...", primary), false)
            .await;
        report
            .residency
            .push(client.set_residency(&primary, false).await);

        report.enter(SwapState::GeneratingReplacement);
        progress
            .emit(format!("Loading {} & Generating...", secondary), false)
            .await;
        let generation = client.generate(&secondary, &history).await;

        report.enter(SwapState::UnloadingSecondary);
        progress
            .emit(format!("Unloading {}...", secondary), false)
            .await;
        report
            .residency
            .push(client.set_residency(&secondary, false).await);

        report.enter(SwapState::RestoringPrimary);
        progress.emit(format!("Restoring {}...", primary), false).await;
        report
            .residency
            .push(client.set_residency(&primary, true).await);

        if verify_residency {
            report.residency_verified = verify(&client, &primary, &secondary).await;
        }
        drop(guard);

        progress.emit(STATUS_COMPLETE, true).await;
        (report, generation)
    }
}

/// Ask the runtime which models are resident after the swap.
async fn verify(client: &InferenceClient, primary: &str, secondary: &str) -> Option<bool> {
    let running = match client.running_models().await {
        Ok(running) => running,
        Err(e) => {
            tracing::warn!(error = %e, "Could not verify model residency after swap");
            return None;
        }
    };

    let primary_resident = running.iter().any(|m| same_model(m, primary));
    let secondary_resident = running.iter().any(|m| same_model(m, secondary));
    if !primary_resident {
        tracing::warn!(model = primary, "Primary model is not resident after swap");
    }
    if secondary_resident {
        tracing::warn!(model = secondary, "Secondary model is still resident after swap");
    }
    Some(primary_resident && !secondary_resident)
}

/// Model names match when equal, treating an implicit `:latest` tag as present.
fn same_model(a: &str, b: &str) -> bool {
    fn base(name: &str) -> &str {
        name.strip_suffix(":latest").unwrap_or(name)
    }
    base(a) == base(b)
}
