//! Refusal detection and model hot-swapping for chat turns served by a
//! shared inference runtime.
//!
//! After each assistant turn, a small judge model decides whether the
//! answer was a refusal. If it was, the primary model is evicted, a
//! secondary model writes a replacement answer, the secondary is evicted
//! and the primary is reloaded. The host sees either the original answer,
//! the replacement, or a diagnostic message in its place.
//!
//! ```no_run
//! use refusal_swap::{OutletBody, RefusalFilter, SwapConfig};
//!
//! # async fn demo(body: OutletBody) -> Result<(), refusal_swap::Error> {
//! let filter = RefusalFilter::new(SwapConfig::from_env()?)?;
//! let body = filter.outlet(body, None).await;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod error;
pub mod filter;
pub mod llm;
pub mod orchestrator;
pub mod progress;
pub mod util;

pub use classifier::RefusalClassifier;
pub use config::SwapConfig;
pub use error::{Error, Result};
pub use filter::{OutletBody, RefusalFilter};
pub use llm::{
    ChatMessage, InferenceClient, InferenceRuntime, MessageContent, OllamaRuntime, Role,
};
pub use orchestrator::{SwapOrchestrator, SwapReport, SwapState};
pub use progress::{ChannelSink, HostEvent, JsonLinesSink, ProgressEvent, ProgressReporter, ProgressSink};
