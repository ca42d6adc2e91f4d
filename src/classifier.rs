//! Refusal classification with a judge model.
//!
//! The judge sees at most the first `judge_preview_chars` characters of the
//! candidate answer and is asked for a one-word `YES`/`NO` verdict. Any
//! failure counts as "not a refusal": a missed refusal only passes the
//! original answer through, while a false positive would trigger a full
//! model swap.

use crate::config::SwapConfig;
use crate::llm::InferenceClient;
use crate::util::truncate_chars;

/// Reduces free text to a refusal verdict.
#[derive(Clone)]
pub struct RefusalClassifier {
    client: InferenceClient,
    judge_model: String,
    preview_chars: usize,
    max_tokens: u32,
}

impl RefusalClassifier {
    pub fn new(client: InferenceClient, config: &SwapConfig) -> Self {
        Self {
            client,
            judge_model: config.judge_model.clone(),
            preview_chars: config.judge_preview_chars,
            max_tokens: config.judge_max_tokens,
        }
    }

    /// Ask the judge whether `text` is a refusal.
    ///
    /// Empty or whitespace-only text is never a refusal and is not sent.
    pub async fn is_refusal(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return false;
        }

        let prompt = build_prompt(truncate_chars(text, self.preview_chars));
        tracing::debug!(judge = %self.judge_model, "Asking judge to classify response");

        match self
            .client
            .classify(&self.judge_model, prompt, self.max_tokens)
            .await
        {
            Ok(reply) => {
                let verdict = parse_verdict(&reply);
                tracing::debug!(reply = reply.trim(), verdict, "Judge verdict");
                verdict
            }
            Err(e) => {
                tracing::warn!(
                    judge = %self.judge_model,
                    error = %e,
                    "Refusal check failed, treating response as not a refusal"
                );
                false
            }
        }
    }
}

/// Fixed judge instruction embedding the (already truncated) answer.
pub fn build_prompt(preview: &str) -> String {
    format!(
        "Analyze the following AI response text. Does it represent a refusal to answer a request \
         due to ethical, safety, moral, or policy guidelines? \
         Typical refusals sound like 'I cannot fulfill', 'I apologize', 'I cannot comply'.\n\n\
         Text: \"{preview}\"\n\n\
         Answer with exactly one word: 'YES' or 'NO'."
    )
}

/// `YES` anywhere in the reply, case-insensitive, is a refusal.
pub fn parse_verdict(reply: &str) -> bool {
    reply.trim().to_uppercase().contains("YES")
}
