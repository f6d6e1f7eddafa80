//! LLM scoring of extracted slides
//!
//! Provides:
//! - Prompt construction from slide text
//! - Retried completion calls with exponential backoff
//! - Lenient JSON parsing and typed validation of the response

mod decode;
mod prompt;
mod repair;
mod transport;

pub use decode::{decode, AnalysisDecodeError, DecodedAnalysis, FieldIssue};
pub use prompt::{build_request, CompletionRequest, SYSTEM_PROMPT};
pub use repair::{parse_lenient, Parsed};
pub use transport::{
    create_transport, mock_analysis, Completion, CompletionTransport, MockTransport, OpenAiTransport,
};

use crate::errors::AnalysisError;
use crate::extraction::Slide;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::{SecondsFormat, Utc};
use deckforge_common::config::AnalysisConfig;
use deckforge_common::metrics;
use deckforge_common::scoring::ScoringResult;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A validated analysis and how it was obtained
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub result: ScoringResult,
    pub warnings: Vec<String>,
    pub attempts: u32,
}

/// Scores slides with an LLM
pub struct AnalysisClient {
    transport: Arc<dyn CompletionTransport>,
    max_retries: u32,
    initial_backoff: Duration,
}

impl AnalysisClient {
    pub fn new(transport: Arc<dyn CompletionTransport>, max_retries: u32, initial_backoff: Duration) -> Self {
        Self {
            transport,
            max_retries,
            initial_backoff,
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Result<Self, AnalysisError> {
        Ok(Self::new(
            create_transport(config)?,
            config.max_retries,
            Duration::from_millis(config.initial_backoff_ms),
        ))
    }

    pub fn model_name(&self) -> &str {
        self.transport.model_name()
    }

    /// Score a deck.
    ///
    /// Transport failures, empty responses and truncated responses are retried;
    /// malformed or incomplete analyses are not.
    pub async fn analyze(&self, slides: &[Slide]) -> Result<AnalysisOutcome, AnalysisError> {
        if slides.is_empty() {
            return Err(AnalysisError::NoSlides);
        }

        let processed_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let request = build_request(slides, &processed_at);
        debug!(slides = slides.len(), prompt_chars = request.prompt.len(), "Scoring prompt built");

        let (content, attempts) = self.complete_with_retry(&request).await?;

        let parsed = parse_lenient(&content).map_err(AnalysisError::InvalidJson)?;
        if parsed.repaired {
            warn!("LLM response needed cleanup before parsing");
        }

        let DecodedAnalysis { result, warnings } = decode(&parsed.value)?;
        for warning in &warnings {
            warn!(warning = %warning, "LLM response incomplete");
        }

        info!(
            attempts,
            overall_score = result.overall_score,
            recommendation = %result.recommendation,
            "Deck scored"
        );

        Ok(AnalysisOutcome {
            result,
            warnings,
            attempts,
        })
    }

    async fn complete_with_retry(&self, request: &CompletionRequest) -> Result<(String, u32), AnalysisError> {
        let max_attempts = self.max_retries + 1;
        let model = self.transport.model_name().to_string();
        let mut schedule = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_interval(self.initial_backoff.saturating_mul(1 << max_attempts.min(16)))
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let last = attempt >= max_attempts;

            let error = match self.transport.complete(request).await {
                Ok(completion) => {
                    let normal = completion.finished_normally();
                    match completion.content.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
                        None => AnalysisError::EmptyResponse,
                        Some(content) if normal || last => {
                            if !normal {
                                warn!(
                                    finish_reason = ?completion.finish_reason,
                                    "Accepting possibly truncated LLM response on final attempt"
                                );
                            }
                            metrics::record_llm_attempt(&model, true);
                            return Ok((content.to_string(), attempt));
                        }
                        Some(_) => AnalysisError::Truncated(completion.finish_reason.clone().unwrap_or_default()),
                    }
                }
                Err(e) => e,
            };

            metrics::record_llm_attempt(&model, false);

            if !is_retryable(&error) {
                return Err(error);
            }
            if last {
                return Err(AnalysisError::RetriesExhausted {
                    attempts: attempt,
                    message: error.to_string(),
                });
            }

            let delay = schedule.next_backoff().unwrap_or(self.initial_backoff);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "LLM request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn is_retryable(error: &AnalysisError) -> bool {
    matches!(
        error,
        AnalysisError::Transport(_) | AnalysisError::EmptyResponse | AnalysisError::Truncated(_)
    )
}
