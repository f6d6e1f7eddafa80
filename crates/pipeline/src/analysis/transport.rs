//! Chat completion transports
//!
//! Provides:
//! - OpenAI-compatible HTTP transport (JSON response mode)
//! - Mock transport for local development and tests

use super::prompt::CompletionRequest;
use crate::errors::AnalysisError;
use async_trait::async_trait;
use deckforge_common::config::AnalysisConfig;
use deckforge_common::scoring::Category;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Raw output of one completion call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub content: Option<String>,
    pub finish_reason: Option<String>,
}

impl Completion {
    pub fn stopped(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            finish_reason: Some("stop".to_string()),
        }
    }

    /// Whether the model stopped on its own rather than hitting a limit
    pub fn finished_normally(&self) -> bool {
        matches!(self.finish_reason.as_deref(), None | Some("stop"))
    }
}

/// Anything that can answer a completion request
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AnalysisError>;

    /// Model name, for logs and metrics
    fn model_name(&self) -> &str;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// OpenAI-compatible chat completions client
pub struct OpenAiTransport {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiTransport {
    pub fn new(config: &AnalysisConfig, api_key: String) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AnalysisError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let base = config
            .api_base
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
            .trim_end_matches('/');

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl CompletionTransport for OpenAiTransport {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AnalysisError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Transport(format!("API error {}: {}", status, body)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Transport(format!("Failed to parse API response: {}", e)))?;

        let choice = chat.choices.into_iter().next();
        Ok(Completion {
            content: choice.as_ref().and_then(|c| c.message.content.clone()),
            finish_reason: choice.and_then(|c| c.finish_reason),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Returns a fixed, valid analysis for every request
pub struct MockTransport {
    body: String,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            body: mock_analysis(6),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionTransport for MockTransport {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, AnalysisError> {
        Ok(Completion::stopped(self.body.clone()))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// A well-formed response scoring every category `score`
pub fn mock_analysis(score: u8) -> String {
    let categories: serde_json::Map<String, serde_json::Value> = Category::ALL
        .iter()
        .map(|c| {
            (
                c.key().to_string(),
                serde_json::json!({
                    "score": score,
                    "feedback": format!("{} is adequately covered.", c.label()),
                }),
            )
        })
        .collect();

    serde_json::json!({
        "categories": categories,
        "strengths": ["Clear problem framing", "Experienced founders", "Large addressable market"],
        "weaknesses": ["Limited traction data", "Unclear pricing", "Thin competitive analysis"],
        "recommendation": "Hold",
        "confidence": 60,
        "dueDiligence": "Confirm customer pilots and review unit economics.",
        "processedAt": chrono::Utc::now().to_rfc3339(),
    })
    .to_string()
}

/// Build the transport named by `config.provider`
pub fn create_transport(config: &AnalysisConfig) -> Result<Arc<dyn CompletionTransport>, AnalysisError> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = config
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| AnalysisError::Config("analysis.api_key is required for the openai provider".to_string()))?;
            Ok(Arc::new(OpenAiTransport::new(config, api_key)?))
        }
        "mock" => Ok(Arc::new(MockTransport::new())),
        other => Err(AnalysisError::Config(format!("Unknown analysis provider: {}", other))),
    }
}
