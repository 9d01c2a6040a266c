// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Assessor model client abstraction
//!
//! The pipeline only needs "text in, text out". Everything behind
//! [`AssessorClient`] is transport: tests inject canned clients, production
//! uses one of the chat-completions adapters below.

use async_trait::async_trait;
use axiomeval_core::{AssessorConfig, ConfigError, Provider, Retryable};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ASSESSOR_SYSTEM_PROMPT: &str =
    "You are an expert evaluator. Respond only with valid JSON.";

/// Sampling options for one completion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response
    pub json_mode: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: None,
            json_mode: false,
        }
    }
}

impl CompletionOptions {
    pub fn from_config(config: &AssessorConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            json_mode: false,
        }
    }

    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }
}

/// Trait for the model that judges answers
#[async_trait]
pub trait AssessorClient: Send + Sync {
    /// Send one prompt and return the raw completion
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<AssessorResponse, AssessorError>;

    fn model_name(&self) -> &str;

    /// Cost per token (input, output) in USD
    fn cost_per_token(&self) -> (f64, f64) {
        (0.0, 0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessorResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

impl AssessorResponse {
    /// Response with zero usage, mostly for test clients
    pub fn text(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            usage: TokenUsage::default(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn calculate_cost(&self, cost_per_input: f64, cost_per_output: f64) -> f64 {
        (self.prompt_tokens as f64 * cost_per_input)
            + (self.completion_tokens as f64 * cost_per_output)
    }
}

#[derive(Debug, Error)]
pub enum AssessorError {
    #[error("Assessor call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Assessor unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("Assessor rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Retryable for AssessorError {
    fn is_transient(&self) -> bool {
        match self {
            AssessorError::Timeout(_)
            | AssessorError::RateLimitExceeded
            | AssessorError::Unavailable { .. } => true,
            AssessorError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
            }
            AssessorError::Rejected { .. }
            | AssessorError::InvalidResponse(_)
            | AssessorError::Json(_) => false,
        }
    }
}

/// Map a non-success HTTP status to an error
fn status_error(status: reqwest::StatusCode, message: String) -> AssessorError {
    match status.as_u16() {
        429 => AssessorError::RateLimitExceeded,
        408 => AssessorError::Unavailable {
            status: 408,
            message,
        },
        code if status.is_server_error() => AssessorError::Unavailable {
            status: code,
            message,
        },
        code => AssessorError::Rejected {
            status: code,
            message,
        },
    }
}

fn chat_request(
    model: Option<&str>,
    system_prompt: &str,
    prompt: &str,
    options: &CompletionOptions,
) -> serde_json::Value {
    let mut request = serde_json::json!({
        "messages": [
            {
                "role": "system",
                "content": system_prompt
            },
            {
                "role": "user",
                "content": prompt
            }
        ],
        "temperature": options.temperature
    });

    if let Some(model) = model {
        request["model"] = serde_json::json!(model);
    }
    if let Some(max_tokens) = options.max_tokens {
        request["max_tokens"] = serde_json::json!(max_tokens);
    }
    if options.json_mode {
        request["response_format"] = serde_json::json!({ "type": "json_object" });
    }

    request
}

async fn send_chat(request: reqwest::RequestBuilder) -> Result<serde_json::Value, AssessorError> {
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(status_error(status, error_text));
    }

    // Non-JSON bodies surface as AssessorError::Json
    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}

fn parse_chat_response(
    response_data: &serde_json::Value,
    model: &str,
) -> Result<AssessorResponse, AssessorError> {
    let content = response_data["choices"][0]["message"]["content"]
        .as_str()
        .ok_or(AssessorError::InvalidResponse("Missing content".to_string()))?
        .to_string();

    let usage_data = &response_data["usage"];
    let usage = TokenUsage {
        prompt_tokens: usage_data["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion_tokens: usage_data["completion_tokens"].as_u64().unwrap_or(0) as u32,
        total_tokens: usage_data["total_tokens"].as_u64().unwrap_or(0) as u32,
    };

    Ok(AssessorResponse {
        content,
        usage,
        model: response_data["model"]
            .as_str()
            .unwrap_or(model)
            .to_string(),
    })
}

/// OpenAI-compatible chat completions client
pub struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    system_prompt: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: "https://api.openai.com/v1".to_string(),
            system_prompt: DEFAULT_ASSESSOR_SYSTEM_PROMPT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }
}

#[async_trait]
impl AssessorClient for OpenAIClient {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<AssessorResponse, AssessorError> {
        let request = chat_request(Some(&self.model), &self.system_prompt, prompt, options);

        let response_data = send_chat(
            self.client
                .post(format!("{}/chat/completions", self.base_url))
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&request),
        )
        .await?;

        parse_chat_response(&response_data, &self.model)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn cost_per_token(&self) -> (f64, f64) {
        match self.model.as_str() {
            "gpt-4o" => (0.0000025, 0.000010),        // $2.50/$10 per 1M
            "gpt-4o-mini" => (0.00000015, 0.0000006), // $0.15/$0.60 per 1M
            "gpt-4-turbo" => (0.000010, 0.000030),    // $10/$30 per 1M
            _ => (0.00000015, 0.0000006),
        }
    }
}

/// Azure OpenAI deployment client
pub struct AzureOpenAIClient {
    api_key: String,
    endpoint: String,
    deployment: String,
    api_version: String,
    system_prompt: String,
    client: reqwest::Client,
}

impl AzureOpenAIClient {
    pub fn new(api_key: String, endpoint: String, deployment: String, api_version: String) -> Self {
        Self {
            api_key,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            deployment,
            api_version,
            system_prompt: DEFAULT_ASSESSOR_SYSTEM_PROMPT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions",
            self.endpoint, self.deployment
        )
    }
}

#[async_trait]
impl AssessorClient for AzureOpenAIClient {
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<AssessorResponse, AssessorError> {
        // The deployment selects the model
        let request = chat_request(None, &self.system_prompt, prompt, options);

        let response_data = send_chat(
            self.client
                .post(self.completions_url())
                .query(&[("api-version", self.api_version.as_str())])
                .header("api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .json(&request),
        )
        .await?;

        parse_chat_response(&response_data, &self.deployment)
    }

    fn model_name(&self) -> &str {
        &self.deployment
    }
}

/// Build the client selected by `config.provider`
pub fn client_from_config(
    config: &AssessorConfig,
    system_prompt: Option<&str>,
) -> Result<Arc<dyn AssessorClient>, ConfigError> {
    fn required<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, ConfigError> {
        value.as_deref().ok_or_else(|| ConfigError::Invalid {
            field,
            reason: "missing".to_string(),
        })
    }

    let api_key = required(&config.api_key, "assessor.api_key")?.to_string();
    let system_prompt = system_prompt.unwrap_or(DEFAULT_ASSESSOR_SYSTEM_PROMPT);

    let client: Arc<dyn AssessorClient> = match config.provider {
        Provider::OpenAi => {
            let mut client = OpenAIClient::new(api_key, config.model.clone())
                .with_system_prompt(system_prompt);
            if let Some(base_url) = &config.base_url {
                client = client.with_base_url(base_url.clone());
            }
            Arc::new(client)
        }
        Provider::Azure => Arc::new(
            AzureOpenAIClient::new(
                api_key,
                required(&config.base_url, "assessor.base_url")?.to_string(),
                required(&config.deployment, "assessor.deployment")?.to_string(),
                required(&config.api_version, "assessor.api_version")?.to_string(),
            )
            .with_system_prompt(system_prompt),
        ),
    };

    tracing::debug!(
        "Assessor client: {:?} model {}",
        config.provider,
        client.model_name()
    );
    Ok(client)
}
