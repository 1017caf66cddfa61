//! Chat-completions client for OpenAI-compatible endpoints (Mistral, OpenRouter, vLLM, ...).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{extract_code, GenerationError, GenerationRequest, GenerationService};
use crate::config::GenerationSettings;

/// Maximum length for response bodies quoted in error messages.
const MAX_ERROR_CONTENT_LEN: usize = 200;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
}

/// [`GenerationService`] over HTTP chat completions.
pub struct HttpGenerationService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    top_p: f32,
    max_tokens: Option<u32>,
}

impl HttpGenerationService {
    /// Build a client from settings. The API key is read from `settings.api_key_env`.
    pub fn from_settings(settings: &GenerationSettings, model: &str) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("splice/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Service(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            model: model.to_string(),
            api_key: std::env::var(&settings.api_key_env).ok(),
            temperature: settings.temperature,
            top_p: settings.top_p,
            max_tokens: settings.max_tokens,
        })
    }

    /// Set the API key explicitly.
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: build_messages(request),
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens,
        };

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        debug!(
            unit_id = %request.unit_id,
            ordinal = request.ordinal,
            repair = request.is_repair(),
            "sending generation request"
        );

        let response = builder
            .send()
            .await
            .map_err(|e| GenerationError::Service(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Service(e.to_string()))?;

        if !status.is_success() {
            let detail = format!("HTTP {}: {}", status, truncate(&text, MAX_ERROR_CONTENT_LEN));
            return Err(match status.as_u16() {
                400 | 401 | 403 | 404 | 422 => GenerationError::Rejected(detail),
                _ => GenerationError::Service(detail),
            });
        }

        parse_reply(&text)
    }
}

fn parse_reply(body: &str) -> Result<String, GenerationError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        GenerationError::Service(format!(
            "malformed completion: {}: {}",
            e,
            truncate(body, MAX_ERROR_CONTENT_LEN)
        ))
    })?;
    let message = parsed
        .choices
        .into_iter()
        .next()
        .map(|c| c.message)
        .ok_or_else(|| GenerationError::Service("completion has no choices".to_string()))?;

    if let Some(refusal) = message.refusal.filter(|r| !r.trim().is_empty()) {
        return Err(GenerationError::Rejected(refusal));
    }
    message
        .content
        .as_deref()
        .and_then(extract_code)
        .ok_or_else(|| GenerationError::Service("completion has no code".to_string()))
}

fn build_messages(request: &GenerationRequest) -> Vec<Message> {
    let system = format!(
        "You are an expert {lang} programmer. Rewrite the given {lang} function so that it \
         keeps the same name, signature and observable behavior. Reply with the complete \
         function only, inside a single fenced code block.",
        lang = request.language
    );

    let mut user = format!(
        "Function `{}`:\n```\n{}\n```\n",
        request.function_name, request.original_text
    );
    if let Some(prior) = &request.prior_attempt {
        user.push_str(&format!(
            "\nYour previous rewrite:\n```\n{}\n```\n",
            prior
        ));
        if let Some(reason) = &request.failure_reason {
            user.push_str(&format!(
                "\nIt failed validation with:\n{}\n\nFix the rewrite so it passes.\n",
                reason
            ));
        }
    }

    vec![
        Message {
            role: "system".to_string(),
            content: system,
        },
        Message {
            role: "user".to_string(),
            content: user,
        },
    ]
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
