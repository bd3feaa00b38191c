//! Chat-completions adapter for the OpenAI-compatible family.
//!
//! OpenAI, xAI, DeepSeek, Kimi, and GLM all speak the same
//! `/chat/completions` dialect; only the base URL differs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{normalize, ChatRequest, ChatResult, ProviderAdapter, ProviderError};
use crate::models::Vendor;

const CHAT_TIMEOUT: Duration = Duration::from_secs(120);
const MODELS_TIMEOUT: Duration = Duration::from_secs(20);

pub struct OpenAiCompatAdapter {
    vendor: Vendor,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAiCompatAdapter {
    pub fn new(vendor: Vendor, http: reqwest::Client) -> Self {
        Self {
            base_url: default_base_url(vendor).to_string(),
            vendor,
            http,
        }
    }

    /// Test seam: point the adapter at a local stub server.
    pub fn with_base_url(vendor: Vendor, http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            vendor,
            base_url: base_url.into(),
            http,
        }
    }
}

fn default_base_url(vendor: Vendor) -> &'static str {
    match vendor {
        Vendor::OpenAI => "https://api.openai.com/v1",
        Vendor::XAI => "https://api.x.ai/v1",
        Vendor::DeepSeek => "https://api.deepseek.com/v1",
        Vendor::Kimi => "https://api.moonshot.ai/v1",
        Vendor::GLM => "https://open.bigmodel.cn/api/paas/v4",
        // Registry never routes these here.
        Vendor::Anthropic | Vendor::Google => unreachable!("vendor has a dedicated adapter"),
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    fn vendor(&self) -> Vendor {
        self.vendor
    }

    async fn chat(&self, api_key: &str, req: &ChatRequest) -> Result<ChatResult, ProviderError> {
        let wire = WireRequest {
            model: &req.model,
            messages: req
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(CHAT_TIMEOUT)
            .bearer_auth(api_key)
            .json(&wire)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e))?;

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(ProviderError::from_status(status, &body));
        }

        let raw: Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::decode("chat-completions json", e))?;
        let typed: WireResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::decode("chat-completions shape", e))?;

        let text = typed
            .choices
            .first()
            .and_then(|c| c.message.as_ref())
            .map(|m| m.content.clone())
            .filter(|t| !t.trim().is_empty())
            .or_else(|| normalize::extract_text(&raw))
            .unwrap_or_default();

        let (tokens_in, tokens_out) = match &typed.usage {
            Some(u) => (
                u.prompt_tokens.unwrap_or(0) as u32,
                u.completion_tokens
                    .unwrap_or_else(|| normalize::estimate_tokens(&text) as u64)
                    as u32,
            ),
            None => normalize::extract_tokens(&raw, &text),
        };

        Ok(ChatResult {
            text,
            tokens_in,
            tokens_out,
        })
    }

    async fn list_models(&self, api_key: &str) -> Result<Vec<String>, ProviderError> {
        let resp = self
            .http
            .get(format!("{}/models", self.base_url))
            .timeout(MODELS_TIMEOUT)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e))?;

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(ProviderError::from_status(status, &body));
        }

        let parsed: ModelsResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::decode("models json", e))?;
        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: Option<WireMessageOut>,
}

#[derive(Debug, Deserialize)]
struct WireMessageOut {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}
