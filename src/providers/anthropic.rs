//! Anthropic Messages API adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{normalize, ChatRequest, ChatResult, ProviderAdapter, ProviderError};
use crate::models::Vendor;

const BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const CHAT_TIMEOUT: Duration = Duration::from_secs(120);
const MODELS_TIMEOUT: Duration = Duration::from_secs(20);

pub struct AnthropicAdapter {
    http: reqwest::Client,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Anthropic
    }

    async fn chat(&self, api_key: &str, req: &ChatRequest) -> Result<ChatResult, ProviderError> {
        // The Messages API takes the system prompt as a top-level field.
        let system: Vec<&str> = req
            .messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<WireMessage> = req
            .messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| WireMessage {
                role: &m.role,
                content: &m.content,
            })
            .collect();

        let wire = WireRequest {
            model: &req.model,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            messages,
        };

        let resp = self
            .http
            .post(format!("{}/messages", self.base_url))
            .timeout(CHAT_TIMEOUT)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&wire)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&e))?;

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        if !(200..300).contains(&status) {
            return Err(ProviderError::from_status(status, &body));
        }

        let raw: Value =
            serde_json::from_str(&body).map_err(|e| ProviderError::decode("messages json", e))?;
        let typed: WireResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::decode("messages shape", e))?;

        let mut text = String::new();
        for block in &typed.content {
            if block.block_type.as_deref() == Some("text") {
                if let Some(t) = &block.text {
                    text.push_str(t);
                }
            }
        }
        let text = if text.trim().is_empty() {
            normalize::extract_text(&raw).unwrap_or_default()
        } else {
            text
        };

        let (tokens_in, tokens_out) = match &typed.usage {
            Some(u) => (
                u.input_tokens.unwrap_or(0) as u32,
                u.output_tokens
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
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
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
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
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
