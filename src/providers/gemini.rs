//! Google Gemini generateContent adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::{normalize, ChatRequest, ChatResult, ProviderAdapter, ProviderError};
use crate::models::Vendor;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const CHAT_TIMEOUT: Duration = Duration::from_secs(120);
const MODELS_TIMEOUT: Duration = Duration::from_secs(20);

pub struct GeminiAdapter {
    http: reqwest::Client,
    base_url: String,
}

impl GeminiAdapter {
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
impl ProviderAdapter for GeminiAdapter {
    fn vendor(&self) -> Vendor {
        Vendor::Google
    }

    async fn chat(&self, api_key: &str, req: &ChatRequest) -> Result<ChatResult, ProviderError> {
        let system: Vec<&str> = req
            .messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.as_str())
            .collect();

        let contents: Vec<WireContent> = req
            .messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| WireContent {
                // Gemini spells the assistant role "model".
                role: if m.role == "assistant" { "model" } else { "user" },
                parts: vec![WirePart {
                    text: m.content.clone(),
                }],
            })
            .collect();

        let wire = WireRequest {
            contents,
            system_instruction: if system.is_empty() {
                None
            } else {
                Some(WireSystemInstruction {
                    parts: vec![WirePart {
                        text: system.join("\n\n"),
                    }],
                })
            },
            generation_config: WireGenerationConfig {
                temperature: req.temperature,
                max_output_tokens: req.max_tokens,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, req.model, api_key
        );
        let resp = self
            .http
            .post(url)
            .timeout(CHAT_TIMEOUT)
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
            .map_err(|e| ProviderError::decode("generateContent json", e))?;
        let typed: WireResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::decode("generateContent shape", e))?;

        let mut text = String::new();
        if let Some(candidate) = typed.candidates.first() {
            if let Some(content) = &candidate.content {
                for part in &content.parts {
                    text.push_str(&part.text);
                }
            }
        }
        let text = if text.trim().is_empty() {
            normalize::extract_text(&raw).unwrap_or_default()
        } else {
            text
        };

        let (tokens_in, tokens_out) = match &typed.usage_metadata {
            Some(u) => (
                u.prompt_token_count.unwrap_or(0) as u32,
                u.candidates_token_count
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
            .get(format!("{}/models?key={}", self.base_url, api_key))
            .timeout(MODELS_TIMEOUT)
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
        Ok(parsed
            .models
            .into_iter()
            .map(|m| m.name.trim_start_matches("models/").to_string())
            .collect())
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    contents: Vec<WireContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireSystemInstruction>,
    #[serde(rename = "generationConfig")]
    generation_config: WireGenerationConfig,
}

#[derive(Debug, Serialize)]
struct WireContent {
    role: &'static str,
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize)]
struct WireSystemInstruction {
    parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WirePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct WireGenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<WireUsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    content: Option<WireCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct WireCandidateContent {
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
struct WireUsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    name: String,
}
