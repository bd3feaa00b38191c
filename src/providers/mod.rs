//! Provider adapter layer.
//!
//! One adapter per documented response shape: the OpenAI-compatible
//! chat-completions family (OpenAI, xAI, DeepSeek, Kimi, GLM), the Anthropic
//! Messages API, and the Gemini generateContent API. Every adapter exposes
//! the same uniform `chat` / `list_models` surface and classifies transport
//! failures into retryable vs fatal.

pub mod anthropic;
pub mod backoff;
pub mod gemini;
pub mod keypool;
pub mod normalize;
pub mod openai_compat;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::Vendor;
use anthropic::AnthropicAdapter;
use gemini::GeminiAdapter;
use keypool::KeyPool;
use openai_compat::OpenAiCompatAdapter;

/// Canonical sampling parameters every benchmark trial must use.
pub const FAIR_TEMPERATURE: f64 = 0.1;
pub const FAIR_MAX_TOKENS: u32 = 1500;
/// Ceiling for the relaxed Phase-2 retry (`max_tokens * 4`, capped).
pub const RELAXED_MAX_TOKENS: u32 = 6000;

/// Request parameters the engine is never allowed to send. Adapters build
/// requests from the typed `ChatRequest` only; this list backstops the
/// serialized payload check in `assert_fair_request`.
pub const FORBIDDEN_PARAM_KEYS: &[&str] = &[
    "reasoning",
    "reasoning_effort",
    "top_p",
    "top_k",
    "seed",
    "stop",
    "stop_sequences",
    "response_format",
    "logprobs",
    "top_logprobs",
    "presence_penalty",
    "frequency_penalty",
    "logit_bias",
    "thinking",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Uniform request shape handed to every adapter.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Uniform, normalised adapter result.
#[derive(Debug, Clone)]
pub struct ChatResult {
    pub text: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// Adapter-level error with the retry decision already made.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Worth retrying with backoff: 429/503/5xx, timeouts, connection loss.
    Retryable { status: Option<u16>, message: String },
    /// Fail fast: auth failures, unknown model, malformed request.
    Fatal { status: Option<u16>, message: String },
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Retryable { .. })
    }

    /// True only for the persistent-overload class (429/503/overloaded),
    /// which feeds the skip-list tracker.
    pub fn is_overload(&self) -> bool {
        match self {
            ProviderError::Retryable { status, message } => {
                matches!(status, Some(429) | Some(503))
                    || message.to_ascii_lowercase().contains("overloaded")
            }
            ProviderError::Fatal { .. } => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Retryable { status, .. } | ProviderError::Fatal { status, .. } => {
                *status
            }
        }
    }

    /// Classify an HTTP error status plus response body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let snippet: String = body.chars().take(600).collect();
        let message = format!("http {status}: {snippet}");
        if status == 429 || status >= 500 || retryable_message(&message) {
            ProviderError::Retryable {
                status: Some(status),
                message,
            }
        } else {
            ProviderError::Fatal {
                status: Some(status),
                message,
            }
        }
    }

    /// Classify a transport-level reqwest failure.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        let message = err.to_string();
        if err.is_timeout() || err.is_connect() || retryable_message(&message) {
            ProviderError::Retryable {
                status: None,
                message,
            }
        } else {
            ProviderError::Fatal {
                status: None,
                message,
            }
        }
    }

    pub fn decode(context: &str, err: impl fmt::Display) -> Self {
        ProviderError::Fatal {
            status: None,
            message: format!("{context}: {err}"),
        }
    }
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Retryable { message, .. } => write!(f, "retryable: {message}"),
            ProviderError::Fatal { message, .. } => write!(f, "fatal: {message}"),
        }
    }
}

impl std::error::Error for ProviderError {}

fn retryable_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    ["timeout", "network", "connection", "overloaded", "rate limit"]
        .iter()
        .any(|frag| lower.contains(frag))
}

/// Uniform vendor adapter surface.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn vendor(&self) -> Vendor;

    async fn chat(&self, api_key: &str, req: &ChatRequest) -> Result<ChatResult, ProviderError>;

    async fn list_models(&self, api_key: &str) -> Result<Vec<String>, ProviderError>;
}

/// Panic if a benchmark request deviates from the canonical parameter set.
/// Forbidden keys in the serialized payload are a programmer error, not a
/// runtime condition.
pub fn assert_fair_request(req: &ChatRequest, relaxed: bool) {
    assert!(
        (req.temperature - FAIR_TEMPERATURE).abs() < 1e-9,
        "unfair request: temperature {} != {FAIR_TEMPERATURE}",
        req.temperature
    );
    if relaxed {
        assert!(
            req.max_tokens >= FAIR_MAX_TOKENS && req.max_tokens <= RELAXED_MAX_TOKENS,
            "unfair relaxed request: max_tokens {}",
            req.max_tokens
        );
    } else {
        assert!(
            req.max_tokens == FAIR_MAX_TOKENS,
            "unfair request: max_tokens {} != {FAIR_MAX_TOKENS}",
            req.max_tokens
        );
    }
    let payload = serde_json::to_value(req).expect("serializable request");
    if let Some(obj) = payload.as_object() {
        for key in FORBIDDEN_PARAM_KEYS {
            assert!(!obj.contains_key(*key), "forbidden request key {key}");
        }
    }
}

/// Immutable map of configured adapters, built once at startup. Vendors with
/// no credentials get no adapter; the orchestrator treats that as
/// "provider not configured".
pub struct ProviderRegistry {
    adapters: HashMap<Vendor, Arc<dyn ProviderAdapter>>,
    keys: KeyPool,
}

impl ProviderRegistry {
    pub fn from_env(http: reqwest::Client) -> Self {
        let keys = KeyPool::from_env();
        Self::new(http, keys)
    }

    pub fn new(http: reqwest::Client, keys: KeyPool) -> Self {
        let mut adapters: HashMap<Vendor, Arc<dyn ProviderAdapter>> = HashMap::new();
        for vendor in crate::models::ALL_VENDORS {
            if !keys.has_keys(*vendor) {
                continue;
            }
            let adapter: Arc<dyn ProviderAdapter> = match vendor {
                Vendor::Anthropic => Arc::new(AnthropicAdapter::new(http.clone())),
                Vendor::Google => Arc::new(GeminiAdapter::new(http.clone())),
                v => Arc::new(OpenAiCompatAdapter::new(*v, http.clone())),
            };
            adapters.insert(*vendor, adapter);
        }
        info!(
            "provider registry: {} of {} vendors configured",
            adapters.len(),
            crate::models::ALL_VENDORS.len()
        );
        Self { adapters, keys }
    }

    /// Adapter for a vendor, or `None` when no credentials are configured.
    pub fn adapter(&self, vendor: Vendor) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&vendor).cloned()
    }

    pub fn keys(&self) -> &KeyPool {
        &self.keys
    }

    pub fn configured_vendors(&self) -> Vec<Vendor> {
        let mut vendors: Vec<Vendor> = self.adapters.keys().copied().collect();
        vendors.sort_by_key(|v| v.as_str());
        vendors
    }

    /// Registry with a caller-supplied adapter set; test seam.
    pub fn with_adapters(
        adapters: HashMap<Vendor, Arc<dyn ProviderAdapter>>,
        keys: KeyPool,
    ) -> Self {
        Self { adapters, keys }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fair_request() -> ChatRequest {
        ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage::user("hi")],
            temperature: FAIR_TEMPERATURE,
            max_tokens: FAIR_MAX_TOKENS,
        }
    }

    #[test]
    fn fair_request_passes() {
        assert_fair_request(&fair_request(), false);
    }

    #[test]
    #[should_panic(expected = "unfair request: max_tokens")]
    fn oversized_request_panics() {
        let mut req = fair_request();
        req.max_tokens = 4096;
        assert_fair_request(&req, false);
    }

    #[test]
    fn relaxed_allows_raised_cap() {
        let mut req = fair_request();
        req.max_tokens = RELAXED_MAX_TOKENS;
        assert_fair_request(&req, true);
    }

    #[test]
    #[should_panic(expected = "unfair request: temperature")]
    fn wrong_temperature_panics() {
        let mut req = fair_request();
        req.temperature = 0.7;
        assert_fair_request(&req, false);
    }

    #[test]
    fn overload_classification() {
        assert!(ProviderError::from_status(429, "slow down").is_overload());
        assert!(ProviderError::from_status(503, "unavailable").is_overload());
        assert!(!ProviderError::from_status(500, "boom").is_overload());
        let overloaded = ProviderError::Retryable {
            status: None,
            message: "engine Overloaded, try later".into(),
        };
        assert!(overloaded.is_overload());
    }

    #[test]
    fn status_classification() {
        assert!(ProviderError::from_status(500, "").is_retryable());
        assert!(ProviderError::from_status(429, "").is_retryable());
        assert!(!ProviderError::from_status(401, "bad key").is_retryable());
        assert!(!ProviderError::from_status(404, "no model").is_retryable());
    }
}
