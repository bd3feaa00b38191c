//! Shared post-decode normalisation.
//!
//! Vendors disagree on where the answer text and token counts live. The
//! typed decoders cover the documented shapes; this module is the ladder
//! both fall back through for off-spec payloads, plus the final
//! `ceil(len/4)` token estimate.

use serde_json::Value;

/// Extraction ladder, first non-empty candidate wins:
/// 1. a direct `text` field,
/// 2. a provider `output_text` field,
/// 3. any array of content parts, concatenated,
/// 4. the chat-completions `choices[0].message.content` shape.
pub fn extract_text(payload: &Value) -> Option<String> {
    if let Some(text) = non_empty_str(payload.get("text")) {
        return Some(text);
    }
    if let Some(text) = non_empty_str(payload.get("output_text")) {
        return Some(text);
    }
    for key in ["content", "output", "parts"] {
        if let Some(parts) = payload.get(key).and_then(Value::as_array) {
            let text = concat_parts(parts);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    let choice = payload.get("choices")?.as_array()?.first()?;
    let content = choice.get("message")?.get("content")?;
    if let Some(text) = non_empty_str(Some(content)) {
        return Some(text);
    }
    if let Some(parts) = content.as_array() {
        let text = concat_parts(parts);
        if !text.is_empty() {
            return Some(text);
        }
    }
    None
}

fn concat_parts(parts: &[Value]) -> String {
    let mut out = String::new();
    for part in parts {
        if let Some(s) = part.as_str() {
            out.push_str(s);
            continue;
        }
        if let Some(s) = part.get("text").and_then(Value::as_str) {
            out.push_str(s);
            continue;
        }
        // Nested content arrays (Responses-API output items).
        if let Some(nested) = part.get("content").and_then(Value::as_array) {
            out.push_str(&concat_parts(nested));
        }
    }
    out
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Token-count fallback: documented usage fields first, then the estimate.
pub fn extract_tokens(payload: &Value, text: &str) -> (u32, u32) {
    let usage = payload.get("usage").or_else(|| payload.get("usageMetadata"));
    let tokens_in = usage
        .and_then(|u| {
            first_u64(
                u,
                &["prompt_tokens", "input_tokens", "promptTokenCount"],
            )
        })
        .unwrap_or(0) as u32;
    let tokens_out = usage
        .and_then(|u| {
            first_u64(
                u,
                &[
                    "completion_tokens",
                    "output_tokens",
                    "candidatesTokenCount",
                ],
            )
        })
        .unwrap_or_else(|| estimate_tokens(text) as u64) as u32;
    (tokens_in, tokens_out)
}

/// Rough `ceil(len/4)` estimate used when no provider count is available.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as u32).div_ceil(4)
}

fn first_u64(obj: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| obj.get(*k).and_then(Value::as_u64))
}
