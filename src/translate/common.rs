use std::time::Duration;

use isolang::Language;
use reqwest::Client;
use serde_json::Value;

use crate::error::Result;
use super::{ProviderError, ProviderResult};

/// HTTP client shared by the providers; every call carries `timeout`.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

/// English name of a language code for clearer prompts, or the code itself if unknown.
pub fn language_name(code: &str) -> String {
    let normalized = code.trim().to_lowercase();
    let language = match normalized.len() {
        2 => Language::from_639_1(&normalized),
        3 => Language::from_639_3(&normalized),
        _ => None,
    };

    language
        .map(|language| language.to_name().to_string())
        .unwrap_or_else(|| code.to_string())
}

/// Prompt asking for a JSON array with exactly one translation per input line.
pub fn build_batch_prompt(lines: &[String], source_language: &str, target_language: &str) -> String {
    let source_name = language_name(source_language);
    let target_name = language_name(target_language);
    // Serializing a slice of strings cannot fail
    let payload = serde_json::to_string_pretty(lines).unwrap_or_default();

    format!(
        "You are a professional subtitle translator.\n\
         \n\
         Translate each subtitle from {} to {} (language code: {}).\n\
         The input is a JSON array of {} subtitles. Each element is one subtitle and may contain line breaks.\n\
         \n\
         CRITICAL:\n\
         - Return ONLY a JSON array of exactly {} strings, in the same order as the input.\n\
         - Never merge, split, skip or reorder subtitles.\n\
         - Keep line breaks inside a subtitle where they fit the translation.\n\
         - Do not add explanations, notes or alternatives.\n\
         \n\
         [Subtitles]\n\
         {}\n",
        source_name,
        target_name,
        target_language,
        lines.len(),
        lines.len(),
        payload
    )
}

/// Read the translated lines out of a model response.
///
/// Accepts a bare JSON array or an object holding the array under
/// `translations`, optionally wrapped in a markdown code fence.
pub fn parse_line_array(raw: &str) -> ProviderResult<Vec<String>> {
    let body = strip_code_fence(raw.trim());
    if body.is_empty() {
        return Err(ProviderError::Malformed("empty response".to_string()));
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::Malformed(format!("response is not JSON: {}", e)))?;

    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("translations") {
            Some(Value::Array(items)) => items,
            _ => return Err(ProviderError::Malformed("object has no translations array".to_string())),
        },
        _ => return Err(ProviderError::Malformed("expected a JSON array".to_string())),
    };

    items
        .iter()
        .map(|item| match item {
            Value::String(text) => Ok(text.clone()),
            Value::Null => Ok(String::new()),
            other => Err(ProviderError::Malformed(format!("expected a string, got {}", other))),
        })
        .collect()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag on the opening fence
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
