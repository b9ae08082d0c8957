use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::error::{Result, SubtransError};
use super::common::{build_batch_prompt, http_client, parse_line_array};
use super::{ProviderError, ProviderResult, TranslationProvider};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    pub done: bool,
}

/// Local Ollama server (`/api/generate` in JSON mode).
pub struct OllamaProvider {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl TranslationProvider for OllamaProvider {
    async fn translate_batch(
        &self,
        lines: &[String],
        source_language: &str,
        target_language: &str,
    ) -> ProviderResult<Vec<String>> {
        // JSON mode always yields an object, so ask for the lines under a key
        let prompt = format!(
            "{}\nWrap the array in an object: {{\"translations\": [...]}}\n",
            build_batch_prompt(lines, source_language, target_language)
        );
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt,
            stream: false,
            format: "json".to_string(),
        };

        let url = format!("{}/api/generate", self.endpoint);
        debug!("Sending {} lines to {}", lines.len(), url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(ProviderError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(format!("unreadable response body: {}", e)))?;

        debug!("Raw Ollama response: {}", body.response);
        parse_line_array(&body.response)
    }
}

/// Check that the Ollama server is reachable and the model is pulled.
pub async fn check_availability(endpoint: &str, model: &str) -> Result<()> {
    let url = format!("{}/api/show", endpoint.trim_end_matches('/'));

    let response = Client::new()
        .post(&url)
        .json(&json!({ "name": model }))
        .send()
        .await
        .map_err(|e| SubtransError::Config(format!("Failed to connect to Ollama: {}", e)))?;

    if response.status().is_success() {
        info!("Ollama model '{}' is available", model);
        Ok(())
    } else {
        Err(SubtransError::Config(format!(
            "Ollama model '{}' not found. Please pull the model first: ollama pull {}",
            model, model
        )))
    }
}
