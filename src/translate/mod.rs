// Batch translation through an external service
//
// - TranslationProvider: one request, a batch of lines in, the same number of lines out
// - gemini / ollama: provider implementations over reqwest
// - adapter: retry, backoff, alignment guard and fatal-error cancellation per batch
// - rate_limit: minimum spacing between calls, shared by a whole run
// - common: prompt construction and response parsing shared by providers

pub mod adapter;
pub mod common;
pub mod gemini;
pub mod ollama;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

pub use adapter::{BatchFailure, BatchOutcome, TranslationAdapter};
pub use rate_limit::RateLimiter;

use crate::config::{ProviderKind, TranslateConfig};
use crate::error::{Result, SubtransError};

/// Failure of a single provider call, classified by what the caller should do next.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("request timed out")]
    Timeout,

    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The service refused this particular request
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The response could not be read as a list of lines
    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("quota exhausted: {0}")]
    QuotaExhausted(String),
}

/// How the adapter reacts to a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with backoff
    Transient,
    /// Retry within the alignment budget
    Alignment,
    /// Give up on this batch only
    BatchLocal,
    /// Stop the whole run
    Fatal,
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited(_) | Self::Timeout | Self::Unavailable(_) => ErrorClass::Transient,
            Self::Malformed(_) => ErrorClass::Alignment,
            Self::Rejected(_) => ErrorClass::BatchLocal,
            Self::Unauthorized(_) | Self::QuotaExhausted(_) => ErrorClass::Fatal,
        }
    }

    /// Classify a non-success HTTP status and its body.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status.as_u16(), body.trim());
        let lower = body.to_lowercase();

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized(detail),
            StatusCode::TOO_MANY_REQUESTS
                if lower.contains("quota")
                    && (lower.contains("billing") || lower.contains("perday") || lower.contains("per day")) =>
            {
                Self::QuotaExhausted(detail)
            }
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited(detail),
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Self::Timeout,
            StatusCode::BAD_REQUEST if lower.contains("api key not valid") || lower.contains("api_key_invalid") => {
                Self::Unauthorized(detail)
            }
            status if status.is_server_error() => Self::Unavailable(detail),
            _ => Self::Rejected(detail),
        }
    }

    /// Classify a transport-level failure (no HTTP response).
    pub fn from_transport(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::Timeout
        } else {
            Self::Unavailable(error.to_string())
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Main trait for translation services
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Translate `lines` in one request. On success the result has one entry per input line, in order,
    /// unless the service misbehaves; the adapter checks the count.
    async fn translate_batch(
        &self,
        lines: &[String],
        source_language: &str,
        target_language: &str,
    ) -> ProviderResult<Vec<String>>;
}

/// Factory for creating translation providers
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create_provider(
        config: &TranslateConfig,
        api_key: Option<String>,
    ) -> Result<Arc<dyn TranslationProvider>> {
        let timeout = Duration::from_secs(config.timeout_secs);

        match config.provider {
            ProviderKind::Gemini => {
                let api_key = api_key.ok_or_else(|| {
                    SubtransError::Config(
                        "Gemini needs an API key: set translate.api_key or GEMINI_API_KEY".to_string(),
                    )
                })?;
                Ok(Arc::new(gemini::GeminiProvider::new(
                    &config.endpoint,
                    &config.model,
                    api_key,
                    timeout,
                )?))
            }
            ProviderKind::Ollama => Ok(Arc::new(ollama::OllamaProvider::new(
                &config.endpoint,
                &config.model,
                timeout,
            )?)),
        }
    }
}
