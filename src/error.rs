use thiserror::Error;

use crate::subtitle::EventId;

#[derive(Error, Debug)]
pub enum SubtransError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Bitmap decode error: {0}")]
    Decode(String),

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Alignment mismatch: sent {expected} lines, received {actual}")]
    AlignmentMismatch { expected: usize, actual: usize },

    #[error("Translation failed: {0}")]
    TranslationFailed(String),

    /// Authentication or quota failure; no later request can succeed.
    #[error("Translation service refused the run: {0}")]
    Fatal(String),

    #[error("Event {0} already has a translation")]
    DuplicateAssignment(EventId),

    #[error("Event {0} does not exist")]
    UnknownEvent(EventId),

    #[error("{missing} events have no translated text")]
    IncompleteTranslation { missing: usize },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Media processing error: {0}")]
    Media(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl SubtransError {
    /// Errors that must stop the whole run rather than a single file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, SubtransError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_service_refusal_is_fatal() {
        assert!(SubtransError::Fatal("invalid key".into()).is_fatal());
        assert!(SubtransError::Cancelled.is_fatal());
        assert!(!SubtransError::Parse("bad timing".into()).is_fatal());
        assert!(!SubtransError::AlignmentMismatch { expected: 5, actual: 4 }.is_fatal());
    }

    #[test]
    fn test_alignment_message_names_both_counts() {
        let err = SubtransError::AlignmentMismatch { expected: 5, actual: 4 };
        assert_eq!(err.to_string(), "Alignment mismatch: sent 5 lines, received 4");
    }
}
