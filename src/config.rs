use serde::{Deserialize, Serialize};
use std::path::Path;
use crate::error::{Result, SubtransError};

fn default_source_language() -> String {
    "en".to_string()
}

fn default_alignment_retries() -> u32 {
    1
}

fn default_untranslated_marker() -> String {
    "[untranslated]".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub media: MediaConfig,
    pub recognize: RecognizeConfig,
    pub dedup: DedupConfig,
    pub normalize: NormalizeConfig,
    pub batch: BatchConfig,
    pub translate: TranslateConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to ffmpeg binary
    pub binary_path: String,
    /// Path to ffprobe binary
    pub probe_path: String,
    /// Index among the container's subtitle streams (0 = first)
    pub subtitle_stream: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizeConfig {
    /// Path to tesseract binary
    pub binary_path: String,
    /// Tesseract language packs, e.g. "eng" or "eng+jpn"
    pub languages: String,
    /// Tesseract page segmentation mode
    pub page_segmentation_mode: u32,
    /// White border added around each caption before OCR (pixels)
    pub padding: u32,
    /// Per-call timeout
    pub timeout_secs: u64,
    /// Mean word confidence (0-100) below which results get stricter cleanup
    pub low_confidence_threshold: f32,
    /// Maximum recognitions running at once
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// 1.0 folds only pixel-identical captions; lower values also fold
    /// captions whose perceptual hashes are at least this similar
    pub similarity_threshold: f64,
    /// Perceptual hash grid (width and height, in cells)
    pub hash_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Drop a line that exactly repeats the line before it
    pub drop_duplicate_lines: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum characters of source text per request
    pub max_chars: usize,
    /// Maximum lines per request
    pub max_units: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderKind {
    /// Google Generative Language API (Gemini)
    Gemini,
    /// Local Ollama server
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateConfig {
    pub provider: ProviderKind,
    /// Base URL of the translation service
    pub endpoint: String,
    /// Model to use for translation
    pub model: String,
    /// API key; falls back to the GEMINI_API_KEY environment variable
    #[serde(default)]
    pub api_key: Option<String>,
    /// Language of the source subtitles
    #[serde(default = "default_source_language")]
    pub source_language: String,
    /// Maximum calls per batch for transient failures (first call included)
    pub max_attempts: u32,
    /// Extra calls allowed when the returned line count does not match
    #[serde(default = "default_alignment_retries")]
    pub alignment_retries: u32,
    /// First backoff delay; doubles on each retry
    pub base_delay_ms: u64,
    /// Backoff ceiling
    pub max_delay_ms: u64,
    /// Per-call timeout
    pub timeout_secs: u64,
    /// Minimum spacing between any two calls of one run
    pub min_interval_ms: u64,
    /// Maximum batches in flight at once
    pub concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Text written for captions that could not be read at all
    #[serde(default = "default_untranslated_marker")]
    pub untranslated_marker: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            media: MediaConfig {
                binary_path: "ffmpeg".to_string(),
                probe_path: "ffprobe".to_string(),
                subtitle_stream: 0,
            },
            recognize: RecognizeConfig {
                binary_path: "tesseract".to_string(),
                languages: "eng".to_string(),
                page_segmentation_mode: 6,
                padding: 12,
                timeout_secs: 30,
                low_confidence_threshold: 60.0,
                concurrency: 4,
            },
            dedup: DedupConfig {
                similarity_threshold: 1.0,
                hash_size: 16,
            },
            normalize: NormalizeConfig {
                drop_duplicate_lines: true,
            },
            batch: BatchConfig {
                max_chars: 4000,
                max_units: 50,
            },
            translate: TranslateConfig {
                provider: ProviderKind::Gemini,
                endpoint: "https://generativelanguage.googleapis.com".to_string(),
                model: "gemini-1.5-flash".to_string(),
                api_key: None,
                source_language: default_source_language(),
                max_attempts: 5,
                alignment_retries: default_alignment_retries(),
                base_delay_ms: 1000,
                max_delay_ms: 30_000,
                timeout_secs: 120,
                min_interval_ms: 1000,
                concurrency: 4,
            },
            output: OutputConfig {
                untranslated_marker: default_untranslated_marker(),
            },
        }
    }
}

// Section defaults are taken from the full default config
impl Default for MediaConfig {
    fn default() -> Self {
        Config::default().media
    }
}

impl Default for RecognizeConfig {
    fn default() -> Self {
        Config::default().recognize
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Config::default().dedup
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Config::default().normalize
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Config::default().batch
    }
}

impl Default for TranslateConfig {
    fn default() -> Self {
        Config::default().translate
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Config::default().output
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SubtransError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| SubtransError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| SubtransError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| SubtransError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch.max_chars == 0 || self.batch.max_units == 0 {
            return Err(SubtransError::Config("batch caps must be greater than zero".to_string()));
        }
        if self.recognize.concurrency == 0 || self.translate.concurrency == 0 {
            return Err(SubtransError::Config("concurrency must be greater than zero".to_string()));
        }
        if self.translate.max_attempts == 0 {
            return Err(SubtransError::Config("translate.max_attempts must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.dedup.similarity_threshold) {
            return Err(SubtransError::Config(format!(
                "dedup.similarity_threshold must be within 0.0..=1.0, got {}",
                self.dedup.similarity_threshold
            )));
        }
        if self.dedup.hash_size < 2 {
            return Err(SubtransError::Config("dedup.hash_size must be at least 2".to_string()));
        }
        if self.output.untranslated_marker.trim().is_empty() {
            return Err(SubtransError::Config("output.untranslated_marker must not be blank".to_string()));
        }
        Ok(())
    }

    /// API key from the config file, or the environment when the file has none.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.translate
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| std::env::var("GEMINI_API_KEY").ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn test_config_round_trips_through_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.batch.max_units = 7;
        config.translate.provider = ProviderKind::Ollama;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.batch.max_units, 7);
        assert!(matches!(loaded.translate.provider, ProviderKind::Ollama));
    }

    #[test]
    fn test_out_of_range_threshold_is_rejected() {
        let mut config = Config::default();
        config.dedup.similarity_threshold = 1.5;
        assert!(matches!(config.validate(), Err(SubtransError::Config(_))));
    }

    #[test]
    fn test_zero_batch_cap_is_rejected() {
        let mut config = Config::default();
        config.batch.max_chars = 0;
        assert!(config.validate().is_err());
    }
}
