// Text recognition for caption bitmaps
//
// - Recognizer: the OCR capability, one bitmap in, raw text out
// - RecognitionAdapter: runs the recognizer once per recognition group in a
//   bounded pool, with a per-call timeout and confidence flagging
// - tesseract: the `tesseract` CLI implementation

pub mod tesseract;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use tracing::{debug, warn};

use crate::config::RecognizeConfig;
use crate::dedup::RecognitionGroup;
use crate::error::{Result, SubtransError};
use crate::pgs::Bitmap;

pub use tesseract::TesseractRecognizer;

/// Raw output of one OCR call.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Engine confidence in percent, when the engine reports one
    pub confidence: Option<f32>,
}

/// Main trait for OCR engines
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Read the text shown in a caption bitmap
    async fn recognize_image(&self, bitmap: &Bitmap) -> Result<Recognition>;
}

/// Recognizer implementation type
#[derive(Debug, Clone, Copy, Default)]
pub enum RecognizerImplementation {
    #[default]
    Tesseract,
}

/// Factory for creating recognizer instances
pub struct RecognizerFactory;

impl RecognizerFactory {
    pub fn create_recognizer(
        implementation: RecognizerImplementation,
        config: &RecognizeConfig,
    ) -> Arc<dyn Recognizer> {
        match implementation {
            RecognizerImplementation::Tesseract => Arc::new(TesseractRecognizer::new(config)),
        }
    }

    pub fn create_default(config: &RecognizeConfig) -> Arc<dyn Recognizer> {
        Self::create_recognizer(RecognizerImplementation::default(), config)
    }
}

/// Recognition result for one group, ready for normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedText {
    pub text: String,
    pub confidence: Option<f32>,
    /// Confidence fell below the configured threshold
    pub low_confidence: bool,
}

#[derive(Debug)]
pub struct GroupRecognition {
    pub group_index: usize,
    pub outcome: Result<RecognizedText>,
}

/// Drives a recognizer over recognition groups.
pub struct RecognitionAdapter {
    recognizer: Arc<dyn Recognizer>,
    concurrency: usize,
    timeout: Duration,
    low_confidence_threshold: f32,
}

impl RecognitionAdapter {
    pub fn new(recognizer: Arc<dyn Recognizer>, config: &RecognizeConfig) -> Self {
        Self {
            recognizer,
            concurrency: config.concurrency.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            low_confidence_threshold: config.low_confidence_threshold,
        }
    }

    /// Recognize one bitmap. Failures are not retried.
    pub async fn recognize(&self, bitmap: &Bitmap) -> Result<RecognizedText> {
        let recognition = tokio::time::timeout(self.timeout, self.recognizer.recognize_image(bitmap))
            .await
            .map_err(|_| {
                SubtransError::Recognition(format!("timed out after {}s", self.timeout.as_secs()))
            })??;

        let low_confidence = recognition
            .confidence
            .is_some_and(|confidence| confidence < self.low_confidence_threshold);

        Ok(RecognizedText {
            text: recognition.text,
            confidence: recognition.confidence,
            low_confidence,
        })
    }

    /// Recognize the representative of every group exactly once.
    ///
    /// Results come back in group order; a failed group does not affect the others.
    pub async fn recognize_groups(
        &self,
        groups: &[RecognitionGroup],
        progress: &ProgressBar,
    ) -> Vec<GroupRecognition> {
        let mut results: Vec<GroupRecognition> = stream::iter(groups.iter().enumerate())
            .map(|(group_index, group)| async move {
                let outcome = self.recognize(&group.representative).await;
                match &outcome {
                    Ok(text) => debug!(
                        "Group {} ({} events) recognized with confidence {:?}",
                        group_index,
                        group.member_event_ids.len(),
                        text.confidence
                    ),
                    Err(e) => warn!("Recognition failed for group {}: {}", group_index, e),
                }
                progress.inc(1);
                GroupRecognition { group_index, outcome }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        results.sort_by_key(|result| result.group_index);
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::BitmapFingerprint;
    use crate::subtitle::EventId;

    fn config() -> RecognizeConfig {
        RecognizeConfig {
            timeout_secs: 1,
            low_confidence_threshold: 60.0,
            concurrency: 2,
            ..RecognizeConfig::default()
        }
    }

    fn group(width: u32, members: &[u32]) -> RecognitionGroup {
        let bitmap = Bitmap::blank(width, 1);
        RecognitionGroup {
            fingerprint: BitmapFingerprint::of(&bitmap),
            representative: bitmap,
            member_event_ids: members.iter().map(|&id| EventId(id)).collect(),
        }
    }

    #[tokio::test]
    async fn test_each_group_is_recognized_exactly_once() {
        let mut recognizer = MockRecognizer::new();
        recognizer
            .expect_recognize_image()
            .times(3)
            .returning(|bitmap| {
                Ok(Recognition {
                    text: format!("width {}", bitmap.width),
                    confidence: Some(90.0),
                })
            });

        let adapter = RecognitionAdapter::new(Arc::new(recognizer), &config());
        let groups = vec![group(1, &[0, 4]), group(2, &[1]), group(3, &[2, 3, 5])];

        let results = adapter.recognize_groups(&groups, &ProgressBar::hidden()).await;
        assert_eq!(results.len(), 3);
        for (idx, result) in results.iter().enumerate() {
            assert_eq!(result.group_index, idx);
            let text = result.outcome.as_ref().unwrap();
            assert_eq!(text.text, format!("width {}", idx + 1));
            assert!(!text.low_confidence);
        }
    }

    #[tokio::test]
    async fn test_low_confidence_is_flagged() {
        let mut recognizer = MockRecognizer::new();
        recognizer.expect_recognize_image().returning(|_| {
            Ok(Recognition {
                text: "~ Hel1o".to_string(),
                confidence: Some(31.5),
            })
        });

        let adapter = RecognitionAdapter::new(Arc::new(recognizer), &config());
        let text = adapter.recognize(&Bitmap::blank(2, 2)).await.unwrap();
        assert!(text.low_confidence);
    }

    #[tokio::test]
    async fn test_failures_stay_per_group() {
        let mut recognizer = MockRecognizer::new();
        recognizer.expect_recognize_image().times(2).returning(|bitmap| {
            if bitmap.width == 1 {
                Err(SubtransError::Recognition("engine crashed".to_string()))
            } else {
                Ok(Recognition { text: "Fine".to_string(), confidence: None })
            }
        });

        let adapter = RecognitionAdapter::new(Arc::new(recognizer), &config());
        let results = adapter
            .recognize_groups(&[group(1, &[0]), group(2, &[1])], &ProgressBar::hidden())
            .await;

        assert!(matches!(results[0].outcome, Err(SubtransError::Recognition(_))));
        assert_eq!(results[1].outcome.as_ref().unwrap().text, "Fine");
    }

    struct Stalled;

    #[async_trait]
    impl Recognizer for Stalled {
        async fn recognize_image(&self, _bitmap: &Bitmap) -> Result<Recognition> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Recognition { text: "late".to_string(), confidence: None })
        }
    }

    #[tokio::test]
    async fn test_slow_engine_times_out() {
        let mut config = config();
        config.timeout_secs = 0;
        let adapter = RecognitionAdapter::new(Arc::new(Stalled), &config);

        let err = adapter.recognize(&Bitmap::blank(1, 1)).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
