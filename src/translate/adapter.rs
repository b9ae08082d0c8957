use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use indicatif::ProgressBar;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::TranslationBatch;
use crate::config::TranslateConfig;
use crate::error::{Result, SubtransError};
use super::{ErrorClass, ProviderError, ProviderResult, RateLimiter, TranslationProvider};

/// Why a batch ended without usable lines. The batch falls back to its source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchFailure {
    /// Transient errors outlasted the attempt budget
    RetriesExhausted { attempts: u32, last_error: ProviderError },
    /// The service kept answering with the wrong number of lines
    Misaligned { expected: usize, actual: usize },
    /// The service kept answering with something other than a line list
    Malformed(String),
    /// The service refused the request
    Rejected(String),
}

impl BatchFailure {
    pub fn to_error(&self) -> SubtransError {
        match self {
            Self::Misaligned { expected, actual } => SubtransError::AlignmentMismatch {
                expected: *expected,
                actual: *actual,
            },
            Self::RetriesExhausted { attempts, last_error } => SubtransError::TranslationFailed(format!(
                "gave up after {} attempts: {}",
                attempts, last_error
            )),
            Self::Malformed(detail) | Self::Rejected(detail) => {
                SubtransError::TranslationFailed(detail.clone())
            }
        }
    }
}

/// Lifecycle of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    InFlight { attempt: u32 },
    RetryScheduled { attempt: u32, delay: Duration },
    Success(Vec<String>),
    Failed(BatchFailure),
}

/// Final result of one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Provider calls made for this batch
    pub calls: u32,
    /// One line per unit, in unit order, or the reason there are none
    pub result: std::result::Result<Vec<String>, BatchFailure>,
}

/// Per-batch failure counters driving the state transitions.
#[derive(Debug, Default)]
struct Failures {
    transient: u32,
    alignment: u32,
}

/// Sends batches to a provider with retry, backoff and an alignment guard.
///
/// Every call goes through the run's shared rate limiter. A fatal provider
/// error cancels the run token, which stops all other batches of the run.
pub struct TranslationAdapter {
    provider: Arc<dyn TranslationProvider>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
    source_language: String,
    max_attempts: u32,
    alignment_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    call_timeout: Duration,
    concurrency: usize,
}

impl TranslationAdapter {
    pub fn new(
        provider: Arc<dyn TranslationProvider>,
        limiter: Arc<RateLimiter>,
        cancel: CancellationToken,
        config: &TranslateConfig,
    ) -> Self {
        Self {
            provider,
            limiter,
            cancel,
            source_language: config.source_language.clone(),
            max_attempts: config.max_attempts.max(1),
            alignment_retries: config.alignment_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            call_timeout: Duration::from_secs(config.timeout_secs),
            concurrency: config.concurrency.max(1),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Translate one batch.
    ///
    /// Returns `Err` only when the run must stop: a fatal provider error
    /// (`Fatal`) or cancellation by another batch (`Cancelled`).
    pub async fn translate(&self, batch: &TranslationBatch, target_language: &str) -> Result<BatchOutcome> {
        if self.cancel.is_cancelled() {
            return Err(SubtransError::Cancelled);
        }

        let lines = batch.lines();
        if lines.is_empty() {
            return Ok(BatchOutcome { calls: 0, result: Ok(Vec::new()) });
        }

        let mut failures = Failures::default();
        let mut calls = 0;
        let mut state = BatchState::Pending;

        loop {
            state = match state {
                BatchState::Pending => BatchState::InFlight { attempt: 1 },
                BatchState::RetryScheduled { attempt, delay } => {
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = self.cancel.cancelled() => return Err(SubtransError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    BatchState::InFlight { attempt: attempt + 1 }
                }
                BatchState::InFlight { attempt } => {
                    let response = tokio::select! {
                        _ = self.cancel.cancelled() => return Err(SubtransError::Cancelled),
                        response = self.call(&lines, target_language) => response,
                    };
                    calls += 1;
                    self.next_state(attempt, lines.len(), response, &mut failures)?
                }
                BatchState::Success(translated) => {
                    return Ok(BatchOutcome { calls, result: Ok(translated) });
                }
                BatchState::Failed(failure) => {
                    warn!("Batch of {} lines falls back to source text: {}", lines.len(), failure.to_error());
                    return Ok(BatchOutcome { calls, result: Err(failure) });
                }
            };
        }
    }

    /// Translate every batch in a bounded pool. Outcomes come back in batch order.
    ///
    /// The first fatal error cancels the run and is returned; batches still
    /// in flight are dropped.
    pub async fn translate_all(
        &self,
        batches: &[TranslationBatch],
        target_language: &str,
        progress: &ProgressBar,
    ) -> Result<Vec<BatchOutcome>> {
        let mut pending = stream::iter(batches.iter().enumerate())
            .map(|(index, batch)| async move { (index, self.translate(batch, target_language).await) })
            .buffer_unordered(self.concurrency);

        let mut outcomes = Vec::with_capacity(batches.len());
        while let Some((index, outcome)) = pending.next().await {
            match outcome {
                Ok(outcome) => {
                    progress.inc(1);
                    outcomes.push((index, outcome));
                }
                Err(e) => {
                    self.cancel.cancel();
                    return Err(e);
                }
            }
        }

        outcomes.sort_by_key(|(index, _)| *index);
        let failed = outcomes.iter().filter(|(_, outcome)| outcome.result.is_err()).count();
        info!(
            "Translated {} batches into {} ({} fell back to source text)",
            outcomes.len(),
            target_language,
            failed
        );
        Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
    }

    async fn call(&self, lines: &[String], target_language: &str) -> ProviderResult<Vec<String>> {
        self.limiter.acquire().await;
        tokio::time::timeout(
            self.call_timeout,
            self.provider.translate_batch(lines, &self.source_language, target_language),
        )
        .await
        .unwrap_or(Err(ProviderError::Timeout))
    }

    fn next_state(
        &self,
        attempt: u32,
        expected: usize,
        response: ProviderResult<Vec<String>>,
        failures: &mut Failures,
    ) -> Result<BatchState> {
        let error = match response {
            Ok(translated) if translated.len() == expected => {
                debug!("Batch of {} lines translated on attempt {}", expected, attempt);
                return Ok(BatchState::Success(translated));
            }
            Ok(translated) => {
                failures.alignment += 1;
                warn!(
                    "Alignment mismatch on attempt {}: sent {} lines, received {}",
                    attempt,
                    expected,
                    translated.len()
                );
                if failures.alignment > self.alignment_retries || attempt >= self.max_attempts {
                    return Ok(BatchState::Failed(BatchFailure::Misaligned {
                        expected,
                        actual: translated.len(),
                    }));
                }
                return Ok(BatchState::RetryScheduled { attempt, delay: Duration::ZERO });
            }
            Err(error) => error,
        };

        match error.class() {
            ErrorClass::Fatal => {
                error!("Translation service refused the run: {}", error);
                self.cancel.cancel();
                Err(SubtransError::Fatal(error.to_string()))
            }
            ErrorClass::BatchLocal => Ok(BatchState::Failed(BatchFailure::Rejected(error.to_string()))),
            ErrorClass::Alignment => {
                failures.alignment += 1;
                warn!("Unreadable response on attempt {}: {}", attempt, error);
                if failures.alignment > self.alignment_retries || attempt >= self.max_attempts {
                    Ok(BatchState::Failed(BatchFailure::Malformed(error.to_string())))
                } else {
                    Ok(BatchState::RetryScheduled { attempt, delay: Duration::ZERO })
                }
            }
            ErrorClass::Transient => {
                failures.transient += 1;
                if attempt >= self.max_attempts {
                    return Ok(BatchState::Failed(BatchFailure::RetriesExhausted {
                        attempts: attempt,
                        last_error: error,
                    }));
                }
                let delay = self.backoff_delay(failures.transient);
                warn!(
                    "Attempt {}/{} failed ({}); retrying in {:?}",
                    attempt, self.max_attempts, error, delay
                );
                Ok(BatchState::RetryScheduled { attempt, delay })
            }
        }
    }

    /// `base_delay * 2^(failures - 1)`, capped at `max_delay`.
    fn backoff_delay(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{TranslationUnit, UnitKey};
    use crate::translate::MockTranslationProvider;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> TranslateConfig {
        TranslateConfig {
            max_attempts: 5,
            alignment_retries: 1,
            base_delay_ms: 1,
            max_delay_ms: 5,
            timeout_secs: 5,
            min_interval_ms: 0,
            concurrency: 2,
            ..TranslateConfig::default()
        }
    }

    fn adapter(provider: Arc<dyn TranslationProvider>) -> TranslationAdapter {
        TranslationAdapter::new(
            provider,
            Arc::new(RateLimiter::new(Duration::ZERO)),
            CancellationToken::new(),
            &config(),
        )
    }

    fn batch(texts: &[&str]) -> TranslationBatch {
        TranslationBatch {
            units: texts
                .iter()
                .enumerate()
                .map(|(idx, text)| TranslationUnit::new(*text, UnitKey::Group(idx)))
                .collect(),
            oversized: false,
        }
    }

    fn upper(lines: &[String]) -> Vec<String> {
        lines.iter().map(|line| line.to_uppercase()).collect()
    }

    /// Plays back a fixed list of responses, then succeeds.
    struct Scripted {
        script: Mutex<VecDeque<ProviderError>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(errors: Vec<ProviderError>) -> Self {
            Self {
                script: Mutex::new(errors.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl TranslationProvider for Scripted {
        async fn translate_batch(&self, lines: &[String], _: &str, _: &str) -> ProviderResult<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.lock().unwrap().pop_front() {
                Some(error) => Err(error),
                None => Ok(upper(lines)),
            }
        }
    }

    #[tokio::test]
    async fn test_short_response_is_retried_once_then_falls_back() {
        let mut provider = MockTranslationProvider::new();
        provider
            .expect_translate_batch()
            .times(2)
            .returning(|lines, _, _| Ok(upper(&lines[..lines.len() - 1])));

        let outcome = adapter(Arc::new(provider))
            .translate(&batch(&["a", "b", "c", "d", "e"]), "ja")
            .await
            .unwrap();

        assert_eq!(outcome.calls, 2);
        assert_eq!(outcome.result, Err(BatchFailure::Misaligned { expected: 5, actual: 4 }));
        assert!(matches!(
            outcome.result.unwrap_err().to_error(),
            SubtransError::AlignmentMismatch { expected: 5, actual: 4 }
        ));
    }

    #[tokio::test]
    async fn test_rate_limited_three_times_then_succeeds() {
        let provider = Arc::new(Scripted::new(vec![
            ProviderError::RateLimited("slow down".into()),
            ProviderError::RateLimited("slow down".into()),
            ProviderError::RateLimited("slow down".into()),
        ]));

        let outcome = adapter(provider.clone()).translate(&batch(&["hi", "bye"]), "fr").await.unwrap();

        assert_eq!(outcome.calls, 4);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.result, Ok(vec!["HI".to_string(), "BYE".to_string()]));
    }

    #[tokio::test]
    async fn test_transient_errors_exhaust_attempt_budget() {
        let provider = Arc::new(Scripted::new(vec![ProviderError::Unavailable("503".into()); 10]));

        let outcome = adapter(provider.clone()).translate(&batch(&["hi"]), "fr").await.unwrap();

        assert_eq!(outcome.calls, 5);
        assert!(matches!(
            outcome.result,
            Err(BatchFailure::RetriesExhausted { attempts: 5, .. })
        ));
    }

    #[tokio::test]
    async fn test_rejection_fails_the_batch_immediately() {
        let provider = Arc::new(Scripted::new(vec![ProviderError::Rejected("too large".into())]));

        let outcome = adapter(provider.clone()).translate(&batch(&["hi"]), "fr").await.unwrap();

        assert_eq!(outcome.calls, 1);
        assert!(matches!(outcome.result, Err(BatchFailure::Rejected(_))));
    }

    #[tokio::test]
    async fn test_malformed_response_uses_alignment_budget() {
        let provider = Arc::new(Scripted::new(vec![ProviderError::Malformed("not json".into())]));

        let outcome = adapter(provider).translate(&batch(&["hi"]), "de").await.unwrap();
        assert_eq!(outcome.calls, 2);
        assert_eq!(outcome.result, Ok(vec!["HI".to_string()]));
    }

    #[tokio::test]
    async fn test_fatal_error_cancels_the_run() {
        let provider = Arc::new(Scripted::new(vec![ProviderError::Unauthorized("bad key".into())]));
        let adapter = adapter(provider);

        let err = adapter.translate(&batch(&["hi"]), "ja").await.unwrap_err();
        assert!(matches!(err, SubtransError::Fatal(_)));
        assert!(adapter.cancellation_token().is_cancelled());

        let err = adapter.translate(&batch(&["again"]), "ja").await.unwrap_err();
        assert!(matches!(err, SubtransError::Cancelled));
    }

    /// Refuses batches starting with "bad"; stalls on everything else.
    struct RefusesBad;

    #[async_trait]
    impl TranslationProvider for RefusesBad {
        async fn translate_batch(&self, lines: &[String], _: &str, _: &str) -> ProviderResult<Vec<String>> {
            if lines[0].starts_with("bad") {
                return Err(ProviderError::QuotaExhausted("daily quota".into()));
            }
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(upper(lines))
        }
    }

    #[tokio::test]
    async fn test_fatal_batch_stops_batches_in_flight() {
        let adapter = adapter(Arc::new(RefusesBad));
        let batches = vec![batch(&["slow"]), batch(&["bad"]), batch(&["never"])];

        let started = tokio::time::Instant::now();
        let err = adapter
            .translate_all(&batches, "ja", &ProgressBar::hidden())
            .await
            .unwrap_err();

        assert!(matches!(err, SubtransError::Fatal(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_translate_all_keeps_batch_order_and_spacing() {
        let adapter = TranslationAdapter::new(
            Arc::new(Scripted::new(Vec::new())),
            Arc::new(RateLimiter::new(Duration::from_millis(20))),
            CancellationToken::new(),
            &config(),
        );
        let batches = vec![batch(&["one"]), batch(&["two"]), batch(&["three"])];

        let started = tokio::time::Instant::now();
        let outcomes = adapter.translate_all(&batches, "es", &ProgressBar::hidden()).await.unwrap();

        let lines: Vec<String> = outcomes.into_iter().flat_map(|outcome| outcome.result.unwrap()).collect();
        assert_eq!(lines, vec!["ONE", "TWO", "THREE"]);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_backoff_doubles_up_to_the_cap() {
        let adapter = TranslationAdapter::new(
            Arc::new(Scripted::new(Vec::new())),
            Arc::new(RateLimiter::new(Duration::ZERO)),
            CancellationToken::new(),
            &TranslateConfig::default(),
        );

        assert_eq!(adapter.backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(adapter.backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(adapter.backoff_delay(3), Duration::from_millis(4000));
        assert_eq!(adapter.backoff_delay(6), Duration::from_millis(30_000));
        assert_eq!(adapter.backoff_delay(64), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let mut provider = MockTranslationProvider::new();
        provider.expect_translate_batch().never();

        let outcome = adapter(Arc::new(provider)).translate(&batch(&[]), "ja").await.unwrap();
        assert_eq!(outcome, BatchOutcome { calls: 0, result: Ok(Vec::new()) });
    }
}
