use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use assert_fs::prelude::*;
use assert_fs::TempDir;
use async_trait::async_trait;

use subtrans::config::Config;
use subtrans::error::{Result, SubtransError};
use subtrans::pgs::Bitmap;
use subtrans::recognize::{Recognition, Recognizer};
use subtrans::translate::{ProviderError, ProviderResult, TranslationProvider};
use subtrans::workflow::Workflow;

const THREE_CUES: &str = "1\n00:00:01,000 --> 00:00:02,000\nHello\n\n\
                          2\n00:00:03,000 --> 00:00:04,500\nHow are you?\n\n\
                          3\n00:00:05,000 --> 00:00:06,000\nGoodbye\n";

fn config() -> Config {
    let mut config = Config::default();
    config.translate.base_delay_ms = 1;
    config.translate.max_delay_ms = 4;
    config.translate.min_interval_ms = 0;
    config
}

/// Reads a caption as "caption <width>", failing on the widths in `unreadable`.
struct WidthRecognizer {
    calls: AtomicU32,
    unreadable: Vec<u32>,
}

impl WidthRecognizer {
    fn new(unreadable: &[u32]) -> Arc<Self> {
        Arc::new(Self { calls: AtomicU32::new(0), unreadable: unreadable.to_vec() })
    }
}

#[async_trait]
impl Recognizer for WidthRecognizer {
    async fn recognize_image(&self, bitmap: &Bitmap) -> Result<Recognition> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unreadable.contains(&bitmap.width) {
            return Err(SubtransError::Recognition(format!("cannot read width {}", bitmap.width)));
        }
        Ok(Recognition { text: format!("caption {}", bitmap.width), confidence: Some(92.0) })
    }
}

/// Fails the first `rate_limited` calls, then upper-cases, optionally dropping the last line.
struct ScriptedProvider {
    calls: AtomicU32,
    rate_limited: u32,
    drop_last_line: bool,
}

impl ScriptedProvider {
    fn new(rate_limited: u32, drop_last_line: bool) -> Arc<Self> {
        Arc::new(Self { calls: AtomicU32::new(0), rate_limited, drop_last_line })
    }
}

#[async_trait]
impl TranslationProvider for ScriptedProvider {
    async fn translate_batch(
        &self,
        lines: &[String],
        _source_language: &str,
        _target_language: &str,
    ) -> ProviderResult<Vec<String>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.rate_limited {
            return Err(ProviderError::RateLimited("slow down".to_string()));
        }

        let mut translated: Vec<String> = lines.iter().map(|line| line.to_uppercase()).collect();
        if self.drop_last_line {
            translated.pop();
        }
        Ok(translated)
    }
}

fn segment(pts_ms: u32, kind: u8, data: &[u8]) -> Vec<u8> {
    let mut out = b"PG".to_vec();
    out.extend_from_slice(&(pts_ms * 90).to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.push(kind);
    out.extend_from_slice(&(data.len() as u16).to_be_bytes());
    out.extend_from_slice(data);
    out
}

fn composition(objects: u8) -> Vec<u8> {
    let mut data = vec![0x07, 0x80, 0x04, 0x38, 0x10, 0, 1, 0x80, 0, 0, objects];
    if objects > 0 {
        data.extend_from_slice(&[0, 0, 0, 0, 0, 100, 0, 0]);
    }
    data
}

/// A one-row caption of `width` ink pixels shown from `start_ms` to `end_ms`.
fn caption(start_ms: u32, end_ms: u32, width: u16) -> Vec<u8> {
    let palette = [0, 0, 0, 16, 128, 128, 0, 1, 235, 128, 128, 255];
    let rle = vec![1u8; width as usize];
    let mut object = vec![0, 0, 0, 0xC0];
    object.extend_from_slice(&((rle.len() + 4) as u32).to_be_bytes()[1..]);
    object.extend_from_slice(&width.to_be_bytes());
    object.extend_from_slice(&1u16.to_be_bytes());
    object.extend_from_slice(&rle);

    let mut bytes = segment(start_ms, 0x16, &composition(1));
    bytes.extend(segment(start_ms, 0x14, &palette));
    bytes.extend(segment(start_ms, 0x15, &object));
    bytes.extend(segment(start_ms, 0x80, &[]));
    bytes.extend(segment(end_ms, 0x16, &composition(0)));
    bytes.extend(segment(end_ms, 0x80, &[]));
    bytes
}

fn sup_stream(widths: &[u16]) -> Vec<u8> {
    widths
        .iter()
        .enumerate()
        .flat_map(|(n, &width)| {
            let start = n as u32 * 2000 + 1000;
            caption(start, start + 1500, width)
        })
        .collect()
}

fn cues(content: &str) -> Vec<String> {
    content.trim().split("\n\n").map(str::to_string).collect()
}

#[tokio::test]
async fn test_three_cue_srt_is_translated_with_timing_kept() {
    let dir = TempDir::new().unwrap();
    let input = dir.child("talk.srt");
    input.write_str(THREE_CUES).unwrap();

    let provider = ScriptedProvider::new(0, false);
    let workflow = Workflow::new(config(), Some(provider.clone()));
    let outputs = workflow
        .process_single_file(input.path(), &["ja".to_string()], Some(dir.path()))
        .await
        .unwrap();

    let content = std::fs::read_to_string(&outputs[0]).unwrap();
    assert_eq!(
        cues(&content),
        vec![
            "1\n00:00:01,000 --> 00:00:02,000\nHELLO",
            "2\n00:00:03,000 --> 00:00:04,500\nHOW ARE YOU?",
            "3\n00:00:05,000 --> 00:00:06,000\nGOODBYE",
        ]
    );
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_repeated_captions_are_recognized_once_and_every_line_survives() {
    let dir = TempDir::new().unwrap();
    let input = dir.child("movie.sup");
    // Captions 3 and 7 show the same image
    input.write_binary(&sup_stream(&[2, 3, 4, 11, 5, 6, 7, 11, 8, 9])).unwrap();

    let recognizer = WidthRecognizer::new(&[]);
    let workflow = Workflow::new(config(), Some(ScriptedProvider::new(0, false))).with_recognizer(recognizer.clone());
    let outputs = workflow
        .process_single_file(input.path(), &["fr".to_string()], None::<&std::path::Path>)
        .await
        .unwrap();

    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 9);
    assert_eq!(outputs[0], dir.path().join("movie.fr.srt"));

    let output = cues(&std::fs::read_to_string(&outputs[0]).unwrap());
    assert_eq!(output.len(), 10);
    assert_eq!(output[3], "4\n00:00:07,000 --> 00:00:08,500\nCAPTION 11");
    assert_eq!(output[7], "8\n00:00:15,000 --> 00:00:16,500\nCAPTION 11");
    assert_eq!(output[9], "10\n00:00:19,000 --> 00:00:20,500\nCAPTION 9");
}

#[tokio::test]
async fn test_unreadable_caption_gets_the_marker() {
    let dir = TempDir::new().unwrap();
    let input = dir.child("movie.sup");
    input.write_binary(&sup_stream(&[2, 7, 3])).unwrap();

    let workflow = Workflow::new(config(), Some(ScriptedProvider::new(0, false)))
        .with_recognizer(WidthRecognizer::new(&[7]));
    let outputs = workflow
        .process_single_file(input.path(), &["de".to_string()], Some(dir.path()))
        .await
        .unwrap();

    let output = cues(&std::fs::read_to_string(&outputs[0]).unwrap());
    assert_eq!(output.len(), 3);
    assert!(output[0].ends_with("CAPTION 2"));
    assert_eq!(output[1], format!("2\n00:00:03,000 --> 00:00:04,500\n{}", config().output.untranslated_marker));
    assert!(output[2].ends_with("CAPTION 3"));
}

#[tokio::test]
async fn test_short_response_falls_back_to_source_text() {
    let dir = TempDir::new().unwrap();
    let input = dir.child("talk.srt");
    input.write_str(THREE_CUES).unwrap();

    let provider = ScriptedProvider::new(0, true);
    let workflow = Workflow::new(config(), Some(provider.clone()));
    let outputs = workflow
        .process_single_file(input.path(), &["ja".to_string()], Some(dir.path()))
        .await
        .unwrap();

    // One resend after the misaligned answer, then the batch keeps its source
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert_eq!(std::fs::read_to_string(&outputs[0]).unwrap().trim(), THREE_CUES.trim());
}

#[test]
fn test_rate_limited_batch_is_retried_until_it_succeeds() {
    let dir = TempDir::new().unwrap();
    let input = dir.child("talk.srt");
    input.write_str(THREE_CUES).unwrap();

    let provider = ScriptedProvider::new(3, false);
    let workflow = Workflow::new(config(), Some(provider.clone()));
    let outputs = tokio_test::block_on(workflow.process_single_file(
        input.path(),
        &["ja".to_string()],
        Some(dir.path()),
    ))
    .unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    assert!(std::fs::read_to_string(&outputs[0]).unwrap().contains("HOW ARE YOU?"));
}
