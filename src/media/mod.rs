// Subtitle stream access in video containers
//
// - Processor: ffprobe detection and ffmpeg stream extraction
// - Commands: command builders and abstractions

pub mod commands;
pub mod processor;

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

pub use commands::*;
pub use processor::*;

use crate::config::MediaConfig;
use crate::error::{Result, SubtransError};
use crate::subtitle::{LoadSource, SubtitleTrack};

/// How a subtitle stream stores its captions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleKind {
    /// Blu-ray Presentation Graphics (PGS)
    Bitmap,
    /// Any text codec ffmpeg can convert to SubRip
    Text,
}

impl SubtitleKind {
    pub fn from_codec(codec_name: &str) -> Option<Self> {
        match codec_name {
            "hdmv_pgs_subtitle" => Some(Self::Bitmap),
            "subrip" | "srt" | "ass" | "ssa" | "mov_text" | "webvtt" | "text" => Some(Self::Text),
            _ => None,
        }
    }

    /// Codec argument and file extension used when extracting this kind.
    pub fn extraction(self) -> (&'static str, &'static str) {
        match self {
            Self::Bitmap => ("copy", "sup"),
            Self::Text => ("srt", "srt"),
        }
    }
}

/// One subtitle stream reported by ffprobe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleStream {
    /// Position among the container's subtitle streams (`-map 0:s:<position>`)
    pub position: usize,
    /// Absolute stream index in the container
    pub index: usize,
    pub codec_name: String,
    pub language: Option<String>,
}

impl SubtitleStream {
    pub fn kind(&self) -> Option<SubtitleKind> {
        SubtitleKind::from_codec(&self.codec_name)
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    index: usize,
    #[serde(default)]
    codec_name: String,
    #[serde(default)]
    tags: Option<ProbeTags>,
}

#[derive(Debug, Deserialize)]
struct ProbeTags {
    language: Option<String>,
}

/// Parse `ffprobe -of json` output restricted to subtitle streams.
pub fn parse_probe_output(json: &str) -> Result<Vec<SubtitleStream>> {
    let probe: ProbeOutput = serde_json::from_str(json)?;
    Ok(probe
        .streams
        .into_iter()
        .enumerate()
        .map(|(position, stream)| SubtitleStream {
            position,
            index: stream.index,
            codec_name: stream.codec_name,
            language: stream.tags.and_then(|tags| tags.language),
        })
        .collect())
}

/// Main trait for media processing operations
#[async_trait]
pub trait MediaProcessorTrait: Send + Sync {
    /// List the subtitle streams of a video file
    async fn probe_subtitle_streams(&self, video_path: &Path) -> Result<Vec<SubtitleStream>>;

    /// Write one subtitle stream to `output_path` (`.sup` for bitmaps, `.srt` for text)
    async fn extract_subtitle_stream(
        &self,
        video_path: &Path,
        stream: &SubtitleStream,
        output_path: &Path,
    ) -> Result<()>;

    /// Check if media processor is available
    async fn check_availability(&self) -> Result<()>;

    /// Get media processor version information
    async fn get_version_info(&self) -> Result<String>;
}

/// Factory for creating media processor instances
pub struct MediaProcessorFactory;

impl MediaProcessorFactory {
    /// Create the default media processor implementation (FFmpeg-based)
    pub fn create_processor(config: MediaConfig) -> Box<dyn MediaProcessorTrait> {
        Box::new(processor::MediaProcessorImpl::new(config))
    }
}

/// Pick the configured subtitle stream of a video.
pub async fn select_subtitle_stream(
    processor: &dyn MediaProcessorTrait,
    video_path: &Path,
    position: usize,
) -> Result<SubtitleStream> {
    let streams = processor.probe_subtitle_streams(video_path).await?;
    let stream = streams.into_iter().nth(position).ok_or_else(|| {
        SubtransError::Parse(format!(
            "{} has no subtitle stream #{}",
            video_path.display(),
            position
        ))
    })?;

    if stream.kind().is_none() {
        return Err(SubtransError::UnsupportedFormat(format!(
            "subtitle codec '{}' in {}",
            stream.codec_name,
            video_path.display()
        )));
    }
    Ok(stream)
}

/// Extract a video's subtitle stream and load it as pipeline input.
///
/// Bitmap streams become a parsed track; text streams are converted to SubRip.
/// A container ffprobe or ffmpeg cannot read is a `Parse` error.
pub async fn load_video_subtitles(
    processor: &dyn MediaProcessorTrait,
    video_path: &Path,
    position: usize,
) -> Result<LoadSource> {
    let unreadable = |error: SubtransError| match error {
        SubtransError::Media(detail) => {
            SubtransError::Parse(format!("cannot read {}: {}", video_path.display(), detail))
        }
        other => other,
    };

    let stream = select_subtitle_stream(processor, video_path, position)
        .await
        .map_err(unreadable)?;
    let kind = stream.kind().unwrap_or(SubtitleKind::Text);
    let (_, extension) = kind.extraction();

    let extracted = tempfile::Builder::new()
        .prefix("subtrans-extract-")
        .suffix(&format!(".{}", extension))
        .tempfile()?;
    processor
        .extract_subtitle_stream(video_path, &stream, extracted.path())
        .await
        .map_err(unreadable)?;

    info!(
        "Extracted {} subtitle stream {} ({}) from {}",
        stream.codec_name,
        stream.position,
        stream.language.as_deref().unwrap_or("unknown language"),
        video_path.display()
    );

    let bytes = tokio::fs::read(extracted.path()).await?;
    match kind {
        SubtitleKind::Bitmap => Ok(LoadSource::Track(crate::pgs::read_track(&bytes)?)),
        SubtitleKind::Text => Ok(LoadSource::Srt(String::from_utf8_lossy(&bytes).into_owned())),
    }
}

/// Extract the bitmap subtitle track of a video as timed events.
pub async fn extract_bitmap_track(
    processor: &dyn MediaProcessorTrait,
    video_path: &Path,
    position: usize,
) -> Result<SubtitleTrack> {
    match load_video_subtitles(processor, video_path, position).await? {
        LoadSource::Track(track) => Ok(track),
        LoadSource::Srt(_) => Err(SubtransError::UnsupportedFormat(format!(
            "subtitle stream #{} of {} is text, not bitmap",
            position,
            video_path.display()
        ))),
    }
}
