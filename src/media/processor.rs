use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, info};

use crate::config::MediaConfig;
use crate::error::{Result, SubtransError};
use super::{parse_probe_output, MediaCommandBuilder, MediaProcessorTrait, SubtitleStream};

/// Concrete implementation of media processor (FFmpeg-based)
pub struct MediaProcessorImpl {
    command_builder: MediaCommandBuilder,
}

impl MediaProcessorImpl {
    /// Create a new media processor implementation
    pub fn new(config: MediaConfig) -> Self {
        Self {
            command_builder: MediaCommandBuilder::new(config.binary_path, config.probe_path),
        }
    }
}

#[async_trait]
impl MediaProcessorTrait for MediaProcessorImpl {
    async fn probe_subtitle_streams(&self, video_path: &Path) -> Result<Vec<SubtitleStream>> {
        debug!("Probing subtitle streams of {}", video_path.display());

        let json = self
            .command_builder
            .probe_subtitles(video_path)
            .execute_capture()
            .await?;
        let streams = parse_probe_output(&json)
            .map_err(|e| SubtransError::Media(format!("Unreadable ffprobe output: {}", e)))?;

        debug!("Found {} subtitle streams", streams.len());
        Ok(streams)
    }

    async fn extract_subtitle_stream(
        &self,
        video_path: &Path,
        stream: &SubtitleStream,
        output_path: &Path,
    ) -> Result<()> {
        let (codec, _) = stream
            .kind()
            .ok_or_else(|| SubtransError::UnsupportedFormat(format!("subtitle codec '{}'", stream.codec_name)))?
            .extraction();

        info!(
            "Extracting {} subtitles from {} to {}",
            stream.codec_name,
            video_path.display(),
            output_path.display()
        );

        self.command_builder
            .extract_subtitle(video_path, stream.position, codec, output_path)
            .execute()
            .await
    }

    async fn check_availability(&self) -> Result<()> {
        self.command_builder
            .version_check()
            .execute()
            .await
            .map_err(|e| SubtransError::Media(format!("Media processor not found: {}", e)))?;

        info!("Media processor is available");
        Ok(())
    }

    async fn get_version_info(&self) -> Result<String> {
        let output = self.command_builder.version_check().execute_capture().await?;
        // The first line carries the version
        Ok(output.lines().next().unwrap_or("Unknown version").to_string())
    }
}
