use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SubtransError};

/// Abstract media processing command representation
#[derive(Debug, Clone)]
pub struct MediaCommand {
    pub binary_path: String,
    pub args: Vec<String>,
    pub description: String,
}

impl MediaCommand {
    /// Create a new media processing command
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, description: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    /// Add an argument
    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add input file
    pub fn input<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg("-i").arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add output file
    pub fn output<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Force overwrite output
    pub fn overwrite(self) -> Self {
        self.arg("-y")
    }

    /// Only report errors
    pub fn quiet(self) -> Self {
        self.arg("-v").arg("error")
    }

    /// Select the n-th subtitle stream of the first input
    pub fn map_subtitle(self, position: usize) -> Self {
        self.arg("-map").arg(format!("0:s:{}", position))
    }

    /// Set subtitle codec
    pub fn subtitle_codec<S: Into<String>>(self, codec: S) -> Self {
        self.arg("-c:s").arg(codec)
    }

    /// Execute the command, discarding its output
    pub async fn execute(&self) -> Result<()> {
        self.execute_capture().await.map(|_| ())
    }

    /// Execute the command and return its standard output
    pub async fn execute_capture(&self) -> Result<String> {
        debug!("Executing media processing command: {} {:?}", self.binary_path, self.args);
        debug!("Description: {}", self.description);

        let output = Command::new(&self.binary_path)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SubtransError::Media(format!("Failed to execute {}: {}", self.binary_path, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SubtransError::Media(format!(
                "{} failed: {}",
                self.description,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Builder for the ffmpeg/ffprobe invocations the pipeline needs
pub struct MediaCommandBuilder {
    binary_path: String,
    probe_path: String,
}

impl MediaCommandBuilder {
    /// Create a new command builder
    pub fn new<S1: Into<String>, S2: Into<String>>(binary_path: S1, probe_path: S2) -> Self {
        Self {
            binary_path: binary_path.into(),
            probe_path: probe_path.into(),
        }
    }

    /// Build subtitle stream listing command (JSON on stdout)
    pub fn probe_subtitles<P: AsRef<Path>>(&self, video_path: P) -> MediaCommand {
        MediaCommand::new(&self.probe_path, "Subtitle stream detection")
            .quiet()
            .args(["-select_streams", "s"])
            .args(["-show_entries", "stream=index,codec_name:stream_tags=language"])
            .args(["-of", "json"])
            .output(video_path)
    }

    /// Build subtitle stream extraction command
    pub fn extract_subtitle<P: AsRef<Path>>(
        &self,
        video_path: P,
        position: usize,
        codec: &str,
        output_path: P,
    ) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Subtitle extraction")
            .quiet()
            .overwrite()
            .input(video_path)
            .map_subtitle(position)
            .subtitle_codec(codec)
            .output(output_path)
    }

    /// Build version check command
    pub fn version_check(&self) -> MediaCommand {
        MediaCommand::new(&self.binary_path, "Version check").arg("-version")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_command_lists_subtitle_streams_as_json() {
        let cmd = MediaCommandBuilder::new("ffmpeg", "ffprobe").probe_subtitles("movie.mkv");

        assert_eq!(cmd.binary_path, "ffprobe");
        assert_eq!(
            cmd.args,
            vec![
                "-v", "error",
                "-select_streams", "s",
                "-show_entries", "stream=index,codec_name:stream_tags=language",
                "-of", "json",
                "movie.mkv",
            ]
        );
    }

    #[test]
    fn test_extract_command_maps_relative_subtitle_stream() {
        let cmd = MediaCommandBuilder::new("ffmpeg", "ffprobe")
            .extract_subtitle("movie.mkv", 1, "copy", "out.sup");

        assert_eq!(cmd.binary_path, "ffmpeg");
        assert_eq!(
            cmd.args,
            vec!["-v", "error", "-y", "-i", "movie.mkv", "-map", "0:s:1", "-c:s", "copy", "out.sup"]
        );
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_media_error() {
        let cmd = MediaCommand::new("/nonexistent/ffmpeg-binary", "Version check").arg("-version");
        assert!(matches!(cmd.execute().await, Err(SubtransError::Media(_))));
    }
}
