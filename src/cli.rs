use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate the subtitles of one video, .sup or .srt file
    Process {
        /// Input video, .sup or .srt file
        #[arg(short, long)]
        input: PathBuf,

        /// Target languages for translation (comma-separated)
        #[arg(short, long, default_value = "ja")]
        target_langs: String,

        /// Output directory for subtitle files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Translate every subtitle source in a directory
    Batch {
        /// Input directory, searched recursively
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Target languages for translation (comma-separated)
        #[arg(short, long, default_value = "ja")]
        target_langs: String,

        /// Output directory; sub-directories are mirrored
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Recognize bitmap subtitles into a source-language .srt without translating
    Ocr {
        /// Input video or .sup file
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for the subtitle file
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Copy the subtitle stream of a video out of its container
    Extract {
        /// Input video file
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory for the extracted stream
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Write the default configuration to a file
    InitConfig {
        /// Where to write the configuration
        #[arg(short, long, default_value = "config.toml")]
        path: PathBuf,
    },
}

/// Split a comma-separated language list, dropping blanks.
pub fn parse_target_languages(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|lang| lang.trim().to_string())
        .filter(|lang| !lang.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_languages_are_split_on_commas() {
        assert_eq!(parse_target_languages("ja, fr,,de "), vec!["ja", "fr", "de"]);
        assert!(parse_target_languages(" ").is_empty());
    }

    #[test]
    fn test_process_command_parses_defaults() {
        let args = Args::try_parse_from(["subtrans", "-v", "process", "-i", "movie.mkv"]).unwrap();
        assert!(args.verbose);
        match args.command {
            Commands::Process { input, target_langs, output_dir } => {
                assert_eq!(input, PathBuf::from("movie.mkv"));
                assert_eq!(target_langs, "ja");
                assert!(output_dir.is_none());
            }
            _ => panic!("expected process command"),
        }
    }

    #[test]
    fn test_init_config_uses_kebab_case_name() {
        let args = Args::try_parse_from(["subtrans", "init-config"]).unwrap();
        assert!(matches!(args.command, Commands::InitConfig { path } if path == PathBuf::from("config.toml")));
    }
}
