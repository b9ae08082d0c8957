use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::batch::{Batcher, TranslationUnit, UnitKey};
use crate::config::Config;
use crate::dedup::{Deduplicator, RecognitionGroup};
use crate::error::{Result, SubtransError};
use crate::media::{self, MediaProcessorFactory, MediaProcessorTrait};
use crate::normalize::Normalizer;
use crate::pgs;
use crate::reassemble::Reassembler;
use crate::recognize::{RecognitionAdapter, Recognizer, RecognizerFactory};
use crate::subtitle::{EventStore, LoadSource, SubtitleTrack};
use crate::translate::{RateLimiter, TranslationAdapter, TranslationProvider};

const VIDEO_EXTENSIONS: [&str; 9] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m2ts", "ts"];

/// One input file after extraction, recognition and normalization.
///
/// Everything here is independent of the target language, so a file with
/// several targets is only read once.
#[derive(Debug, Clone)]
pub struct PreparedFile {
    pub source: LoadSource,
    pub groups: Vec<RecognitionGroup>,
    pub units: Vec<TranslationUnit>,
}

/// Result of a directory run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryReport {
    pub processed: usize,
    pub failed: usize,
    pub outputs: Vec<PathBuf>,
}

pub struct Workflow {
    config: Config,
    media: Box<dyn MediaProcessorTrait>,
    recognizer: Arc<dyn Recognizer>,
    provider: Option<Arc<dyn TranslationProvider>>,
    limiter: Arc<RateLimiter>,
    cancel: CancellationToken,
}

impl Workflow {
    /// Build a workflow. `provider` may be `None` for runs that never translate.
    pub fn new(config: Config, provider: Option<Arc<dyn TranslationProvider>>) -> Self {
        let media = MediaProcessorFactory::create_processor(config.media.clone());
        let recognizer = RecognizerFactory::create_default(&config.recognize);
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(config.translate.min_interval_ms)));

        Self {
            config,
            media,
            recognizer,
            provider,
            limiter,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizer = recognizer;
        self
    }

    pub fn with_media(mut self, media: Box<dyn MediaProcessorTrait>) -> Self {
        self.media = media;
        self
    }

    /// Token cancelled by the first fatal translation error of the run.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Check that ffmpeg can be run and log its version.
    pub async fn check_media(&self) -> Result<()> {
        self.media.check_availability().await?;
        let version = self.media.get_version_info().await?;
        info!("Using {}", version);
        Ok(())
    }

    /// Translate one file into every target language.
    pub async fn process_single_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        target_languages: &[String],
        output_dir: Option<Q>,
    ) -> Result<Vec<PathBuf>> {
        let input_path = input_path.as_ref();
        info!("Processing single file: {}", input_path.display());

        let output_dir = self.resolve_output_dir(input_path, output_dir).await?;
        self.process_file(input_path, &output_dir, target_languages).await
    }

    /// Translate every subtitle source below `input_dir`.
    ///
    /// A file that fails on its own is logged and skipped; a fatal error stops the run.
    pub async fn process_directory<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_dir: P,
        target_languages: &[String],
        output_dir: Option<Q>,
    ) -> Result<DirectoryReport> {
        let input_dir = input_dir.as_ref();
        info!("Processing directory: {}", input_dir.display());

        if !input_dir.is_dir() {
            return Err(SubtransError::Config("Input path is not a directory".to_string()));
        }

        let output_dir = match output_dir {
            Some(dir) => dir.as_ref().to_path_buf(),
            None => input_dir.to_path_buf(),
        };
        fs::create_dir_all(&output_dir).await?;

        let files = self.find_inputs(input_dir, target_languages);
        info!("Found {} subtitle sources to process", files.len());

        let mut report = DirectoryReport::default();
        for path in files {
            // Mirror the source layout below the output directory
            let relative = path
                .parent()
                .and_then(|parent| pathdiff::diff_paths(parent, input_dir))
                .unwrap_or_default();
            let file_output_dir = output_dir.join(relative);
            fs::create_dir_all(&file_output_dir).await?;

            match self.process_file(&path, &file_output_dir, target_languages).await {
                Ok(outputs) => {
                    info!("Successfully processed: {}", path.display());
                    report.processed += 1;
                    report.outputs.extend(outputs);
                }
                Err(e) if e.is_fatal() => {
                    warn!("Stopping at {}: {}", path.display(), e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("Failed to process {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Directory run finished: {} processed, {} failed",
            report.processed, report.failed
        );
        Ok(report)
    }

    /// Read a bitmap source and write its recognized text without translating.
    pub async fn ocr_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_dir: Option<Q>,
    ) -> Result<PathBuf> {
        let input_path = input_path.as_ref();
        info!("Recognizing captions of {}", input_path.display());

        let output_dir = self.resolve_output_dir(input_path, output_dir).await?;
        let prepared = self.prepare(input_path).await?;
        if matches!(prepared.source, LoadSource::Srt(_)) {
            return Err(SubtransError::UnsupportedFormat(format!(
                "{} already holds text subtitles",
                input_path.display()
            )));
        }

        let store = EventStore::load(prepared.source)?;
        let reassembler = Reassembler::new(&store, &prepared.groups);
        reassembler.apply_source(&prepared.units)?;
        reassembler.fill_untranslated(&self.config.output.untranslated_marker)?;

        let output_path = output_path(input_path, &output_dir, &self.config.translate.source_language)?;
        write_atomic(&output_path, &store.serialize()?)?;
        info!("Wrote {}", output_path.display());
        Ok(output_path)
    }

    /// Copy the configured subtitle stream of a video out of its container.
    pub async fn extract_file<P: AsRef<Path>, Q: AsRef<Path>>(
        &self,
        input_path: P,
        output_dir: Option<Q>,
    ) -> Result<PathBuf> {
        let input_path = input_path.as_ref();
        let output_dir = self.resolve_output_dir(input_path, output_dir).await?;

        let stream =
            media::select_subtitle_stream(self.media.as_ref(), input_path, self.config.media.subtitle_stream)
                .await?;
        let (_, extension) = stream
            .kind()
            .ok_or_else(|| SubtransError::UnsupportedFormat(stream.codec_name.clone()))?
            .extraction();

        let output_path = output_dir.join(format!("{}.extracted.{}", file_stem(input_path)?, extension));
        self.media
            .extract_subtitle_stream(input_path, &stream, &output_path)
            .await?;

        info!("Extracted subtitles to {}", output_path.display());
        Ok(output_path)
    }

    /// Load the events of one input, choosing the reader by extension.
    pub async fn load_input(&self, path: &Path) -> Result<LoadSource> {
        if !path.exists() {
            return Err(SubtransError::FileNotFound(path.display().to_string()));
        }

        let extension = extension_of(path);
        match extension.as_str() {
            "srt" => Ok(LoadSource::Srt(fs::read_to_string(path).await?)),
            "sup" => Ok(LoadSource::Track(pgs::read_track(&fs::read(path).await?)?)),
            ext if VIDEO_EXTENSIONS.contains(&ext) => {
                media::load_video_subtitles(self.media.as_ref(), path, self.config.media.subtitle_stream).await
            }
            _ => Err(SubtransError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Load a file and turn it into translation units.
    ///
    /// Bitmap events are grouped, recognized once per group and normalized.
    /// Text events become one unit each and skip those stages.
    pub async fn prepare(&self, path: &Path) -> Result<PreparedFile> {
        let source = self.load_input(path).await?;

        match &source {
            LoadSource::Srt(_) => {
                let store = EventStore::load(source.clone())?;
                let units = store
                    .all_events()
                    .filter_map(|event| {
                        let text = event.source_text()?.trim();
                        (!text.is_empty()).then(|| TranslationUnit::new(text, UnitKey::Event(event.id())))
                    })
                    .collect();
                Ok(PreparedFile { source, groups: Vec::new(), units })
            }
            LoadSource::Track(track) => {
                let (groups, units) = self.recognize_track(track).await?;
                Ok(PreparedFile { source, groups, units })
            }
        }
    }

    async fn recognize_track(&self, track: &SubtitleTrack) -> Result<(Vec<RecognitionGroup>, Vec<TranslationUnit>)> {
        let deduplication = Deduplicator::new(&self.config.dedup).deduplicate(track.events());
        for failure in &deduplication.failures {
            warn!("Caption {} could not be decoded: {}", failure.event_id, failure.error);
        }
        info!(
            "{} bitmap captions fold into {} recognition groups",
            deduplication.grouped_events(),
            deduplication.groups.len()
        );

        if self.cancel.is_cancelled() {
            return Err(SubtransError::Cancelled);
        }

        let progress = progress_bar(deduplication.groups.len(), "Recognizing captions");
        let adapter = RecognitionAdapter::new(self.recognizer.clone(), &self.config.recognize);
        let recognitions = adapter.recognize_groups(&deduplication.groups, &progress).await;
        progress.finish_and_clear();

        let normalizer = Normalizer::new(&self.config.normalize);
        let units = recognitions
            .into_iter()
            .filter_map(|recognition| {
                let recognized = recognition.outcome.ok()?;
                let text = normalizer.normalize(&recognized.text, recognized.low_confidence);
                if text.is_empty() {
                    debug!("Group {} has no readable text", recognition.group_index);
                    return None;
                }
                Some(TranslationUnit::new(text, UnitKey::Group(recognition.group_index)))
            })
            .collect();

        Ok((deduplication.groups, units))
    }

    /// Translate a prepared file into one language and return the SubRip text.
    pub async fn translate_prepared(&self, prepared: &PreparedFile, target_language: &str) -> Result<String> {
        let provider = self
            .provider
            .clone()
            .ok_or_else(|| SubtransError::Config("No translation provider configured".to_string()))?;

        // A fresh store per target keeps every event write-once
        let store = EventStore::load(prepared.source.clone())?;
        let batches = Batcher::from_config(&self.config.batch).pack(prepared.units.clone());

        let adapter = TranslationAdapter::new(
            provider,
            self.limiter.clone(),
            self.cancel.clone(),
            &self.config.translate,
        );
        let progress = progress_bar(batches.len(), &format!("Translating into {}", target_language));
        let outcomes = adapter.translate_all(&batches, target_language, &progress).await;
        progress.finish_and_clear();
        let outcomes = outcomes?;

        let reassembler = Reassembler::new(&store, &prepared.groups);
        let report = reassembler.apply_outcomes(&batches, &outcomes)?;
        reassembler.fill_untranslated(&self.config.output.untranslated_marker)?;
        debug!("{:?}", report);

        store.serialize()
    }

    async fn process_file(
        &self,
        input_path: &Path,
        output_dir: &Path,
        target_languages: &[String],
    ) -> Result<Vec<PathBuf>> {
        if self.cancel.is_cancelled() {
            return Err(SubtransError::Cancelled);
        }
        if self.provider.is_none() {
            return Err(SubtransError::Config("No translation provider configured".to_string()));
        }

        let prepared = self.prepare(input_path).await?;
        info!(
            "{} has {} units to translate",
            input_path.display(),
            prepared.units.len()
        );

        // Nothing is written until every target has been translated
        let mut rendered = Vec::with_capacity(target_languages.len());
        for target_language in target_languages {
            let content = self.translate_prepared(&prepared, target_language).await?;
            rendered.push((output_path(input_path, output_dir, target_language)?, content));
        }

        let mut outputs = Vec::with_capacity(rendered.len());
        for (path, content) in rendered {
            write_atomic(&path, &content)?;
            info!("Wrote {}", path.display());
            outputs.push(path);
        }
        Ok(outputs)
    }

    async fn resolve_output_dir<Q: AsRef<Path>>(&self, input_path: &Path, output_dir: Option<Q>) -> Result<PathBuf> {
        if !input_path.exists() {
            return Err(SubtransError::FileNotFound(input_path.display().to_string()));
        }

        let output_dir = match output_dir {
            Some(dir) => dir.as_ref().to_path_buf(),
            None => input_path
                .parent()
                .ok_or_else(|| SubtransError::Config("Cannot determine output directory".to_string()))?
                .to_path_buf(),
        };
        fs::create_dir_all(&output_dir).await?;
        Ok(output_dir)
    }

    /// Subtitle sources below `input_dir`, without this tool's own outputs.
    ///
    /// `<stem>.<lang>.srt` counts as an output only when a source named
    /// `<stem>` sits next to it; a lone `episode.en.srt` is a real input.
    fn find_inputs(&self, input_dir: &Path, target_languages: &[String]) -> Vec<PathBuf> {
        let mut output_suffixes: Vec<String> = target_languages
            .iter()
            .map(|target| format!(".{}.srt", target.to_lowercase()))
            .collect();
        output_suffixes.push(format!(".{}.srt", self.config.translate.source_language.to_lowercase()));

        let mut files: Vec<PathBuf> = WalkDir::new(input_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| is_subtitle_source(path))
            .collect();
        files.sort();

        let generated: Vec<bool> = files
            .iter()
            .map(|path| {
                let name = path.file_name().map(|n| n.to_string_lossy().to_lowercase()).unwrap_or_default();
                if name.contains(".extracted.") {
                    return true;
                }
                output_suffixes.iter().any(|suffix| {
                    name.strip_suffix(suffix.as_str())
                        .is_some_and(|stem| has_source_sibling(&files, path, stem))
                })
            })
            .collect();

        files
            .into_iter()
            .zip(generated)
            .filter_map(|(path, generated)| {
                if generated {
                    info!("Skipping generated file {}", path.display());
                    None
                } else {
                    Some(path)
                }
            })
            .collect()
    }
}

fn is_subtitle_source(path: &Path) -> bool {
    let extension = extension_of(path);
    extension == "srt" || extension == "sup" || VIDEO_EXTENSIONS.contains(&extension.as_str())
}

/// True when `files` holds another source in `path`'s directory whose stem is `stem`.
fn has_source_sibling(files: &[PathBuf], path: &Path, stem: &str) -> bool {
    files.iter().any(|other| {
        other != path
            && other.parent() == path.parent()
            && other
                .file_stem()
                .is_some_and(|other_stem| other_stem.to_string_lossy().to_lowercase() == stem)
    })
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> Result<String> {
    Ok(path
        .file_stem()
        .ok_or_else(|| SubtransError::Config("Invalid input filename".to_string()))?
        .to_string_lossy()
        .into_owned())
}

fn output_path(input_path: &Path, output_dir: &Path, language: &str) -> Result<PathBuf> {
    Ok(output_dir.join(format!("{}.{}.srt", file_stem(input_path)?, language)))
}

/// Write through a temporary file in the same directory, then rename into place.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(content.as_bytes())?;
    file.persist(path).map_err(|e| SubtransError::Io(e.error))?;
    Ok(())
}

fn progress_bar(len: usize, message: &str) -> ProgressBar {
    let progress = ProgressBar::new(len as u64);
    progress.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-"),
    );
    progress.set_message(message.to_string());
    progress
}
