use async_trait::async_trait;
use image::{GrayImage, ImageFormat, Luma};
use tokio::process::Command;
use tracing::debug;

use crate::config::RecognizeConfig;
use crate::error::{Result, SubtransError};
use crate::pgs::Bitmap;
use super::{Recognition, Recognizer};

/// TSV row level for single words
const WORD_LEVEL: &str = "5";

/// Runs the `tesseract` CLI on one caption at a time.
pub struct TesseractRecognizer {
    binary_path: String,
    languages: String,
    page_segmentation_mode: u32,
    padding: u32,
}

impl TesseractRecognizer {
    pub fn new(config: &RecognizeConfig) -> Self {
        Self {
            binary_path: config.binary_path.clone(),
            languages: config.languages.clone(),
            page_segmentation_mode: config.page_segmentation_mode,
            padding: config.padding,
        }
    }

    /// Caption surrounded by a white border; tesseract misreads glyphs touching the edge.
    fn padded_image(&self, bitmap: &Bitmap) -> Result<GrayImage> {
        let caption = bitmap.to_image().ok_or_else(|| {
            SubtransError::Recognition(format!(
                "bitmap buffer does not match {}x{}",
                bitmap.width, bitmap.height
            ))
        })?;

        let mut canvas = GrayImage::from_pixel(
            bitmap.width + 2 * self.padding,
            bitmap.height + 2 * self.padding,
            Luma([255]),
        );
        image::imageops::overlay(&mut canvas, &caption, i64::from(self.padding), i64::from(self.padding));
        Ok(canvas)
    }
}

#[async_trait]
impl Recognizer for TesseractRecognizer {
    async fn recognize_image(&self, bitmap: &Bitmap) -> Result<Recognition> {
        let image = self.padded_image(bitmap)?;

        let png = tempfile::Builder::new()
            .prefix("subtrans-ocr-")
            .suffix(".png")
            .tempfile()?;
        image
            .save_with_format(png.path(), ImageFormat::Png)
            .map_err(|e| SubtransError::Recognition(format!("Failed to write OCR image: {}", e)))?;

        let output = Command::new(&self.binary_path)
            .arg(png.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .arg("--psm")
            .arg(self.page_segmentation_mode.to_string())
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SubtransError::Recognition(format!("Failed to execute tesseract: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SubtransError::Recognition(format!("tesseract failed: {}", stderr.trim())));
        }

        let recognition = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!(
            "tesseract read {} lines (confidence {:?})",
            recognition.text.lines().count(),
            recognition.confidence
        );
        Ok(recognition)
    }
}

/// Rebuild text lines from tesseract's TSV word rows.
///
/// Words sharing a block, paragraph and line number form one line. The
/// confidence is the mean of the word confidences the engine reported.
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut lines: Vec<((&str, &str, &str), Vec<&str>)> = Vec::new();
    let mut confidences = Vec::new();

    for row in tsv.lines().skip(1) {
        let columns: Vec<&str> = row.split('\t').collect();
        if columns.len() < 12 || columns[0] != WORD_LEVEL {
            continue;
        }
        let word = columns[11].trim();
        if word.is_empty() {
            continue;
        }

        if let Ok(confidence) = columns[10].parse::<f32>() {
            if confidence >= 0.0 {
                confidences.push(confidence);
            }
        }

        let key = (columns[2], columns[3], columns[4]);
        match lines.last_mut() {
            Some((last, words)) if *last == key => words.push(word),
            _ => lines.push((key, vec![word])),
        }
    }

    let text = lines
        .iter()
        .map(|(_, words)| words.join(" "))
        .collect::<Vec<_>>()
        .join("\n");
    let confidence = (!confidences.is_empty())
        .then(|| confidences.iter().sum::<f32>() / confidences.len() as f32);

    Recognition { text, confidence }
}
