//! subtrans - bitmap subtitle OCR and batch translation
//!
//! Reads subtitle tracks (Blu-ray PGS images, SubRip text, or either inside a
//! video container), recognizes the text of image captions with tesseract,
//! translates it in batches through an LLM service and writes SubRip output
//! with the original timing.

pub mod batch;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod media;
pub mod normalize;
pub mod pgs;
pub mod reassemble;
pub mod recognize;
pub mod subtitle;
pub mod translate;
pub mod workflow;
