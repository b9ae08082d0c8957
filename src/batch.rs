use tracing::{debug, warn};

use crate::config::BatchConfig;
use crate::subtitle::EventId;

/// What a translated line is applied back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitKey {
    /// Index into the deduplicator's recognition groups
    Group(usize),
    /// A text event translated on its own
    Event(EventId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationUnit {
    pub source_text: String,
    pub key: UnitKey,
}

impl TranslationUnit {
    pub fn new(source_text: impl Into<String>, key: UnitKey) -> Self {
        Self {
            source_text: source_text.into(),
            key,
        }
    }

    pub fn char_len(&self) -> usize {
        self.source_text.chars().count()
    }
}

/// Units sent to the translation service in one request.
///
/// The service must answer with exactly one line per unit, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationBatch {
    pub units: Vec<TranslationUnit>,
    /// A single unit longer than the character cap
    pub oversized: bool,
}

impl TranslationBatch {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.units.iter().map(TranslationUnit::char_len).sum()
    }

    pub fn lines(&self) -> Vec<String> {
        self.units.iter().map(|unit| unit.source_text.clone()).collect()
    }
}

/// Greedy packer bounded by total characters and unit count.
#[derive(Debug, Clone, Copy)]
pub struct Batcher {
    max_chars: usize,
    max_units: usize,
}

impl Batcher {
    pub fn new(max_chars: usize, max_units: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            max_units: max_units.max(1),
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(config.max_chars, config.max_units)
    }

    /// Pack units in order. No unit is dropped, split or reordered.
    pub fn pack(&self, units: Vec<TranslationUnit>) -> Vec<TranslationBatch> {
        let mut batches = Vec::new();
        let mut current = TranslationBatch::default();
        let mut current_chars = 0;

        for unit in units {
            let chars = unit.char_len();

            if chars > self.max_chars {
                warn!(
                    "Translation unit of {} characters exceeds the {} character cap; sending it alone",
                    chars, self.max_chars
                );
                if !current.is_empty() {
                    batches.push(std::mem::take(&mut current));
                    current_chars = 0;
                }
                batches.push(TranslationBatch {
                    units: vec![unit],
                    oversized: true,
                });
                continue;
            }

            if !current.is_empty()
                && (current_chars + chars > self.max_chars || current.len() == self.max_units)
            {
                batches.push(std::mem::take(&mut current));
                current_chars = 0;
            }

            current_chars += chars;
            current.units.push(unit);
        }

        if !current.is_empty() {
            batches.push(current);
        }

        debug!("Packed units into {} batches", batches.len());
        batches
    }
}
