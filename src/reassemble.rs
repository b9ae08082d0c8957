use tracing::{debug, info, warn};

use crate::batch::{TranslationBatch, TranslationUnit, UnitKey};
use crate::dedup::RecognitionGroup;
use crate::error::{Result, SubtransError};
use crate::subtitle::{EventId, EventStore, Payload};
use crate::translate::BatchOutcome;

/// Counts of how units were resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyReport {
    /// Units that received a translated line
    pub translated: usize,
    /// Units that kept their source text
    pub fallback: usize,
}

/// Writes translated text back onto every event a unit stands for.
pub struct Reassembler<'a> {
    store: &'a EventStore,
    groups: &'a [RecognitionGroup],
}

impl<'a> Reassembler<'a> {
    pub fn new(store: &'a EventStore, groups: &'a [RecognitionGroup]) -> Self {
        Self { store, groups }
    }

    /// Apply each batch's outcome. `outcomes[i]` belongs to `batches[i]`.
    pub fn apply_outcomes(
        &self,
        batches: &[TranslationBatch],
        outcomes: &[BatchOutcome],
    ) -> Result<ReassemblyReport> {
        if batches.len() != outcomes.len() {
            return Err(SubtransError::AlignmentMismatch {
                expected: batches.len(),
                actual: outcomes.len(),
            });
        }

        let mut report = ReassemblyReport::default();
        for (batch, outcome) in batches.iter().zip(outcomes) {
            match &outcome.result {
                Ok(lines) if lines.len() == batch.len() => {
                    for (unit, line) in batch.units.iter().zip(lines) {
                        if line.trim().is_empty() {
                            self.apply_unit(unit, &unit.source_text)?;
                            report.fallback += 1;
                        } else {
                            self.apply_unit(unit, line.trim())?;
                            report.translated += 1;
                        }
                    }
                }
                Ok(lines) => {
                    warn!(
                        "Batch outcome has {} lines for {} units; keeping source text",
                        lines.len(),
                        batch.len()
                    );
                    report.fallback += self.apply_source(&batch.units)?;
                }
                Err(_) => report.fallback += self.apply_source(&batch.units)?,
            }
        }

        info!(
            "Reassembled {} translated and {} fallback units",
            report.translated, report.fallback
        );
        Ok(report)
    }

    /// Apply every unit's own text, untranslated.
    pub fn apply_source(&self, units: &[TranslationUnit]) -> Result<usize> {
        for unit in units {
            self.apply_unit(unit, &unit.source_text)?;
        }
        Ok(units.len())
    }

    /// Give every event that was never reached its fallback text. Text events
    /// keep their original text; bitmap and blank events get `marker`.
    pub fn fill_untranslated(&self, marker: &str) -> Result<usize> {
        let missing = self.store.untranslated_ids();
        for &id in &missing {
            let text = match self.store.event(id).map(|event| event.payload()) {
                Some(Payload::Text(text)) if !text.trim().is_empty() => text.as_str(),
                Some(Payload::Text(_)) => marker,
                Some(Payload::Bitmap(_)) => marker,
                None => return Err(SubtransError::UnknownEvent(id)),
            };
            self.store.apply_translation(id, text)?;
        }

        if !missing.is_empty() {
            warn!("{} events had no usable text and were given a fallback", missing.len());
        }
        Ok(missing.len())
    }

    fn apply_unit(&self, unit: &TranslationUnit, text: &str) -> Result<()> {
        for id in self.targets(unit.key)? {
            self.store.apply_translation(id, text)?;
        }
        Ok(())
    }

    fn targets(&self, key: UnitKey) -> Result<Vec<EventId>> {
        match key {
            UnitKey::Event(id) => Ok(vec![id]),
            UnitKey::Group(index) => {
                let group = self.groups.get(index).ok_or_else(|| {
                    SubtransError::Parse(format!("translation unit refers to missing group {}", index))
                })?;
                debug!("Group {} covers {} events", index, group.member_event_ids.len());
                Ok(group.member_event_ids.clone())
            }
        }
    }
}
