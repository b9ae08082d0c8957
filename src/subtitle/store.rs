use std::collections::HashMap;
use tracing::debug;

use crate::error::{Result, SubtransError};
use super::srt::{parse_srt, write_srt};
use super::{EventId, Payload, SubtitleEvent, SubtitleTrack};

/// Where the events of one input file come from.
#[derive(Debug, Clone)]
pub enum LoadSource {
    /// SubRip text, parsed directly
    Srt(String),
    /// A track already extracted from a bitmap subtitle stream
    Track(SubtitleTrack),
}

/// Authoritative ordered events of one input file.
///
/// Translations are written through `&self`: every event owns a write-once
/// cell, so distinct ids can be filled from concurrent workers.
#[derive(Debug)]
pub struct EventStore {
    events: Vec<SubtitleEvent>,
    positions: HashMap<EventId, usize>,
}

impl EventStore {
    pub fn load(source: LoadSource) -> Result<Self> {
        let track = match source {
            LoadSource::Srt(content) => {
                let cues = parse_srt(&content)?;
                let events = cues
                    .into_iter()
                    .enumerate()
                    .map(|(idx, cue)| {
                        SubtitleEvent::new(
                            EventId(idx as u32),
                            cue.start_ms,
                            cue.end_ms,
                            Payload::Text(cue.text),
                        )
                    })
                    .collect::<Result<Vec<_>>>()?;
                SubtitleTrack::new(events)
            }
            LoadSource::Track(track) => track,
        };

        let events = track.into_events();
        let mut positions = HashMap::with_capacity(events.len());
        for (pos, event) in events.iter().enumerate() {
            if positions.insert(event.id(), pos).is_some() {
                return Err(SubtransError::Parse(format!("event id {} appears twice", event.id())));
            }
        }

        debug!("Loaded {} subtitle events", events.len());
        Ok(Self { events, positions })
    }

    /// Events in output order. Each call starts from the beginning.
    pub fn all_events(&self) -> impl Iterator<Item = &SubtitleEvent> + '_ {
        self.events.iter()
    }

    pub fn event(&self, id: EventId) -> Option<&SubtitleEvent> {
        self.positions.get(&id).map(|&pos| &self.events[pos])
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// True when the events came from a bitmap track.
    pub fn is_bitmap(&self) -> bool {
        self.events.iter().any(SubtitleEvent::is_bitmap)
    }

    pub fn apply_translation(&self, id: EventId, text: impl Into<String>) -> Result<()> {
        let event = self.event(id).ok_or(SubtransError::UnknownEvent(id))?;
        event.set_translation(text.into())
    }

    /// Ids whose translated text is still unset.
    pub fn untranslated_ids(&self) -> Vec<EventId> {
        self.events
            .iter()
            .filter(|event| event.translated_text().is_none())
            .map(SubtitleEvent::id)
            .collect()
    }

    /// Render the final SubRip output. Every event must carry non-empty text.
    pub fn serialize(&self) -> Result<String> {
        let missing = self
            .events
            .iter()
            .filter(|event| event.translated_text().is_none_or(|text| text.trim().is_empty()))
            .count();
        if missing > 0 {
            return Err(SubtransError::IncompleteTranslation { missing });
        }

        Ok(write_srt(self.events.iter().map(|event| {
            (
                event.start_ms(),
                event.end_ms(),
                event.translated_text().unwrap_or_default(),
            )
        })))
    }
}
