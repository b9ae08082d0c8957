// Timed subtitle model shared by every pipeline stage
//
// - srt: SubRip parsing and formatting
// - store: the authoritative, write-once event store for one input file

pub mod srt;
pub mod store;

use std::fmt;
use std::sync::OnceLock;

pub use store::{EventStore, LoadSource};

use crate::error::{Result, SubtransError};
use crate::pgs::RawBitmap;

/// Stable identifier assigned at extraction time, in input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u32);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What a subtitle event shows on screen.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Undecoded caption image from a bitmap track
    Bitmap(RawBitmap),
    /// Caption text from a text-based subtitle file
    Text(String),
}

/// One timed subtitle unit. Only `translated_text` changes after creation, and only once.
#[derive(Debug, Clone)]
pub struct SubtitleEvent {
    id: EventId,
    start_ms: u64,
    end_ms: u64,
    payload: Payload,
    translated_text: OnceLock<String>,
}

impl SubtitleEvent {
    pub fn new(id: EventId, start_ms: u64, end_ms: u64, payload: Payload) -> Result<Self> {
        if start_ms >= end_ms {
            return Err(SubtransError::Parse(format!(
                "event {} ends ({} ms) before it starts ({} ms)",
                id, end_ms, start_ms
            )));
        }

        Ok(Self {
            id,
            start_ms,
            end_ms,
            payload,
            translated_text: OnceLock::new(),
        })
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms
    }

    pub fn end_ms(&self) -> u64 {
        self.end_ms
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn is_bitmap(&self) -> bool {
        matches!(self.payload, Payload::Bitmap(_))
    }

    /// Original text for text events; bitmap events have none until recognized.
    pub fn source_text(&self) -> Option<&str> {
        match &self.payload {
            Payload::Text(text) => Some(text),
            Payload::Bitmap(_) => None,
        }
    }

    pub fn translated_text(&self) -> Option<&str> {
        self.translated_text.get().map(String::as_str)
    }

    pub(crate) fn set_translation(&self, text: String) -> Result<()> {
        self.translated_text
            .set(text)
            .map_err(|_| SubtransError::DuplicateAssignment(self.id))
    }
}

/// Events of one input, ordered by start time with ties kept in input order.
#[derive(Debug, Clone, Default)]
pub struct SubtitleTrack {
    events: Vec<SubtitleEvent>,
}

impl SubtitleTrack {
    pub fn new(mut events: Vec<SubtitleEvent>) -> Self {
        // sort_by_key is stable, which keeps simultaneous cues in input order
        events.sort_by_key(|event| event.start_ms);
        Self { events }
    }

    pub fn events(&self) -> &[SubtitleEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<SubtitleEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_event(id: u32, start: u64, end: u64) -> SubtitleEvent {
        SubtitleEvent::new(EventId(id), start, end, Payload::Text(format!("line {}", id))).unwrap()
    }

    #[test]
    fn test_event_rejects_inverted_timing() {
        let result = SubtitleEvent::new(EventId(0), 2000, 1000, Payload::Text("x".into()));
        assert!(matches!(result, Err(SubtransError::Parse(_))));

        let zero_length = SubtitleEvent::new(EventId(0), 1000, 1000, Payload::Text("x".into()));
        assert!(zero_length.is_err());
    }

    #[test]
    fn test_translation_is_write_once() {
        let event = text_event(3, 0, 500);
        event.set_translation("uno".into()).unwrap();

        let second = event.set_translation("dos".into());
        assert!(matches!(second, Err(SubtransError::DuplicateAssignment(EventId(3)))));
        assert_eq!(event.translated_text(), Some("uno"));
    }

    #[test]
    fn test_track_orders_by_start_and_keeps_ties_stable() {
        let track = SubtitleTrack::new(vec![
            text_event(0, 3000, 4000),
            text_event(1, 1000, 2000),
            text_event(2, 1000, 2500),
            text_event(3, 500, 900),
        ]);

        let ids: Vec<u32> = track.events().iter().map(|e| e.id().0).collect();
        assert_eq!(ids, vec![3, 1, 2, 0]);
    }
}
