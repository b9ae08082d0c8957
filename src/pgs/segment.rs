use crate::error::{Result, SubtransError};

const HEADER_LEN: usize = 13;
const MAGIC: &[u8; 2] = b"PG";

/// PGS segment types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Palette definition (PDS, 0x14)
    Palette,
    /// Object definition: run-length encoded image data (ODS, 0x15)
    Object,
    /// Presentation composition (PCS, 0x16)
    Composition,
    /// Window definition (WDS, 0x17)
    Window,
    /// End of display set (0x80)
    End,
    Unknown(u8),
}

impl From<u8> for SegmentKind {
    fn from(value: u8) -> Self {
        match value {
            0x14 => Self::Palette,
            0x15 => Self::Object,
            0x16 => Self::Composition,
            0x17 => Self::Window,
            0x80 => Self::End,
            other => Self::Unknown(other),
        }
    }
}

/// One segment, borrowing its payload from the file buffer.
#[derive(Debug, Clone)]
pub struct Segment<'a> {
    /// Presentation timestamp on the 90 kHz clock
    pub pts: u32,
    pub kind: SegmentKind,
    pub data: &'a [u8],
}

impl Segment<'_> {
    pub fn pts_ms(&self) -> u64 {
        u64::from(self.pts) / 90
    }
}

/// Segments from one segment up to and including its END segment.
#[derive(Debug, Clone, Default)]
pub struct DisplaySet<'a> {
    pub segments: Vec<Segment<'a>>,
}

impl<'a> DisplaySet<'a> {
    pub fn pts_ms(&self) -> u64 {
        self.segments.first().map(Segment::pts_ms).unwrap_or_default()
    }

    pub fn of_kind(&self, kind: SegmentKind) -> impl Iterator<Item = &Segment<'a>> + '_ {
        self.segments.iter().filter(move |segment| segment.kind == kind)
    }

    pub fn has(&self, kind: SegmentKind) -> bool {
        self.of_kind(kind).next().is_some()
    }
}

/// Split a `.sup` buffer into segments.
pub fn parse_segments(bytes: &[u8]) -> Result<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        let header = bytes.get(offset..offset + HEADER_LEN).ok_or_else(|| {
            SubtransError::Parse(format!("truncated segment header at offset {}", offset))
        })?;
        if &header[..2] != MAGIC {
            return Err(SubtransError::Parse(format!(
                "missing PG magic at offset {}",
                offset
            )));
        }

        let pts = u32::from_be_bytes([header[2], header[3], header[4], header[5]]);
        let kind = SegmentKind::from(header[10]);
        let size = usize::from(u16::from_be_bytes([header[11], header[12]]));

        let start = offset + HEADER_LEN;
        let data = bytes.get(start..start + size).ok_or_else(|| {
            SubtransError::Parse(format!(
                "segment at offset {} declares {} bytes but the file ends first",
                offset, size
            ))
        })?;

        segments.push(Segment { pts, kind, data });
        offset = start + size;
    }

    Ok(segments)
}

/// Group segments into display sets. Trailing segments without an END are dropped.
pub fn display_sets<'a>(segments: Vec<Segment<'a>>) -> Vec<DisplaySet<'a>> {
    let mut sets = Vec::new();
    let mut current = DisplaySet::default();

    for segment in segments {
        let is_end = segment.kind == SegmentKind::End;
        current.segments.push(segment);
        if is_end {
            sets.push(std::mem::take(&mut current));
        }
    }

    sets
}

/// Placement of one object in a composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositionObject {
    pub object_id: u16,
    pub x: u16,
    pub y: u16,
}

/// Objects referenced by a PCS payload, or `None` if the payload is too short.
pub fn composition_objects(data: &[u8]) -> Option<Vec<CompositionObject>> {
    let count = usize::from(*data.get(10)?);
    let mut objects = Vec::with_capacity(count);
    let mut pos = 11;

    for _ in 0..count {
        let entry = data.get(pos..pos + 8)?;
        let cropped = entry[3] & 0x80 != 0;
        objects.push(CompositionObject {
            object_id: u16::from_be_bytes([entry[0], entry[1]]),
            x: u16::from_be_bytes([entry[4], entry[5]]),
            y: u16::from_be_bytes([entry[6], entry[7]]),
        });
        pos += if cropped { 16 } else { 8 };
    }

    Some(objects)
}
