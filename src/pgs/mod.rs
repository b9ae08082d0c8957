// Presentation Graphics Stream (Blu-ray .sup) reader
//
// - segment: segment headers, display sets and composition objects
// - rle: run-length decoding of object data
//
// Captions come out as undecoded `RawBitmap` payloads; pixels are only
// produced when the deduplicator asks for them.

pub mod rle;
pub mod segment;

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::{Result, SubtransError};
use crate::subtitle::{EventId, Payload, SubtitleEvent, SubtitleTrack};
use segment::{composition_objects, display_sets, parse_segments, DisplaySet, SegmentKind};

/// Blank rows between stacked objects of one caption
const OBJECT_GAP: u32 = 8;

/// Largest object a Blu-ray presentation plane can hold
const MAX_OBJECT_WIDTH: u32 = 1920;
const MAX_OBJECT_HEIGHT: u32 = 1080;

/// Largest stacked caption, in pixels
const MAX_CANVAS_PIXELS: u64 = (MAX_OBJECT_WIDTH as u64) * (MAX_OBJECT_HEIGHT as u64) * 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaletteEntry {
    pub y: u8,
    pub cr: u8,
    pub cb: u8,
    pub alpha: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    entries: [PaletteEntry; 256],
}

impl Default for Palette {
    fn default() -> Self {
        Self { entries: [PaletteEntry::default(); 256] }
    }
}

impl Palette {
    /// Parse a PDS payload: id, version, then 5-byte (index, Y, Cr, Cb, A) entries.
    pub fn from_pds(data: &[u8]) -> Self {
        let mut palette = Self::default();
        for entry in data.get(2..).unwrap_or_default().chunks_exact(5) {
            palette.entries[usize::from(entry[0])] = PaletteEntry {
                y: entry[1],
                cr: entry[2],
                cb: entry[3],
                alpha: entry[4],
            };
        }
        palette
    }

    pub fn entry(&self, index: u8) -> PaletteEntry {
        self.entries[usize::from(index)]
    }

    /// Grey level of a palette index composited over white, so glyphs come out dark.
    pub fn grey(&self, index: u8) -> u8 {
        let entry = self.entry(index);
        let ink = u32::from(entry.y) * u32::from(entry.alpha) / 255;
        (255 - ink) as u8
    }
}

/// One run-length encoded object as stored in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectImage {
    pub width: u16,
    pub height: u16,
    pub rle: Vec<u8>,
}

/// Undecoded caption image: its objects, top to bottom, and their palette.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBitmap {
    pub objects: Vec<ObjectImage>,
    pub palette: Palette,
}

/// Decoded 8-bit greyscale caption image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Bitmap {
    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![255; width as usize * height as usize],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }

    pub fn to_image(&self) -> Option<image::GrayImage> {
        image::GrayImage::from_raw(self.width, self.height, self.pixels.clone())
    }
}

impl RawBitmap {
    /// Render every object through the palette and stack them vertically.
    pub fn decode(&self) -> Result<Bitmap> {
        if self.objects.is_empty() {
            return Err(SubtransError::Decode("caption has no objects".to_string()));
        }

        let mut layers = Vec::with_capacity(self.objects.len());
        for object in &self.objects {
            layers.push(self.decode_object(object)?);
        }

        let width = layers.iter().map(|layer| layer.width).max().unwrap_or_default();
        let stacked = layers.iter().map(|layer| u64::from(layer.height)).sum::<u64>()
            + u64::from(OBJECT_GAP) * (layers.len() as u64 - 1);
        if u64::from(width) * stacked > MAX_CANVAS_PIXELS {
            return Err(SubtransError::Decode(format!(
                "{} stacked objects of {}x{} exceed the caption size limit",
                layers.len(),
                width,
                stacked
            )));
        }
        let height = stacked as u32;

        let mut canvas = Bitmap::blank(width, height);
        let mut top = 0;
        for layer in &layers {
            for y in 0..layer.height {
                let src = (y * layer.width) as usize;
                let dst = ((top + y) * width) as usize;
                canvas.pixels[dst..dst + layer.width as usize]
                    .copy_from_slice(&layer.pixels[src..src + layer.width as usize]);
            }
            top += layer.height + OBJECT_GAP;
        }

        Ok(canvas)
    }

    fn decode_object(&self, object: &ObjectImage) -> Result<Bitmap> {
        if object.width == 0 || object.height == 0 {
            return Err(SubtransError::Decode(format!(
                "object has empty dimensions {}x{}",
                object.width, object.height
            )));
        }

        if u32::from(object.width) > MAX_OBJECT_WIDTH || u32::from(object.height) > MAX_OBJECT_HEIGHT {
            return Err(SubtransError::Decode(format!(
                "object size {}x{} exceeds {}x{}",
                object.width, object.height, MAX_OBJECT_WIDTH, MAX_OBJECT_HEIGHT
            )));
        }

        let rows = rle::decode_rle(&object.rle)?;
        if rows.is_empty() {
            return Err(SubtransError::Decode("object carries no pixel rows".to_string()));
        }

        let width = u32::from(object.width);
        let height = u32::from(object.height);
        let mut bitmap = Bitmap::blank(width, height);
        // Short rows stay background; rows or pixels past the declared size are ignored
        for (y, row) in rows.iter().take(height as usize).enumerate() {
            for (x, &index) in row.iter().take(width as usize).enumerate() {
                bitmap.pixels[y * width as usize + x] = self.palette.grey(index);
            }
        }

        Ok(bitmap)
    }
}

/// Object data being reassembled from its fragments.
struct PendingObject {
    width: u16,
    height: u16,
    rle: Vec<u8>,
}

/// Parse a whole `.sup` stream into timed bitmap events.
///
/// A display set carrying object data opens a caption at its timestamp; the
/// next display set that clears the screen or shows a new image closes it.
pub fn read_track(bytes: &[u8]) -> Result<SubtitleTrack> {
    if bytes.is_empty() {
        return Err(SubtransError::Parse("PGS stream is empty".to_string()));
    }

    let sets = display_sets(parse_segments(bytes)?);
    debug!("PGS stream holds {} display sets", sets.len());

    let mut events = Vec::new();
    let mut palette = Palette::default();
    let mut open: Option<(u64, RawBitmap)> = None;

    for set in &sets {
        if let Some(pds) = set.of_kind(SegmentKind::Palette).last() {
            palette = Palette::from_pds(pds.data);
        }

        let objects = collect_objects(set);
        let clears = set
            .of_kind(SegmentKind::Composition)
            .next()
            .and_then(|pcs| composition_objects(pcs.data))
            .is_none_or(|placed| placed.is_empty());

        if objects.is_empty() && !clears {
            // Refresh or palette update of the caption already on screen
            continue;
        }

        if let Some((start_ms, bitmap)) = open.take() {
            push_event(&mut events, start_ms, set.pts_ms(), bitmap);
        }

        if !objects.is_empty() {
            open = Some((set.pts_ms(), RawBitmap { objects, palette: palette.clone() }));
        }
    }

    if open.is_some() {
        warn!("Last caption is never cleared; dropping it");
    }

    Ok(SubtitleTrack::new(events))
}

fn push_event(events: &mut Vec<SubtitleEvent>, start_ms: u64, end_ms: u64, bitmap: RawBitmap) {
    let id = EventId(events.len() as u32);
    match SubtitleEvent::new(id, start_ms, end_ms, Payload::Bitmap(bitmap)) {
        Ok(event) => events.push(event),
        Err(_) => warn!("Skipping zero-length caption at {} ms", start_ms),
    }
}

/// Complete objects of one display set, ordered top to bottom when the
/// composition says where they go.
fn collect_objects(set: &DisplaySet<'_>) -> Vec<ObjectImage> {
    let mut pending: HashMap<u16, PendingObject> = HashMap::new();
    let mut complete: Vec<(u16, ObjectImage)> = Vec::new();

    for ods in set.of_kind(SegmentKind::Object) {
        let data = ods.data;
        if data.len() < 4 {
            warn!("Ignoring object segment of {} bytes", data.len());
            continue;
        }
        let object_id = u16::from_be_bytes([data[0], data[1]]);
        let sequence = data[3];

        if sequence & 0x80 != 0 {
            // First fragment: 3-byte length, width, height, then RLE
            if data.len() < 11 {
                warn!("Ignoring truncated object header for object {}", object_id);
                continue;
            }
            pending.insert(object_id, PendingObject {
                width: u16::from_be_bytes([data[7], data[8]]),
                height: u16::from_be_bytes([data[9], data[10]]),
                rle: data[11..].to_vec(),
            });
        } else if let Some(object) = pending.get_mut(&object_id) {
            object.rle.extend_from_slice(&data[4..]);
        } else {
            warn!("Continuation fragment for unknown object {}", object_id);
            continue;
        }

        if sequence & 0x40 != 0 {
            if let Some(object) = pending.remove(&object_id) {
                complete.push((object_id, ObjectImage {
                    width: object.width,
                    height: object.height,
                    rle: object.rle,
                }));
            }
        }
    }

    if let Some(placed) = set
        .of_kind(SegmentKind::Composition)
        .next()
        .and_then(|pcs| composition_objects(pcs.data))
    {
        let row_of = |id: u16| placed.iter().find(|p| p.object_id == id).map(|p| p.y);
        complete.sort_by_key(|(id, _)| row_of(*id).unwrap_or(u16::MAX));
    }

    complete.into_iter().map(|(_, object)| object).collect()
}
