use std::collections::HashMap;
use std::fmt;

use image::DynamicImage;
use image_hasher::{HashAlg, Hasher, HasherConfig, ImageHash};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::DedupConfig;
use crate::error::SubtransError;
use crate::pgs::Bitmap;
use crate::subtitle::{EventId, Payload, SubtitleEvent};

/// SHA-256 of a decoded caption's dimensions and pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitmapFingerprint {
    digest: [u8; 32],
}

impl BitmapFingerprint {
    pub fn of(bitmap: &Bitmap) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bitmap.width.to_be_bytes());
        hasher.update(bitmap.height.to_be_bytes());
        hasher.update(&bitmap.pixels);
        Self { digest: hasher.finalize().into() }
    }
}

impl fmt::Display for BitmapFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.digest[..8] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// One recognition unit standing for every event that shows the same caption.
#[derive(Debug, Clone)]
pub struct RecognitionGroup {
    pub fingerprint: BitmapFingerprint,
    /// Bitmap of the first member, the one that gets recognized
    pub representative: Bitmap,
    /// Never empty
    pub member_event_ids: Vec<EventId>,
}

/// A bitmap event whose image could not be decoded.
#[derive(Debug)]
pub struct DecodeFailure {
    pub event_id: EventId,
    pub error: SubtransError,
}

#[derive(Debug, Default)]
pub struct Deduplication {
    pub groups: Vec<RecognitionGroup>,
    pub failures: Vec<DecodeFailure>,
}

impl Deduplication {
    /// Number of events covered by some group.
    pub fn grouped_events(&self) -> usize {
        self.groups.iter().map(|group| group.member_event_ids.len()).sum()
    }
}

/// Folds repeated caption images into recognition groups.
pub struct Deduplicator {
    similarity_threshold: f64,
    perceptual: Option<Hasher>,
}

impl Deduplicator {
    pub fn new(config: &DedupConfig) -> Self {
        // A threshold of 1.0 only ever folds identical pixels, which the digest already covers
        let perceptual = (config.similarity_threshold < 1.0).then(|| {
            HasherConfig::new()
                .hash_alg(HashAlg::DoubleGradient)
                .hash_size(config.hash_size, config.hash_size)
                .to_hasher()
        });

        Self {
            similarity_threshold: config.similarity_threshold,
            perceptual,
        }
    }

    /// Group bitmap events in encounter order. Text events are ignored.
    pub fn deduplicate<'a, I>(&self, events: I) -> Deduplication
    where
        I: IntoIterator<Item = &'a SubtitleEvent>,
    {
        let mut result = Deduplication::default();
        let mut by_digest: HashMap<BitmapFingerprint, usize> = HashMap::new();
        let mut hashes: Vec<Option<ImageHash>> = Vec::new();
        let mut bitmap_events = 0usize;

        for event in events {
            let Payload::Bitmap(raw) = event.payload() else {
                continue;
            };
            bitmap_events += 1;

            let bitmap = match raw.decode() {
                Ok(bitmap) => bitmap,
                Err(error) => {
                    warn!("Event {} has an unreadable bitmap: {}", event.id(), error);
                    result.failures.push(DecodeFailure { event_id: event.id(), error });
                    continue;
                }
            };

            let fingerprint = BitmapFingerprint::of(&bitmap);
            if let Some(&group) = by_digest.get(&fingerprint) {
                result.groups[group].member_event_ids.push(event.id());
                continue;
            }

            let hash = self.perceptual_hash(&bitmap);
            if let Some(group) = hash.as_ref().and_then(|hash| self.closest_group(hash, &hashes)) {
                debug!("Event {} folded into near-duplicate group {}", event.id(), group);
                by_digest.insert(fingerprint, group);
                result.groups[group].member_event_ids.push(event.id());
                continue;
            }

            by_digest.insert(fingerprint, result.groups.len());
            hashes.push(hash);
            result.groups.push(RecognitionGroup {
                fingerprint,
                representative: bitmap,
                member_event_ids: vec![event.id()],
            });
        }

        info!(
            "Deduplicated {} bitmap events into {} recognition groups ({} unreadable)",
            bitmap_events,
            result.groups.len(),
            result.failures.len()
        );
        result
    }

    fn perceptual_hash(&self, bitmap: &Bitmap) -> Option<ImageHash> {
        let hasher = self.perceptual.as_ref()?;
        let image = bitmap.to_image()?;
        Some(hasher.hash_image(&DynamicImage::ImageLuma8(image)))
    }

    /// Index of the most similar earlier group, if it clears the threshold.
    fn closest_group(&self, hash: &ImageHash, hashes: &[Option<ImageHash>]) -> Option<usize> {
        let bits = (hash.as_bytes().len() * 8) as f64;

        hashes
            .iter()
            .enumerate()
            .filter_map(|(idx, other)| {
                let other = other.as_ref()?;
                let similarity = 1.0 - f64::from(hash.dist(other)) / bits;
                (similarity >= self.similarity_threshold).then_some((idx, similarity))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(idx, _)| idx)
    }
}
