//! Snapshot encoding and validation.
//!
//! Encoding recompresses every history image (downscale to fit, lossy JPEG)
//! and measures the serialized result. When the first pass lands above the
//! size ceiling, exactly one more pass runs at a lower quality; whatever
//! that produces is what gets persisted, oversized or not.
//!
//! Decoding is a schema check, not a cast: a candidate is accepted in either
//! the current shape (with `sessionId`/`ownerId`) or the older minimal shape,
//! every image must carry a valid data URL signature, and the snapshot must
//! be fresher than the freshness window. Failures come back as
//! [`InvalidSnapshot`] so callers can move on to their next fallback.

use chrono::Duration;
use serde::Deserialize;

use super::encoded::{EncodedImage, ImageDataError};
use super::snapshot::{EditMode, EditSnapshot, Hotspot, SnapshotDraft};
use crate::config::Config;

/// Failures while turning a draft into a snapshot
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("snapshot history is empty")]
    EmptyHistory,

    #[error("history cursor {cursor} is out of range for {len} images")]
    CursorOutOfRange { cursor: usize, len: usize },

    #[error("image recompression failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("image worker failed: {0}")]
    Worker(String),

    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Why a stored candidate cannot be restored
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidSnapshot {
    #[error("candidate matches neither the current nor the legacy snapshot shape")]
    Shape,

    #[error("{field} is not a supported encoded image: {reason}")]
    Format {
        field: &'static str,
        reason: ImageDataError,
    },

    #[error("history is empty")]
    EmptyHistory,

    #[error("history cursor {cursor} is out of range for {len} images")]
    CursorOutOfRange { cursor: usize, len: usize },

    #[error("snapshot is {age_minutes} minutes old")]
    Stale { age_minutes: i64 },

    #[error("snapshot save time {saved_at} is not in the past")]
    Timestamp { saved_at: i64 },
}

/// A freshly encoded snapshot and how it got there
#[derive(Debug, Clone)]
pub struct EncodedSnapshot {
    pub snapshot: EditSnapshot,
    /// Length of the serialized snapshot in bytes
    pub serialized_len: usize,
    /// 1 when the first pass fit, 2 when the lower-quality retry ran
    pub passes: u8,
}

impl EncodedSnapshot {
    pub fn is_oversized(&self, ceiling: usize) -> bool {
        self.serialized_len > ceiling
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotCodec {
    pub max_image_dimension: u32,
    pub primary_quality: f32,
    pub fallback_quality: f32,
    pub max_serialized_bytes: usize,
    pub freshness_window: Duration,
}

impl SnapshotCodec {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_image_dimension: config.max_image_dimension,
            primary_quality: config.primary_quality,
            fallback_quality: config.fallback_quality,
            max_serialized_bytes: config.max_serialized_bytes,
            freshness_window: config.freshness_window,
        }
    }

    /// Recompress `draft` into a snapshot stamped with `now_ms`
    pub async fn encode(
        &self,
        draft: SnapshotDraft,
        now_ms: i64,
    ) -> Result<EncodedSnapshot, CodecError> {
        if draft.history.is_empty() {
            return Err(CodecError::EmptyHistory);
        }
        if draft.cursor >= draft.history.len() {
            return Err(CodecError::CursorOutOfRange {
                cursor: draft.cursor,
                len: draft.history.len(),
            });
        }

        let history = self
            .recompress_all(draft.history.clone(), self.primary_quality)
            .await?;
        let snapshot = assemble(&draft, history, now_ms);
        let serialized_len = serde_json::to_vec(&snapshot)?.len();

        if serialized_len <= self.max_serialized_bytes {
            return Ok(EncodedSnapshot {
                snapshot,
                serialized_len,
                passes: 1,
            });
        }

        tracing::info!(
            bytes = serialized_len,
            ceiling = self.max_serialized_bytes,
            quality = self.fallback_quality,
            "snapshot over size ceiling, re-encoding at lower quality"
        );

        // Second pass starts from the draft images, not the first-pass output
        let history = self
            .recompress_all(draft.history.clone(), self.fallback_quality)
            .await?;
        let snapshot = assemble(&draft, history, now_ms);
        let serialized_len = serde_json::to_vec(&snapshot)?.len();

        if serialized_len > self.max_serialized_bytes {
            tracing::warn!(
                bytes = serialized_len,
                ceiling = self.max_serialized_bytes,
                "snapshot still oversized after retry, persisting anyway"
            );
        }

        Ok(EncodedSnapshot {
            snapshot,
            serialized_len,
            passes: 2,
        })
    }

    /// Validate a stored candidate against the accepted shapes, image
    /// signatures and the freshness window
    pub fn decode(
        &self,
        candidate: serde_json::Value,
        now_ms: i64,
    ) -> Result<EditSnapshot, InvalidSnapshot> {
        let record: SnapshotRecord =
            serde_json::from_value(candidate).map_err(|_| InvalidSnapshot::Shape)?;
        let fields = record.into_fields();

        let current_image_data = parse_image("currentImageData", &fields.current)?;
        let original_image_data = parse_image("originalImageData", &fields.original)?;
        let history_sequence = fields
            .history
            .iter()
            .map(|url| parse_image("historySequence", url))
            .collect::<Result<Vec<_>, _>>()?;

        if history_sequence.is_empty() {
            return Err(InvalidSnapshot::EmptyHistory);
        }
        if fields.cursor >= history_sequence.len() {
            return Err(InvalidSnapshot::CursorOutOfRange {
                cursor: fields.cursor,
                len: history_sequence.len(),
            });
        }

        let age_ms = match now_ms.checked_sub(fields.saved_at) {
            Some(age_ms) if age_ms >= 0 => age_ms,
            _ => {
                return Err(InvalidSnapshot::Timestamp {
                    saved_at: fields.saved_at,
                })
            }
        };
        if age_ms > self.freshness_window.num_milliseconds() {
            return Err(InvalidSnapshot::Stale {
                age_minutes: age_ms / 60_000,
            });
        }

        Ok(EditSnapshot {
            current_image_data,
            original_image_data,
            history_sequence,
            history_cursor: fields.cursor,
            pending_hotspot: fields.hotspot,
            active_mode: fields.mode,
            pending_prompt_text: fields.prompt,
            saved_at_epoch_millis: fields.saved_at,
            session_id: fields.session_id,
            owner_id: fields.owner_id,
        })
    }

    async fn recompress_all(
        &self,
        images: Vec<EncodedImage>,
        quality: f32,
    ) -> Result<Vec<EncodedImage>, CodecError> {
        let max_dimension = self.max_image_dimension;

        tokio::task::spawn_blocking(move || {
            images
                .iter()
                .map(|image| image.recompress(max_dimension, quality))
                .collect::<Result<Vec<_>, _>>()
        })
        .await
        .map_err(|e| CodecError::Worker(e.to_string()))?
        .map_err(CodecError::Image)
    }
}

/// Build a snapshot with current/original resynchronized from the history
fn assemble(draft: &SnapshotDraft, history: Vec<EncodedImage>, now_ms: i64) -> EditSnapshot {
    EditSnapshot {
        current_image_data: history[draft.cursor].clone(),
        original_image_data: history[0].clone(),
        history_sequence: history,
        history_cursor: draft.cursor,
        pending_hotspot: draft.hotspot,
        active_mode: draft.mode,
        pending_prompt_text: draft.prompt.clone(),
        saved_at_epoch_millis: now_ms,
        session_id: Some(draft.session_id.clone()),
        owner_id: Some(draft.owner_id.clone()),
    }
}

fn parse_image(field: &'static str, url: &str) -> Result<EncodedImage, InvalidSnapshot> {
    EncodedImage::from_data_url(url).map_err(|reason| InvalidSnapshot::Format { field, reason })
}

// ========== Accepted stored shapes ==========
//
// Field aliases cover records written by the older editor, which used
// `currentImage`, `history`, `historyIndex`, `activeTab`, `timestamp`, ...

#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotRecord {
    Current(CurrentRecord),
    Legacy(LegacyRecord),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentRecord {
    #[serde(alias = "currentImage")]
    current_image_data: String,
    #[serde(alias = "originalImage")]
    original_image_data: String,
    #[serde(alias = "history")]
    history_sequence: Vec<String>,
    #[serde(alias = "historyIndex")]
    history_cursor: usize,
    #[serde(default, alias = "editHotspot")]
    pending_hotspot: Option<Hotspot>,
    #[serde(default, alias = "activeTab")]
    active_mode: EditMode,
    #[serde(default, alias = "prompt")]
    pending_prompt_text: String,
    #[serde(alias = "timestamp")]
    saved_at_epoch_millis: i64,
    session_id: String,
    #[serde(alias = "userId")]
    owner_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyRecord {
    #[serde(alias = "currentImage")]
    current_image_data: String,
    #[serde(alias = "originalImage")]
    original_image_data: String,
    #[serde(alias = "history")]
    history_sequence: Vec<String>,
    #[serde(alias = "historyIndex")]
    history_cursor: usize,
    #[serde(default, alias = "editHotspot")]
    pending_hotspot: Option<Hotspot>,
    #[serde(default, alias = "activeTab")]
    active_mode: EditMode,
    #[serde(default, alias = "prompt")]
    pending_prompt_text: String,
    #[serde(alias = "timestamp")]
    saved_at_epoch_millis: i64,
}

struct RecordFields {
    current: String,
    original: String,
    history: Vec<String>,
    cursor: usize,
    hotspot: Option<Hotspot>,
    mode: EditMode,
    prompt: String,
    saved_at: i64,
    session_id: Option<String>,
    owner_id: Option<String>,
}

impl SnapshotRecord {
    fn into_fields(self) -> RecordFields {
        match self {
            SnapshotRecord::Current(r) => RecordFields {
                current: r.current_image_data,
                original: r.original_image_data,
                history: r.history_sequence,
                cursor: r.history_cursor,
                hotspot: r.pending_hotspot,
                mode: r.active_mode,
                prompt: r.pending_prompt_text,
                saved_at: r.saved_at_epoch_millis,
                session_id: Some(r.session_id),
                owner_id: Some(r.owner_id),
            },
            SnapshotRecord::Legacy(r) => RecordFields {
                current: r.current_image_data,
                original: r.original_image_data,
                history: r.history_sequence,
                cursor: r.history_cursor,
                hotspot: r.pending_hotspot,
                mode: r.active_mode,
                prompt: r.pending_prompt_text,
                saved_at: r.saved_at_epoch_millis,
                session_id: None,
                owner_id: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::encoded::ImageKind;
    use image::{DynamicImage, Rgb, RgbImage};
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn png(seed: u8) -> EncodedImage {
        let img = RgbImage::from_fn(64, 48, |x, y| {
            Rgb([seed, (x * 3) as u8, (y * 5) as u8])
        });
        EncodedImage::from_image(&DynamicImage::ImageRgb8(img), ImageKind::Png).unwrap()
    }

    fn draft(len: usize, cursor: usize) -> SnapshotDraft {
        SnapshotDraft {
            history: (0..len).map(|i| png(i as u8 * 40)).collect(),
            cursor,
            hotspot: Some(Hotspot { x: 12, y: 7 }),
            mode: EditMode::Adjust,
            prompt: "warmer light".to_string(),
            session_id: "s1".to_string(),
            owner_id: "u1".to_string(),
        }
    }

    fn codec() -> SnapshotCodec {
        SnapshotCodec::from_config(&Config::default())
    }

    #[tokio::test]
    async fn test_round_trip_keeps_cursor_mode_prompt_and_ids() {
        let codec = codec();
        let encoded = codec.encode(draft(3, 1), NOW).await.unwrap();
        assert_eq!(encoded.passes, 1);

        let value = serde_json::to_value(&encoded.snapshot).unwrap();
        let decoded = codec.decode(value, NOW + 1_000).unwrap();

        assert_eq!(decoded.history_cursor, 1);
        assert_eq!(decoded.history_sequence.len(), 3);
        assert_eq!(decoded.active_mode, EditMode::Adjust);
        assert_eq!(decoded.pending_prompt_text, "warmer light");
        assert_eq!(decoded.pending_hotspot, Some(Hotspot { x: 12, y: 7 }));
        assert_eq!(decoded.session_id.as_deref(), Some("s1"));
        assert_eq!(decoded.owner_id.as_deref(), Some("u1"));
        assert_eq!(decoded.saved_at_epoch_millis, NOW);
        for image in &decoded.history_sequence {
            assert_eq!(image.kind(), ImageKind::Jpeg);
            assert!(image.decode().is_ok());
        }
    }

    #[tokio::test]
    async fn test_encode_resynchronizes_current_and_original() {
        let encoded = codec().encode(draft(3, 2), NOW).await.unwrap();
        let snapshot = encoded.snapshot;

        assert_eq!(snapshot.current_image_data, snapshot.history_sequence[2]);
        assert_eq!(snapshot.original_image_data, snapshot.history_sequence[0]);
    }

    #[tokio::test]
    async fn test_encode_rejects_bad_drafts() {
        let codec = codec();
        let mut empty = draft(1, 0);
        empty.history.clear();
        assert!(matches!(
            codec.encode(empty, NOW).await,
            Err(CodecError::EmptyHistory)
        ));
        assert!(matches!(
            codec.encode(draft(2, 2), NOW).await,
            Err(CodecError::CursorOutOfRange { cursor: 2, len: 2 })
        ));
    }

    #[tokio::test]
    async fn test_oversized_snapshot_retries_exactly_once() {
        let mut codec = codec();
        codec.max_serialized_bytes = 64;

        let encoded = codec.encode(draft(2, 1), NOW).await.unwrap();
        assert_eq!(encoded.passes, 2);
        assert!(encoded.is_oversized(64));
        assert_eq!(encoded.snapshot.history_sequence.len(), 2);
    }

    #[tokio::test]
    async fn test_retry_output_is_not_larger_than_first_pass() {
        let roomy = codec().encode(draft(2, 1), NOW).await.unwrap();

        let mut tight = codec();
        tight.max_serialized_bytes = roomy.serialized_len - 1;
        let retried = tight.encode(draft(2, 1), NOW).await.unwrap();

        assert_eq!(retried.passes, 2);
        assert!(retried.serialized_len <= roomy.serialized_len);
    }

    #[tokio::test]
    async fn test_freshness_gate() {
        let codec = codec();
        let encoded = codec.encode(draft(1, 0), NOW).await.unwrap();
        let value = serde_json::to_value(&encoded.snapshot).unwrap();

        let two_hours = Duration::hours(2).num_milliseconds();
        assert!(codec.decode(value.clone(), NOW + two_hours).is_ok());
        assert_eq!(
            codec.decode(value, NOW + two_hours + 60_000),
            Err(InvalidSnapshot::Stale { age_minutes: 121 })
        );
    }

    #[test]
    fn test_unusable_save_times_are_rejected() {
        let codec = codec();
        let image = png(1).to_data_url();
        let saved_at = |at: i64| {
            json!({
                "currentImageData": image,
                "originalImageData": image,
                "historySequence": [image],
                "historyCursor": 0,
                "savedAtEpochMillis": at,
            })
        };

        assert_eq!(
            codec.decode(saved_at(i64::MIN), NOW),
            Err(InvalidSnapshot::Timestamp { saved_at: i64::MIN })
        );
        assert_eq!(
            codec.decode(saved_at(NOW + 60_000), NOW),
            Err(InvalidSnapshot::Timestamp { saved_at: NOW + 60_000 })
        );
        assert!(matches!(
            codec.decode(saved_at(i64::MAX), -1),
            Err(InvalidSnapshot::Timestamp { .. })
        ));
        assert!(codec.decode(saved_at(NOW), NOW).is_ok());
    }

    #[test]
    fn test_legacy_shape_is_accepted() {
        let image = png(1).to_data_url();
        let legacy = json!({
            "currentImage": image,
            "originalImage": image,
            "history": [image],
            "historyIndex": 0,
            "editHotspot": null,
            "prompt": "",
            "timestamp": NOW,
        });

        let snapshot = codec().decode(legacy, NOW).unwrap();
        assert!(snapshot.is_legacy());
        assert_eq!(snapshot.active_mode, EditMode::Retouch);
        assert_eq!(snapshot.history_sequence.len(), 1);
    }

    #[test]
    fn test_invalid_candidates() {
        let codec = codec();
        let image = png(1).to_data_url();

        assert_eq!(
            codec.decode(json!({"hello": "world"}), NOW),
            Err(InvalidSnapshot::Shape)
        );
        assert_eq!(codec.decode(json!("just a string"), NOW), Err(InvalidSnapshot::Shape));

        let bad_format = json!({
            "currentImageData": "data:text/html;base64,PGI+",
            "originalImageData": image,
            "historySequence": [image],
            "historyCursor": 0,
            "savedAtEpochMillis": NOW,
        });
        assert!(matches!(
            codec.decode(bad_format, NOW),
            Err(InvalidSnapshot::Format { field: "currentImageData", .. })
        ));

        let bad_cursor = json!({
            "currentImageData": image,
            "originalImageData": image,
            "historySequence": [image],
            "historyCursor": 3,
            "savedAtEpochMillis": NOW,
        });
        assert_eq!(
            codec.decode(bad_cursor, NOW),
            Err(InvalidSnapshot::CursorOutOfRange { cursor: 3, len: 1 })
        );

        let empty = json!({
            "currentImageData": image,
            "originalImageData": image,
            "historySequence": [],
            "historyCursor": 0,
            "savedAtEpochMillis": NOW,
        });
        assert_eq!(codec.decode(empty, NOW), Err(InvalidSnapshot::EmptyHistory));
    }
}
