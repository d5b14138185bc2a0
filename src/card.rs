//! Card model and the mapping to the service's nested document shape.
//!
//! The remote document duplicates several fields per chapter and per track;
//! everything outside this module works with the flat [`Track`]/[`Card`]
//! types and treats the nested shape as a serialization concern.

use serde::{Deserialize, Serialize};

use crate::api::TranscodeResult;
use crate::error::PublishError;

/// Hard ceiling on tracks per card, enforced by the service.
pub const MAX_CARD_TRACKS: usize = 100;

/// One playable track: a human label plus the transcoded audio reference and
/// its metadata. Position within a card defines playback order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub title: String,
    pub transcoded_sha256: String,
    pub duration: u32,
    pub file_size: u64,
    pub channels: String,
    pub format: String,
}

impl Track {
    pub fn from_transcode(title: impl Into<String>, result: TranscodeResult) -> Self {
        Self {
            title: title.into(),
            transcoded_sha256: result.transcoded_sha256,
            duration: result.duration,
            file_size: result.file_size,
            channels: result.channels,
            format: result.format,
        }
    }
}

/// A playlist card. `id` is absent until the service has created it. `icon`
/// is an opaque display reference (e.g. `yoto:#<mediaId>`) carried verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: Option<String>,
    pub title: String,
    pub tracks: Vec<Track>,
    pub icon: Option<String>,
}

/// Entry in the user's card listing.
#[derive(Debug, Clone, Deserialize)]
pub struct CardSummary {
    #[serde(rename = "cardId", alias = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
}

/// Reject additions that would push a card past [`MAX_CARD_TRACKS`].
/// Truncating silently is never acceptable.
pub fn check_capacity(existing: usize, added: usize) -> Result<(), PublishError> {
    if existing + added > MAX_CARD_TRACKS {
        return Err(PublishError::Capacity {
            existing,
            added,
            max: MAX_CARD_TRACKS,
        });
    }
    Ok(())
}

// ---- Wire document ------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardDocument {
    #[serde(rename = "cardId", skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: CardContent,
    #[serde(default)]
    pub metadata: CardMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardContent {
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default)]
    pub config: PlaybackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(rename = "resumeTimeout")]
    pub resume_timeout: u32,
    #[serde(rename = "playbackType")]
    pub playback_type: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            resume_timeout: 0,
            playback_type: "default".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "overlayLabel", default)]
    pub overlay_label: String,
    #[serde(default)]
    pub tracks: Vec<ChapterTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<ChapterDisplay>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterDisplay {
    #[serde(rename = "icon16x16")]
    pub icon_16x16: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterTrack {
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "trackUrl", default)]
    pub track_url: String,
    #[serde(default)]
    pub duration: u32,
    #[serde(rename = "fileSize", default)]
    pub file_size: u64,
    #[serde(default = "default_channels")]
    pub channels: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(rename = "type", default = "default_track_type")]
    pub kind: String,
    #[serde(rename = "overlayLabel", default)]
    pub overlay_label: String,
}

fn default_channels() -> String {
    "stereo".to_string()
}

fn default_format() -> String {
    "aac".to_string()
}

fn default_track_type() -> String {
    "audio".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CardMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub media: MediaSummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaSummary {
    #[serde(default)]
    pub duration: u32,
    #[serde(rename = "fileSize", default)]
    pub file_size: u64,
}

/// Deterministic mapping from ordered tracks to the service document. Each
/// track's 1-based position becomes its chapter key and overlay label; the
/// icon reference, if present, is attached to every chapter uniformly; total
/// duration/size are derived from the tracks, never supplied separately.
pub fn build_document(
    card_id: Option<&str>,
    title: &str,
    tracks: &[Track],
    icon: Option<&str>,
) -> CardDocument {
    let chapters = tracks
        .iter()
        .enumerate()
        .map(|(i, track)| {
            let position = i + 1;
            Chapter {
                key: format!("{position:02}"),
                title: track.title.clone(),
                overlay_label: position.to_string(),
                tracks: vec![ChapterTrack {
                    key: "01".to_string(),
                    title: track.title.clone(),
                    track_url: format!("yoto:#{}", track.transcoded_sha256),
                    duration: track.duration,
                    file_size: track.file_size,
                    channels: track.channels.clone(),
                    format: track.format.clone(),
                    kind: "audio".to_string(),
                    overlay_label: position.to_string(),
                }],
                display: icon.map(|reference| ChapterDisplay {
                    icon_16x16: reference.to_string(),
                }),
            }
        })
        .collect();

    let total_duration = tracks.iter().map(|t| t.duration).sum();
    let total_size = tracks.iter().map(|t| t.file_size).sum();

    CardDocument {
        card_id: card_id.map(str::to_string),
        title: title.to_string(),
        content: CardContent {
            chapters,
            config: PlaybackConfig::default(),
        },
        metadata: CardMetadata {
            description: format!("Created with cardsmith ({} tracks)", tracks.len()),
            media: MediaSummary {
                duration: total_duration,
                file_size: total_size,
            },
        },
    }
}

/// Flatten a fetched document back into a [`Card`], preserving each track's
/// audio reference and metadata and the card's icon reference verbatim.
pub fn card_from_document(document: CardDocument) -> Card {
    let icon = document
        .content
        .chapters
        .iter()
        .find_map(|chapter| chapter.display.as_ref())
        .map(|display| display.icon_16x16.clone());

    let tracks = document
        .content
        .chapters
        .into_iter()
        .filter_map(|chapter| {
            let inner = chapter.tracks.into_iter().next()?;
            let title = if chapter.title.is_empty() {
                inner.title
            } else {
                chapter.title
            };
            let hash = inner
                .track_url
                .strip_prefix("yoto:#")
                .unwrap_or(&inner.track_url)
                .to_string();
            Some(Track {
                title,
                transcoded_sha256: hash,
                duration: inner.duration,
                file_size: inner.file_size,
                channels: inner.channels,
                format: inner.format,
            })
        })
        .collect();

    Card {
        id: document.card_id,
        title: document.title,
        tracks,
        icon,
    }
}
