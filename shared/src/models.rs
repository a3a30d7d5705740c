/// Manifest and chat-API models shared across media-sync crates.
use std::borrow::Cow;

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::SyncResult;
use crate::naming;

/// Media manifest published alongside each source on the static host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub files: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn from_slice(bytes: &[u8]) -> SyncResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// One media file descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, deserialize_with = "null_as_zero")]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "known_media_type",
        skip_serializing_if = "Option::is_none"
    )]
    pub media_type: Option<MediaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

impl ManifestEntry {
    /// Name of the file inside the flat output directory.
    ///
    /// Prefers the producer's `unique_name`, then the original `filename`,
    /// then a name derived from the URL.
    pub fn local_name(&self) -> SyncResult<String> {
        let name = match (&self.unique_name, &self.filename) {
            (Some(unique), _) if !unique.is_empty() => unique.clone(),
            (_, Some(filename)) if !filename.is_empty() => filename.clone(),
            _ => naming::derive_unique_name(&self.display_name(), &self.url),
        };
        naming::ensure_flat(&name)?;
        Ok(name)
    }

    /// Human-facing name for log lines.
    pub fn display_name(&self) -> Cow<'_, str> {
        match self.filename.as_deref().or(self.unique_name.as_deref()) {
            Some(name) => Cow::Borrowed(name),
            None => Cow::Owned(naming::url_basename(&self.url)),
        }
    }

    /// Chat message this file was posted in, if known.
    pub fn message_key(&self) -> Option<(String, String)> {
        match (&self.channel_id, &self.message_id) {
            (Some(c), Some(m)) => Some((c.clone(), m.clone())),
            _ => None,
        }
    }
}

fn null_as_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or(0))
}

/// Media types this build does not know are read as `None` instead of
/// failing the whole manifest.
fn known_media_type<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<MediaType>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| <MediaType as clap::ValueEnum>::from_str(&s, false).ok()))
}

/// Kind of chat media a manifest entry was harvested from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum MediaType {
    Attachment,
    EmbedImage,
    EmbedThumbnail,
    EmbedVideo,
    Sticker,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::Attachment => write!(f, "attachment"),
            MediaType::EmbedImage => write!(f, "embed_image"),
            MediaType::EmbedThumbnail => write!(f, "embed_thumbnail"),
            MediaType::EmbedVideo => write!(f, "embed_video"),
            MediaType::Sticker => write!(f, "sticker"),
        }
    }
}

// ====== CHAT API (Discord v10) ======

/// Message object as returned by `GET /channels/{id}/messages`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub attachments: Vec<ChatAttachment>,
    #[serde(default)]
    pub embeds: Vec<ChatEmbed>,
}

impl ChatMessage {
    /// Media-bearing message whose text came back empty. When every fetched
    /// message looks like this the bot probably lacks the Message Content intent.
    pub fn has_hidden_content(&self) -> bool {
        let has_media = !self.attachments.is_empty() || !self.embeds.is_empty();
        has_media && self.content.as_deref().map_or(true, str::is_empty)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatAttachment {
    pub filename: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatEmbed {
    #[serde(default)]
    pub image: Option<EmbedMedia>,
    #[serde(default)]
    pub thumbnail: Option<EmbedMedia>,
    #[serde(default)]
    pub video: Option<EmbedMedia>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbedMedia {
    pub url: String,
}

// ====== RUN STATISTICS ======

/// Counters for a sync or refresh run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub disk_stopped: bool,
    /// Dry run: files that would be downloaded.
    pub pending: usize,
    /// Dry run: bytes that would be downloaded, per manifest sizes.
    pub pending_bytes: u64,
}

impl SyncStats {
    /// Process exit code for this run: 2 when stopped on low disk, 1 on failures.
    pub fn exit_code(&self) -> u8 {
        if self.disk_stopped {
            2
        } else if self.failed > 0 {
            1
        } else {
            0
        }
    }
}
