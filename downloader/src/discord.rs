/// Discord REST client for re-resolving expired CDN links.
///
/// Signed attachment URLs expire after about a day. Fetching the message
/// again returns freshly signed URLs for the same files.
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tracing::debug;

use media_sync_shared::errors::{SyncError, SyncResult};
use media_sync_shared::models::ChatMessage;

use crate::http::HttpFetcher;

pub struct DiscordClient<'a> {
    fetcher: &'a HttpFetcher,
    api_base: String,
    auth: HeaderMap,
}

impl<'a> DiscordClient<'a> {
    pub fn new(fetcher: &'a HttpFetcher, api_base: &str, token: &str) -> SyncResult<Self> {
        let value = HeaderValue::from_str(&format!("Bot {}", token))
            .map_err(|_| SyncError::Config("DISCORD_TOKEN contains invalid characters".into()))?;
        let mut auth = HeaderMap::new();
        auth.insert(AUTHORIZATION, value);
        Ok(Self {
            fetcher,
            api_base: api_base.trim_end_matches('/').to_string(),
            auth,
        })
    }

    /// Listing endpoint centred on the message. Bots without Read Message
    /// History on a single message still get it through `around=`.
    pub fn message_url(&self, channel_id: &str, message_id: &str) -> String {
        format!(
            "{}/channels/{}/messages?around={}&limit=1",
            self.api_base, channel_id, message_id
        )
    }

    /// Fetch one message. `Ok(None)` if the channel no longer has it.
    pub async fn fetch_message(
        &self,
        channel_id: &str,
        message_id: &str,
    ) -> SyncResult<Option<ChatMessage>> {
        let url = self.message_url(channel_id, message_id);
        let body = self.fetcher.request_with_retry(&url, &self.auth).await?;
        if let Some(remaining) = body.headers.get("x-ratelimit-remaining") {
            debug!("Rate limit remaining: {:?}", remaining);
        }
        let messages: Vec<ChatMessage> = serde_json::from_slice(&body.bytes)?;
        debug!("Fetched {} message(s) around {}", messages.len(), message_id);
        Ok(messages.into_iter().find(|m| m.id == message_id))
    }
}

/// Freshly signed URLs from one message, keyed by attachment filename or
/// `embed-{kind}-{message_id}`. Keeps first-insertion order for partial matching.
#[derive(Debug, Default)]
pub struct FreshUrls {
    entries: Vec<(String, String)>,
}

impl FreshUrls {
    pub fn from_message(message: &ChatMessage) -> Self {
        let mut urls = Self::default();
        for att in &message.attachments {
            urls.insert(att.filename.clone(), att.url.clone());
        }
        for embed in &message.embeds {
            let kinds = [
                ("image", &embed.image),
                ("thumbnail", &embed.thumbnail),
                ("video", &embed.video),
            ];
            for (kind, media) in kinds {
                if let Some(media) = media {
                    urls.insert(format!("embed-{}-{}", kind, message.id), media.url.clone());
                }
            }
        }
        urls
    }

    /// Insert or replace, keeping the key's original position.
    pub fn insert(&mut self, key: String, url: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = url,
            None => self.entries.push((key, url)),
        }
    }

    /// Exact filename match first, then the first key contained in the filename.
    pub fn resolve(&self, filename: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == filename)
            .or_else(|| self.entries.iter().find(|(k, _)| filename.contains(k.as_str())))
            .map(|(_, url)| url.as_str())
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
