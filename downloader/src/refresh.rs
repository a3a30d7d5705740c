/// `refresh` command: re-resolve expired Discord URLs and download the files.
///
/// Entries are grouped by message so each message costs one API call no
/// matter how many attachments it carries.
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use media_sync_shared::config::SyncConfig;
use media_sync_shared::errors::SyncResult;
use media_sync_shared::models::{Manifest, ManifestEntry, MediaType, SyncStats};

use crate::discord::{DiscordClient, FreshUrls};
use crate::http::HttpFetcher;

/// Pause between downloads to stay polite with the CDN.
const DOWNLOAD_SPACING: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RefreshOptions {
    pub manifest: PathBuf,
    pub output: PathBuf,
    pub user: Option<String>,
    pub media_type: Option<MediaType>,
    pub dry_run: bool,
    pub force: bool,
}

/// What a refresh run did, plus what it saw of message content.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub stats: SyncStats,
    /// Fetched messages carrying attachments or embeds.
    pub media_messages: usize,
    /// Of those, messages whose text content came back empty.
    pub hidden_content: usize,
}

impl RefreshReport {
    /// Every media message lost its text: the bot most likely lacks the intent.
    pub fn missing_content_intent(&self) -> bool {
        self.media_messages > 0 && self.hidden_content == self.media_messages
    }
}

/// Entry point for the CLI. Returns the process exit code.
pub async fn run(config: &SyncConfig, fetcher: &HttpFetcher, opts: &RefreshOptions) -> anyhow::Result<u8> {
    let Some(token) = config.discord_token.as_deref() else {
        error!("DISCORD_TOKEN environment variable required");
        return Ok(1);
    };
    if !opts.manifest.exists() {
        error!("Manifest not found: {}", opts.manifest.display());
        return Ok(1);
    }

    let client = DiscordClient::new(fetcher, &config.discord_api_base, token)?;
    let report = refresh(&client, fetcher, opts).await?;
    Ok(if report.stats.failed == 0 { 0 } else { 1 })
}

pub async fn refresh(
    client: &DiscordClient<'_>,
    fetcher: &HttpFetcher,
    opts: &RefreshOptions,
) -> SyncResult<RefreshReport> {
    std::fs::create_dir_all(&opts.output)?;

    info!("=== Loading manifest: {} ===", opts.manifest.display());
    let manifest = Manifest::from_slice(&std::fs::read(&opts.manifest)?)?;
    let files = filter_entries(manifest.files, opts);

    let mut report = RefreshReport::default();
    if files.is_empty() {
        warn!("No files match filters");
        return Ok(report);
    }

    let (groups, orphans) = group_by_message(files);
    info!("Found {} files in {} messages", groups.iter().map(|g| g.entries.len()).sum::<usize>(), groups.len());
    for entry in &orphans {
        error!("No channel/message id for {}, cannot refresh", entry.display_name());
        report.stats.failed += 1;
    }

    for group in &groups {
        process_group(client, fetcher, opts, group, &mut report).await;
    }

    let stats = &report.stats;
    info!(
        "=== Complete: {} downloaded, {} skipped, {} failed ===",
        stats.downloaded, stats.skipped, stats.failed
    );
    if report.missing_content_intent() {
        warn!(
            "All fetched messages have empty content. The bot may lack the Message Content Intent privilege. \
             See: https://discord.com/developers/docs/topics/gateway#message-content-intent"
        );
    }
    Ok(report)
}

/// Entries posted in one chat message.
#[derive(Debug)]
pub struct MessageGroup {
    pub channel_id: String,
    pub message_id: String,
    pub entries: Vec<ManifestEntry>,
}

fn filter_entries(files: Vec<ManifestEntry>, opts: &RefreshOptions) -> Vec<ManifestEntry> {
    let mut files = files;
    if let Some(user) = &opts.user {
        files.retain(|f| f.user_id.as_deref() == Some(user.as_str()));
        info!("Filtered to user {}: {} files", user, files.len());
    }
    if let Some(media_type) = opts.media_type {
        files.retain(|f| f.media_type == Some(media_type));
        info!("Filtered to type {}: {} files", media_type, files.len());
    }
    files
}

/// Group by `(channel_id, message_id)` in first-seen order. Entries without
/// both ids are returned separately.
pub fn group_by_message(files: Vec<ManifestEntry>) -> (Vec<MessageGroup>, Vec<ManifestEntry>) {
    let mut groups: Vec<MessageGroup> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut orphans = Vec::new();

    for entry in files {
        let Some(key) = entry.message_key() else {
            orphans.push(entry);
            continue;
        };
        match index.get(&key) {
            Some(&i) => groups[i].entries.push(entry),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(MessageGroup {
                    channel_id: key.0,
                    message_id: key.1,
                    entries: vec![entry],
                });
            }
        }
    }
    (groups, orphans)
}

async fn process_group(
    client: &DiscordClient<'_>,
    fetcher: &HttpFetcher,
    opts: &RefreshOptions,
    group: &MessageGroup,
    report: &mut RefreshReport,
) {
    let targets: Vec<(&ManifestEntry, Option<PathBuf>)> = group
        .entries
        .iter()
        .map(|e| (e, e.local_name().ok().map(|name| opts.output.join(name))))
        .collect();

    let all_exist = targets
        .iter()
        .all(|(_, dest)| dest.as_ref().map_or(false, |d| d.exists()));
    if all_exist && !opts.force {
        report.stats.skipped += targets.len();
        debug!("Skipped (exists): message {} ({} files)", group.message_id, targets.len());
        return;
    }

    if opts.dry_run {
        for (entry, dest) in &targets {
            if dest.as_ref().map_or(false, |d| d.exists()) && !opts.force {
                report.stats.skipped += 1;
                continue;
            }
            info!("Would download: {}", entry.display_name());
            report.stats.pending += 1;
            report.stats.pending_bytes += entry.size;
        }
        return;
    }

    let message = match client.fetch_message(&group.channel_id, &group.message_id).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            error!("Message not found: {}", group.message_id);
            report.stats.failed += targets.len();
            return;
        }
        Err(e) => {
            error!("API error for message {}: {}", group.message_id, e);
            report.stats.failed += targets.len();
            return;
        }
    };

    if !message.attachments.is_empty() || !message.embeds.is_empty() {
        report.media_messages += 1;
        if message.has_hidden_content() {
            report.hidden_content += 1;
        }
    }
    let fresh = FreshUrls::from_message(&message);
    if fresh.is_empty() {
        warn!("Message {} no longer carries any media", message.id);
    }

    for (entry, dest) in &targets {
        let name = entry.display_name();
        let Some(dest) = dest else {
            error!("Unsafe file name in manifest, skipping: {}", name);
            report.stats.failed += 1;
            continue;
        };
        if dest.exists() && !opts.force {
            report.stats.skipped += 1;
            continue;
        }

        let Some(fresh_url) = fresh.resolve(&name) else {
            debug!("Available keys: {:?}", fresh.keys());
            debug!("Looking for: {}", name);
            error!("No fresh URL for: {}", name);
            report.stats.failed += 1;
            continue;
        };
        debug!("Fresh URL obtained for: {}", name);

        let mut outcome = fetcher.download_file_with_retry(fresh_url, dest).await;
        if !outcome.is_downloaded() {
            if let Some(proxy) = &entry.proxy_url {
                warn!("Trying proxy URL for: {}", name);
                outcome = fetcher.download_file_with_retry(proxy, dest).await;
            }
        }

        if outcome.is_downloaded() {
            info!("Downloaded: {}", name);
            report.stats.downloaded += 1;
        } else {
            report.stats.failed += 1;
        }

        tokio::time::sleep(DOWNLOAD_SPACING).await;
    }
}
