/// Environment-driven configuration for media-sync.
use std::path::PathBuf;

use crate::errors::{SyncError, SyncResult};

pub const DEFAULT_REPO: &str = "M3-org/ai-news";
pub const DEFAULT_BRANCH: &str = "gh-pages";
pub const DEFAULT_SOURCES: &[&str] = &["elizaos", "hyperfy"];
pub const DEFAULT_MIN_FREE_SPACE_MB: u64 = 500;
pub const DEFAULT_USER_AGENT: &str = "DiscordBot (media-sync, 1.0)";
pub const DEFAULT_DISCORD_API: &str = "https://discord.com/api/v10";

/// File name of the manifest published under each source directory.
pub const MANIFEST_FILE: &str = "media-manifest.json";

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub install_dir: PathBuf,
    pub min_free_mb: u64,
    pub repo: String,
    pub branch: String,
    pub sources: Vec<String>,
    /// Root of the static host, e.g. `https://raw.githubusercontent.com/{repo}/{branch}`.
    pub base_url: String,
    pub discord_token: Option<String>,
    pub user_agent: String,
    pub discord_api_base: String,
}

impl SyncConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> SyncResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> SyncResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let install_dir = match get("INSTALL_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ai-news-media"),
        };

        let min_free_mb = match get("MIN_FREE_SPACE_MB") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| {
                SyncError::Config(format!("MIN_FREE_SPACE_MB must be a whole number of MB: {}", e))
            })?,
            None => DEFAULT_MIN_FREE_SPACE_MB,
        };

        let repo = get("MEDIA_SYNC_REPO").unwrap_or_else(|| DEFAULT_REPO.to_string());
        let branch = get("MEDIA_SYNC_BRANCH").unwrap_or_else(|| DEFAULT_BRANCH.to_string());

        let sources: Vec<String> = match get("MEDIA_SYNC_SOURCES") {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect(),
        };
        if sources.is_empty() {
            return Err(SyncError::Config("MEDIA_SYNC_SOURCES lists no sources".into()));
        }

        let base_url = get("MEDIA_SYNC_BASE_URL")
            .unwrap_or_else(|| format!("https://raw.githubusercontent.com/{}/{}", repo, branch));

        Ok(Self {
            install_dir,
            min_free_mb,
            repo,
            branch,
            sources,
            base_url: base_url.trim_end_matches('/').to_string(),
            discord_token: get("DISCORD_TOKEN"),
            user_agent: get("DISCORD_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            discord_api_base: get("DISCORD_API_BASE")
                .map(|s| s.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_DISCORD_API.to_string()),
        })
    }

    /// URL of the manifest for one source.
    pub fn manifest_url(&self, source: &str) -> String {
        format!("{}/{}/{}", self.base_url, source, MANIFEST_FILE)
    }

    /// Flat output directory for one source.
    pub fn source_dir(&self, source: &str) -> PathBuf {
        self.install_dir.join(format!("{}-media", source))
    }
}
