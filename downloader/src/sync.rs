/// `sync` command: mirror every source manifest into its flat media folder.
///
/// Files already on disk are skipped by name. Free space is checked once up
/// front and again before every download; running low stops the whole run.
use tracing::{debug, error, info, warn};

use media_sync_shared::config::SyncConfig;
use media_sync_shared::errors::SyncResult;
use media_sync_shared::models::SyncStats;

use crate::disk::SpaceCheck;
use crate::format::format_bytes;
use crate::http::HttpFetcher;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub min_free_mb: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Not enough free space to start.
    InsufficientSpace { free_bytes: u64 },
    Completed(SyncStats),
}

impl SyncOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            SyncOutcome::InsufficientSpace { .. } => 1,
            SyncOutcome::Completed(stats) => stats.exit_code(),
        }
    }
}

pub async fn sync(
    config: &SyncConfig,
    fetcher: &HttpFetcher,
    space: &dyn SpaceCheck,
    opts: &SyncOptions,
) -> SyncResult<SyncOutcome> {
    info!("=== Media Sync Started ===");

    let (ok, free_bytes) = space.check(&config.install_dir, opts.min_free_mb)?;
    info!("Disk space: {} free (min: {} MB)", format_bytes(free_bytes), opts.min_free_mb);
    if !ok && !opts.dry_run {
        error!("Insufficient disk space! Need at least {} MB free", opts.min_free_mb);
        return Ok(SyncOutcome::InsufficientSpace { free_bytes });
    }

    let mut stats = SyncStats::default();

    'sources: for source in &config.sources {
        let manifest_url = config.manifest_url(source);
        let output_dir = config.source_dir(source);
        info!("--- Processing {} ---", source);

        let manifest = match fetcher.fetch_manifest(&manifest_url).await {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("No manifest for {}: {}", source, e);
                continue;
            }
        };
        info!("Found {} files in manifest", manifest.files.len());

        for entry in &manifest.files {
            let filename = match entry.local_name() {
                Ok(name) => name,
                Err(e) => {
                    error!("Skipping entry {}: {}", entry.url, e);
                    stats.failed += 1;
                    continue;
                }
            };
            let dest = output_dir.join(&filename);

            if dest.exists() {
                debug!("Skipped (exists): {}", filename);
                stats.skipped += 1;
                continue;
            }

            if opts.dry_run {
                info!("Would download: {} ({})", filename, format_bytes(entry.size));
                stats.pending += 1;
                stats.pending_bytes += entry.size;
                continue;
            }

            let (ok, free_bytes) = space.check(&config.install_dir, opts.min_free_mb)?;
            if !ok {
                warn!("Stopping: disk space low ({} free)", format_bytes(free_bytes));
                stats.disk_stopped = true;
                break 'sources;
            }

            std::fs::create_dir_all(&output_dir)?;
            if fetcher.download_file_with_retry(&entry.url, &dest).await.is_downloaded() {
                info!("Downloaded: {}", filename);
                stats.downloaded += 1;
            } else {
                error!("Failed: {}", filename);
                stats.failed += 1;
            }
        }
    }

    log_summary(&stats, opts.dry_run);
    Ok(SyncOutcome::Completed(stats))
}

fn log_summary(stats: &SyncStats, dry_run: bool) {
    if dry_run {
        info!(
            "=== Dry Run: {} files to download (~{}), {} already exist ===",
            stats.pending,
            format_bytes(stats.pending_bytes),
            stats.skipped
        );
        return;
    }

    let stopped = if stats.disk_stopped { " (stopped: low disk space)" } else { "" };
    info!(
        "=== Sync Complete: {} downloaded, {} skipped, {} failed{} ===",
        stats.downloaded, stats.skipped, stats.failed, stopped
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::fetcher;
    use std::cell::Cell;
    use std::path::Path;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Reports enough space for the first `ok_checks` calls, then runs dry.
    struct Budget {
        ok_checks: usize,
        calls: Cell<usize>,
    }

    impl Budget {
        fn unlimited() -> Self {
            Self { ok_checks: usize::MAX, calls: Cell::new(0) }
        }

        fn limited(ok_checks: usize) -> Self {
            Self { ok_checks, calls: Cell::new(0) }
        }
    }

    impl SpaceCheck for Budget {
        fn check(&self, _path: &Path, _min_free_mb: u64) -> std::io::Result<(bool, u64)> {
            let n = self.calls.get();
            self.calls.set(n + 1);
            if n < self.ok_checks {
                Ok((true, 10 * 1024 * 1024 * 1024))
            } else {
                Ok((false, 1024))
            }
        }
    }

    fn config(server: &MockServer, install_dir: &Path, sources: &str) -> SyncConfig {
        let base = server.uri();
        let install = install_dir.display().to_string();
        SyncConfig::from_lookup(|key| match key {
            "INSTALL_DIR" => Some(install.clone()),
            "MEDIA_SYNC_BASE_URL" => Some(base.clone()),
            "MEDIA_SYNC_SOURCES" => Some(sources.to_string()),
            _ => None,
        })
        .unwrap()
    }

    async fn serve_manifest(server: &MockServer, source: &str, names: &[&str]) {
        let files: Vec<serde_json::Value> = names
            .iter()
            .map(|n| {
                serde_json::json!({
                    "url": format!("{}/files/{}", server.uri(), n),
                    "unique_name": n,
                    "size": 5
                })
            })
            .collect();
        Mock::given(path(format!("/{}/media-manifest.json", source)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "files": files })))
            .mount(server)
            .await;
    }

    async fn serve_file(server: &MockServer, name: &str, status: u16) {
        Mock::given(path(format!("/files/{}", name)))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(b"bytes".to_vec()))
            .mount(server)
            .await;
    }

    fn opts(dry_run: bool) -> SyncOptions {
        SyncOptions { dry_run, min_free_mb: 500 }
    }

    #[tokio::test]
    async fn test_sync_downloads_and_skips_existing() {
        let server = MockServer::start().await;
        serve_manifest(&server, "elizaos", &["a_11111111.png", "b_22222222.mp4"]).await;
        serve_file(&server, "b_22222222.mp4", 200).await;
        Mock::given(path("/files/a_11111111.png"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(&server, dir.path(), "elizaos");
        std::fs::create_dir_all(config.source_dir("elizaos")).unwrap();
        std::fs::write(config.source_dir("elizaos").join("a_11111111.png"), b"old").unwrap();

        let outcome = sync(&config, &fetcher(), &Budget::unlimited(), &opts(false)).await.unwrap();
        let SyncOutcome::Completed(stats) = &outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(stats.downloaded, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(outcome.exit_code(), 0);
        assert!(config.source_dir("elizaos").join("b_22222222.mp4").exists());
    }

    #[tokio::test]
    async fn test_missing_manifest_moves_to_next_source() {
        let server = MockServer::start().await;
        Mock::given(path("/elizaos/media-manifest.json"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        serve_manifest(&server, "hyperfy", &["c_33333333.png"]).await;
        serve_file(&server, "c_33333333.png", 200).await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(&server, dir.path(), "elizaos,hyperfy");

        let outcome = sync(&config, &fetcher(), &Budget::unlimited(), &opts(false)).await.unwrap();
        assert_eq!(outcome.exit_code(), 0);
        assert!(config.source_dir("hyperfy").join("c_33333333.png").exists());
        assert!(!config.source_dir("elizaos").exists());
    }

    #[tokio::test]
    async fn test_failed_download_exits_one() {
        let server = MockServer::start().await;
        serve_manifest(&server, "elizaos", &["gone_44444444.png"]).await;
        serve_file(&server, "gone_44444444.png", 404).await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(&server, dir.path(), "elizaos");

        let outcome = sync(&config, &fetcher(), &Budget::unlimited(), &opts(false)).await.unwrap();
        match &outcome {
            SyncOutcome::Completed(stats) => assert_eq!(stats.failed, 1),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_insufficient_space_at_start() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = config(&server, dir.path(), "elizaos");

        let outcome = sync(&config, &fetcher(), &Budget::limited(0), &opts(false)).await.unwrap();
        assert_eq!(outcome, SyncOutcome::InsufficientSpace { free_bytes: 1024 });
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_low_space_mid_run_stops_all_sources() {
        let server = MockServer::start().await;
        serve_manifest(&server, "elizaos", &["a_11111111.png", "b_22222222.png"]).await;
        serve_file(&server, "a_11111111.png", 200).await;
        Mock::given(path("/files/b_22222222.png"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(path("/hyperfy/media-manifest.json"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(&server, dir.path(), "elizaos,hyperfy");

        // Startup check and first download pass; second download sees low space.
        let outcome = sync(&config, &fetcher(), &Budget::limited(2), &opts(false)).await.unwrap();
        match &outcome {
            SyncOutcome::Completed(stats) => {
                assert_eq!(stats.downloaded, 1);
                assert!(stats.disk_stopped);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(outcome.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_dry_run_ignores_low_space_and_downloads_nothing() {
        let server = MockServer::start().await;
        serve_manifest(&server, "elizaos", &["a_11111111.png", "b_22222222.png"]).await;
        Mock::given(path("/files/a_11111111.png"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(&server, dir.path(), "elizaos");

        let outcome = sync(&config, &fetcher(), &Budget::limited(0), &opts(true)).await.unwrap();
        match &outcome {
            SyncOutcome::Completed(stats) => {
                assert_eq!(stats.pending, 2);
                assert_eq!(stats.pending_bytes, 10);
                assert_eq!(stats.downloaded, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_unsafe_name_counts_as_failed_and_others_continue() {
        let server = MockServer::start().await;
        let files = serde_json::json!({ "files": [
            {"url": format!("{}/files/evil", server.uri()), "unique_name": "../evil.png"},
            {"url": format!("{}/files/ok.gif", server.uri()), "unique_name": "ok.gif",
             "media_type": "embed_gifv", "size": null}
        ]});
        Mock::given(path("/elizaos/media-manifest.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(files))
            .mount(&server)
            .await;
        Mock::given(path("/files/evil"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        serve_file(&server, "ok.gif", 200).await;

        let dir = tempfile::tempdir().unwrap();
        let config = config(&server, dir.path(), "elizaos");

        let outcome = sync(&config, &fetcher(), &Budget::unlimited(), &opts(false)).await.unwrap();
        let SyncOutcome::Completed(stats) = &outcome else {
            panic!("expected completion, got {:?}", outcome);
        };
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.downloaded, 1);
        assert_eq!(outcome.exit_code(), 1);
        assert!(config.source_dir("elizaos").join("ok.gif").exists());
        assert!(!dir.path().join("evil.png").exists());
    }
}
