/// systemd service and timer management (`setup`, `uninstall`, `status`).
///
/// Unit files are written with `sudo tee` so the tool itself can run unprivileged.
use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info, warn};

use media_sync_shared::config::SyncConfig;

use crate::disk::{directory_usage, disk_space};
use crate::format::format_bytes;

pub const SERVICE_NAME: &str = "ai-news-media-sync";
const UNIT_DIR: &str = "/etc/systemd/system";

fn service_path() -> String {
    format!("{}/{}.service", UNIT_DIR, SERVICE_NAME)
}

fn timer_path() -> String {
    format!("{}/{}.timer", UNIT_DIR, SERVICE_NAME)
}

/// Oneshot service running `sync` under flock and a 30 minute timeout.
pub fn render_service_unit(exe: &Path, user: &str, install_dir: &Path) -> String {
    let install = install_dir.display();
    format!(
        r#"[Unit]
Description=AI News Media Sync
After=network-online.target
Wants=network-online.target

[Service]
Type=oneshot
ExecStart=/usr/bin/flock -n /tmp/{name}.lock /usr/bin/timeout 30m {exe} sync
User={user}
WorkingDirectory={install}
Environment=INSTALL_DIR={install}

# Security hardening
NoNewPrivileges=true
ProtectSystem=strict
ProtectHome=read-only
ReadWritePaths={install}
PrivateTmp=true
"#,
        name = SERVICE_NAME,
        exe = exe.display(),
        user = user,
        install = install,
    )
}

/// Daily timer at 01:30 UTC, after the manifest publishing job has finished.
pub fn render_timer_unit(repo: &str) -> String {
    format!(
        r#"[Unit]
Description=AI News Media Sync Timer
Documentation=https://github.com/{repo}

[Timer]
OnCalendar=*-*-* 01:30:00
Persistent=true
RandomizedDelaySec=300

[Install]
WantedBy=timers.target
"#,
        repo = repo,
    )
}

/// Install and enable the unit files, then print status.
pub async fn setup(config: &SyncConfig) -> anyhow::Result<u8> {
    info!("Installing systemd service and timer...");
    match install_units(config).await {
        Ok(()) => {
            info!("Installed and enabled!");
            status(config).await
        }
        Err(e) => {
            error!("Setup failed: {:#}", e);
            Ok(1)
        }
    }
}

async fn install_units(config: &SyncConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.install_dir)
        .with_context(|| format!("creating {}", config.install_dir.display()))?;

    let exe = std::env::current_exe().context("locating the media-sync executable")?;
    let user = std::env::var("USER").unwrap_or_else(|_| "root".to_string());

    let service = render_service_unit(&exe, &user, &config.install_dir);
    sudo_write(&service_path(), &service).await?;
    info!("Created {}", service_path());

    let timer = render_timer_unit(&config.repo);
    sudo_write(&timer_path(), &timer).await?;
    info!("Created {}", timer_path());

    run_checked("sudo", &["systemctl", "daemon-reload"]).await?;
    let timer_unit = format!("{}.timer", SERVICE_NAME);
    run_checked("sudo", &["systemctl", "enable", "--now", &timer_unit]).await?;
    Ok(())
}

/// Disable the timer and remove both unit files.
pub async fn uninstall() -> anyhow::Result<u8> {
    info!("Removing systemd service and timer...");

    let timer_unit = format!("{}.timer", SERVICE_NAME);
    if let Err(e) = run_checked("sudo", &["systemctl", "disable", "--now", &timer_unit]).await {
        warn!("Could not disable timer (continuing): {:#}", e);
    }

    let result = async {
        run_checked("sudo", &["rm", "-f", &service_path()]).await?;
        run_checked("sudo", &["rm", "-f", &timer_path()]).await?;
        run_checked("sudo", &["systemctl", "daemon-reload"]).await
    }
    .await;

    match result {
        Ok(()) => {
            info!("Uninstalled successfully");
            Ok(0)
        }
        Err(e) => {
            error!("Uninstall failed: {:#}", e);
            Ok(1)
        }
    }
}

/// Print disk usage, per-source media sizes, timer state and recent logs.
pub async fn status(config: &SyncConfig) -> anyhow::Result<u8> {
    println!("=== Disk Space ===");
    let space = disk_space(&config.install_dir)
        .with_context(|| format!("reading disk space for {}", config.install_dir.display()))?;
    println!("Install dir: {}", config.install_dir.display());
    println!("Total: {}", format_bytes(space.total));
    println!("Used:  {} ({:.1}%)", format_bytes(space.used), space.percent_used());
    println!("Free:  {}", format_bytes(space.free));
    println!("Min:   {} MB", config.min_free_mb);

    println!("\n=== Media Sizes ===");
    for source in &config.sources {
        let dir = config.source_dir(source);
        if dir.exists() {
            let (bytes, count) = directory_usage(&dir);
            println!("{}: {} ({} files)", source, format_bytes(bytes), count);
        } else {
            println!("{}: (no files yet)", source);
        }
    }

    println!("\n=== Timer Status ===");
    let timer_unit = format!("{}.timer", SERVICE_NAME);
    run_passthrough("systemctl", &["list-timers", &timer_unit, "--no-pager"]).await;

    println!("\n=== Recent Logs ===");
    let service_unit = format!("{}.service", SERVICE_NAME);
    run_passthrough("journalctl", &["-u", &service_unit, "--no-pager", "-n", "20"]).await;

    Ok(0)
}

/// Write `contents` to a root-owned path through `sudo tee`.
async fn sudo_write(path: &str, contents: &str) -> anyhow::Result<()> {
    let mut child = Command::new("sudo")
        .arg("tee")
        .arg(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .spawn()
        .with_context(|| format!("spawning sudo tee {}", path))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(contents.as_bytes())
            .await
            .with_context(|| format!("writing {}", path))?;
        // Dropping stdin sends EOF to tee.
    }

    let status = child.wait().await?;
    if !status.success() {
        bail!("sudo tee {} exited with {}", path, status);
    }
    Ok(())
}

async fn run_checked(program: &str, args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new(program)
        .args(args)
        .status()
        .await
        .with_context(|| format!("running {} {}", program, args.join(" ")))?;
    if !status.success() {
        bail!("{} {} exited with {}", program, args.join(" "), status);
    }
    Ok(())
}

/// Run a reporting command with inherited stdio. Failures are only logged.
async fn run_passthrough(program: &str, args: &[&str]) {
    match Command::new(program).args(args).status().await {
        Ok(status) if !status.success() => warn!("{} exited with {}", program, status),
        Ok(_) => {}
        Err(e) => warn!("Could not run {}: {}", program, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_unit_contents() {
        let unit = render_service_unit(
            Path::new("/usr/local/bin/media-sync"),
            "media",
            Path::new("/srv/ai-news-media"),
        );
        assert!(unit.contains("Type=oneshot"));
        assert!(unit.contains(
            "ExecStart=/usr/bin/flock -n /tmp/ai-news-media-sync.lock /usr/bin/timeout 30m /usr/local/bin/media-sync sync"
        ));
        assert!(unit.contains("User=media"));
        assert!(unit.contains("Environment=INSTALL_DIR=/srv/ai-news-media"));
        assert!(unit.contains("ReadWritePaths=/srv/ai-news-media"));
        assert!(unit.contains("ProtectSystem=strict"));
    }

    #[test]
    fn test_timer_unit_contents() {
        let unit = render_timer_unit("M3-org/ai-news");
        assert!(unit.contains("Documentation=https://github.com/M3-org/ai-news"));
        assert!(unit.contains("OnCalendar=*-*-* 01:30:00"));
        assert!(unit.contains("Persistent=true"));
        assert!(unit.contains("RandomizedDelaySec=300"));
        assert!(unit.contains("WantedBy=timers.target"));
    }

    #[test]
    fn test_unit_paths() {
        assert_eq!(service_path(), "/etc/systemd/system/ai-news-media-sync.service");
        assert_eq!(timer_path(), "/etc/systemd/system/ai-news-media-sync.timer");
    }
}
