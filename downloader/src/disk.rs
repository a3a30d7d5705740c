/// Disk space checks for the install directory.
use std::io;
use std::path::Path;

use walkdir::WalkDir;

const MIB: u64 = 1024 * 1024;

/// Filesystem usage in bytes. `free` is what an unprivileged user can still write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskSpace {
    pub total: u64,
    pub used: u64,
    pub free: u64,
}

impl DiskSpace {
    pub fn percent_used(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.used as f64 / self.total as f64 * 100.0
        }
    }
}

/// Usage of the filesystem holding `path`. Creates `path` if it does not exist yet.
pub fn disk_space(path: &Path) -> io::Result<DiskSpace> {
    std::fs::create_dir_all(path)?;
    stat_filesystem(path)
}

/// Whether at least `min_free_mb` MiB is free at `path`. Also returns the free byte count.
pub fn check_disk_space(path: &Path, min_free_mb: u64) -> io::Result<(bool, u64)> {
    let space = disk_space(path)?;
    Ok((space.free >= min_free_mb.saturating_mul(MIB), space.free))
}

/// Free-space probe consulted before each download.
pub trait SpaceCheck {
    fn check(&self, path: &Path, min_free_mb: u64) -> io::Result<(bool, u64)>;
}

/// Probe backed by the real filesystem.
pub struct FilesystemSpace;

impl SpaceCheck for FilesystemSpace {
    fn check(&self, path: &Path, min_free_mb: u64) -> io::Result<(bool, u64)> {
        check_disk_space(path, min_free_mb)
    }
}

/// Total size and count of regular files below `dir`.
pub fn directory_usage(dir: &Path) -> (u64, usize) {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .fold((0, 0), |(bytes, count), meta| (bytes + meta.len(), count + 1))
}

#[cfg(unix)]
fn stat_filesystem(path: &Path) -> io::Result<DiskSpace> {
    let stat = nix::sys::statvfs::statvfs(path)?;
    let fragment = stat.fragment_size() as u64;
    let total = stat.blocks() as u64 * fragment;
    let free_all = stat.blocks_free() as u64 * fragment;
    let available = stat.blocks_available() as u64 * fragment;
    Ok(DiskSpace {
        total,
        used: total.saturating_sub(free_all),
        free: available,
    })
}

#[cfg(not(unix))]
fn stat_filesystem(_path: &Path) -> io::Result<DiskSpace> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "disk space checks require a unix filesystem",
    ))
}
