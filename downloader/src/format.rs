//! Human-readable byte sizes for log lines and status output.

const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

/// Format `bytes` with binary steps and one decimal, e.g. `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in UNITS {
        if size.abs() < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} PB", size)
}
