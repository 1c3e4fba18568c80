//! Progress arithmetic and yt-dlp progress line parsing.

/// Prefix of the lines produced by our `--progress-template`.
pub const PROGRESS_PREFIX: &str = "vidgrab-progress:";

/// Template handed to yt-dlp so every progress tick prints
/// `vidgrab-progress:<downloaded>/<total>` on its own line.
pub const PROGRESS_TEMPLATE: &str = "download:vidgrab-progress:%(progress.downloaded_bytes)s/%(progress.total_bytes,progress.total_bytes_estimate)s";

/// Bytes reported by one progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteProgress {
    pub downloaded: u64,
    /// `None` when yt-dlp prints `NA`
    pub total: Option<u64>,
}

/// `floor(100 * done / total)`, clamped to 100. `None` for an unknown total.
pub fn percent(done: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let pct = (done as u128 * 100) / total as u128;
    Some(pct.min(100) as u8)
}

pub fn parse_progress_from_line(line: &str) -> Option<ByteProgress> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let (done, total) = rest.split_once('/')?;
    Some(ByteProgress {
        downloaded: parse_bytes(done)?,
        total: parse_bytes(total),
    })
}

// yt-dlp prints estimates as floats ("1234.0") and missing fields as "NA".
fn parse_bytes(field: &str) -> Option<u64> {
    let field = field.trim();
    if let Ok(v) = field.parse::<u64>() {
        return Some(v);
    }
    field
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v as u64)
}
