use std::path::PathBuf;

/// What the user asked for: one URL, one destination directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub destination: PathBuf,
}

/// Descriptor of the encoding the extractor selected for a video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    /// Canonical page URL the stream was resolved from
    pub url: String,
    /// Extractor format id, passed back verbatim when downloading
    pub format_id: String,
    /// Human-readable video title
    pub title: String,
    /// File name the extractor would use by default (no directory part)
    pub filename: String,
    /// Expected size of the finished file in bytes (0 when unknown)
    pub filesize: u64,
    /// Whether `filesize` is exact or only the extractor's estimate
    pub filesize_exact: bool,
    /// Optional preview image
    pub thumbnail: Option<String>,
}

/// How a download ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed { path: PathBuf, bytes: u64 },
    Failed { reason: String },
    Cancelled,
}

/// Messages published by a running worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Metadata resolved; the transfer is about to start
    Resolved(StreamHandle),
    /// Progress percentage in `0..=100`
    Progress(u8),
    /// Terminal event, always the last one sent
    Finished(DownloadOutcome),
}

/// Current state of the download as shown by the window
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DownloadStatus {
    /// Nothing started yet
    #[default]
    Idle,
    /// Waiting for stream metadata
    Resolving,
    /// Bytes are being written
    Downloading { title: String },
    Completed { path: PathBuf },
    Failed { reason: String },
    Cancelled,
}

impl DownloadStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, DownloadStatus::Resolving | DownloadStatus::Downloading { .. })
    }

    /// Text for the status label below the progress bar.
    pub fn label(&self) -> String {
        match self {
            DownloadStatus::Idle => String::new(),
            DownloadStatus::Resolving => "Resolving video…".to_string(),
            DownloadStatus::Downloading { title } => format!("Downloading {title}"),
            DownloadStatus::Completed { path } => format!("Saved to {}", path.display()),
            DownloadStatus::Failed { reason } => format!("Download failed: {reason}"),
            DownloadStatus::Cancelled => "Download cancelled".to_string(),
        }
    }
}

impl From<DownloadOutcome> for DownloadStatus {
    fn from(outcome: DownloadOutcome) -> Self {
        match outcome {
            DownloadOutcome::Completed { path, .. } => DownloadStatus::Completed { path },
            DownloadOutcome::Failed { reason } => DownloadStatus::Failed { reason },
            DownloadOutcome::Cancelled => DownloadStatus::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_resolving_and_downloading_are_active() {
        assert!(DownloadStatus::Resolving.is_active());
        assert!(DownloadStatus::Downloading { title: "x".into() }.is_active());
        assert!(!DownloadStatus::Idle.is_active());
        assert!(!DownloadStatus::Cancelled.is_active());
        assert!(!DownloadStatus::Failed { reason: "x".into() }.is_active());
    }

    #[test]
    fn failed_outcome_is_shown_in_label() {
        let status = DownloadStatus::from(DownloadOutcome::Failed {
            reason: "no network".into(),
        });
        assert_eq!(status.label(), "Download failed: no network");
    }
}
