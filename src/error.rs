use std::path::PathBuf;

use thiserror::Error;

/// Everything that can end a download early.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("yt-dlp not found at `{0}`; install it with `pip install yt-dlp`")]
    ExtractorNotFound(String),

    #[error("yt-dlp exited with {status}: {message}")]
    Extractor { status: String, message: String },

    #[error("could not read stream metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{path} is {actual} bytes, expected {expected}")]
    Incomplete {
        path: PathBuf,
        actual: u64,
        expected: u64,
    },

    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Builds an extractor failure from its exit status and stderr,
    /// keeping only the last non-empty line as the message.
    pub fn extractor(status: impl ToString, stderr: &str) -> Self {
        let message = stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("unknown error")
            .to_string();
        DownloadError::Extractor {
            status: status.to_string(),
            message,
        }
    }
}
