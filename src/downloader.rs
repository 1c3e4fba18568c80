//! The extractor boundary: resolving a URL to a stream and downloading it.
//!
//! Production downloads go through yt-dlp as a child process. The worker only
//! sees the [`StreamSource`] trait so it can be driven by a fake in tests.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, BufReader},
    process::Command,
    sync::mpsc::UnboundedSender,
};
use tracing::{debug, info};

use crate::error::DownloadError;
use crate::model::StreamHandle;
use crate::progress::{ByteProgress, PROGRESS_TEMPLATE, parse_progress_from_line};

/// Highest-resolution single file carrying both audio and video.
const FORMAT: &str = "best";

pub type ProgressSink = UnboundedSender<ByteProgress>;

pub trait StreamSource: Send + Sync + 'static {
    /// Looks up the stream that would be downloaded for `url`.
    fn resolve(&self, url: &str) -> impl Future<Output = Result<StreamHandle, DownloadError>> + Send;

    /// Downloads `stream` to `output`, retrying transient errors up to
    /// `max_retries` times and reporting byte counts on `progress`.
    fn download(
        &self,
        stream: &StreamHandle,
        output: &Path,
        max_retries: u32,
        progress: ProgressSink,
    ) -> impl Future<Output = Result<(), DownloadError>> + Send;
}

/// yt-dlp driven as a child process.
#[derive(Debug, Clone)]
pub struct YtDlp {
    bin: PathBuf,
}

impl YtDlp {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, err: std::io::Error) -> DownloadError {
        if err.kind() == std::io::ErrorKind::NotFound {
            DownloadError::ExtractorNotFound(self.bin.display().to_string())
        } else {
            DownloadError::Io(err)
        }
    }
}

impl StreamSource for YtDlp {
    async fn resolve(&self, url: &str) -> Result<StreamHandle, DownloadError> {
        let output = self
            .command()
            .args(["--dump-json", "--no-playlist", "-f", FORMAT, url])
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(DownloadError::extractor(
                output.status,
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        let info: VideoInfo = serde_json::from_slice(&output.stdout)?;
        Ok(info.into_stream(url))
    }

    async fn download(
        &self,
        stream: &StreamHandle,
        output: &Path,
        max_retries: u32,
        progress: ProgressSink,
    ) -> Result<(), DownloadError> {
        let retries = max_retries.to_string();
        let template = escape_template(&output.to_string_lossy());
        info!(format = %stream.format_id, output = %output.display(), "starting yt-dlp");

        let mut child = self
            .command()
            .args(["--no-playlist", "--newline", "-f", &stream.format_id])
            .args(["--retries", &retries, "--fragment-retries", &retries])
            .args(["--progress-template", PROGRESS_TEMPLATE])
            .args(["-o", &template, &stream.url])
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("yt-dlp stdout not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("yt-dlp stderr not captured"))?;

        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf).await;
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            match parse_progress_from_line(&line) {
                // receiver gone means nobody is watching any more
                Some(p) => {
                    let _ = progress.send(p);
                }
                None => debug!(target: "yt-dlp", "{line}"),
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();
        if !status.success() {
            return Err(DownloadError::extractor(status, &stderr));
        }
        Ok(())
    }
}

/// The subset of `--dump-json` output we use.
#[derive(Debug, Deserialize)]
struct VideoInfo {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    ext: String,
    #[serde(default)]
    format_id: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default, rename = "_filename")]
    legacy_filename: Option<String>,
    #[serde(default)]
    filesize: Option<f64>,
    #[serde(default)]
    filesize_approx: Option<f64>,
    #[serde(default)]
    thumbnail: Option<String>,
}

impl VideoInfo {
    fn into_stream(self, requested_url: &str) -> StreamHandle {
        let filename = self
            .filename
            .as_deref()
            .or(self.legacy_filename.as_deref())
            .and_then(|f| Path::new(f).file_name())
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| sanitize_filename(&format!("{} [{}].{}", self.title, self.id, self.ext)));

        let (filesize, filesize_exact) = match (self.filesize, self.filesize_approx) {
            (Some(exact), _) if exact > 0.0 => (exact as u64, true),
            (_, Some(approx)) if approx > 0.0 => (approx as u64, false),
            _ => (0, false),
        };

        StreamHandle {
            url: self.webpage_url.unwrap_or_else(|| requested_url.to_string()),
            format_id: self.format_id.unwrap_or_else(|| FORMAT.to_string()),
            title: self.title,
            filename,
            filesize,
            filesize_exact,
            thumbnail: self.thumbnail,
        }
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

// `-o` is an output template; a literal '%' in the path must be doubled.
fn escape_template(path: &str) -> String {
    path.replace('%', "%%")
}
