//! Background download worker.
//!
//! A worker owns one download from URL validation to the final size check.
//! It runs as a task on the shared tokio runtime and talks to the window
//! through an unbounded channel of [`WorkerEvent`]s. The resolved stream is
//! published once through a `OnceCell` so the window can poll the partially
//! written file without taking a lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio::{
    runtime::Handle,
    sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError, unbounded_channel},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::downloader::StreamSource;
use crate::error::DownloadError;
use crate::model::{DownloadOutcome, DownloadRequest, StreamHandle, WorkerEvent};
use crate::progress::{ByteProgress, percent};

const WORKER_LOST: &str = "download worker stopped unexpectedly";

/// Set once the stream metadata has been resolved, read-only afterwards.
#[derive(Debug, Clone)]
pub struct WorkerState {
    pub request: DownloadRequest,
    pub stream: StreamHandle,
    /// Final location of the downloaded file
    pub output: PathBuf,
}

impl WorkerState {
    /// Percentage derived from whatever is on disk right now.
    ///
    /// yt-dlp writes into `<output>.part` and renames when done, so both
    /// names are checked. Capped at 99: only the worker's size check may
    /// report 100. Returns `None` when the expected size is unknown or
    /// nothing has been written yet.
    pub fn estimate_progress(&self) -> Option<u8> {
        if self.stream.filesize == 0 {
            return None;
        }
        let current = [part_path(&self.output), self.output.clone()]
            .iter()
            .find_map(|p| match std::fs::metadata(p) {
                Ok(meta) => Some(meta.len()),
                Err(err) => {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        debug!(path = %p.display(), %err, "progress poll failed");
                    }
                    None
                }
            })?;
        percent(current, self.stream.filesize).map(|v| v.min(99))
    }
}

pub fn part_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Handle to a running (or finished) download.
///
/// Dropping the handle cancels the download if it is still running.
pub struct DownloadWorker {
    state: Arc<OnceCell<WorkerState>>,
    events: UnboundedReceiver<WorkerEvent>,
    cancel: CancellationToken,
    /// Set once a terminal event has been handed out
    finished: bool,
}

impl DownloadWorker {
    pub fn start<S: StreamSource>(
        runtime: &Handle,
        request: DownloadRequest,
        source: Arc<S>,
        max_retries: u32,
    ) -> Self {
        let (tx, rx) = unbounded_channel();
        let state = Arc::new(OnceCell::new());
        let cancel = CancellationToken::new();

        info!(url = %request.url, destination = %request.destination.display(), "starting download");
        runtime.spawn(run(
            request,
            source,
            max_retries,
            Arc::clone(&state),
            tx,
            cancel.clone(),
        ));

        Self {
            state,
            events: rx,
            cancel,
            finished: false,
        }
    }

    /// One poll: estimate progress from the partially written file.
    pub fn estimate_progress(&self) -> Option<u8> {
        self.state.get()?.estimate_progress()
    }

    pub fn state(&self) -> Option<&WorkerState> {
        self.state.get()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Next pending event without blocking.
    ///
    /// A task that dies without sending `Finished` (a panic in the source)
    /// is reported as a failure, so every worker ends with exactly one
    /// terminal event.
    pub fn try_next_event(&mut self) -> Option<WorkerEvent> {
        match self.events.try_recv() {
            Ok(event) => {
                if matches!(event, WorkerEvent::Finished(_)) {
                    self.finished = true;
                }
                Some(event)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) if self.finished => None,
            Err(TryRecvError::Disconnected) => {
                warn!("download task stopped without reporting an outcome");
                self.finished = true;
                Some(WorkerEvent::Finished(DownloadOutcome::Failed {
                    reason: WORKER_LOST.to_string(),
                }))
            }
        }
    }
}

impl Drop for DownloadWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<S: StreamSource>(
    request: DownloadRequest,
    source: Arc<S>,
    max_retries: u32,
    state: Arc<OnceCell<WorkerState>>,
    events: UnboundedSender<WorkerEvent>,
    cancel: CancellationToken,
) {
    let url = request.url.clone();
    let outcome = match fetch(request, source.as_ref(), max_retries, &state, &events, &cancel).await {
        Ok((path, bytes)) => {
            info!(path = %path.display(), bytes, "download complete");
            DownloadOutcome::Completed { path, bytes }
        }
        Err(DownloadError::Cancelled) => {
            info!(%url, "download cancelled");
            DownloadOutcome::Cancelled
        }
        Err(err) => {
            error!(%url, %err, "download failed");
            DownloadOutcome::Failed {
                reason: err.to_string(),
            }
        }
    };
    let _ = events.send(WorkerEvent::Finished(outcome));
}

async fn fetch<S: StreamSource>(
    request: DownloadRequest,
    source: &S,
    max_retries: u32,
    state: &OnceCell<WorkerState>,
    events: &UnboundedSender<WorkerEvent>,
    cancel: &CancellationToken,
) -> Result<(PathBuf, u64), DownloadError> {
    validate_url(&request.url)?;

    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        res = source.resolve(&request.url) => res?,
    };
    let output = request.destination.join(&stream.filename);
    info!(title = %stream.title, filesize = stream.filesize, exact = stream.filesize_exact, "stream resolved");

    let _ = state.set(WorkerState {
        request,
        stream: stream.clone(),
        output: output.clone(),
    });
    let _ = events.send(WorkerEvent::Resolved(stream.clone()));
    let _ = events.send(WorkerEvent::Progress(0));

    let (progress_tx, mut progress_rx) = unbounded_channel::<ByteProgress>();
    {
        let transfer = source.download(&stream, &output, max_retries, progress_tx);
        tokio::pin!(transfer);

        let mut last = 0u8;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                res = &mut transfer => {
                    res?;
                    break;
                }
                Some(p) = progress_rx.recv() => {
                    let total = p.total.unwrap_or(stream.filesize);
                    // 100 is only sent after the file has been checked
                    if let Some(pct) = percent(p.downloaded, total).map(|v| v.min(99)) {
                        if pct != last {
                            last = pct;
                            let _ = events.send(WorkerEvent::Progress(pct));
                        }
                    }
                }
            }
        }
    }

    let bytes = tokio::fs::metadata(&output).await?.len();
    if stream.filesize_exact && bytes < stream.filesize {
        return Err(DownloadError::Incomplete {
            path: output,
            actual: bytes,
            expected: stream.filesize,
        });
    }
    if bytes != stream.filesize {
        warn!(expected = stream.filesize, actual = bytes, "downloaded size differs from the estimate");
    }

    let _ = events.send(WorkerEvent::Progress(100));
    Ok((output, bytes))
}

fn validate_url(raw: &str) -> Result<(), DownloadError> {
    let invalid = |reason: &str| DownloadError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("only http and https URLs are supported"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::downloader::ProgressSink;

    /// Stands in for yt-dlp: writes `size` bytes through a `.part` file.
    pub(crate) struct FakeSource {
        pub size: u64,
        /// Size reported by `resolve`; defaults to `size`
        pub reported: Option<u64>,
        pub fail_resolve: Option<String>,
        /// Write half the file, then hang until cancelled
        pub stall: bool,
        /// Panic once the transfer starts
        pub panic: bool,
        pub resolves: AtomicUsize,
    }

    impl FakeSource {
        pub(crate) fn new(size: u64) -> Self {
            Self {
                size,
                reported: None,
                fail_resolve: None,
                stall: false,
                panic: false,
                resolves: AtomicUsize::new(0),
            }
        }
    }

    impl StreamSource for FakeSource {
        async fn resolve(&self, url: &str) -> Result<StreamHandle, DownloadError> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            if let Some(message) = &self.fail_resolve {
                return Err(DownloadError::extractor("exit status: 1", message));
            }
            Ok(StreamHandle {
                url: url.to_string(),
                format_id: "18".to_string(),
                title: "Fake video".to_string(),
                filename: "Fake video [fake].mp4".to_string(),
                filesize: self.reported.unwrap_or(self.size),
                filesize_exact: true,
                thumbnail: None,
            })
        }

        async fn download(
            &self,
            _stream: &StreamHandle,
            output: &Path,
            _max_retries: u32,
            progress: ProgressSink,
        ) -> Result<(), DownloadError> {
            if self.panic {
                panic!("fake source blew up");
            }
            let part = part_path(output);
            let chunk = vec![0u8; (self.size / 4).max(1) as usize];
            let mut written = 0u64;
            let mut data = Vec::new();
            while written < self.size {
                let n = chunk.len().min((self.size - written) as usize);
                data.extend_from_slice(&chunk[..n]);
                written += n as u64;
                tokio::fs::write(&part, &data).await?;
                let _ = progress.send(ByteProgress {
                    downloaded: written,
                    total: Some(self.size),
                });
                if self.stall && written * 2 >= self.size {
                    std::future::pending::<()>().await;
                }
            }
            tokio::fs::rename(&part, output).await?;
            Ok(())
        }
    }

    async fn drain(worker: &mut DownloadWorker) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Some(event) = tokio::time::timeout(Duration::from_secs(10), worker.events.recv())
            .await
            .expect("worker did not finish in time")
        {
            let done = matches!(event, WorkerEvent::Finished(_));
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    fn request(url: &str, dir: &Path) -> DownloadRequest {
        DownloadRequest {
            url: url.to_string(),
            destination: dir.to_path_buf(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completed_download_matches_reported_size() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(4096));
        let mut worker = DownloadWorker::start(
            &Handle::current(),
            request("https://example.com/watch?v=fake", dir.path()),
            source,
            10,
        );

        let events = drain(&mut worker).await;
        let expected = dir.path().join("Fake video [fake].mp4");

        assert!(matches!(events.first(), Some(WorkerEvent::Resolved(_))));
        assert_eq!(events.get(1), Some(&WorkerEvent::Progress(0)));
        assert_eq!(events[events.len() - 2], WorkerEvent::Progress(100));
        assert_eq!(
            events.last(),
            Some(&WorkerEvent::Finished(DownloadOutcome::Completed {
                path: expected.clone(),
                bytes: 4096
            }))
        );
        for event in &events {
            if let WorkerEvent::Progress(p) = event {
                assert!(*p <= 100);
            }
        }
        assert_eq!(std::fs::metadata(&expected).unwrap().len(), 4096);
        assert_eq!(worker.state().unwrap().output, expected);
        assert_eq!(worker.estimate_progress(), Some(99));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_url_fails_without_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(100));
        let mut worker = DownloadWorker::start(
            &Handle::current(),
            request("not a url", dir.path()),
            Arc::clone(&source),
            10,
        );

        let events = drain(&mut worker).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            WorkerEvent::Finished(DownloadOutcome::Failed { reason }) => {
                assert!(reason.starts_with("invalid URL"), "{reason}")
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(source.resolves.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(worker.estimate_progress(), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resolve_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::new(100);
        source.fail_resolve = Some("ERROR: Video unavailable".to_string());
        let mut worker = DownloadWorker::start(
            &Handle::current(),
            request("https://example.com/watch?v=gone", dir.path()),
            Arc::new(source),
            10,
        );

        let events = drain(&mut worker).await;
        assert_eq!(
            events,
            vec![WorkerEvent::Finished(DownloadOutcome::Failed {
                reason: "yt-dlp exited with exit status: 1: ERROR: Video unavailable".to_string()
            })]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn short_file_is_not_reported_complete() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::new(1000);
        source.reported = Some(2000);
        let mut worker = DownloadWorker::start(
            &Handle::current(),
            request("https://example.com/watch?v=short", dir.path()),
            Arc::new(source),
            10,
        );

        let events = drain(&mut worker).await;
        assert!(!events.contains(&WorkerEvent::Progress(100)));
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Finished(DownloadOutcome::Failed { .. }))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancel_stops_a_running_download() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::new(1000);
        source.stall = true;
        let mut worker = DownloadWorker::start(
            &Handle::current(),
            request("https://example.com/watch?v=slow", dir.path()),
            Arc::new(source),
            10,
        );

        // wait until the transfer is half way
        loop {
            match worker.events.recv().await {
                Some(WorkerEvent::Progress(p)) if p >= 50 => break,
                Some(_) => continue,
                None => panic!("worker ended early"),
            }
        }
        assert_eq!(worker.estimate_progress(), Some(50));

        worker.cancel();
        let events = drain(&mut worker).await;
        assert_eq!(
            events.last(),
            Some(&WorkerEvent::Finished(DownloadOutcome::Cancelled))
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn repeated_downloads_produce_the_same_size() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(3000));
        let mut sizes = Vec::new();
        for _ in 0..2 {
            let mut worker = DownloadWorker::start(
                &Handle::current(),
                request("https://example.com/watch?v=same", dir.path()),
                Arc::clone(&source),
                10,
            );
            match drain(&mut worker).await.pop() {
                Some(WorkerEvent::Finished(DownloadOutcome::Completed { path, bytes })) => {
                    assert_eq!(std::fs::metadata(path).unwrap().len(), bytes);
                    sizes.push(bytes);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(sizes, vec![3000, 3000]);
    }

    fn state_for(dir: &Path, filesize: u64) -> WorkerState {
        WorkerState {
            request: request("https://example.com", dir),
            stream: StreamHandle {
                url: "https://example.com".to_string(),
                format_id: "18".to_string(),
                title: "t".to_string(),
                filename: "t.mp4".to_string(),
                filesize,
                filesize_exact: true,
                thumbnail: None,
            },
            output: dir.join("t.mp4"),
        }
    }

    #[test]
    fn estimate_reads_part_file_then_final_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), 200);
        assert_eq!(state.estimate_progress(), None);

        std::fs::write(part_path(&state.output), vec![0u8; 50]).unwrap();
        assert_eq!(state.estimate_progress(), Some(25));

        std::fs::remove_file(part_path(&state.output)).unwrap();
        std::fs::write(&state.output, vec![0u8; 500]).unwrap();
        assert_eq!(state.estimate_progress(), Some(99));
    }

    #[test]
    fn estimate_stays_below_100_when_the_size_was_approximate() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = state_for(dir.path(), 1000);
        state.stream.filesize_exact = false;

        std::fs::write(part_path(&state.output), vec![0u8; 1000]).unwrap();
        assert_eq!(state.estimate_progress(), Some(99));
        std::fs::write(part_path(&state.output), vec![0u8; 1500]).unwrap();
        assert_eq!(state.estimate_progress(), Some(99));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dead_task_is_reported_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::new(100);
        source.panic = true;
        let mut worker = DownloadWorker::start(
            &Handle::current(),
            request("https://example.com/watch?v=boom", dir.path()),
            Arc::new(source),
            10,
        );

        let mut events = Vec::new();
        for _ in 0..500 {
            match worker.try_next_event() {
                Some(event) => {
                    let done = matches!(event, WorkerEvent::Finished(_));
                    events.push(event);
                    if done {
                        break;
                    }
                }
                None => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }

        assert_eq!(
            events.last(),
            Some(&WorkerEvent::Finished(DownloadOutcome::Failed {
                reason: WORKER_LOST.to_string()
            }))
        );
        // exactly one terminal event
        assert_eq!(worker.try_next_event(), None);
    }

    #[test]
    fn estimate_skips_unknown_size() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_for(dir.path(), 0);
        std::fs::write(&state.output, b"data").unwrap();
        assert_eq!(state.estimate_progress(), None);
    }

    #[test]
    fn url_validation() {
        assert!(validate_url("https://www.youtube.com/watch?v=abc").is_ok());
        assert!(validate_url(" http://example.com/v ").is_ok());
        assert!(validate_url("").is_err());
        assert!(validate_url("ftp://example.com/file").is_err());
        assert!(validate_url("youtube.com/watch?v=abc").is_err());
    }
}
