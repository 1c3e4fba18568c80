//! Main window: collects the URL and destination, drives one download at a
//! time and renders its progress.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use eframe::{App, Frame, egui};
use egui::{ColorImage, TextureOptions};
use rfd::FileDialog;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::downloader::StreamSource;
use crate::model::{DownloadRequest, DownloadStatus, WorkerEvent};
use crate::thumbnail;
use crate::worker::DownloadWorker;

/// The download currently in flight
struct ActiveDownload {
    worker: DownloadWorker,
    /// Last time the partial file was polled
    last_poll: Instant,
}

/// Application state for the GUI
pub struct DownloaderApp<S: StreamSource> {
    config: AppConfig,
    runtime: Handle,
    source: Arc<S>,
    /// Input field for the video URL
    url_input: String,
    /// Destination folder; read-only in the UI, changed through the picker
    destination: String,
    /// Progress bar value, `None` while the bar is hidden
    progress: Option<u8>,
    status: DownloadStatus,
    /// One-off message, e.g. a rejected second download
    notice: Option<String>,
    active: Option<ActiveDownload>,
    thumbnail: Option<egui::TextureHandle>,
    /// Filled by the thumbnail fetch running on a blocking thread
    thumbnail_result: Arc<Mutex<Option<ColorImage>>>,
}

impl<S: StreamSource> DownloaderApp<S> {
    pub fn new(config: AppConfig, runtime: Handle, source: Arc<S>) -> Self {
        let destination = config
            .destination
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        Self {
            config,
            runtime,
            source,
            url_input: String::new(),
            destination,
            progress: None,
            status: DownloadStatus::Idle,
            notice: None,
            active: None,
            thumbnail: None,
            thumbnail_result: Arc::new(Mutex::new(None)),
        }
    }

    /// Starts a download for the current URL and destination.
    ///
    /// Returns `false` when nothing was started because a download is
    /// already running or the working directory is unavailable.
    pub fn download_video(&mut self) -> bool {
        if self.active.is_some() {
            warn!("download requested while another one is running");
            self.notice = Some("A download is already running".to_string());
            return false;
        }

        let destination = match effective_destination(&self.destination) {
            Ok(dir) => dir,
            Err(err) => {
                self.notice = Some(format!("No usable destination: {err}"));
                return false;
            }
        };

        let request = DownloadRequest {
            url: self.url_input.trim().to_string(),
            destination,
        };
        let worker = DownloadWorker::start(
            &self.runtime,
            request,
            Arc::clone(&self.source),
            self.config.max_retries,
        );

        self.active = Some(ActiveDownload {
            worker,
            last_poll: Instant::now(),
        });
        self.notice = None;
        self.thumbnail = None;
        self.status = DownloadStatus::Resolving;
        self.update_progress(0);
        true
    }

    pub fn update_progress(&mut self, value: u8) {
        self.progress = Some(value.min(100));
    }

    pub fn browse_destination(&mut self) {
        let picked = FileDialog::new()
            .set_directory(&self.destination)
            .pick_folder();
        self.apply_browse_result(picked);
    }

    /// A cancelled dialog (`None`) leaves the destination untouched.
    fn apply_browse_result(&mut self, picked: Option<PathBuf>) {
        if let Some(folder) = picked {
            self.destination = folder.display().to_string();
        }
    }

    pub fn cancel_download(&mut self) {
        if let Some(active) = &self.active {
            info!("cancelling download");
            active.worker.cancel();
        }
    }

    /// Applies pending worker events and runs the periodic file-size poll.
    pub fn poll(&mut self, now: Instant) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        let events: Vec<WorkerEvent> = std::iter::from_fn(|| active.worker.try_next_event()).collect();

        let interval = self.config.poll_interval();
        let estimate = if now.saturating_duration_since(active.last_poll) >= interval {
            active.last_poll = now;
            active.worker.estimate_progress()
        } else {
            None
        };

        for event in events {
            match event {
                WorkerEvent::Resolved(stream) => {
                    if let Some(url) = stream.thumbnail.clone() {
                        self.fetch_thumbnail(url);
                    }
                    self.status = DownloadStatus::Downloading {
                        title: stream.title,
                    };
                }
                WorkerEvent::Progress(value) => self.update_progress(value),
                WorkerEvent::Finished(outcome) => {
                    self.status = outcome.into();
                    // drops the worker together with its channel
                    self.active = None;
                    return;
                }
            }
        }

        // an estimate from disk never moves the bar backwards
        if let Some(value) = estimate {
            if self.progress.is_none_or(|current| value > current) {
                self.update_progress(value);
            }
        }
    }

    fn fetch_thumbnail(&self, url: String) {
        let slot = Arc::clone(&self.thumbnail_result);
        self.runtime.spawn_blocking(move || {
            if let Some(img) = thumbnail::fetch_thumbnail(&url) {
                if let Ok(mut slot) = slot.lock() {
                    *slot = Some(img);
                }
            }
        });
    }

    fn load_thumbnail(&mut self, ctx: &egui::Context) {
        let img = match self.thumbnail_result.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(img) = img {
            self.thumbnail = Some(ctx.load_texture("thumbnail", img, TextureOptions::default()));
        }
    }
}

/// Destination actually used for a download: a blank field means the
/// current working directory.
pub fn effective_destination(field: &str) -> std::io::Result<PathBuf> {
    let field = field.trim();
    if field.is_empty() {
        std::env::current_dir()
    } else {
        Ok(PathBuf::from(field))
    }
}

/// GUI update loop: called each frame to redraw and handle interactions
impl<S: StreamSource> App for DownloaderApp<S> {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        self.poll(Instant::now());
        self.load_thumbnail(ctx);

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.heading("Video Downloader");

                ui.label("Enter video URL:");
                ui.add(egui::TextEdit::singleline(&mut self.url_input).desired_width(300.0));

                ui.label("Select destination:");
                let mut destination: &str = &self.destination;
                ui.add(egui::TextEdit::singleline(&mut destination).desired_width(300.0));
                if ui.button("Save Here").clicked() {
                    self.browse_destination();
                }

                let busy = self.active.is_some();
                let download = egui::Button::new("Download").fill(egui::Color32::DARK_GREEN);
                if ui.add_enabled(!busy, download).clicked() {
                    self.download_video();
                }
                if busy && ui.button("Cancel").clicked() {
                    self.cancel_download();
                }

                if let Some(progress) = self.progress {
                    ui.horizontal(|ui| {
                        if let Some(tex) = &self.thumbnail {
                            ui.image(tex);
                        }
                        ui.add(egui::ProgressBar::new(f32::from(progress) / 100.0).show_percentage());
                        if self.status.is_active() {
                            ui.spinner();
                        }
                    });
                }
                if let Some(state) = self.active.as_ref().and_then(|a| a.worker.state()) {
                    ui.small(format!("{} → {}", state.request.url, state.output.display()));
                }

                match &self.notice {
                    Some(notice) => ui.colored_label(egui::Color32::YELLOW, notice),
                    None => ui.label(self.status.label()),
                };
            });
        });

        // worker events arrive off-frame
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}
