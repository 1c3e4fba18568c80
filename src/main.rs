//! Desktop downloader for a single video, backed by yt-dlp

// Main window controller
mod app;
// Command line options
mod config;
// yt-dlp boundary
mod downloader;
mod error;
// Requests, stream handles and worker events
mod model;
// Progress parsing and percentage math
mod progress;
// Preview image fetching
mod thumbnail;
// Background download worker
mod worker;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use eframe::egui::{self, Visuals};
// OnceCell for single-time runtime initialization
use once_cell::sync::OnceCell;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use app::DownloaderApp;
use config::AppConfig;
use downloader::YtDlp;

// Global Tokio runtime stored in a OnceCell for lazy init
static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Program entry point: initializes logging and the runtime, then launches the GUI
fn main() -> anyhow::Result<()> {
    let config = AppConfig::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = RUNTIME
        .get_or_try_init(Runtime::new)
        .context("failed to start the tokio runtime")?;

    tracing::info!(ytdlp = %config.ytdlp.display(), "starting video downloader");
    let source = Arc::new(YtDlp::new(&config.ytdlp));
    let app = DownloaderApp::new(config, runtime.handle().clone(), source);

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Video Downloader")
            .with_inner_size([600.0, 300.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Video Downloader",
        options,
        Box::new(|cc| {
            cc.egui_ctx.set_visuals(Visuals::dark());
            Box::new(app)
        }),
    )
    .map_err(|err| anyhow::anyhow!("window failed: {err}"))
}
