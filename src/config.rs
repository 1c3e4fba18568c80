use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Desktop downloader for a single video
#[derive(Parser, Debug, Clone)]
#[command(name = "vidgrab")]
#[command(about = "Download a single video with yt-dlp and watch its progress")]
#[command(version)]
pub struct AppConfig {
    /// yt-dlp executable to run
    #[arg(long, default_value = "yt-dlp")]
    pub ytdlp: PathBuf,

    /// Initial destination directory (defaults to the current directory)
    #[arg(short, long)]
    pub destination: Option<PathBuf>,

    /// Seconds between progress polls of the partially written file
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: u64,

    /// Retries yt-dlp makes on transient errors
    #[arg(long, default_value_t = 10)]
    pub max_retries: u32,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ytdlp: PathBuf::from("yt-dlp"),
            destination: None,
            poll_interval: 2,
            max_retries: 10,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_parser_defaults() {
        let parsed = AppConfig::parse_from(["vidgrab"]);
        let default = AppConfig::default();
        assert_eq!(parsed.ytdlp, default.ytdlp);
        assert_eq!(parsed.destination, default.destination);
        assert_eq!(parsed.poll_interval, default.poll_interval);
        assert_eq!(parsed.max_retries, default.max_retries);
        assert_eq!(parsed.log_level, default.log_level);
        assert_eq!(parsed.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        assert!(AppConfig::try_parse_from(["vidgrab", "--poll-interval", "0"]).is_err());
    }

    #[test]
    fn overrides() {
        let cfg = AppConfig::parse_from([
            "vidgrab",
            "--ytdlp",
            "/opt/yt-dlp",
            "-d",
            "/tmp/videos",
            "--max-retries",
            "3",
        ]);
        assert_eq!(cfg.ytdlp, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(cfg.destination, Some(PathBuf::from("/tmp/videos")));
        assert_eq!(cfg.max_retries, 3);
    }
}
