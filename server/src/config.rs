use std::{path::PathBuf, time::Duration};

use clap::Parser;
use thiserror::Error;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Fetches remote videos and streams download progress", long_about = None)]
pub struct Config {
    #[arg(long, env = "MEDIAGRAB_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    #[arg(short, long, env = "MEDIAGRAB_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Flat directory every job writes into
    #[arg(long, env = "MEDIAGRAB_DOWNLOAD_DIR", default_value = "downloads")]
    pub download_dir: PathBuf,

    /// Files older than this are deleted by the sweeper
    #[arg(long, env = "MEDIAGRAB_RETENTION_SECS", default_value_t = 3600)]
    pub retention_secs: u64,

    #[arg(long, env = "MEDIAGRAB_SWEEP_INTERVAL_SECS", default_value_t = 300)]
    pub sweep_interval_secs: u64,

    /// Upper bound on one job's engine run. Must stay below the retention
    /// threshold, or the sweeper may delete a file that is still being written.
    #[arg(long, env = "MEDIAGRAB_MAX_JOB_SECS", default_value_t = 1800)]
    pub max_job_secs: u64,

    /// Never sweep files the engine marks as in progress (.part, .ytdl)
    #[arg(long, env = "MEDIAGRAB_SKIP_PARTIAL")]
    pub skip_partial: bool,

    /// How often a progress stream samples its job
    #[arg(long, env = "MEDIAGRAB_POLL_INTERVAL_MS", default_value_t = 500)]
    pub poll_interval_ms: u64,

    /// Engine calls allowed to run at once
    #[arg(long, env = "MEDIAGRAB_ENGINE_LANES", default_value_t = 4)]
    pub engine_lanes: usize,

    #[arg(long, env = "MEDIAGRAB_YTDLP", default_value = "yt-dlp")]
    pub ytdlp_bin: PathBuf,

    /// Allowed CORS origin; repeat for several. Any origin when absent.
    #[arg(long = "cors-origin", env = "MEDIAGRAB_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("retention ({retention}s) must be longer than the maximum job duration ({max_job}s)")]
    RetentionTooShort { retention: u64, max_job: u64 },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl Config {
    pub fn check(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("sweep interval", self.sweep_interval_secs),
            ("poll interval", self.poll_interval_ms),
            ("engine lanes", self.engine_lanes as u64),
        ] {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.retention_secs <= self.max_job_secs {
            return Err(ConfigError::RetentionTooShort {
                retention: self.retention_secs,
                max_job: self.max_job_secs,
            });
        }
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("mediagrab-server").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults_match_reference_configuration() {
        let c = parse(&[]);
        assert_eq!(c.port, 8000);
        assert_eq!(c.retention(), Duration::from_secs(3600));
        assert_eq!(c.sweep_interval(), Duration::from_secs(300));
        assert_eq!(c.poll_interval(), Duration::from_millis(500));
        assert!(!c.skip_partial);
        assert!(c.cors_origins.is_empty());
        assert_eq!(c.check(), Ok(()));
    }

    #[test]
    fn retention_must_outlast_jobs() {
        let c = parse(&["--retention-secs", "600", "--max-job-secs", "600"]);
        assert_eq!(
            c.check(),
            Err(ConfigError::RetentionTooShort { retention: 600, max_job: 600 })
        );
    }

    #[test]
    fn zero_lanes_rejected() {
        let c = parse(&["--engine-lanes", "0"]);
        assert_eq!(c.check(), Err(ConfigError::Zero("engine lanes")));
    }

    #[test]
    fn cors_origins_accept_lists() {
        let c = parse(&["--cors-origin", "http://localhost:5173,https://grab.example"]);
        assert_eq!(c.cors_origins, ["http://localhost:5173", "https://grab.example"]);
    }
}
