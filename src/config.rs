// src/config.rs

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::app::RateLimitSettings;
use crate::core::analyzer::AnalyzerSettings;

#[derive(Debug, Clone, Parser)]
#[command(name = "vanguard-rs-reputation")]
#[command(about = "URL reputation scoring service", long_about = None)]
#[command(version)]
pub struct Config {
    /// Address the HTTP server listens on
    #[arg(long, env = "VANGUARD_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// CSV file of `rank,domain` lines used for popularity
    #[arg(long, env = "VANGUARD_RANK_FILE")]
    pub rank_file: Option<PathBuf>,

    /// Deadline for one analysis, in milliseconds
    #[arg(long, env = "VANGUARD_TIMEOUT_MS", default_value_t = 5000)]
    pub timeout_ms: u64,

    /// Maximum number of probes running at once per analysis
    #[arg(long, env = "VANGUARD_MAX_CONCURRENCY", default_value_t = 16)]
    pub max_concurrency: usize,

    /// Run without the in-memory cache (also disables rate limiting)
    #[arg(long, env = "VANGUARD_NO_CACHE")]
    pub no_cache: bool,

    /// Requests allowed per client address in one window
    #[arg(long, env = "VANGUARD_RATE_LIMIT", default_value_t = 20)]
    pub rate_limit: i64,

    /// Length of the rate limit window, in seconds
    #[arg(long, env = "VANGUARD_RATE_WINDOW_SECS", default_value_t = 60)]
    pub rate_window_secs: u64,

    /// Also write logs to a file in the data directory
    #[arg(long, env = "VANGUARD_LOG_TO_FILE")]
    pub log_to_file: bool,
}

impl Config {
    pub fn analyzer_settings(&self) -> AnalyzerSettings {
        AnalyzerSettings { timeout: Duration::from_millis(self.timeout_ms), max_concurrency: self.max_concurrency }
    }

    pub fn rate_limit_settings(&self) -> RateLimitSettings {
        RateLimitSettings { max_requests: self.rate_limit, window: Duration::from_secs(self.rate_window_secs) }
    }
}
