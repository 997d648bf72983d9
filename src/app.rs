// src/app.rs

use std::sync::Arc;
use std::time::Duration;

use crate::core::analyzer::Analyzer;

/// Fixed-window request limit applied per client address.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub max_requests: i64,
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self { max_requests: 20, window: Duration::from_secs(60) }
    }
}

/// Everything a request handler needs, shared across the server.
pub struct AppState {
    pub analyzer: Analyzer,
    pub rate_limit: RateLimitSettings,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(analyzer: Analyzer, rate_limit: RateLimitSettings) -> SharedState {
        Arc::new(Self { analyzer, rate_limit })
    }
}
