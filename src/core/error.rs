// src/core/error.rs

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that reject a request before any probe runs.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Why a single probe could not produce its fragment.
#[derive(Debug, Error)]
pub enum ProbeFailure {
    #[error("dns resolution failed: {0}")]
    Dns(#[from] hickory_resolver::error::ResolveError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("no addresses found for {0}")]
    NoAddresses(String),
    #[error("tls inspection failed: {0}")]
    Tls(String),
    #[error("registration lookup failed: {0}")]
    Registration(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("analysis deadline reached before the call could start")]
    DeadlineExceeded,
    #[error("probe panicked")]
    Panicked,
}

/// A probe failure attributed to the probe that produced it.
#[derive(Debug, Error)]
#[error("{probe}: {cause}")]
pub struct ProbeError {
    pub probe: &'static str,
    #[source]
    pub cause: ProbeFailure,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache payload could not be encoded or decoded: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("value stored under {0} is not an integer")]
    NotAnInteger(String),
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum RankLoadError {
    #[error("failed to read rank file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Startup failures while building the shared probe resources.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
