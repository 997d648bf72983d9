// src/api/rate_limit.rs

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, warn};

use crate::app::{RateLimitSettings, SharedState};

const LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

fn client_key(request: &Request) -> String {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!("ratelimit:{ip}")
}

fn limit_headers(settings: &RateLimitSettings, count: i64) -> HeaderMap {
    let reset = Utc::now().timestamp() + settings.window.as_secs() as i64;
    let mut headers = HeaderMap::new();
    headers.insert(LIMIT, HeaderValue::from(settings.max_requests));
    headers.insert(REMAINING, HeaderValue::from((settings.max_requests - count).max(0)));
    headers.insert(RESET, HeaderValue::from(reset));
    headers
}

/// Counts requests per client address in fixed windows and rejects the excess with 429.
///
/// The counter lives in the analyzer's cache. Without a cache, or when the
/// cache fails, requests are let through.
pub async fn limit_requests(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    let Some(cache) = state.analyzer.cache() else {
        return next.run(request).await;
    };
    let settings = state.rate_limit;
    let key = client_key(&request);

    let count = match cache.incr(&key).await {
        Ok(count) => count,
        Err(e) => {
            warn!(key = %key, error = %e, "Rate limit counter unavailable, letting request through.");
            return next.run(request).await;
        }
    };
    if count == 1 {
        if let Err(e) = cache.expire(&key, settings.window).await {
            warn!(key = %key, error = %e, "Could not set rate limit window.");
        }
    }

    let headers = limit_headers(&settings, count);
    if count > settings.max_requests {
        debug!(key = %key, count, "Rate limit exceeded.");
        let retry_after = settings.window.as_secs();
        let body = Json(json!({ "error": "too many requests", "retry_after": retry_after }));
        return (StatusCode::TOO_MANY_REQUESTS, headers, [(header::RETRY_AFTER, retry_after.to_string())], body)
            .into_response();
    }

    let mut response = next.run(request).await;
    response.headers_mut().extend(headers);
    response
}
