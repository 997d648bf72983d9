// tests/api.rs

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::Value;
use tower::ServiceExt;

use vanguard_rs_reputation::api;
use vanguard_rs_reputation::app::{AppState, RateLimitSettings};
use vanguard_rs_reputation::core::analyzer::{Analyzer, AnalyzerSettings};
use vanguard_rs_reputation::core::cache::{Cache, MemoryCache};
use vanguard_rs_reputation::core::error::ProbeFailure;
use vanguard_rs_reputation::core::models::{Fragment, Input, TldInfo};
use vanguard_rs_reputation::core::runner::{Probe, ProbeContext};

struct StaticRank;

#[async_trait]
impl Probe for StaticRank {
    fn name(&self) -> &'static str {
        "domain_rank"
    }
    async fn run(&self, input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        Ok(Fragment::Rank(if input.domain == "example.com" { 120 } else { 0 }))
    }
}

struct StaticTld;

#[async_trait]
impl Probe for StaticTld {
    fn name(&self) -> &'static str {
        "tld_check"
    }
    async fn run(&self, _input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        Ok(Fragment::Tld(TldInfo { tld: "com".to_string(), is_trusted: false, is_risky: false, is_icann: true }))
    }
}

struct UnreachableRegistry;

#[async_trait]
impl Probe for UnreachableRegistry {
    fn name(&self) -> &'static str {
        "whois_lookup"
    }
    async fn run(&self, _input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        Err(ProbeFailure::Registration("registry unreachable".to_string()))
    }
}

fn app(cache: Option<Arc<dyn Cache>>, max_requests: i64) -> Router {
    let probes: Vec<Arc<dyn Probe>> = vec![Arc::new(StaticRank), Arc::new(StaticTld), Arc::new(UnreachableRegistry)];
    let analyzer = Analyzer::new(probes, cache, AnalyzerSettings::default());
    let limits = RateLimitSettings { max_requests, window: Duration::from_secs(60) };
    api::router(AppState::new(analyzer, limits))
}

fn request(method: Method, uri: &str, client: [u8; 4]) -> Request<Body> {
    let mut request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
    request.extensions_mut().insert(ConnectInfo(SocketAddr::from((client, 40_000))));
    request
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = app(None, 20);
    for uri in ["/health", "/api/v1/health"] {
        let response = app.clone().oneshot(request(Method::GET, uri, [10, 0, 0, 1])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    let response = app.oneshot(request(Method::GET, "/", [10, 0, 0, 1])).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["name"], "vanguard-rs-reputation");
}

#[tokio::test]
async fn test_analyze_rejects_missing_and_invalid_urls() {
    let app = app(None, 20);

    let response = app.clone().oneshot(request(Method::GET, "/api/v1/analyze", [10, 0, 0, 1])).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["error"], "url query param is required");

    let response = app
        .oneshot(request(Method::GET, "/api/v1/analyze?url=ftp%3A%2F%2Fexample.com", [10, 0, 0, 1]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"].as_str().unwrap().starts_with("invalid url"));
}

#[tokio::test]
async fn test_analyze_returns_envelope() {
    let app = app(None, 20);
    let response = app
        .oneshot(request(Method::GET, "/api/v1/analyze?url=https%3A%2F%2Fwww.example.com%2Flogin", [10, 0, 0, 1]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["domain"], "example.com");
    assert_eq!(body["features"]["rank"], 120);
    assert_eq!(body["features"]["tld"]["tld"], "com");
    assert_eq!(body["features"]["url"]["subdomain_count"], 0);
    assert_eq!(body["domain_info"], Value::Null);
    assert_eq!(body["incomplete"], true);
    assert_eq!(
        body["errors"],
        serde_json::json!(["whois_lookup: registration lookup failed: registry unreachable"])
    );
    assert_eq!(body["performance"]["timings"].as_array().unwrap().len(), 3);
    for key in ["risk_score", "trust_score", "final_score", "verdict", "reasons"] {
        assert!(body["result"].get(key).is_some(), "missing result.{key}");
    }
}

#[tokio::test]
async fn test_rate_limit_per_client() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    let app = app(Some(cache), 2);

    for remaining in ["1", "0"] {
        let response = app.clone().oneshot(request(Method::GET, "/health", [10, 0, 0, 7])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(response.headers()["x-ratelimit-remaining"], remaining);
    }

    let response = app.clone().oneshot(request(Method::GET, "/health", [10, 0, 0, 7])).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
    let body = json_body(response).await;
    assert_eq!(body["error"], "too many requests");
    assert_eq!(body["retry_after"], 60);

    let other = app.oneshot(request(Method::GET, "/health", [10, 0, 0, 8])).await.unwrap();
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_flush_cache() {
    let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
    cache.set("domain_rank:example.com", "120".to_string(), Duration::from_secs(60)).await.unwrap();
    let router = app(Some(Arc::clone(&cache)), 20);

    let response = router.oneshot(request(Method::DELETE, "/api/v1/cache", [10, 0, 0, 1])).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(cache.get("domain_rank:example.com").await.unwrap(), None);

    let without_cache = app(None, 20).oneshot(request(Method::DELETE, "/api/v1/cache", [10, 0, 0, 1])).await.unwrap();
    assert_eq!(without_cache.status(), StatusCode::NOT_FOUND);
}
