// src/core/scanner/http_scanner.rs

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, LOCATION, STRICT_TRANSPORT_SECURITY};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Response, StatusCode};
use tracing::{debug, info, warn};
use url::Url;

use crate::core::cache::{HTTP_TTL, cache_through};
use crate::core::error::{ProbeFailure, SetupError};
use crate::core::models::{Fragment, HttpProbeResult, HttpStatus, Input, RedirectionResult};
use crate::core::runner::{Probe, ProbeContext};
use crate::core::target::registrable_domain;

const MAX_REDIRECTS: usize = 10;
/// Time allowed for connecting and receiving the response headers of one hop.
const REQUEST_TIMEOUT: Duration = Duration::from_millis(800);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(300);
const HSTS_TIMEOUT: Duration = Duration::from_millis(800);

/// Builds the client used for redirect and header inspection.
///
/// Redirects are followed by hand so every hop can be recorded, and
/// certificate errors are ignored because certificate posture is judged by
/// the TLS probe.
pub fn build_inspection_client() -> Result<Client, SetupError> {
    let client = Client::builder()
        .user_agent(concat!("VanguardRS/", env!("CARGO_PKG_VERSION")))
        .redirect(Policy::none())
        .danger_accept_invalid_certs(true)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;
    Ok(client)
}

/// Returns the value of a header if present and valid UTF-8.
fn header_value(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    match headers.get(name).map(|v| v.to_str()) {
        Some(Ok(value)) => Some(value.to_string()),
        Some(Err(_)) => {
            warn!(header_name = %name, "Header found but contained invalid UTF-8.");
            None
        }
        None => None,
    }
}

/// True when any hop after the first lands on a different registrable domain.
pub fn has_domain_jump(origin_domain: &str, chain: &[String]) -> bool {
    chain.iter().skip(1).any(|hop| {
        let hop_domain = Url::parse(hop)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
            .and_then(|host| registrable_domain(host.trim_start_matches('[').trim_end_matches(']')));
        hop_domain.as_deref() != Some(origin_domain)
    })
}

/// Maps a status code onto the reported status fields.
fn describe_status(status: StatusCode) -> HttpStatus {
    HttpStatus {
        code: status.as_u16(),
        text: status.canonical_reason().unwrap_or_default().to_string(),
        success: status.is_success(),
        is_redirect: status.is_redirection(),
    }
}

/// Sends one request for a hop, bounded by the hop timeout and the analysis deadline.
async fn send(client: &Client, ctx: &ProbeContext, method: Method, url: &Url) -> Result<Response, ProbeFailure> {
    let response = ctx.bounded(REQUEST_TIMEOUT, client.request(method, url.clone()).send()).await??;
    Ok(response)
}

/// HEAD first; GET when HEAD fails or is refused by the server.
async fn fetch_hop(client: &Client, ctx: &ProbeContext, url: &Url) -> Result<Response, ProbeFailure> {
    match send(client, ctx, Method::HEAD, url).await {
        Ok(response)
            if response.status() != StatusCode::METHOD_NOT_ALLOWED && response.status() != StatusCode::NOT_IMPLEMENTED =>
        {
            Ok(response)
        }
        Ok(response) => {
            debug!(url = %url, status = %response.status(), "HEAD refused, retrying with GET.");
            send(client, ctx, Method::GET, url).await
        }
        Err(e) => {
            debug!(url = %url, error = %e, "HEAD failed, retrying with GET.");
            send(client, ctx, Method::GET, url).await
        }
    }
}

/// Checks HSTS with a separate HTTPS request when the chain ended on plain HTTP.
///
/// A refused or failed HTTPS connection means no HSTS. Running out of time is an error.
async fn probe_hsts(client: &Client, ctx: &ProbeContext, domain: &str) -> Result<bool, ProbeFailure> {
    let Ok(url) = Url::parse(&format!("https://{domain}")) else {
        return Ok(false);
    };
    match ctx.bounded(HSTS_TIMEOUT, client.head(url).send()).await? {
        Ok(response) => Ok(header_value(response.headers(), &STRICT_TRANSPORT_SECURITY).is_some()),
        Err(e) if e.is_timeout() => Err(e.into()),
        Err(e) => {
            debug!(domain, error = %e, "HTTPS request for HSTS failed.");
            Ok(false)
        }
    }
}

/// Follows the redirect chain of a URL and records its final status and HSTS support.
///
/// # Arguments
/// * `client` - A client with automatic redirects disabled.
/// * `ctx` - The analysis context bounding every request.
/// * `start` - The URL to inspect.
/// * `domain` - The registrable domain of `start`.
///
/// # Returns
/// The redirect chain, final status and HSTS flag, or an error when the first request fails.
pub async fn inspect_http(client: &Client, ctx: &ProbeContext, start: &Url, domain: &str) -> Result<HttpProbeResult, ProbeFailure> {
    info!(url = %start, "Starting HTTP inspection.");
    let mut chain = vec![start.to_string()];
    let mut current = start.clone();

    let response = loop {
        let response = fetch_hop(client, ctx, &current).await?;
        if !response.status().is_redirection() || chain.len() > MAX_REDIRECTS {
            break response;
        }
        let next = header_value(response.headers(), &LOCATION).and_then(|location| current.join(&location).ok());
        match next {
            Some(next) => {
                debug!(from = %current, to = %next, status = %response.status(), "Following redirect.");
                chain.push(next.to_string());
                current = next;
            }
            None => break response,
        }
    };

    let status = describe_status(response.status());
    let supports_hsts = if current.scheme() == "https" {
        header_value(response.headers(), &STRICT_TRANSPORT_SECURITY).is_some()
    } else {
        probe_hsts(client, ctx, domain).await?
    };

    let redirection = RedirectionResult {
        is_redirected: chain.len() > 1,
        has_domain_jump: has_domain_jump(domain, &chain),
        final_url: current.to_string(),
        final_host: current.host_str().unwrap_or_default().to_string(),
        chain_length: chain.len(),
        chain,
    };
    info!(
        url = %start,
        hops = redirection.chain_length,
        status = status.code,
        hsts = supports_hsts,
        "HTTP inspection finished."
    );

    Ok(HttpProbeResult { redirection, status, supports_hsts })
}

pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn name(&self) -> &'static str {
        "http_combined_check"
    }

    async fn run(&self, input: &Input, ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        let key = format!("http_combined:{}", input.url);
        let cached = cache_through(
            input.cache(),
            &key,
            HTTP_TTL,
            || inspect_http(&self.client, ctx, &input.url, &input.domain),
            Fragment::Http,
        )
        .await?;
        Ok(cached.fragment)
    }
}
