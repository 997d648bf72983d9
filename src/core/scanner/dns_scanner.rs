// src/core/scanner/dns_scanner.rs

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use tracing::{debug, info, warn};

use crate::core::cache::{DNS_TTL, IP_TTL, cache_through};
use crate::core::error::ProbeFailure;
use crate::core::models::{DnsValidity, Fragment, Input};
use crate::core::runner::{Probe, ProbeContext};

/// Upper bound for a single DNS query.
pub const DNS_TIMEOUT: Duration = Duration::from_millis(800);

/// Builds the resolver shared by every DNS-backed probe.
pub fn build_resolver() -> TokioAsyncResolver {
    let mut opts = ResolverOpts::default();
    opts.timeout = DNS_TIMEOUT;
    opts.attempts = 1;
    TokioAsyncResolver::tokio(ResolverConfig::default(), opts)
}

/// Strips the trailing root dot from a record name.
fn trim_fqdn(name: String) -> String {
    name.trim_end_matches('.').to_string()
}

/// True for answers that say the record does not exist, as opposed to lookups that never got an answer.
fn is_negative_answer(error: &ResolveError) -> bool {
    matches!(error.kind(), ResolveErrorKind::NoRecordsFound { .. })
}

/// Resolves a domain to its A/AAAA addresses.
///
/// # Returns
/// The addresses as strings, or an error when nothing resolves.
async fn resolve_ips(resolver: &TokioAsyncResolver, ctx: &ProbeContext, domain: &str) -> Result<Vec<String>, ProbeFailure> {
    debug!(domain, "Resolving IP addresses.");
    let lookup = ctx.bounded(DNS_TIMEOUT, resolver.lookup_ip(domain)).await??;
    let ips: Vec<String> = lookup.iter().map(|ip| ip.to_string()).collect();
    if ips.is_empty() {
        return Err(ProbeFailure::NoAddresses(domain.to_string()));
    }
    info!(domain, count = ips.len(), "Resolved IP addresses.");
    Ok(ips)
}

/// Whether `host` has at least one address.
///
/// A negative answer is `Ok(false)`. Timeouts and resolver failures are errors
/// so that an unanswered lookup is never mistaken for a missing record.
async fn host_resolves(resolver: &TokioAsyncResolver, ctx: &ProbeContext, host: &str) -> Result<bool, ProbeFailure> {
    match ctx.bounded(DNS_TIMEOUT, resolver.lookup_ip(host)).await? {
        Ok(lookup) => Ok(lookup.iter().next().is_some()),
        Err(e) if is_negative_answer(&e) => {
            debug!(host, error = %e, "Host does not resolve.");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// A set of record hosts is valid when any one of them resolves.
async fn any_resolves(resolver: &TokioAsyncResolver, ctx: &ProbeContext, hosts: &[String]) -> Result<bool, ProbeFailure> {
    for host in hosts {
        if host_resolves(resolver, ctx, host).await? {
            return Ok(true);
        }
    }
    Ok(false)
}

// Name servers of the domain, empty when the zone has none.
async fn lookup_ns_hosts(resolver: &TokioAsyncResolver, ctx: &ProbeContext, domain: &str) -> Result<Vec<String>, ProbeFailure> {
    match ctx.bounded(DNS_TIMEOUT, resolver.ns_lookup(domain)).await? {
        Ok(records) => Ok(records.iter().map(|ns| trim_fqdn(ns.to_string())).collect()),
        Err(e) if is_negative_answer(&e) => {
            warn!(domain, error = %e, "No NS records.");
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

// Mail exchangers of the domain, empty when the zone has none.
async fn lookup_mx_hosts(resolver: &TokioAsyncResolver, ctx: &ProbeContext, domain: &str) -> Result<Vec<String>, ProbeFailure> {
    match ctx.bounded(DNS_TIMEOUT, resolver.mx_lookup(domain)).await? {
        Ok(records) => Ok(records.iter().map(|mx| trim_fqdn(mx.exchange().to_string())).collect()),
        Err(e) if is_negative_answer(&e) => {
            debug!(domain, error = %e, "No MX records.");
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Checks that the domain's NS and MX records point at hosts that resolve.
///
/// Missing or unresolvable records are reported as invalid. A lookup that
/// times out or fails without an answer fails the whole check.
async fn check_dns_validity(resolver: &TokioAsyncResolver, ctx: &ProbeContext, domain: &str) -> Result<DnsValidity, ProbeFailure> {
    let (ns_hosts, mx_hosts) = tokio::try_join!(
        lookup_ns_hosts(resolver, ctx, domain),
        lookup_mx_hosts(resolver, ctx, domain)
    )?;
    let (ns_valid, mx_valid) = tokio::try_join!(
        any_resolves(resolver, ctx, &ns_hosts),
        any_resolves(resolver, ctx, &mx_hosts)
    )?;
    info!(domain, ns_valid, mx_valid, "DNS validity checked.");
    Ok(DnsValidity { ns_valid, ns_hosts, mx_valid, mx_hosts })
}

// --- Probes ---

pub struct IpResolutionProbe {
    resolver: Arc<TokioAsyncResolver>,
}

impl IpResolutionProbe {
    pub fn new(resolver: Arc<TokioAsyncResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Probe for IpResolutionProbe {
    fn name(&self) -> &'static str {
        "ip_resolution"
    }

    async fn run(&self, input: &Input, ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        let key = format!("{}:{}", self.name(), input.domain);
        let cached = cache_through(
            input.cache(),
            &key,
            IP_TTL,
            || resolve_ips(&self.resolver, ctx, &input.domain),
            Fragment::IpAddresses,
        )
        .await?;
        Ok(cached.fragment)
    }
}

pub struct DnsValidityProbe {
    resolver: Arc<TokioAsyncResolver>,
}

impl DnsValidityProbe {
    pub fn new(resolver: Arc<TokioAsyncResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Probe for DnsValidityProbe {
    fn name(&self) -> &'static str {
        "dns_validity_check"
    }

    async fn run(&self, input: &Input, ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        let key = format!("dns_validity:{}", input.domain);
        let cached = cache_through(
            input.cache(),
            &key,
            DNS_TTL,
            || check_dns_validity(&self.resolver, ctx, &input.domain),
            Fragment::Dns,
        )
        .await?;
        Ok(cached.fragment)
    }
}
