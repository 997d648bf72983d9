// src/core/scanner/ssl_scanner.rs

use std::io;
use std::net::{IpAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use sha2::{Digest, Sha256};
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, warn};
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::*;

use crate::core::cache::{TLS_TTL, cache_through};
use crate::core::error::ProbeFailure;
use crate::core::knowledge_base::KnowledgeBase;
use crate::core::models::{Fragment, Input, SslPosture, TlsProbeResult, TlsSummary};
use crate::core::runner::{Probe, ProbeContext};

/// Bound for the TCP connect and for each read or write during the handshake.
const TLS_TIMEOUT: Duration = Duration::from_millis(800);
/// Bound for the whole inspection, including the unverified retry.
const TLS_INSPECTION_TIMEOUT: Duration = Duration::from_secs(3);
/// Longest validity the CA/Browser Forum allows for public certificates.
const MAX_VALIDITY_DAYS: i64 = 398;
const SCT_LIST_OID: &str = "1.3.6.1.4.1.11129.2.4.2";

/// The leaf certificate as seen on the wire.
struct PeerCertificate {
    der: Vec<u8>,
    /// Why the verified handshake failed, if it did.
    chain_error: Option<String>,
}

/// Opens a TCP connection to port 443 with read and write timeouts set.
///
/// # Returns
/// The connected stream, or a message describing why the connection failed.
fn connect_tcp(domain: &str, timeout: Duration) -> Result<TcpStream, String> {
    let addr = (domain, 443)
        .to_socket_addrs()
        .map_err(|e| format!("DNS error: {e}"))?
        .next()
        .ok_or_else(|| format!("no address for {domain}"))?;
    let stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| format!("TCP connection error: {e}"))?;
    let set_timeouts = |stream: &TcpStream| -> io::Result<()> {
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))
    };
    set_timeouts(&stream).map_err(|e| format!("socket setup error: {e}"))?;
    Ok(stream)
}

/// Connects to port 443 and retrieves the leaf certificate.
///
/// A verified handshake is tried first. When it fails, the handshake is
/// repeated without verification so an invalid chain can still be inspected.
fn fetch_peer_certificate(domain: &str, timeout: Duration) -> Result<PeerCertificate, String> {
    debug!(domain, "Performing verified TLS handshake.");
    let verified = TlsConnector::new().map_err(|e| format!("TlsConnector error: {e}"))?;
    let stream = connect_tcp(domain, timeout)?;

    let (tls_stream, chain_error) = match verified.connect(domain, stream) {
        Ok(tls_stream) => (tls_stream, None),
        Err(e) => {
            debug!(domain, error = %e, "Verified handshake failed, retrying without verification.");
            let permissive = TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
                .map_err(|e| format!("TlsConnector error: {e}"))?;
            let stream = connect_tcp(domain, timeout)?;
            let tls_stream = permissive
                .connect(domain, stream)
                .map_err(|e| format!("TLS handshake error: {e}"))?;
            (tls_stream, Some(e.to_string()))
        }
    };

    let certificate = tls_stream
        .peer_certificate()
        .map_err(|e| format!("could not read peer certificate: {e}"))?
        .ok_or_else(|| "no peer certificate presented".to_string())?;
    let der = certificate.to_der().map_err(|e| format!("could not encode certificate: {e}"))?;
    Ok(PeerCertificate { der, chain_error })
}

/// Converts an ASN1Time to a chrono DateTime<Utc>.
fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

/// Matches a certificate name against a host; `*.` wildcards cover exactly one label.
pub fn hostname_matches(pattern: &str, host: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => host
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => pattern == host,
    }
}

/// Checks the SAN entries, falling back to the subject CN when there are none.
fn certificate_covers(x509: &X509Certificate<'_>, domain: &str) -> bool {
    let ip = domain.parse::<IpAddr>().ok();
    if let Ok(Some(san)) = x509.subject_alternative_name() {
        return san.value.general_names.iter().any(|name| match (name, ip) {
            (GeneralName::DNSName(dns), None) => hostname_matches(dns, domain),
            (GeneralName::IPAddress(bytes), Some(IpAddr::V4(v4))) => *bytes == v4.octets().as_slice(),
            (GeneralName::IPAddress(bytes), Some(IpAddr::V6(v6))) => *bytes == v6.octets().as_slice(),
            _ => false,
        });
    }
    x509.subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .any(|cn| hostname_matches(cn, domain))
}

/// Derives the TLS summary and certificate posture from a DER-encoded leaf certificate.
///
/// # Arguments
/// * `der` - The leaf certificate.
/// * `domain` - The name the certificate should cover.
/// * `chain_error` - Why chain verification failed, if it did.
/// * `knowledge` - Source of the fingerprint blacklist.
/// * `now` - Reference time for validity checks.
fn assess_certificate(
    der: &[u8],
    domain: &str,
    chain_error: Option<String>,
    knowledge: &KnowledgeBase,
    now: DateTime<Utc>,
) -> Result<TlsProbeResult, String> {
    let (_, x509) = parse_x509_certificate(der).map_err(|e| format!("X.509 parse error: {e}"))?;
    info!(subject = %x509.subject(), issuer = %x509.issuer(), "Parsed peer certificate.");

    let issuer_cn = x509
        .issuer()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string();
    let issuer_org = x509
        .issuer()
        .iter_organization()
        .next()
        .and_then(|org| org.as_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| issuer_cn.clone());

    let validity = x509.validity();
    let not_before = asn1_time_to_chrono_utc(&validity.not_before);
    let not_after = asn1_time_to_chrono_utc(&validity.not_after);
    let age_days = (now - not_before).num_days();
    let fingerprint = hex::encode_upper(Sha256::digest(der));
    let ct_logged = x509.extensions().iter().any(|ext| ext.oid.to_id_string() == SCT_LIST_OID);
    let known_bad_chain = knowledge.is_blacklisted_certificate(&fingerprint);

    let mut is_suspicious = false;
    let mut reasons = Vec::new();
    let chain_valid = chain_error.is_none();
    if let Some(e) = chain_error {
        reasons.push(format!("cert chain invalid: {e}"));
    }
    if known_bad_chain {
        is_suspicious = true;
        reasons.push("certificate fingerprint is blacklisted".to_string());
    }
    if now > not_after {
        is_suspicious = true;
        reasons.push("certificate expired".to_string());
    }
    if now < not_before {
        is_suspicious = true;
        reasons.push("certificate not yet valid".to_string());
    }
    if (not_after - not_before).num_days() > MAX_VALIDITY_DAYS {
        reasons.push("unusually long validity period".to_string());
    }
    if !ct_logged {
        is_suspicious = true;
        reasons.push("certificate does not contain embedded CT logs (SCTs)".to_string());
    }

    Ok(TlsProbeResult {
        tls: TlsSummary {
            present: true,
            issuer: issuer_org,
            age_days,
            hostname_mismatch: !certificate_covers(&x509, domain),
        },
        ssl: SslPosture {
            domain: domain.to_string(),
            has_tls: true,
            chain_valid,
            issuer: issuer_cn,
            not_before: Some(not_before),
            not_after: Some(not_after),
            age_days,
            fingerprint_sha256: fingerprint,
            ct_logged,
            known_bad_chain,
            is_suspicious,
            reasons,
        },
    })
}

/// Inspects the certificate served for `domain` on port 443.
pub async fn inspect_tls(ctx: &ProbeContext, domain: &str, knowledge: &KnowledgeBase) -> Result<TlsProbeResult, ProbeFailure> {
    info!(domain, "Starting TLS inspection.");
    let timeout = ctx.budget(TLS_TIMEOUT);
    if timeout.is_zero() {
        return Err(ProbeFailure::DeadlineExceeded);
    }

    let target = domain.to_string();
    let handle = spawn_blocking(move || fetch_peer_certificate(&target, timeout));
    let peer = match ctx.bounded(TLS_INSPECTION_TIMEOUT, handle).await? {
        Ok(Ok(peer)) => peer,
        Ok(Err(e)) => {
            warn!(domain, error = %e, "TLS inspection failed.");
            return Err(ProbeFailure::Tls(e));
        }
        Err(e) => {
            error!(domain, error = %e, "Blocking TLS task failed.");
            return Err(ProbeFailure::Tls(format!("inspection task failed: {e}")));
        }
    };

    let result = assess_certificate(&peer.der, domain, peer.chain_error, knowledge, Utc::now()).map_err(ProbeFailure::Tls)?;
    info!(
        domain,
        issuer = %result.tls.issuer,
        chain_valid = result.ssl.chain_valid,
        suspicious = result.ssl.is_suspicious,
        "TLS inspection finished."
    );
    Ok(result)
}

pub struct TlsProbe {
    knowledge: Arc<KnowledgeBase>,
}

impl TlsProbe {
    pub fn new(knowledge: Arc<KnowledgeBase>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Probe for TlsProbe {
    fn name(&self) -> &'static str {
        "tls_combined_check"
    }

    async fn run(&self, input: &Input, ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        let key = format!("tls_combined:{}", input.domain);
        let cached = cache_through(
            input.cache(),
            &key,
            TLS_TTL,
            || inspect_tls(ctx, &input.domain, &self.knowledge),
            Fragment::Tls,
        )
        .await?;
        Ok(cached.fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_hostname_matches() {
        assert!(hostname_matches("example.com", "EXAMPLE.com."));
        assert!(hostname_matches("*.example.com", "www.example.com"));
        assert!(!hostname_matches("*.example.com", "example.com"));
        assert!(!hostname_matches("*.example.com", "a.b.example.com"));
        assert!(!hostname_matches("example.org", "example.com"));
    }

    #[test]
    fn test_garbage_certificate_is_rejected() {
        let kb = KnowledgeBase::builtin();
        let result = assess_certificate(b"not a certificate", "example.com", None, &kb, Utc::now());
        assert!(result.unwrap_err().starts_with("X.509 parse error"));
    }

    #[tokio::test]
    async fn test_expired_deadline_skips_handshake() {
        let kb = KnowledgeBase::builtin();
        let ctx = ProbeContext::new(Instant::now());
        let result = inspect_tls(&ctx, "example.com", &kb).await;
        assert!(matches!(result, Err(ProbeFailure::DeadlineExceeded)));
    }
}
