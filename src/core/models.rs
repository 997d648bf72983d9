// src/core/models.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::core::cache::Cache;
use crate::core::target::Target;

// --- Request Input ---

/// Everything a probe may read about the URL under analysis.
///
/// Built once by the analyzer and shared read-only by every probe.
pub struct Input {
    /// The URL exactly as the caller submitted it (trimmed).
    pub raw: String,
    /// The normalized URL, with a scheme.
    pub url: Url,
    /// Lowercase ASCII host, without IPv6 brackets.
    pub host: String,
    /// Registrable domain (eTLD+1), or the address itself for IP hosts.
    pub domain: String,
    /// Unicode rendering of `domain`.
    pub unicode_domain: String,
    pub is_ip: bool,
    pub cache: Option<Arc<dyn Cache>>,
}

impl Input {
    pub fn new(raw: &str, target: Target, cache: Option<Arc<dyn Cache>>) -> Self {
        Self {
            raw: raw.trim().to_string(),
            url: target.url,
            host: target.host,
            domain: target.domain,
            unicode_domain: target.unicode_domain,
            is_ip: target.is_ip,
            cache,
        }
    }

    pub fn cache(&self) -> Option<&dyn Cache> {
        self.cache.as_deref()
    }
}

// --- Lexical Models ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TldInfo {
    pub tld: String,
    pub is_trusted: bool,
    pub is_risky: bool,
    pub is_icann: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlStructure {
    pub too_long: bool,
    pub too_deep: bool,
}

// Sensitive words found in the URL, grouped by category name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordMatches {
    pub has_keywords: bool,
    pub found: Vec<String>,
    pub categories: BTreeMap<String, Vec<String>>,
}

// --- DNS Models ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsValidity {
    pub ns_valid: bool,
    pub ns_hosts: Vec<String>,
    pub mx_valid: bool,
    pub mx_hosts: Vec<String>,
}

// --- Registration Models ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RegistrationSource {
    #[default]
    Rdap,
    Whois,
}

// Registration record assembled from RDAP or WHOIS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationData {
    pub domain: String,
    pub registrar: String,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub expiry: Option<DateTime<Utc>>,
    pub nameservers: Vec<String>,
    pub status: Vec<String>,
    pub dnssec: bool,
    pub age_human: Option<String>,
    pub age_days: Option<i64>,
    pub source: RegistrationSource,
}

// --- HTTP Models ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectionResult {
    pub is_redirected: bool,
    pub chain: Vec<String>,
    pub final_url: String,
    #[serde(rename = "final_url_domain")]
    pub final_host: String,
    pub chain_length: usize,
    pub has_domain_jump: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpStatus {
    pub code: u16,
    pub text: String,
    pub success: bool,
    pub is_redirect: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProbeResult {
    pub redirection: RedirectionResult,
    pub status: HttpStatus,
    pub supports_hsts: bool,
}

// --- TLS Models ---

// The short certificate summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsSummary {
    pub present: bool,
    pub issuer: String,
    pub age_days: i64,
    pub hostname_mismatch: bool,
}

// The detailed certificate posture, with the reasons it looks suspicious.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SslPosture {
    pub domain: String,
    pub has_tls: bool,
    pub chain_valid: bool,
    pub issuer: String,
    pub not_before: Option<DateTime<Utc>>,
    pub not_after: Option<DateTime<Utc>>,
    pub age_days: i64,
    pub fingerprint_sha256: String,
    pub ct_logged: bool,
    pub known_bad_chain: bool,
    pub is_suspicious: bool,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsProbeResult {
    pub tls: TlsSummary,
    pub ssl: SslPosture,
}

// --- Randomness Models ---

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainRandomness {
    pub label: String,
    pub length: usize,
    pub entropy: f64,
    pub normalized_entropy: f64,
    pub vowel_ratio: f64,
    pub digit_ratio: f64,
    pub unique_char_ratio: f64,
    pub longest_consonant_run: usize,
    pub bigram_englishness: f64,
    pub randomness_score: f64,
    pub is_suspicious: bool,
    pub reasons: Vec<String>,
}

// --- Content Models ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormInfo {
    pub action: String,
    pub method: String,
    pub has_password: bool,
    pub has_username: bool,
    pub has_payment: bool,
    pub has_personal: bool,
    pub is_external: bool,
    pub is_hidden: bool,
    pub input_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IframeInfo {
    pub src: String,
    pub is_hidden: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandCheck {
    pub brand_found: Option<String>,
    pub is_mismatch: bool,
    pub detected_names: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    pub title: String,
    pub has_forms: bool,
    pub has_login_form: bool,
    pub has_payment_form: bool,
    pub has_personal_form: bool,
    pub forms: Vec<FormInfo>,
    pub iframes: Vec<IframeInfo>,
    pub has_hidden_iframe: bool,
    pub has_tracking_pixel: bool,
    pub brand: BrandCheck,
    pub fetch_ms: u64,
}

// --- Probe Fragments & Aggregate ---

/// The single piece of the aggregate a probe is allowed to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Rank(u32),
    Tld(TldInfo),
    UsesIp(bool),
    Punycode(bool),
    Shortener(bool),
    Structure(UrlStructure),
    Keywords(KeywordMatches),
    Subdomains(usize),
    Homoglyph(bool),
    IpAddresses(Vec<String>),
    Dns(DnsValidity),
    Registration(RegistrationData),
    Http(HttpProbeResult),
    Tls(TlsProbeResult),
    Randomness(DomainRandomness),
    Content(PageContent),
}

/// The aggregate feature vector of one analysis.
///
/// Starts zero-valued; the runner applies each probe's fragment to it.
/// Groups whose probe never ran keep their zero value.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOutput {
    pub rank: u32,
    pub tld: TldInfo,
    pub uses_ip: bool,
    pub contains_punycode: bool,
    pub is_shortener: bool,
    pub structure: UrlStructure,
    pub keywords: KeywordMatches,
    pub subdomain_count: usize,
    pub has_homoglyph: bool,
    pub ip_addresses: Vec<String>,
    pub dns: DnsValidity,
    pub registration: Option<RegistrationData>,
    pub http: HttpProbeResult,
    pub tls: Option<TlsProbeResult>,
    pub randomness: Option<DomainRandomness>,
    pub content: Option<PageContent>,
    pub timings: HashMap<&'static str, Duration>,
}

impl AnalysisOutput {
    /// Writes a fragment into the group it owns.
    pub fn apply(&mut self, fragment: Fragment) {
        match fragment {
            Fragment::Rank(rank) => self.rank = rank,
            Fragment::Tld(tld) => self.tld = tld,
            Fragment::UsesIp(uses_ip) => self.uses_ip = uses_ip,
            Fragment::Punycode(found) => self.contains_punycode = found,
            Fragment::Shortener(found) => self.is_shortener = found,
            Fragment::Structure(structure) => self.structure = structure,
            Fragment::Keywords(keywords) => self.keywords = keywords,
            Fragment::Subdomains(count) => self.subdomain_count = count,
            Fragment::Homoglyph(found) => self.has_homoglyph = found,
            Fragment::IpAddresses(ips) => self.ip_addresses = ips,
            Fragment::Dns(dns) => self.dns = dns,
            Fragment::Registration(data) => self.registration = Some(data),
            Fragment::Http(http) => self.http = http,
            Fragment::Tls(tls) => self.tls = Some(tls),
            Fragment::Randomness(randomness) => self.randomness = Some(randomness),
            Fragment::Content(content) => self.content = Some(content),
        }
    }

    pub fn record_timing(&mut self, probe: &'static str, elapsed: Duration) {
        self.timings.insert(probe, elapsed);
    }

    /// Probe timings, slowest first. Ties are ordered by name so the list is stable.
    pub fn sorted_timings(&self) -> Vec<TimingEntry> {
        let mut entries: Vec<(&'static str, Duration)> =
            self.timings.iter().map(|(name, elapsed)| (*name, *elapsed)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries
            .into_iter()
            .map(|(task, elapsed)| TimingEntry {
                task: task.to_string(),
                time: format_duration(elapsed),
            })
            .collect()
    }
}

/// Renders a duration in milliseconds with two decimals, e.g. `"12.34ms"`.
pub fn format_duration(elapsed: Duration) -> String {
    format!("{:.2}ms", elapsed.as_secs_f64() * 1000.0)
}

// --- Scoring Models ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum Verdict {
    Risky,
    Suspicious,
    Safe,
    Unclear,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reasons {
    pub good_reasons: Vec<String>,
    pub bad_reasons: Vec<String>,
    pub neutral_reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringResult {
    pub risk_score: u8,
    pub trust_score: u8,
    pub final_score: u8,
    pub verdict: Verdict,
    pub reasons: Reasons,
}

// --- Response Envelope ---

#[derive(Debug, Clone, Serialize)]
pub struct UrlFeatures {
    pub is_shortener: bool,
    pub uses_ip: bool,
    pub contains_punycode: bool,
    pub too_long: bool,
    pub too_deep: bool,
    pub subdomain_count: usize,
    pub has_homoglyph: bool,
    pub keywords: KeywordMatches,
}

#[derive(Debug, Clone, Serialize)]
pub struct Features {
    pub rank: u32,
    pub tld: TldInfo,
    pub url: UrlFeatures,
}

#[derive(Debug, Clone, Serialize)]
pub struct Infrastructure {
    pub ip_addresses: Vec<String>,
    pub nameservers_valid: bool,
    pub ns_hosts: Vec<String>,
    pub mx_records_valid: bool,
    pub mx_hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub redirection_result: RedirectionResult,
    pub http_status: HttpStatus,
    pub is_hsts_supported: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Security {
    pub tls: Option<TlsSummary>,
    pub ssl: Option<SslPosture>,
    pub domain_randomness: Option<DomainRandomness>,
    pub content: Option<PageContent>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingEntry {
    pub task: String,
    pub time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Performance {
    pub total_time: String,
    pub timings: Vec<TimingEntry>,
}

/// The JSON document returned by `/api/v1/analyze`.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResponse {
    pub url: String,
    pub domain: String,
    pub features: Features,
    pub infrastructure: Infrastructure,
    pub domain_info: Option<RegistrationData>,
    pub analysis: Analysis,
    pub security: Security,
    pub performance: Performance,
    pub result: ScoringResult,
    pub incomplete: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_apply_writes_only_the_owned_group() {
        let mut output = AnalysisOutput::default();
        output.apply(Fragment::Rank(42));
        output.apply(Fragment::Subdomains(3));

        assert_eq!(output.rank, 42);
        assert_eq!(output.subdomain_count, 3);
        assert_eq!(output.tld, TldInfo::default());
        assert!(output.registration.is_none());
        assert!(output.timings.is_empty());
    }

    #[test]
    fn test_sorted_timings_slowest_first() {
        let mut output = AnalysisOutput::default();
        output.record_timing("fast", Duration::from_millis(1));
        output.record_timing("slow", Duration::from_millis(250));
        output.record_timing("medium", Duration::from_millis(30));

        let names: Vec<String> = output.sorted_timings().into_iter().map(|t| t.task).collect();
        assert_eq!(names, vec!["slow", "medium", "fast"]);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_micros(12_346)), "12.35ms");
        assert_eq!(format_duration(Duration::ZERO), "0.00ms");
    }
}
