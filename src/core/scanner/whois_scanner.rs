// src/core/scanner/whois_scanner.rs

//! Domain registration lookups.
//!
//! RDAP is queried first. When it fails the classic WHOIS protocol is used,
//! starting at IANA and following its referral to the registry.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::core::cache::{WHOIS_TTL, cache_through};
use crate::core::error::{ProbeFailure, SetupError};
use crate::core::knowledge_base::KnowledgeBase;
use crate::core::models::{Fragment, Input, RegistrationData, RegistrationSource};
use crate::core::runner::{Probe, ProbeContext};
use crate::core::target::describe_age;

const RDAP_TIMEOUT: Duration = Duration::from_millis(1500);
const WHOIS_TIMEOUT: Duration = Duration::from_millis(1000);
const WHOIS_ROOT: &str = "whois.iana.org";
const WHOIS_PORT: u16 = 43;
/// WHOIS answers are small; anything larger is truncated.
const MAX_WHOIS_BYTES: u64 = 64 * 1024;

/// Builds the client used for RDAP. Registries may redirect, so redirects stay enabled.
pub fn build_registry_client() -> Result<Client, SetupError> {
    let client = Client::builder()
        .user_agent(concat!("VanguardRS/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_millis(500))
        .build()?;
    Ok(client)
}

// --- Dates ---

/// Parses the date formats registries commonly emit.
pub fn parse_registry_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(date.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    // Date-only formats may be followed by a time or zone we do not need.
    let head = value.split_whitespace().next().unwrap_or(value);
    ["%Y-%m-%d", "%d-%b-%Y", "%Y.%m.%d", "%d.%m.%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(head, format).ok())
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

// --- RDAP ---

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RdapDomain {
    ldh_name: String,
    nameservers: Vec<RdapNameserver>,
    events: Vec<RdapEvent>,
    entities: Vec<RdapEntity>,
    status: Vec<String>,
    #[serde(rename = "secureDNS")]
    secure_dns: RdapSecureDns,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RdapNameserver {
    ldh_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RdapEvent {
    event_action: String,
    event_date: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RdapEntity {
    roles: Vec<String>,
    vcard_array: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RdapSecureDns {
    delegation_signed: bool,
}

impl RdapEntity {
    /// The `fn` (formatted name) property of the entity's jCard.
    fn formatted_name(&self) -> Option<String> {
        self.vcard_array
            .get(1)?
            .as_array()?
            .iter()
            .find(|property| property.get(0).and_then(|name| name.as_str()) == Some("fn"))?
            .get(3)?
            .as_str()
            .map(str::to_string)
    }
}

impl RdapDomain {
    fn into_registration(self, domain: &str) -> RegistrationData {
        let event_date = |action: &str| {
            self.events
                .iter()
                .find(|event| event.event_action.eq_ignore_ascii_case(action))
                .and_then(|event| parse_registry_date(&event.event_date))
        };
        let registrar = self
            .entities
            .iter()
            .find(|entity| entity.roles.iter().any(|role| role == "registrar"))
            .and_then(RdapEntity::formatted_name)
            .unwrap_or_default();

        RegistrationData {
            domain: if self.ldh_name.is_empty() { domain.to_string() } else { self.ldh_name.to_lowercase() },
            registrar,
            created: event_date("registration"),
            updated: event_date("last changed"),
            expiry: event_date("expiration"),
            nameservers: self.nameservers.iter().map(|ns| ns.ldh_name.to_lowercase()).collect(),
            status: self.status.clone(),
            dnssec: self.secure_dns.delegation_signed,
            source: RegistrationSource::Rdap,
            ..Default::default()
        }
    }
}

/// Queries `{base}/domain/{domain}` and normalizes the answer.
pub async fn fetch_rdap(client: &Client, ctx: &ProbeContext, base: &str, domain: &str) -> Result<RegistrationData, ProbeFailure> {
    let url = format!("{}/domain/{domain}", base.trim_end_matches('/'));
    debug!(url = %url, "Querying RDAP.");
    let response = ctx
        .bounded(RDAP_TIMEOUT, client.get(&url).header("Accept", "application/rdap+json").send())
        .await??
        .error_for_status()?;
    let body: RdapDomain = ctx.bounded(RDAP_TIMEOUT, response.json()).await??;
    Ok(body.into_registration(domain))
}

// --- WHOIS ---

/// Sends one WHOIS query and reads the whole answer.
async fn whois_query(ctx: &ProbeContext, server: &str, query: &str) -> Result<String, ProbeFailure> {
    debug!(server, query, "Querying WHOIS.");
    let exchange = async {
        let mut stream = TcpStream::connect((server, WHOIS_PORT)).await?;
        stream.write_all(format!("{query}\r\n").as_bytes()).await?;
        let mut buf = Vec::new();
        stream.take(MAX_WHOIS_BYTES).read_to_end(&mut buf).await?;
        Ok::<_, std::io::Error>(buf)
    };
    let bytes = ctx
        .bounded(WHOIS_TIMEOUT, exchange)
        .await?
        .map_err(|e| ProbeFailure::Registration(format!("whois {server}: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Splits a WHOIS line into a lowercase key and its value.
fn whois_pair(line: &str) -> Option<(String, &str)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('%') || line.starts_with('#') || line.starts_with(">>>") {
        return None;
    }
    let (key, value) = line.split_once(':')?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    Some((key.trim().to_ascii_lowercase(), value))
}

/// The registry WHOIS server IANA refers to, if any.
pub fn whois_referral(iana_answer: &str) -> Option<String> {
    iana_answer
        .lines()
        .filter_map(whois_pair)
        .find(|(key, _)| key == "refer" || key == "whois")
        .map(|(_, value)| value.to_string())
}

/// Extracts registration fields from a free-text WHOIS answer.
pub fn parse_whois(text: &str, domain: &str) -> Result<RegistrationData, ProbeFailure> {
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("no match for") || lowered.contains("not found") || lowered.contains("no entries found") {
        return Err(ProbeFailure::Registration(format!("{domain} is not registered according to WHOIS")));
    }

    let mut data = RegistrationData { domain: domain.to_string(), source: RegistrationSource::Whois, ..Default::default() };
    for (key, value) in text.lines().filter_map(whois_pair) {
        match key.as_str() {
            "domain name" | "domain" if data.domain == domain => data.domain = value.to_lowercase(),
            "registrar" | "sponsoring registrar" | "registrar name" if data.registrar.is_empty() => {
                data.registrar = value.to_string()
            }
            "creation date" | "created" | "created on" | "registered on" | "registration time" | "domain registration date"
                if data.created.is_none() =>
            {
                data.created = parse_registry_date(value)
            }
            "updated date" | "last updated" | "last modified" | "changed" if data.updated.is_none() => {
                data.updated = parse_registry_date(value)
            }
            "registry expiry date"
            | "registrar registration expiration date"
            | "expiration date"
            | "expiry date"
            | "expires"
            | "paid-till"
                if data.expiry.is_none() =>
            {
                data.expiry = parse_registry_date(value)
            }
            "name server" | "nserver" | "nameserver" => {
                let host = value.split_whitespace().next().unwrap_or(value).trim_end_matches('.').to_lowercase();
                if !data.nameservers.contains(&host) {
                    data.nameservers.push(host);
                }
            }
            "domain status" | "status" => {
                let status = value.split_whitespace().next().unwrap_or(value).to_string();
                if !data.status.contains(&status) {
                    data.status.push(status);
                }
            }
            "dnssec" => {
                let value = value.to_ascii_lowercase();
                data.dnssec = value.starts_with("signed") || value == "yes";
            }
            _ => {}
        }
    }

    if data.created.is_none() && data.registrar.is_empty() && data.nameservers.is_empty() {
        return Err(ProbeFailure::Registration(format!("WHOIS answer for {domain} had no registration data")));
    }
    Ok(data)
}

/// Asks IANA which registry serves the domain, then asks that registry.
pub async fn fetch_whois(ctx: &ProbeContext, domain: &str) -> Result<RegistrationData, ProbeFailure> {
    let iana_answer = whois_query(ctx, WHOIS_ROOT, domain).await?;
    let answer = match whois_referral(&iana_answer) {
        Some(server) => {
            debug!(domain, server = %server, "Following WHOIS referral.");
            whois_query(ctx, &server, domain).await?
        }
        None => iana_answer,
    };
    parse_whois(&answer, domain)
}

// --- Lookup ---

/// Looks up registration data for a domain, RDAP first and WHOIS second.
///
/// # Returns
/// The normalized record with its age filled in, or an error when both sources fail.
pub async fn lookup_registration(
    client: &Client,
    ctx: &ProbeContext,
    knowledge: &KnowledgeBase,
    domain: &str,
) -> Result<RegistrationData, ProbeFailure> {
    if domain.parse::<IpAddr>().is_ok() {
        return Err(ProbeFailure::Registration("IP addresses have no domain registration".to_string()));
    }

    let tld = domain.rsplit('.').next().unwrap_or(domain);
    let mut data = match fetch_rdap(client, ctx, knowledge.rdap_server(tld), domain).await {
        Ok(data) => data,
        Err(rdap_error) => {
            warn!(domain, error = %rdap_error, "RDAP lookup failed, falling back to WHOIS.");
            fetch_whois(ctx, domain).await.map_err(|whois_error| {
                ProbeFailure::Registration(format!("rdap: {rdap_error}; whois: {whois_error}"))
            })?
        }
    };

    if let Some(created) = data.created {
        let (human, days) = describe_age(created, Utc::now());
        data.age_human = Some(human);
        data.age_days = Some(days);
    }
    info!(domain, source = %data.source, registrar = %data.registrar, age_days = ?data.age_days, "Registration lookup finished.");
    Ok(data)
}

pub struct RegistrationProbe {
    client: Client,
    knowledge: Arc<KnowledgeBase>,
}

impl RegistrationProbe {
    pub fn new(client: Client, knowledge: Arc<KnowledgeBase>) -> Self {
        Self { client, knowledge }
    }
}

#[async_trait]
impl Probe for RegistrationProbe {
    fn name(&self) -> &'static str {
        "whois_lookup"
    }

    async fn run(&self, input: &Input, ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        let key = format!("{}:{}", self.name(), input.domain);
        let cached = cache_through(
            input.cache(),
            &key,
            WHOIS_TTL,
            || lookup_registration(&self.client, ctx, &self.knowledge, &input.domain),
            Fragment::Registration,
        )
        .await?;
        Ok(cached.fragment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tokio::time::Instant;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SAMPLE_RDAP: &str = r#"{
        "objectClassName": "domain",
        "ldhName": "EXAMPLE.COM",
        "status": ["client delete prohibited", "client transfer prohibited"],
        "events": [
            {"eventAction": "registration", "eventDate": "1995-08-14T04:00:00Z"},
            {"eventAction": "expiration", "eventDate": "2025-08-13T04:00:00Z"},
            {"eventAction": "last changed", "eventDate": "2024-08-14T07:01:34Z"}
        ],
        "entities": [{
            "roles": ["registrar"],
            "vcardArray": ["vcard", [["version", {}, "text", "4.0"], ["fn", {}, "text", "RESERVED-Internet Assigned Numbers Authority"]]]
        }],
        "nameservers": [{"ldhName": "A.IANA-SERVERS.NET"}, {"ldhName": "B.IANA-SERVERS.NET"}],
        "secureDNS": {"delegationSigned": true}
    }"#;

    const SAMPLE_WHOIS: &str = "\
% WHOIS answer
   Domain Name: EXAMPLE.NET
   Registrar: Example Registrar, Inc.
   Creation Date: 2003-03-19T05:00:00Z
   Updated Date: 2024-02-12T15:00:00Z
   Registry Expiry Date: 2026-03-18T04:00:00Z
   Domain Status: clientTransferProhibited https://icann.org/epp#clientTransferProhibited
   Name Server: NS1.EXAMPLE.NET
   Name Server: NS2.EXAMPLE.NET
   DNSSEC: unsigned
>>> Last update of whois database: 2024-06-01T00:00:00Z <<<
";

    #[test]
    fn test_parse_registry_date_formats() {
        let expected = Utc.with_ymd_and_hms(2003, 3, 19, 0, 0, 0).unwrap();
        assert_eq!(parse_registry_date("2003-03-19"), Some(expected));
        assert_eq!(parse_registry_date("19-Mar-2003"), Some(expected));
        assert_eq!(parse_registry_date("2003.03.19"), Some(expected));
        assert_eq!(parse_registry_date("2003-03-19 00:00:00"), Some(expected));
        assert_eq!(parse_registry_date("2003-03-19T00:00:00Z"), Some(expected));
        assert_eq!(parse_registry_date("not a date"), None);
        assert_eq!(parse_registry_date(""), None);
    }

    #[test]
    fn test_parse_rdap_answer() {
        let body: RdapDomain = serde_json::from_str(SAMPLE_RDAP).unwrap();
        let data = body.into_registration("example.com");

        assert_eq!(data.domain, "example.com");
        assert_eq!(data.registrar, "RESERVED-Internet Assigned Numbers Authority");
        assert_eq!(data.created, Some(Utc.with_ymd_and_hms(1995, 8, 14, 4, 0, 0).unwrap()));
        assert_eq!(data.expiry, Some(Utc.with_ymd_and_hms(2025, 8, 13, 4, 0, 0).unwrap()));
        assert_eq!(data.nameservers, vec!["a.iana-servers.net", "b.iana-servers.net"]);
        assert_eq!(data.status.len(), 2);
        assert!(data.dnssec);
        assert_eq!(data.source, RegistrationSource::Rdap);
    }

    #[test]
    fn test_parse_whois_answer() {
        let data = parse_whois(SAMPLE_WHOIS, "example.net").unwrap();

        assert_eq!(data.domain, "example.net");
        assert_eq!(data.registrar, "Example Registrar, Inc.");
        assert_eq!(data.created, Some(Utc.with_ymd_and_hms(2003, 3, 19, 5, 0, 0).unwrap()));
        assert_eq!(data.expiry, Some(Utc.with_ymd_and_hms(2026, 3, 18, 4, 0, 0).unwrap()));
        assert_eq!(data.nameservers, vec!["ns1.example.net", "ns2.example.net"]);
        assert_eq!(data.status, vec!["clientTransferProhibited"]);
        assert!(!data.dnssec);
        assert_eq!(data.source, RegistrationSource::Whois);
    }

    #[test]
    fn test_whois_unregistered_and_referral() {
        assert!(parse_whois("No match for \"NOPE-XYZ.COM\".", "nope-xyz.com").is_err());
        assert!(parse_whois("% nothing useful here", "example.com").is_err());

        let iana = "% IANA WHOIS server\n\nrefer:        whois.verisign-grs.com\n\ndomain:       COM\n";
        assert_eq!(whois_referral(iana).as_deref(), Some("whois.verisign-grs.com"));
        assert_eq!(whois_referral("domain: EXAMPLE"), None);
    }

    #[tokio::test]
    async fn test_fetch_rdap_from_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/domain/example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(SAMPLE_RDAP, "application/rdap+json"))
            .mount(&server)
            .await;

        let client = build_registry_client().unwrap();
        let ctx = ProbeContext::new(Instant::now() + Duration::from_secs(5));
        let data = fetch_rdap(&client, &ctx, &server.uri(), "example.com").await.unwrap();
        assert_eq!(data.nameservers.len(), 2);

        let missing = fetch_rdap(&client, &ctx, &server.uri(), "missing.com").await;
        assert!(matches!(missing, Err(ProbeFailure::Http(_))));
    }

    #[tokio::test]
    async fn test_ip_has_no_registration() {
        let client = build_registry_client().unwrap();
        let ctx = ProbeContext::new(Instant::now() + Duration::from_secs(5));
        let result = lookup_registration(&client, &ctx, &KnowledgeBase::builtin(), "192.168.1.1").await;
        assert!(matches!(result, Err(ProbeFailure::Registration(_))));
    }
}
