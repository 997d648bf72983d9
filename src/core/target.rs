// src/core/target.rs

//! URL validation and the domain helpers shared by the analyzer and the probes.

use std::net::IpAddr;

use chrono::{DateTime, Datelike, Utc};
use url::{Host, Url};

use crate::core::error::AnalyzeError;

/// A validated analysis target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub url: Url,
    pub host: String,
    pub domain: String,
    pub unicode_domain: String,
    pub is_ip: bool,
}

/// Validates a user supplied URL and extracts its registrable domain.
///
/// A bare host such as `example.com/path` gets `https://` prepended. Only
/// `http` and `https` URLs with a host are accepted. IP hosts are their own
/// domain.
///
/// # Arguments
///
/// * `raw` - The URL as received from the caller.
///
/// # Returns
///
/// The parsed `Target`, or `AnalyzeError::InvalidUrl` describing the problem.
pub fn parse_target(raw: &str) -> Result<Target, AnalyzeError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AnalyzeError::InvalidUrl("url is empty".to_string()));
    }

    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&candidate).map_err(|e| AnalyzeError::InvalidUrl(format!("{trimmed}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AnalyzeError::InvalidUrl(format!(
            "unsupported scheme '{}', expected http or https",
            url.scheme()
        )));
    }

    let (host, is_ip) = match url.host() {
        Some(Host::Domain(name)) => (name.trim_end_matches('.').to_ascii_lowercase(), false),
        Some(Host::Ipv4(ip)) => (ip.to_string(), true),
        Some(Host::Ipv6(ip)) => (ip.to_string(), true),
        None => return Err(AnalyzeError::InvalidUrl(format!("{trimmed}: missing host"))),
    };
    if host.is_empty() {
        return Err(AnalyzeError::InvalidUrl(format!("{trimmed}: missing host")));
    }

    let domain = if is_ip {
        host.clone()
    } else {
        registrable_domain(&host)
            .ok_or_else(|| AnalyzeError::InvalidUrl(format!("cannot determine registrable domain of {host}")))?
    };
    let unicode_domain = to_unicode(&domain);

    Ok(Target { url, host, domain, unicode_domain, is_ip })
}

/// Returns the eTLD+1 of a host, or the host itself when it is an IP address.
pub fn registrable_domain(host: &str) -> Option<String> {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<IpAddr>().is_ok() {
        return Some(host);
    }
    psl::domain_str(&host).map(str::to_string)
}

/// Number of labels to the left of the registrable domain.
pub fn subdomain_count(host: &str, domain: &str) -> usize {
    if host == domain || host.parse::<IpAddr>().is_ok() {
        return 0;
    }
    match host.strip_suffix(domain).and_then(|prefix| prefix.strip_suffix('.')) {
        Some(prefix) if !prefix.is_empty() => prefix.split('.').count(),
        _ => 0,
    }
}

pub fn to_unicode(domain: &str) -> String {
    let (unicode, result) = idna::domain_to_unicode(domain);
    if result.is_err() {
        return domain.to_string();
    }
    unicode
}

/// Describes how long ago a domain was registered.
///
/// # Returns
///
/// A human readable age such as `"3 years 2 months"` and the age in whole days.
pub fn describe_age(created: DateTime<Utc>, now: DateTime<Utc>) -> (String, i64) {
    if created > now {
        return ("registration date is in the future".to_string(), 0);
    }

    let days = (now - created).num_days();
    let mut years = now.year() - created.year();
    let mut months = now.month() as i32 - created.month() as i32;
    if now.day() < created.day() {
        months -= 1;
    }
    if months < 0 {
        years -= 1;
        months += 12;
    }

    if years <= 0 && months <= 0 {
        let human = match days {
            0 => "registered today".to_string(),
            1 => "1 day old".to_string(),
            2..=29 => format!("{days} days old"),
            _ => "less than a month old".to_string(),
        };
        return (human, days);
    }

    let mut parts = Vec::new();
    match years {
        0 => {}
        1 => parts.push("1 year".to_string()),
        n => parts.push(format!("{n} years")),
    }
    match months {
        0 => {}
        1 => parts.push("1 month".to_string()),
        n => parts.push(format!("{n} months")),
    }
    (parts.join(" "), days)
}
