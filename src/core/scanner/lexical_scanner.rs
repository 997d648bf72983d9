// src/core/scanner/lexical_scanner.rs

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::core::cache::{RANK_TTL, cache_through};
use crate::core::error::ProbeFailure;
use crate::core::knowledge_base::KnowledgeBase;
use crate::core::models::{Fragment, Input, KeywordMatches, TldInfo, UrlStructure};
use crate::core::rank::RankTable;
use crate::core::runner::{Probe, ProbeContext};
use crate::core::target::subdomain_count;

/// URLs longer than this are flagged as too long.
const MAX_URL_LENGTH: usize = 75;
/// URLs with more slashes than this are flagged as too deep.
const MAX_SLASHES: usize = 5;

static NON_ALPHANUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

// --- Pure checks ---

/// Looks up the public suffix of a domain and classifies it.
pub fn classify_tld(domain: &str, knowledge: &KnowledgeBase) -> TldInfo {
    let (tld, is_icann) = match psl::suffix(domain.as_bytes()) {
        Some(suffix) => (
            String::from_utf8_lossy(suffix.as_bytes()).into_owned(),
            suffix.is_known() && suffix.typ() == Some(psl::Type::Icann),
        ),
        None => (domain.rsplit('.').next().unwrap_or_default().to_string(), false),
    };
    TldInfo {
        is_trusted: knowledge.is_trusted(&tld, domain),
        is_risky: knowledge.is_risky(&tld),
        is_icann,
        tld,
    }
}

/// True when the host is an IPv4 or IPv6 literal.
pub fn uses_ip_literal(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok()
}

/// True when the caller typed an IDNA-encoded label into the host.
pub fn contains_punycode(url: &url::Url) -> bool {
    url.host_str()
        .is_some_and(|host| host.split('.').any(|label| label.to_ascii_lowercase().starts_with("xn--")))
}

/// Flags URLs longer than 75 characters or with more than five slashes.
pub fn url_structure(raw: &str) -> UrlStructure {
    UrlStructure {
        too_long: raw.chars().count() > MAX_URL_LENGTH,
        too_deep: raw.matches('/').count() > MAX_SLASHES,
    }
}

/// Splits the URL into alphanumeric words and collects the sensitive ones.
pub fn find_keywords(raw: &str, knowledge: &KnowledgeBase) -> KeywordMatches {
    let lowered = raw.to_lowercase();
    let mut found: Vec<String> = Vec::new();
    let mut categories: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for word in NON_ALPHANUMERIC.split(&lowered).filter(|w| !w.is_empty()) {
        let Some(category) = knowledge.keyword_category(word) else {
            continue;
        };
        if found.iter().any(|f| f == word) {
            continue;
        }
        found.push(word.to_string());
        categories.entry(category.to_string()).or_default().push(word.to_string());
    }

    KeywordMatches { has_keywords: !found.is_empty(), found, categories }
}

/// True when the decoded domain contains letters outside ASCII.
pub fn has_homoglyph(unicode_domain: &str) -> bool {
    unicode_domain.chars().any(|c| !c.is_ascii() && c.is_alphabetic())
}

// --- Probes ---

pub struct RankProbe {
    ranks: Arc<RankTable>,
}

impl RankProbe {
    pub fn new(ranks: Arc<RankTable>) -> Self {
        Self { ranks }
    }
}

#[async_trait]
impl Probe for RankProbe {
    fn name(&self) -> &'static str {
        "domain_rank"
    }

    async fn run(&self, input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        let key = format!("{}:{}", self.name(), input.domain);
        let ranks = &self.ranks;
        let cached = cache_through(
            input.cache(),
            &key,
            RANK_TTL,
            || async { Ok(ranks.lookup(&input.domain)) },
            Fragment::Rank,
        )
        .await?;
        Ok(cached.fragment)
    }
}

pub struct TldProbe {
    knowledge: Arc<KnowledgeBase>,
}

impl TldProbe {
    pub fn new(knowledge: Arc<KnowledgeBase>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Probe for TldProbe {
    fn name(&self) -> &'static str {
        "tld_check"
    }

    async fn run(&self, input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        let info = classify_tld(&input.domain, &self.knowledge);
        debug!(domain = %input.domain, tld = %info.tld, icann = info.is_icann, "Classified TLD.");
        Ok(Fragment::Tld(info))
    }
}

pub struct IpLiteralProbe;

#[async_trait]
impl Probe for IpLiteralProbe {
    fn name(&self) -> &'static str {
        "ip_check"
    }

    async fn run(&self, input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        Ok(Fragment::UsesIp(uses_ip_literal(&input.host)))
    }
}

pub struct PunycodeProbe;

#[async_trait]
impl Probe for PunycodeProbe {
    fn name(&self) -> &'static str {
        "punycode_check"
    }

    async fn run(&self, input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        Ok(Fragment::Punycode(contains_punycode(&input.url)))
    }
}

pub struct ShortenerProbe {
    knowledge: Arc<KnowledgeBase>,
}

impl ShortenerProbe {
    pub fn new(knowledge: Arc<KnowledgeBase>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Probe for ShortenerProbe {
    fn name(&self) -> &'static str {
        "shortener_check"
    }

    async fn run(&self, input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        let is_shortener = self.knowledge.is_shortener(&input.host) || self.knowledge.is_shortener(&input.domain);
        Ok(Fragment::Shortener(is_shortener))
    }
}

pub struct StructureProbe;

#[async_trait]
impl Probe for StructureProbe {
    fn name(&self) -> &'static str {
        "url_structure_check"
    }

    async fn run(&self, input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        Ok(Fragment::Structure(url_structure(&input.raw)))
    }
}

pub struct KeywordProbe {
    knowledge: Arc<KnowledgeBase>,
}

impl KeywordProbe {
    pub fn new(knowledge: Arc<KnowledgeBase>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl Probe for KeywordProbe {
    fn name(&self) -> &'static str {
        "keywords_check"
    }

    async fn run(&self, input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        Ok(Fragment::Keywords(find_keywords(&input.raw, &self.knowledge)))
    }
}

pub struct SubdomainProbe;

#[async_trait]
impl Probe for SubdomainProbe {
    fn name(&self) -> &'static str {
        "subdomain_check"
    }

    async fn run(&self, input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        Ok(Fragment::Subdomains(subdomain_count(&input.host, &input.domain)))
    }
}

pub struct HomoglyphProbe;

#[async_trait]
impl Probe for HomoglyphProbe {
    fn name(&self) -> &'static str {
        "homoglyph_check"
    }

    async fn run(&self, input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
        Ok(Fragment::Homoglyph(has_homoglyph(&input.unicode_domain)))
    }
}
