//! Static reference data consulted by the probes.
//!
//! Trusted and risky TLDs, URL shorteners, sensitive keywords, high-value
//! brands and RDAP endpoints all live here as plain tables. `KnowledgeBase`
//! indexes them once at startup and is then shared read-only by the probes.

use std::collections::{HashMap, HashSet};

/// Groups the sensitive keywords that may appear in a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum KeywordCategory {
    Auth,
    Account,
    Security,
    Finance,
    Support,
}

/// A brand that phishing pages like to impersonate, with the words that reveal it.
#[derive(Debug, Clone, Copy)]
pub struct BrandRule {
    pub name: &'static str,
    pub keywords: &'static [&'static str],
}

// --- Tables ---

/// Suffixes only handed out to verified entities.
static TRUSTED_TLDS: &[&str] = &[
    "aero", "bank", "coop", "creditunion", "insurance", "int", "pharmacy", "post", "museum", "resbank",
    // Academic
    "ac.at", "ac.bd", "ac.be", "ac.bw", "ac.cn", "ac.cr", "ac.cy", "ac.fj", "ac.in", "ac.id", "ac.ir",
    "ac.il", "ac.jp", "ac.ke", "ac.ma", "ac.nz", "ac.pg", "ac.rw", "ac.rs", "ac.za", "ac.kr", "ac.lk",
    "ac.tz", "ac.th", "ac.ug", "ac.uk", "ac.ae", "ac.zm", "ac.zw",
    "edu", "edu.ar", "edu.au", "edu.az", "edu.bd", "edu.br", "edu.cn", "edu.co", "edu.ec", "edu.eg",
    "edu.ee", "edu.gh", "edu.gr", "edu.hk", "edu.it", "edu.in", "edu.jm", "edu.jo", "edu.kz", "edu.lb",
    "edu.my", "edu.mt", "edu.mx", "edu.np", "edu.ng", "edu.om", "edu.pk", "edu.pe", "edu.ph", "edu.pl",
    "edu.qa", "edu.sa", "edu.rs", "edu.sg", "edu.za", "edu.es", "edu.lk", "edu.tw", "edu.tr", "edu.ua",
    "edu.uy", "edu.vn", "ernet.in", "res.in",
    // Government
    "gov", "gob.ar", "gov.ar", "gov.au", "gov.az", "gov.bd", "gov.be", "gov.bg", "gov.br", "gob.cl",
    "gov.cl", "gov.cn", "gov.hk", "gov.co", "gov.cy", "gov.cz", "gov.eg", "gov.gr", "gov.fi", "gouv.fr",
    "gov.hu", "gov.in", "go.id", "gov.ie", "gov.il", "gov.it", "go.jp", "gov.kz", "go.ke", "gov.lv",
    "gov.lt", "gov.my", "gov.mt", "gob.mx", "gov.ma", "gov.np", "govt.nz", "gov.ng", "gob.pe", "gov.pk",
    "gov.ph", "gov.pl", "gov.pt", "gov.ro", "gov.sg", "gov.sk", "gov.si", "go.kr", "gob.es", "gov.lk",
    "gov.se", "admin.ch", "gov.tw", "go.th", "gov.tr", "gov.ua", "gov.uk", "gov.scot", "gov.wales",
    "gub.uy", "gov.vn", "gc.ca", "canada.ca", "gouv.qc.ca", "ontario.ca",
    // Military and registry operators
    "mil", "mod.uk", "mil.uk", "mil.in", "mil.kr", "nic.in", "nic.uk", "nic.br", "nic.jp",
];

/// Cheap or free TLDs heavily used for throwaway domains.
static RISKY_TLDS: &[&str] = &["xyz", "top", "tk", "ml", "ga", "cf", "gq", "click", "zip"];

static URL_SHORTENERS: &[&str] = &[
    "bit.ly", "bitly.com", "tinyurl.com", "t.co", "goo.gl", "ow.ly", "is.gd", "buff.ly", "rebrand.ly",
    "cutt.ly", "shorturl.at", "tiny.cc", "bit.do", "rb.gy", "t.ly", "s.id", "v.gd", "lnkd.in", "trib.al",
    "soo.gd", "qr.ae", "adf.ly", "shorte.st", "tr.im", "clck.ru", "urlz.fr", "tiny.one", "short.io",
];

static URL_KEYWORDS: &[(&str, KeywordCategory)] = &[
    ("login", KeywordCategory::Auth),
    ("signin", KeywordCategory::Auth),
    ("signon", KeywordCategory::Auth),
    ("authenticate", KeywordCategory::Auth),
    ("securelogin", KeywordCategory::Auth),
    ("sign", KeywordCategory::Auth),
    ("user", KeywordCategory::Auth),
    ("session", KeywordCategory::Auth),
    ("passcode", KeywordCategory::Auth),
    ("access", KeywordCategory::Auth),
    ("token", KeywordCategory::Auth),
    ("account", KeywordCategory::Account),
    ("verify", KeywordCategory::Account),
    ("update", KeywordCategory::Account),
    ("reset", KeywordCategory::Account),
    ("recovery", KeywordCategory::Account),
    ("unlock", KeywordCategory::Account),
    ("validate", KeywordCategory::Account),
    ("approval", KeywordCategory::Account),
    ("credentials", KeywordCategory::Account),
    ("secure", KeywordCategory::Security),
    ("security", KeywordCategory::Security),
    ("alert", KeywordCategory::Security),
    ("warning", KeywordCategory::Security),
    ("notice", KeywordCategory::Security),
    ("paypal", KeywordCategory::Finance),
    ("banking", KeywordCategory::Finance),
    ("wallet", KeywordCategory::Finance),
    ("billing", KeywordCategory::Finance),
    ("invoice", KeywordCategory::Finance),
    ("transaction", KeywordCategory::Finance),
    ("payment", KeywordCategory::Finance),
    ("webscr", KeywordCategory::Finance),
    ("support", KeywordCategory::Support),
    ("helpdesk", KeywordCategory::Support),
    ("contact", KeywordCategory::Support),
    ("service", KeywordCategory::Support),
    ("customer", KeywordCategory::Support),
];

static BRANDS: &[BrandRule] = &[
    BrandRule { name: "Google", keywords: &["google", "gmail", "youtube"] },
    BrandRule { name: "Microsoft", keywords: &["microsoft", "outlook", "office365", "azure", "windows"] },
    BrandRule { name: "Apple", keywords: &["apple", "icloud", "itunes", "iphone"] },
    BrandRule { name: "Amazon", keywords: &["amazon", "aws"] },
    BrandRule { name: "Facebook", keywords: &["facebook", "meta", "instagram", "whatsapp"] },
    BrandRule { name: "PayPal", keywords: &["paypal"] },
    BrandRule { name: "Netflix", keywords: &["netflix"] },
    BrandRule { name: "Adobe", keywords: &["adobe"] },
    BrandRule {
        name: "Bank",
        keywords: &["sbi", "hdfc", "icici", "chase", "bank of america", "wells fargo", "hsbc", "citibank"],
    },
    BrandRule { name: "Binance", keywords: &["binance", "coinbase", "kraken"] },
];

/// Authoritative RDAP base URLs for the TLDs we see most.
static RDAP_SERVERS: &[(&str, &str)] = &[
    ("com", "https://rdap.verisign.com/com/v1"),
    ("net", "https://rdap.verisign.com/net/v1"),
    ("org", "https://rdap.publicinterestregistry.org/rdap"),
    ("info", "https://rdap.identitydigital.services/rdap"),
    ("biz", "https://rdap.nic.biz"),
    ("io", "https://rdap.identitydigital.services/rdap"),
    ("co", "https://rdap.nic.co"),
    ("me", "https://rdap.identitydigital.services/rdap"),
    ("tv", "https://rdap.nic.tv"),
    ("cc", "https://tld-rdap.verisign.com/cc/v1"),
];

/// Used when a TLD has no entry in `RDAP_SERVERS`; it redirects to the right registry.
pub const RDAP_BOOTSTRAP: &str = "https://rdap.org";

/// SHA-256 fingerprints (uppercase hex) of certificates known to front abuse.
static BAD_CERT_FINGERPRINTS: &[&str] =
    &["DEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF"];

// --- Index ---

/// Indexed view over the static tables.
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    trusted_tlds: HashSet<&'static str>,
    risky_tlds: HashSet<&'static str>,
    shorteners: HashSet<&'static str>,
    keywords: HashMap<&'static str, KeywordCategory>,
    brands: &'static [BrandRule],
    rdap_servers: HashMap<&'static str, &'static str>,
    bad_fingerprints: HashSet<&'static str>,
}

impl KnowledgeBase {
    pub fn builtin() -> Self {
        Self {
            trusted_tlds: TRUSTED_TLDS.iter().copied().collect(),
            risky_tlds: RISKY_TLDS.iter().copied().collect(),
            shorteners: URL_SHORTENERS.iter().copied().collect(),
            keywords: URL_KEYWORDS.iter().copied().collect(),
            brands: BRANDS,
            rdap_servers: RDAP_SERVERS.iter().copied().collect(),
            bad_fingerprints: BAD_CERT_FINGERPRINTS.iter().copied().collect(),
        }
    }

    /// A suffix is trusted when it, one of its parent suffixes, or the
    /// registrable domain itself (e.g. `canada.ca`) is listed. Parent
    /// suffixes cover private entries such as `service.gov.uk` under `gov.uk`.
    pub fn is_trusted(&self, suffix: &str, domain: &str) -> bool {
        self.trusted_tlds.contains(domain)
            || std::iter::successors(Some(suffix), |s| s.split_once('.').map(|(_, parent)| parent))
                .any(|candidate| self.trusted_tlds.contains(candidate))
    }

    /// Risk is judged on the last label, so `foo.co.tk` counts as `tk`.
    pub fn is_risky(&self, suffix: &str) -> bool {
        let last = suffix.rsplit('.').next().unwrap_or(suffix);
        self.risky_tlds.contains(last)
    }

    pub fn is_shortener(&self, domain: &str) -> bool {
        self.shorteners.contains(domain)
    }

    pub fn keyword_category(&self, word: &str) -> Option<KeywordCategory> {
        self.keywords.get(word).copied()
    }

    pub fn brands(&self) -> &[BrandRule] {
        self.brands
    }

    pub fn rdap_server(&self, tld: &str) -> &str {
        self.rdap_servers.get(tld).copied().unwrap_or(RDAP_BOOTSTRAP)
    }

    pub fn is_blacklisted_certificate(&self, fingerprint: &str) -> bool {
        self.bad_fingerprints.contains(fingerprint)
    }
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tld_lists() {
        let kb = KnowledgeBase::builtin();
        assert!(kb.is_trusted("gov.uk", "service.gov.uk"));
        assert!(kb.is_trusted("ca", "canada.ca"));
        assert!(kb.is_trusted("service.gov.uk", "tax.service.gov.uk"));
        assert!(!kb.is_trusted("co.uk", "shop.co.uk"));
        assert!(!kb.is_trusted("com", "example.com"));
        assert!(kb.is_risky("xyz"));
        assert!(kb.is_risky("co.tk"));
        assert!(!kb.is_risky("com"));
    }

    #[test]
    fn test_keyword_categories() {
        let kb = KnowledgeBase::builtin();
        assert_eq!(kb.keyword_category("login"), Some(KeywordCategory::Auth));
        assert_eq!(kb.keyword_category("webscr"), Some(KeywordCategory::Finance));
        assert_eq!(kb.keyword_category("example"), None);
        assert_eq!(KeywordCategory::Support.to_string(), "support");
    }

    #[test]
    fn test_rdap_falls_back_to_bootstrap() {
        let kb = KnowledgeBase::builtin();
        assert_eq!(kb.rdap_server("com"), "https://rdap.verisign.com/com/v1");
        assert_eq!(kb.rdap_server("dev"), RDAP_BOOTSTRAP);
    }

    #[test]
    fn test_shorteners_and_fingerprints() {
        let kb = KnowledgeBase::builtin();
        assert!(kb.is_shortener("bit.ly"));
        assert!(!kb.is_shortener("example.com"));
        assert!(kb.is_blacklisted_certificate(&"DEADBEEF".repeat(8)));
    }
}
