// src/core/analyzer.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::cache::Cache;
use crate::core::error::AnalyzeError;
use crate::core::models::{
    Analysis, AnalysisOutput, AnalysisResponse, Features, Infrastructure, Input, Performance, ScoringResult, Security,
    UrlFeatures, format_duration,
};
use crate::core::runner::{Probe, RunReport, run_probes};
use crate::core::scoring::synthesize;
use crate::core::target::parse_target;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct AnalyzerSettings {
    /// Deadline for one whole analysis.
    pub timeout: Duration,
    /// Upper bound on probes running at the same time.
    pub max_concurrency: usize,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self { timeout: DEFAULT_TIMEOUT, max_concurrency: DEFAULT_MAX_CONCURRENCY }
    }
}

/// Validates a URL, runs the probe set against it and scores the outcome.
pub struct Analyzer {
    probes: Vec<Arc<dyn Probe>>,
    cache: Option<Arc<dyn Cache>>,
    settings: AnalyzerSettings,
}

impl Analyzer {
    pub fn new(probes: Vec<Arc<dyn Probe>>, cache: Option<Arc<dyn Cache>>, settings: AnalyzerSettings) -> Self {
        Self { probes, cache, settings }
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    pub fn settings(&self) -> AnalyzerSettings {
        self.settings
    }

    /// Analyzes one URL.
    ///
    /// # Arguments
    ///
    /// * `raw` - The URL as submitted. A bare host gets `https://` prepended.
    ///
    /// # Returns
    ///
    /// The full response envelope. Probe failures and a missed deadline mark
    /// it incomplete instead of failing the call; only an unusable URL is an error.
    pub async fn analyze(&self, raw: &str) -> Result<AnalysisResponse, AnalyzeError> {
        let target = parse_target(raw)?;
        let started = Instant::now();
        let deadline = started + self.settings.timeout;

        if self.cache.is_none() {
            debug!("No cache configured, every probe will fetch.");
        }
        let input = Arc::new(Input::new(raw.trim(), target, self.cache.clone()));
        info!(url = %input.url, domain = %input.domain, probes = self.probes.len(), "Starting analysis.");

        let report = run_probes(Arc::clone(&input), &self.probes, deadline, self.settings.max_concurrency).await;
        let result = synthesize(&report.output);
        let total = started.elapsed();

        info!(
            domain = %input.domain,
            verdict = %result.verdict,
            final_score = result.final_score,
            failed = report.errors.len(),
            deadline_exceeded = report.deadline_exceeded,
            elapsed_ms = total.as_millis() as u64,
            "Analysis finished."
        );
        Ok(assemble(&input, report, result, total, self.settings.timeout))
    }
}

fn assemble(input: &Input, report: RunReport, result: ScoringResult, total: Duration, timeout: Duration) -> AnalysisResponse {
    let RunReport { output, errors, deadline_exceeded } = report;

    let mut messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
    if deadline_exceeded {
        warn!(domain = %input.domain, "Analysis deadline exceeded, result is partial.");
        messages.push(format!("analysis deadline of {}ms exceeded", timeout.as_millis()));
    }
    let timings = output.sorted_timings();

    let AnalysisOutput {
        rank,
        tld,
        uses_ip,
        contains_punycode,
        is_shortener,
        structure,
        keywords,
        subdomain_count,
        has_homoglyph,
        ip_addresses,
        dns,
        registration,
        http,
        tls,
        randomness,
        content,
        ..
    } = output;
    let (tls_summary, ssl) = match tls {
        Some(probe) => (Some(probe.tls), Some(probe.ssl)),
        None => (None, None),
    };

    AnalysisResponse {
        url: input.url.to_string(),
        domain: input.domain.clone(),
        features: Features {
            rank,
            tld,
            url: UrlFeatures {
                is_shortener,
                uses_ip,
                contains_punycode,
                too_long: structure.too_long,
                too_deep: structure.too_deep,
                subdomain_count,
                has_homoglyph,
                keywords,
            },
        },
        infrastructure: Infrastructure {
            ip_addresses,
            nameservers_valid: dns.ns_valid,
            ns_hosts: dns.ns_hosts,
            mx_records_valid: dns.mx_valid,
            mx_hosts: dns.mx_hosts,
        },
        domain_info: registration,
        analysis: Analysis {
            redirection_result: http.redirection,
            http_status: http.status,
            is_hsts_supported: http.supports_hsts,
        },
        security: Security { tls: tls_summary, ssl, domain_randomness: randomness, content },
        performance: Performance { total_time: format_duration(total), timings },
        result,
        incomplete: !messages.is_empty(),
        errors: messages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache::MemoryCache;
    use crate::core::error::ProbeFailure;
    use crate::core::knowledge_base::KnowledgeBase;
    use crate::core::models::{DnsValidity, Fragment, TldInfo, Verdict};
    use crate::core::runner::ProbeContext;
    use crate::core::scanner::lexical_scanner::{IpLiteralProbe, KeywordProbe, TldProbe};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Stub {
        name: &'static str,
        fragment: Fragment,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Probe for Stub {
        fn name(&self) -> &'static str {
            self.name
        }
        async fn run(&self, _input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.fragment.clone())
        }
    }

    struct Broken;

    #[async_trait]
    impl Probe for Broken {
        fn name(&self) -> &'static str {
            "whois_lookup"
        }
        async fn run(&self, _input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
            Err(ProbeFailure::Registration("registry unreachable".to_string()))
        }
    }

    struct Sleepy;

    #[async_trait]
    impl Probe for Sleepy {
        fn name(&self) -> &'static str {
            "http_combined_check"
        }
        async fn run(&self, _input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Fragment::Punycode(true))
        }
    }

    fn stub(name: &'static str, fragment: Fragment, calls: &Arc<AtomicUsize>) -> Arc<dyn Probe> {
        Arc::new(Stub { name, fragment, calls: Arc::clone(calls) })
    }

    fn established_probes(calls: &Arc<AtomicUsize>) -> Vec<Arc<dyn Probe>> {
        vec![
            stub("domain_rank", Fragment::Rank(50_000), calls),
            stub(
                "tld_check",
                Fragment::Tld(TldInfo { tld: "com".to_string(), is_trusted: false, is_risky: false, is_icann: true }),
                calls,
            ),
            stub(
                "dns_validity_check",
                Fragment::Dns(DnsValidity {
                    ns_valid: true,
                    ns_hosts: vec!["a.iana-servers.net".to_string()],
                    mx_valid: true,
                    mx_hosts: vec!["mail.example.com".to_string()],
                }),
                calls,
            ),
        ]
    }

    #[tokio::test]
    async fn test_invalid_url_runs_no_probe() {
        let calls = Arc::new(AtomicUsize::new(0));
        let analyzer = Analyzer::new(established_probes(&calls), None, AnalyzerSettings::default());

        let result = analyzer.analyze("ftp://example.com").await;
        assert!(matches!(result, Err(AnalyzeError::InvalidUrl(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_complete_analysis_envelope() {
        let calls = Arc::new(AtomicUsize::new(0));
        let analyzer = Analyzer::new(established_probes(&calls), None, AnalyzerSettings::default());

        let response = analyzer.analyze("example.com").await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(response.url, "https://example.com/");
        assert_eq!(response.domain, "example.com");
        assert_eq!(response.features.rank, 50_000);
        assert!(response.infrastructure.nameservers_valid);
        assert_eq!(response.infrastructure.mx_hosts, vec!["mail.example.com"]);
        assert!(response.domain_info.is_none());
        assert!(!response.incomplete);
        assert!(response.errors.is_empty());
        assert_eq!(response.performance.timings.len(), 3);
        assert_eq!(response.result.trust_score, 65);
        assert_eq!(response.result.verdict, Verdict::Suspicious);

        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("errors").is_none());
        assert_eq!(json["analysis"]["redirection_result"]["final_url_domain"], "");
    }

    #[tokio::test]
    async fn test_failed_probe_marks_response_incomplete() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut probes = established_probes(&calls);
        probes.push(Arc::new(Broken));
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let analyzer = Analyzer::new(probes, Some(cache), AnalyzerSettings::default());

        let response = analyzer.analyze("https://example.com").await.unwrap();
        assert!(response.incomplete);
        assert_eq!(
            response.errors,
            vec!["whois_lookup: registration lookup failed: registry unreachable".to_string()]
        );
        assert_eq!(response.features.rank, 50_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_is_reported() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut probes = established_probes(&calls);
        probes.push(Arc::new(Sleepy));
        let settings = AnalyzerSettings { timeout: Duration::from_millis(500), max_concurrency: 4 };
        let analyzer = Analyzer::new(probes, None, settings);

        let response = analyzer.analyze("https://example.com").await.unwrap();
        assert!(response.incomplete);
        assert_eq!(response.errors, vec!["analysis deadline of 500ms exceeded".to_string()]);
        assert!(!response.features.url.contains_punycode);
        assert!(response.performance.timings.iter().all(|t| t.task != "http_combined_check"));
    }

    #[tokio::test]
    async fn test_ip_login_url_scores_both_signals() {
        let knowledge = Arc::new(KnowledgeBase::builtin());
        let probes: Vec<Arc<dyn Probe>> = vec![
            Arc::new(IpLiteralProbe),
            Arc::new(KeywordProbe::new(Arc::clone(&knowledge))),
            Arc::new(TldProbe::new(knowledge)),
        ];
        let analyzer = Analyzer::new(probes, None, AnalyzerSettings::default());

        let response = analyzer.analyze("http://192.168.1.1/login").await.unwrap();
        assert!(response.features.url.uses_ip);
        assert_eq!(response.features.url.keywords.found, vec!["login".to_string()]);

        let bad = &response.result.reasons.bad_reasons;
        assert!(bad.iter().any(|r| r.contains("Raw IP")));
        assert!(bad.iter().any(|r| r == "Sensitive keywords found in URL: login"));
        assert_eq!(response.result.verdict, Verdict::Risky);
    }
}
