// src/core/runner.rs

//! Runs every probe concurrently under one shared deadline and folds their
//! fragments into a single `AnalysisOutput`.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::core::error::{ProbeError, ProbeFailure};
use crate::core::models::{AnalysisOutput, Fragment, Input};

/// One independent signal gatherer.
///
/// A probe produces exactly one `Fragment`. It returns `Ok` for best-effort
/// results and `Err` only when its check could not be attempted at all.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Stable identifier used for cache keys, timings and error attribution.
    fn name(&self) -> &'static str;

    async fn run(&self, input: &Input, ctx: &ProbeContext) -> Result<Fragment, ProbeFailure>;
}

/// The per-analysis deadline handed to every probe.
#[derive(Debug, Clone, Copy)]
pub struct ProbeContext {
    deadline: Instant,
}

impl ProbeContext {
    pub fn new(deadline: Instant) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// The smaller of `limit` and the time left before the deadline.
    pub fn budget(&self, limit: Duration) -> Duration {
        limit.min(self.remaining())
    }

    /// Runs `fut` for at most `budget(limit)`.
    pub async fn bounded<F: Future>(&self, limit: Duration, fut: F) -> Result<F::Output, ProbeFailure> {
        let budget = self.budget(limit);
        if budget.is_zero() {
            return Err(ProbeFailure::DeadlineExceeded);
        }
        tokio::time::timeout(budget, fut).await.map_err(|_| ProbeFailure::Timeout(budget))
    }
}

/// What the runner hands back once all probes are done or the deadline passed.
#[derive(Debug, Default)]
pub struct RunReport {
    pub output: AnalysisOutput,
    pub errors: Vec<ProbeError>,
    pub deadline_exceeded: bool,
}

enum Outcome {
    Skipped(&'static str),
    Finished {
        probe: &'static str,
        elapsed: Duration,
        result: Result<Fragment, ProbeFailure>,
    },
}

impl RunReport {
    fn absorb(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Skipped(probe) => {
                debug!(probe, "Deadline reached before the probe started, skipping.");
                self.deadline_exceeded = true;
            }
            Outcome::Finished { probe, elapsed, result } => {
                self.output.record_timing(probe, elapsed);
                match result {
                    Ok(fragment) => {
                        debug!(probe, elapsed_ms = elapsed.as_millis() as u64, "Probe finished.");
                        self.output.apply(fragment);
                    }
                    Err(cause) => {
                        warn!(probe, error = %cause, "Probe failed.");
                        self.errors.push(ProbeError { probe, cause });
                    }
                }
            }
        }
    }
}

/// Launches every probe at once and collects their fragments.
///
/// At most `max_concurrency` probes run at the same time. A probe that has
/// not started by the deadline is skipped without leaving a trace in the
/// output. Probes still running at the deadline are aborted and their
/// groups stay zero-valued. A failing or panicking probe never affects its
/// siblings.
///
/// # Arguments
///
/// * `input` - The shared, read-only request input.
/// * `probes` - The probes to run.
/// * `deadline` - Absolute point in time after which nothing new is collected.
/// * `max_concurrency` - Upper bound on probes running simultaneously.
///
/// # Returns
///
/// A `RunReport` with the merged output, the collected errors and whether the deadline was hit.
pub async fn run_probes(
    input: Arc<Input>,
    probes: &[Arc<dyn Probe>],
    deadline: Instant,
    max_concurrency: usize,
) -> RunReport {
    let permits = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let ctx = ProbeContext::new(deadline);
    let mut tasks = JoinSet::new();

    for probe in probes {
        let probe = Arc::clone(probe);
        let input = Arc::clone(&input);
        let permits = Arc::clone(&permits);
        tasks.spawn(async move {
            let name = probe.name();
            let Ok(Ok(_permit)) = timeout_at(deadline, permits.acquire_owned()).await else {
                return Outcome::Skipped(name);
            };
            if ctx.is_expired() {
                return Outcome::Skipped(name);
            }

            let started = Instant::now();
            let result = AssertUnwindSafe(probe.run(&input, &ctx))
                .catch_unwind()
                .await
                .unwrap_or(Err(ProbeFailure::Panicked));
            Outcome::Finished { probe: name, elapsed: started.elapsed(), result }
        });
    }

    let mut report = RunReport::default();
    loop {
        match timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(Ok(outcome))) => report.absorb(outcome),
            Ok(Some(Err(e))) => warn!(error = %e, "Probe task ended abnormally."),
            Ok(None) => break,
            Err(_) => {
                warn!(pending = tasks.len(), "Analysis deadline reached, aborting remaining probes.");
                report.deadline_exceeded = true;
                tasks.shutdown().await;
                break;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::target::parse_target;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed(&'static str, Fragment);

    #[async_trait]
    impl Probe for Fixed {
        fn name(&self) -> &'static str {
            self.0
        }
        async fn run(&self, _input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
            Ok(self.1.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl Probe for Failing {
        fn name(&self) -> &'static str {
            "ip_resolution"
        }
        async fn run(&self, input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
            Err(ProbeFailure::NoAddresses(input.domain.clone()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Probe for Panicking {
        fn name(&self) -> &'static str {
            "content_check"
        }
        async fn run(&self, _input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
            panic!("malformed page")
        }
    }

    struct Sleepy {
        delay: Duration,
        started: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Probe for Sleepy {
        fn name(&self) -> &'static str {
            "whois_lookup"
        }
        async fn run(&self, _input: &Input, _ctx: &ProbeContext) -> Result<Fragment, ProbeFailure> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Fragment::Rank(7))
        }
    }

    fn input() -> Arc<Input> {
        Arc::new(Input::new("https://example.com", parse_target("https://example.com").unwrap(), None))
    }

    #[tokio::test]
    async fn test_failures_do_not_affect_siblings() {
        let probes: Vec<Arc<dyn Probe>> = vec![
            Arc::new(Fixed("domain_rank", Fragment::Rank(15_000))),
            Arc::new(Failing),
            Arc::new(Panicking),
            Arc::new(Fixed("subdomain_check", Fragment::Subdomains(1))),
        ];
        let deadline = Instant::now() + Duration::from_secs(5);

        let report = run_probes(input(), &probes, deadline, 8).await;

        assert_eq!(report.output.rank, 15_000);
        assert_eq!(report.output.subdomain_count, 1);
        assert!(!report.deadline_exceeded);
        assert_eq!(report.output.timings.len(), 4);

        let mut messages: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
        messages.sort();
        assert_eq!(
            messages,
            vec!["content_check: probe panicked", "ip_resolution: no addresses found for example.com"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_skips_everything() {
        let started = Arc::new(AtomicUsize::new(0));
        let probes: Vec<Arc<dyn Probe>> = vec![
            Arc::new(Fixed("domain_rank", Fragment::Rank(1))),
            Arc::new(Sleepy { delay: Duration::from_millis(1), started: Arc::clone(&started) }),
        ];

        let report = run_probes(input(), &probes, Instant::now(), 8).await;

        assert_eq!(started.load(Ordering::SeqCst), 0);
        assert_eq!(report.output.rank, 0);
        assert!(report.output.timings.is_empty());
        assert!(report.errors.is_empty());
        assert!(report.deadline_exceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_is_aborted_at_deadline() {
        let started = Arc::new(AtomicUsize::new(0));
        let probes: Vec<Arc<dyn Probe>> = vec![
            Arc::new(Fixed("subdomain_check", Fragment::Subdomains(2))),
            Arc::new(Sleepy { delay: Duration::from_secs(30), started: Arc::clone(&started) }),
        ];
        let deadline = Instant::now() + Duration::from_secs(5);

        let report = run_probes(input(), &probes, deadline, 8).await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(report.output.subdomain_count, 2);
        assert_eq!(report.output.rank, 0);
        assert!(!report.output.timings.contains_key("whois_lookup"));
        assert!(report.deadline_exceeded);
        assert!(report.errors.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_probe_skipped_when_permit_arrives_too_late() {
        let started = Arc::new(AtomicUsize::new(0));
        let probes: Vec<Arc<dyn Probe>> = vec![
            Arc::new(Sleepy { delay: Duration::from_secs(10), started: Arc::clone(&started) }),
            Arc::new(Sleepy { delay: Duration::from_secs(10), started: Arc::clone(&started) }),
        ];
        let deadline = Instant::now() + Duration::from_secs(2);

        let report = run_probes(input(), &probes, deadline, 1).await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(report.output.rank, 0);
        assert!(report.output.timings.is_empty());
        assert!(report.errors.is_empty());
        assert!(report.deadline_exceeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_respects_remaining_budget() {
        let ctx = ProbeContext::new(Instant::now() + Duration::from_millis(100));
        assert_eq!(ctx.budget(Duration::from_millis(800)), Duration::from_millis(100));

        let result = ctx.bounded(Duration::from_millis(800), tokio::time::sleep(Duration::from_secs(1))).await;
        assert!(matches!(result, Err(ProbeFailure::Timeout(d)) if d == Duration::from_millis(100)));

        let expired = ProbeContext::new(Instant::now());
        assert!(expired.is_expired());
        assert!(matches!(expired.bounded(Duration::from_secs(1), async {}).await, Err(ProbeFailure::DeadlineExceeded)));
    }
}
