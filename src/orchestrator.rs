// orchestrator.rs - Parallel URL x payload testing
// One task per URL behind a semaphore; pairs run sequentially inside a task.
// A failing task is logged and counted, its siblings keep going. Cancellation stops new
// submissions and every task returns at its next pair, so nothing outlives `run`.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::config::{ScanConfig, ScanContext, SUBMIT_BATCH};
use crate::error::{Result, ScanError};
use crate::findings::{FindingLog, VerifiedFinding};
use crate::http::HttpTransport;
use crate::logger::Level;
use crate::payloads::PayloadCatalog;
use crate::progress::ProgressSink;
use crate::verifier::{PoisoningVerifier, Verdict};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Verification attempts, one per (url, header, value)
    pub attempts: usize,
    pub verified: usize,
    pub rejected: usize,
    /// URL tasks that ended in an error or a panic
    pub failed_tasks: usize,
}

#[derive(Default)]
struct Counters {
    attempts: AtomicUsize,
    verified: AtomicUsize,
    rejected: AtomicUsize,
}

pub struct ScanOrchestrator {
    transport: Arc<dyn HttpTransport>,
    threads: usize,
    delay: Duration,
    probe_delay: Duration,
    pair_delay: Duration,
}

impl ScanOrchestrator {
    pub fn new(transport: Arc<dyn HttpTransport>, config: &ScanConfig) -> Self {
        Self {
            transport,
            threads: config.threads.max(1),
            delay: config.delay,
            probe_delay: config.probe_delay,
            pair_delay: config.pair_delay,
        }
    }

    /// Test every URL against every catalog pair. Resource errors are returned once all tasks end.
    /// When `ctx.cancel` fires the partial stats are returned after every task has stopped.
    pub async fn run(
        &self,
        ctx: &ScanContext,
        urls: &[String],
        log: &FindingLog,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<ScanStats> {
        let semaphore = Arc::new(Semaphore::new(self.threads));
        let counters = Arc::new(Counters::default());
        let verifier = Arc::new(
            PoisoningVerifier::new(Arc::clone(&self.transport), ctx.timeout)
                .with_probe_delay(self.probe_delay),
        );

        progress.set_total((urls.len() * ctx.catalog.total_variants()) as u64);

        let mut handles = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            if ctx.cancel.is_cancelled() {
                break;
            }
            if i % SUBMIT_BATCH == 0 && !self.delay.is_zero() {
                tokio::select! {
                    _ = sleep(self.delay) => {}
                    _ = ctx.cancel.cancelled() => break,
                }
            }

            let task = UrlTask {
                url: url.clone(),
                catalog: Arc::clone(&ctx.catalog),
                verifier: Arc::clone(&verifier),
                log: log.clone(),
                progress: Arc::clone(&progress),
                counters: Arc::clone(&counters),
                pair_delay: self.pair_delay,
                verbose: ctx.verbose,
                cancel: ctx.cancel.clone(),
            };
            let semaphore = Arc::clone(&semaphore);

            let handle = tokio::spawn(async move {
                let acquired = tokio::select! {
                    acquired = semaphore.acquire() => acquired,
                    _ = task.cancel.cancelled() => return Ok(()),
                };
                let Ok(_permit) = acquired else {
                    return Ok(());
                };
                task.run().await
            });
            handles.push((url.clone(), handle));
        }

        let joined = futures::future::join_all(
            handles
                .into_iter()
                .map(|(url, handle)| async move { (url, handle.await) }),
        )
        .await;

        let mut failed_tasks = 0;
        let mut fatal: Option<ScanError> = None;
        for (url, outcome) in joined {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    failed_tasks += 1;
                    progress.message(Level::Error, &format!("Error testing {}: {}", url, err));
                    if err.is_fatal() && fatal.is_none() {
                        fatal = Some(err);
                    }
                }
                Err(join_err) => {
                    failed_tasks += 1;
                    progress.message(Level::Error, &format!("Task for {} aborted: {}", url, join_err));
                }
            }
        }

        if let Some(err) = fatal {
            return Err(err);
        }

        Ok(ScanStats {
            attempts: counters.attempts.load(Ordering::SeqCst),
            verified: counters.verified.load(Ordering::SeqCst),
            rejected: counters.rejected.load(Ordering::SeqCst),
            failed_tasks,
        })
    }
}

/// Everything one URL task owns
struct UrlTask {
    url: String,
    catalog: Arc<PayloadCatalog>,
    verifier: Arc<PoisoningVerifier>,
    log: FindingLog,
    progress: Arc<dyn ProgressSink>,
    counters: Arc<Counters>,
    pair_delay: Duration,
    verbose: bool,
    cancel: CancellationToken,
}

impl UrlTask {
    async fn run(self) -> Result<()> {
        for (header, value) in self.catalog.pairs() {
            if self.cancel.is_cancelled() {
                break;
            }
            self.progress.set_label(&format!("{} {}", header, self.url));
            // an interrupted attempt is dropped, not counted
            let verification = tokio::select! {
                verification = self.verifier.verify(&self.url, header, value) => verification,
                _ = self.cancel.cancelled() => break,
            };
            self.counters.attempts.fetch_add(1, Ordering::SeqCst);

            match verification.verdict {
                Verdict::Verified(success) => {
                    self.counters.verified.fetch_add(1, Ordering::SeqCst);
                    let finding = VerifiedFinding::from_success(&self.url, header, value, &success);
                    self.log.append(&finding)?;
                    self.progress.message(
                        Level::Success,
                        &format!(
                            "Verified 302 cache poisoning: {} with {}: {} -> {}",
                            self.url, header, value, success.location
                        ),
                    );
                }
                Verdict::Rejected(reason) => {
                    self.counters.rejected.fetch_add(1, Ordering::SeqCst);
                    if self.verbose {
                        self.progress.message(
                            Level::Info,
                            &format!("{} {}: {} rejected ({})", self.url, header, value, reason),
                        );
                    }
                }
            }

            self.progress.advance(1);
            if !self.pair_delay.is_zero() {
                tokio::select! {
                    _ = sleep(self.pair_delay) => {}
                    _ = self.cancel.cancelled() => break,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RESULTS_FILE;
    use crate::findings::read_findings;
    use crate::http::stub::StubTransport;
    use crate::http::{ProbeRequest, ProbeResult};
    use crate::payloads::HeaderPayloads;
    use crate::progress::CountingProgress;
    use crate::target::Target;

    fn catalog() -> PayloadCatalog {
        PayloadCatalog::new(
            vec![HeaderPayloads {
                name: "X-Forwarded-Host".into(),
                values: vec!["evil.com".into(), "localhost".into()],
            }],
            vec![],
        )
        .unwrap()
    }

    fn context(threads: usize, verbose: bool) -> (ScanConfig, ScanContext) {
        let config = ScanConfig {
            threads,
            verbose,
            ..ScanConfig::default()
        }
        .without_delays();
        let target = Target::normalize("example.com").unwrap();
        let ctx = ScanContext::new(target, catalog(), &config);
        (config, ctx)
    }

    fn evil_redirect(req: &ProbeRequest) -> ProbeResult {
        match req.header("X-Forwarded-Host") {
            Some("evil.com") => ProbeResult::new(&req.url, 302).with_header("Location", "https://evil.com/dashboard"),
            _ => ProbeResult::new(&req.url, 200).with_body("<html>ok</html>"),
        }
    }

    fn urls(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| format!("https://example.com{}", p)).collect()
    }

    #[tokio::test]
    async fn test_every_pair_is_attempted_at_any_concurrency() {
        for threads in [1, 3] {
            let dir = tempfile::tempdir().unwrap();
            let log = FindingLog::create(&dir.path().join(RESULTS_FILE)).unwrap();
            let transport = Arc::new(StubTransport::new(|req| Ok(ProbeResult::new(&req.url, 200))));
            let (config, ctx) = context(threads, false);
            let progress = Arc::new(CountingProgress::quiet());

            let stats = ScanOrchestrator::new(transport.clone(), &config)
                .run(&ctx, &urls(&["/a", "/b", "/c"]), &log, progress.clone())
                .await
                .unwrap();

            assert_eq!(stats.attempts, 6, "threads = {}", threads);
            assert_eq!(stats.rejected, 6);
            assert_eq!(stats.verified, 0);
            assert_eq!(progress.advanced(), 6);
            // baseline + two probes per attempt
            assert_eq!(transport.count(), 18);
            assert!(log.is_empty());
        }
    }

    #[tokio::test]
    async fn test_reflected_redirect_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let log = FindingLog::create(&dir.path().join(RESULTS_FILE)).unwrap();
        let transport = Arc::new(StubTransport::new(|req| Ok(evil_redirect(req))));
        let (config, ctx) = context(2, false);

        let stats = ScanOrchestrator::new(transport, &config)
            .run(&ctx, &urls(&["/dashboard"]), &log, Arc::new(CountingProgress::quiet()))
            .await
            .unwrap();

        assert_eq!(stats.verified, 1);
        let findings = read_findings(log.path());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].header, "X-Forwarded-Host: evil.com");
        assert_eq!(findings[0].location, "https://evil.com/dashboard");
        assert_eq!(findings[0].url, "https://example.com/dashboard");
    }

    #[tokio::test]
    async fn test_differing_locations_record_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let log = FindingLog::create(&dir.path().join(RESULTS_FILE)).unwrap();
        let counter = AtomicUsize::new(0);
        let transport = Arc::new(StubTransport::new(move |req| match req.header("X-Forwarded-Host") {
            Some(value) => {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                Ok(ProbeResult::new(&req.url, 302).with_header("Location", format!("https://{}/{}", value, n)))
            }
            None => Ok(ProbeResult::new(&req.url, 200)),
        }));
        let (config, ctx) = context(1, true);
        let progress = Arc::new(CountingProgress::quiet());

        let stats = ScanOrchestrator::new(transport, &config)
            .run(&ctx, &urls(&["/"]), &log, progress.clone())
            .await
            .unwrap();

        assert_eq!(stats.verified, 0);
        assert!(log.is_empty());
        // verbose runs report each rejection
        assert_eq!(
            progress.messages().iter().filter(|(level, _)| *level == Level::Info).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let log = FindingLog::create(&dir.path().join(RESULTS_FILE)).unwrap();
        let transport = Arc::new(StubTransport::new(|req| {
            if req.url.starts_with("https://example.com/boom") {
                panic!("handler exploded");
            }
            Ok(evil_redirect(req))
        }));
        let (config, ctx) = context(2, false);
        let progress = Arc::new(CountingProgress::quiet());

        let stats = ScanOrchestrator::new(transport, &config)
            .run(&ctx, &urls(&["/boom", "/fine"]), &log, progress.clone())
            .await
            .unwrap();

        assert_eq!(stats.failed_tasks, 1);
        assert_eq!(stats.verified, 1);
        assert_eq!(read_findings(log.path())[0].url, "https://example.com/fine");
        assert!(progress
            .messages()
            .iter()
            .any(|(level, text)| *level == Level::Error && text.contains("/boom")));
    }

    #[tokio::test]
    async fn test_cancellation_stops_every_task() {
        let dir = tempfile::tempdir().unwrap();
        let log = FindingLog::create(&dir.path().join(RESULTS_FILE)).unwrap();
        let (config, ctx) = context(1, false);
        let cancel = ctx.cancel.clone();
        // the first request of the run interrupts it
        let transport = Arc::new(StubTransport::new(move |req| {
            cancel.cancel();
            Ok(evil_redirect(req))
        }));

        let stats = ScanOrchestrator::new(transport.clone(), &config)
            .run(&ctx, &urls(&["/a", "/b", "/c", "/d", "/e"]), &log, Arc::new(CountingProgress::quiet()))
            .await
            .unwrap();

        assert!(stats.attempts <= 1);
        assert_eq!(stats.failed_tasks, 0);
        let sent = transport.count();
        assert!(sent <= 3, "sent {} requests", sent);

        // no task is left running after run returns
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.count(), sent);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_unwritable_log_fails_the_run() {
        let log = FindingLog::create(std::path::Path::new("/dev/full")).unwrap();
        let transport = Arc::new(StubTransport::new(|req| Ok(evil_redirect(req))));
        let (config, ctx) = context(2, false);

        let result = ScanOrchestrator::new(transport.clone(), &config)
            .run(&ctx, &urls(&["/a", "/b"]), &log, Arc::new(CountingProgress::quiet()))
            .await;

        assert!(matches!(result, Err(ScanError::Resource { .. })));
        // both URLs were still attempted
        assert!(transport
            .requests()
            .iter()
            .any(|r| r.url.starts_with("https://example.com/b")));
    }
}
