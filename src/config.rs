// config.rs - Run configuration and per-target scan context

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::payloads::PayloadCatalog;
use crate::target::Target;

// ═══════════════════════════════════════════════════════════════════════════
// DEFAULTS
// ═══════════════════════════════════════════════════════════════════════════

pub const VERSION: &str = "2.0.0";
pub const DEFAULT_THREADS: usize = 10;
pub const DEFAULT_DELAY_SECS: f64 = 1.0;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const MAX_URLS: usize = 1000;
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/112.0.0.0 Safari/537.36";

/// Pause between the two verification probes of one attempt
pub const PROBE_DELAY: Duration = Duration::from_secs(1);
/// Pause after each header/value pair inside a URL task
pub const PAIR_DELAY: Duration = Duration::from_millis(500);
/// Tasks submitted between two submission pauses
pub const SUBMIT_BATCH: usize = 10;

pub const PAYLOADS_FILE: &str = "payloads.json";
pub const URLS_FILE: &str = "discovered_urls.txt";
pub const RESULTS_FILE: &str = "results.txt";
pub const METRICS_FILE: &str = "scan_metrics.json";
pub const ALL_RESULTS_FILE: &str = "all_results.txt";
pub const REPORT_FILE: &str = "report.html";

/// Scanning mode. Shown in the console and metrics only; probing is identical in every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[default]
    Standard,
    Aggressive,
    Stealth,
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanMode::Standard => "standard",
            ScanMode::Aggressive => "aggressive",
            ScanMode::Stealth => "stealth",
        };
        f.write_str(name)
    }
}

/// Settings shared by every target of one run
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Concurrent URL tasks
    pub threads: usize,
    /// Pause applied every `SUBMIT_BATCH` task submissions
    pub delay: Duration,
    /// Per-request timeout
    pub timeout: Duration,
    pub mode: ScanMode,
    pub output_dir: PathBuf,
    pub verbose: bool,
    pub probe_delay: Duration,
    pub pair_delay: Duration,
    /// Cancelled on Ctrl-C; discovery and URL tasks stop at their next request
    pub cancel: CancellationToken,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            delay: Duration::from_secs_f64(DEFAULT_DELAY_SECS),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            mode: ScanMode::Standard,
            output_dir: PathBuf::from("cache_scan"),
            verbose: false,
            probe_delay: PROBE_DELAY,
            pair_delay: PAIR_DELAY,
            cancel: CancellationToken::new(),
        }
    }
}

impl ScanConfig {
    /// Zero every politeness delay. Used by tests and local targets.
    pub fn without_delays(mut self) -> Self {
        self.delay = Duration::ZERO;
        self.probe_delay = Duration::ZERO;
        self.pair_delay = Duration::ZERO;
        self
    }
}

/// Everything the engine needs to know about one target, built once and passed down
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub target: Target,
    pub catalog: Arc<PayloadCatalog>,
    pub target_dir: PathBuf,
    pub timeout: Duration,
    pub mode: ScanMode,
    pub verbose: bool,
    pub cancel: CancellationToken,
}

impl ScanContext {
    pub fn new(target: Target, catalog: PayloadCatalog, config: &ScanConfig) -> Self {
        let target_dir = config.output_dir.join(target.dir_name());
        Self {
            target,
            catalog: Arc::new(catalog),
            target_dir,
            timeout: config.timeout,
            mode: config.mode,
            verbose: config.verbose,
            cancel: config.cancel.clone(),
        }
    }

    pub fn payloads_path(&self) -> PathBuf {
        self.target_dir.join(PAYLOADS_FILE)
    }

    pub fn urls_path(&self) -> PathBuf {
        self.target_dir.join(URLS_FILE)
    }

    pub fn results_path(&self) -> PathBuf {
        self.target_dir.join(RESULTS_FILE)
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.target_dir.join(METRICS_FILE)
    }

    pub fn dir(&self) -> &Path {
        &self.target_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ScanConfig::default();
        assert_eq!(config.threads, 10);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.mode, ScanMode::Standard);
    }

    #[test]
    fn test_without_delays() {
        let config = ScanConfig::default().without_delays();
        assert_eq!(config.delay, Duration::ZERO);
        assert_eq!(config.probe_delay, Duration::ZERO);
        assert_eq!(config.pair_delay, Duration::ZERO);
        assert_eq!(config.threads, DEFAULT_THREADS);
    }

    #[test]
    fn test_context_paths_live_under_target_dir() {
        let target = Target::normalize("example.com:8443").unwrap();
        let catalog = PayloadCatalog::generate(&target.netloc()).unwrap();
        let config = ScanConfig {
            output_dir: PathBuf::from("out"),
            ..ScanConfig::default()
        };
        let ctx = ScanContext::new(target, catalog, &config);
        assert_eq!(ctx.dir(), Path::new("out/example.com_8443"));
        assert_eq!(ctx.results_path(), PathBuf::from("out/example.com_8443/results.txt"));
    }
}
