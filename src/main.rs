// main.rs - cacherust command line
// Scans one target or a file of targets, then aggregates findings and renders the HTML report.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cacherust::config::{DEFAULT_DELAY_SECS, DEFAULT_THREADS, DEFAULT_TIMEOUT_SECS, VERSION};
use cacherust::http::HttpTransport;
use cacherust::{aggregate_findings, logger, report, scan_target, ReqwestTransport, ScanConfig, ScanMode};

/// cacherust - Web cache poisoning scanner
#[derive(Parser, Debug)]
#[command(
    name = "cacherust",
    version = VERSION,
    about = "Detects verified 302 web cache poisoning through unkeyed request headers",
    long_about = r#"
╔═══════════════════════════════════════════════════════════════════════════════╗
║                   CACHERUST - Web Cache Poisoning Scanner                      ║
╚═══════════════════════════════════════════════════════════════════════════════╝

For every target cacherust:

  • validates the target answers over HTTPS
  • builds a catalog of unkeyed-header payloads (X-Forwarded-Host, X-Original-URL, ...)
  • discovers same-host URLs from well-known paths and a shallow crawl
  • verifies each URL x payload with a baseline and two cache-busted probes

Only 302 responses whose Location reflects the injected value, identically in both
probes, are reported.

EXAMPLES:

  cacherust -t example.com
  cacherust -f targets.txt -j 20 -d 0.5 -o results
"#
)]
struct Args {
    // ═══════════════════════════════════════════════════════════════════════════
    // TARGET OPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Single target (example.com, https://example.com:8443)
    #[arg(short, long, value_name = "TARGET", help_heading = "Target Options",
          conflicts_with = "file", required_unless_present = "file")]
    target: Option<String>,

    /// File containing targets
    #[arg(short, long, value_name = "FILE", help_heading = "Target Options",
          help = "Scan multiple targets from a file (one target per line, # for comments)")]
    file: Option<PathBuf>,

    // ═══════════════════════════════════════════════════════════════════════════
    // SCAN OPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Scanning mode
    #[arg(short, long, value_enum, default_value_t = ScanMode::Standard, help_heading = "Scan Options")]
    mode: ScanMode,

    /// Concurrent URL workers
    #[arg(short = 'j', long, default_value_t = DEFAULT_THREADS, value_name = "NUM", help_heading = "Performance")]
    threads: usize,

    /// Seconds to pause every 10 task submissions
    #[arg(short, long, default_value_t = DEFAULT_DELAY_SECS, value_name = "SECONDS", help_heading = "Performance")]
    delay: f64,

    /// Request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, value_name = "SECONDS", help_heading = "Performance")]
    timeout: u64,

    // ═══════════════════════════════════════════════════════════════════════════
    // OUTPUT OPTIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Output directory (default: cache_scan_<timestamp>)
    #[arg(short, long, value_name = "DIR", help_heading = "Output")]
    output: Option<PathBuf>,

    /// Log rejected verifications too
    #[arg(short, long, help_heading = "Output")]
    verbose: bool,
}

impl Args {
    fn scan_config(&self) -> ScanConfig {
        let output_dir = self.output.clone().unwrap_or_else(|| {
            PathBuf::from(format!("cache_scan_{}", chrono::Local::now().format("%Y%m%d_%H%M%S")))
        });
        ScanConfig {
            threads: self.threads.max(1),
            delay: Duration::from_secs_f64(self.delay.max(0.0)),
            timeout: Duration::from_secs(self.timeout),
            mode: self.mode,
            output_dir,
            verbose: self.verbose,
            ..ScanConfig::default()
        }
    }
}

/// Per-run tallies printed in the final summary
#[derive(Default)]
struct RunSummary {
    scanned: usize,
    skipped: usize,
    verified: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    print_banner();

    let targets = match &args.file {
        Some(file) => read_targets(file)?,
        None => args.target.iter().cloned().collect(),
    };

    let config = args.scan_config();
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create output directory: {}", config.output_dir.display()))?;

    logger::info(format!("Output directory: {}", config.output_dir.display()));
    logger::info(format!(
        "Mode: {} | Threads: {} | Delay: {:.1}s | Timeout: {}s",
        config.mode,
        config.threads,
        config.delay.as_secs_f64(),
        config.timeout.as_secs()
    ));

    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(config.timeout).context("Failed to build HTTP client")?);

    let cancel = config.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            logger::warn("Scan interrupted by user, saving partial results...");
            cancel.cancel();
        }
    });

    let started = Instant::now();
    let mut summary = RunSummary::default();

    // every URL task has stopped once this returns, interrupted or not
    let outcome = run_targets(&targets, &config, transport, &mut summary).await;

    finish_run(&config.output_dir, started.elapsed().as_secs_f64(), &summary);

    if config.cancel.is_cancelled() {
        std::process::exit(1);
    }
    outcome
}

/// Scan targets one after another; only resource errors and Ctrl-C stop the run
async fn run_targets(
    targets: &[String],
    config: &ScanConfig,
    transport: Arc<dyn HttpTransport>,
    summary: &mut RunSummary,
) -> Result<()> {
    for (i, input) in targets.iter().enumerate() {
        if config.cancel.is_cancelled() {
            break;
        }
        println!();
        println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
        println!("{}", format!("  🎯 Target {}/{}: {}", i + 1, targets.len(), input).cyan().bold());
        println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());

        match scan_target(input, config, Arc::clone(&transport)).await {
            Ok(outcome) if outcome.interrupted => {
                summary.verified += outcome.stats.verified;
                break;
            }
            Ok(outcome) => {
                summary.scanned += 1;
                summary.verified += outcome.stats.verified;
                if config.verbose {
                    println!("{}", outcome.metrics.summary().dimmed());
                }
            }
            Err(err) if err.is_fatal() => {
                logger::error(format!("Fatal error while scanning {}: {}", input, err));
                return Err(err).context("Scan aborted");
            }
            Err(err) => {
                summary.skipped += 1;
                logger::error(format!("Skipping {}: {}", input, err));
            }
        }
    }
    Ok(())
}

/// Aggregate per-target findings and render the report; failures are logged, not raised
fn finish_run(output_dir: &Path, elapsed_secs: f64, summary: &RunSummary) {
    logger::progress("Generating final scan report...");

    let total_findings = match aggregate_findings(output_dir) {
        Ok((path, count)) => {
            logger::success(format!("Aggregated {} finding(s) into {}", count, path.display()));
            count
        }
        Err(err) => {
            logger::error(format!("Failed to aggregate results: {}", err));
            0
        }
    };

    match report::generate_html_report(output_dir, elapsed_secs) {
        Ok(path) => logger::success(format!("Report generated: {}", path.display())),
        Err(err) => logger::error(format!("Failed to generate report: {}", err)),
    }

    println!();
    println!("{}", "═══════════════════════════════════════════════════════════════".green().bold());
    println!("{}", "  📊 SCAN SUMMARY".green().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".green().bold());
    println!("  Targets scanned:      {}", summary.scanned);
    println!("  Targets skipped:      {}", summary.skipped);
    println!("  Verified findings:    {}", total_findings.max(summary.verified).to_string().red().bold());
    println!("  Duration:             {:.2}s", elapsed_secs);
    println!("  Results:              {}", output_dir.display());
    println!("{}", "═══════════════════════════════════════════════════════════════".green().bold());
}

/// One target per line; blank lines and `#` comments are skipped. Exits 1 when nothing is usable.
fn read_targets(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        logger::error(format!("Target file not found: {}", path.display()));
        std::process::exit(1);
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read target file: {}", path.display()))?;
    let targets: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();

    if targets.is_empty() {
        logger::error("No valid targets found in file");
        eprintln!("{}", "  Make sure the file contains one target per line".yellow());
        eprintln!("{}", "  Lines starting with # are treated as comments".yellow());
        std::process::exit(1);
    }

    logger::success(format!("Loaded {} target(s) from {}", targets.len(), path.display()));
    Ok(targets)
}

fn print_banner() {
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", "   ██████╗ █████╗  ██████╗██╗  ██╗███████╗".cyan().bold());
    println!("{}", "  ██╔════╝██╔══██╗██╔════╝██║  ██║██╔════╝".cyan().bold());
    println!("{}", "  ██║     ███████║██║     ███████║█████╗  ".cyan().bold());
    println!("{}", "  ██║     ██╔══██║██║     ██╔══██║██╔══╝  ".cyan().bold());
    println!("{}", "  ╚██████╗██║  ██║╚██████╗██║  ██║███████╗".cyan().bold());
    println!("{}", "   ╚═════╝╚═╝  ╚═╝ ╚═════╝╚═╝  ╚═╝╚══════╝ rust".cyan().bold());
    println!("{}", "═══════════════════════════════════════════════════════════════".cyan().bold());
    println!("{}", format!("  cacherust v{} - Web Cache Poisoning Scanner", VERSION).white().bold());
    println!("{}", "  Verified 302 reflection | Unkeyed headers | Cache busting".white());
    println!("{}", "═══════════════════════════════════════════════════════════════\n".cyan().bold());
}
