// scanner.rs - One target from validation to metrics
// validate -> catalog -> discover -> test -> metrics, all artifacts under <output>/<host>/
// An interrupted scan still finishes its bars and writes partial metrics.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{ScanConfig, ScanContext};
use crate::discovery::UrlDiscoverer;
use crate::error::{Result, ScanError};
use crate::findings::{read_findings, FindingLog};
use crate::http::HttpTransport;
use crate::logger;
use crate::metrics::ScanMetrics;
use crate::orchestrator::{ScanOrchestrator, ScanStats};
use crate::payloads::PayloadCatalog;
use crate::progress::{BarProgress, ProgressSink};
use crate::target::Target;

#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub target: Target,
    pub target_dir: PathBuf,
    pub urls: Vec<String>,
    pub stats: ScanStats,
    pub metrics: ScanMetrics,
    pub interrupted: bool,
}

/// Normalize `input` and scan it
pub async fn scan_target(
    input: &str,
    config: &ScanConfig,
    transport: Arc<dyn HttpTransport>,
) -> Result<TargetOutcome> {
    let target = Target::normalize(input)?;
    scan(target, config, transport).await
}

pub async fn scan(
    target: Target,
    config: &ScanConfig,
    transport: Arc<dyn HttpTransport>,
) -> Result<TargetOutcome> {
    logger::info(format!("Validating target {}", target));
    let status = target.validate(transport.as_ref(), config.timeout).await?;
    logger::success(format!("Target {} is reachable (status {})", target, status));

    let mut metrics = ScanMetrics::new(target.base(), config.mode);

    let catalog = PayloadCatalog::generate(&target.netloc())?;
    let mut ctx = ScanContext::new(target, catalog, config);
    fs::create_dir_all(ctx.dir()).map_err(|e| ScanError::resource(ctx.dir(), e))?;

    // testing runs from the persisted catalog so payloads.json is exactly what was sent
    ctx.catalog.save(&ctx.payloads_path())?;
    ctx.catalog = Arc::new(PayloadCatalog::load(&ctx.payloads_path())?);
    logger::success(format!(
        "Generated {} payload variants across {} headers",
        ctx.catalog.total_variants(),
        ctx.catalog.headers.len()
    ));

    logger::info(format!("Starting URL discovery for {}...", ctx.target));
    let bar = BarProgress::new(0, "URL Discovery");
    let urls = UrlDiscoverer::new(Arc::clone(&transport), ctx.timeout)
        .with_cancel(ctx.cancel.clone())
        .discover(&ctx.target, &bar)
        .await;
    bar.finish();

    let urls_path = ctx.urls_path();
    let listing: String = urls.iter().map(|u| format!("{}\n", u)).collect();
    fs::write(&urls_path, listing).map_err(|e| ScanError::resource(&urls_path, e))?;
    metrics.record_discovery(urls.len(), ctx.catalog.total_variants());

    let log = FindingLog::create(&ctx.results_path())?;

    let stats = if ctx.cancel.is_cancelled() {
        ScanStats::default()
    } else if urls.is_empty() {
        logger::warn(format!("No endpoints discovered for {}", ctx.target));
        ScanStats::default()
    } else {
        logger::success(format!("Discovered {} unique endpoints for {}", urls.len(), ctx.target.netloc()));
        logger::info(format!(
            "Testing {} URLs x {} payloads ({} mode, {} threads)",
            urls.len(),
            ctx.catalog.total_variants(),
            ctx.mode,
            config.threads
        ));

        let bar = Arc::new(BarProgress::new(0, "Cache Testing"));
        let sink: Arc<dyn ProgressSink> = bar.clone();
        let result = ScanOrchestrator::new(Arc::clone(&transport), config)
            .run(&ctx, &urls, &log, sink)
            .await;
        bar.finish();
        result?
    };

    for finding in read_findings(log.path()) {
        metrics.record_finding(&finding);
    }
    metrics.record_stats(&stats);
    let interrupted = ctx.cancel.is_cancelled();
    metrics.interrupted = interrupted;
    metrics.finalize();
    metrics.save_to_file(&ctx.metrics_path())?;

    if interrupted {
        logger::warn(format!("Scan of {} interrupted, partial results saved", ctx.target));
    } else if stats.verified > 0 {
        logger::success(format!("{} verified finding(s) for {}", stats.verified, ctx.target));
    } else {
        logger::info(format!("No verified cache poisoning for {}", ctx.target));
    }

    Ok(TargetOutcome {
        target: ctx.target.clone(),
        target_dir: ctx.target_dir.clone(),
        urls,
        stats,
        metrics,
        interrupted,
    })
}
