use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::ScanMode;
use crate::error::{Result, ScanError};
use crate::findings::VerifiedFinding;
use crate::orchestrator::ScanStats;

/// Per-target scan metrics, written to `scan_metrics.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMetrics {
    pub scan_id: String,
    pub target: String,
    pub mode: ScanMode,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: f64,

    // Discovery
    pub urls_discovered: usize,
    pub payload_variants: usize,
    /// urls_discovered x payload_variants
    pub total_tests: usize,

    // Verification
    pub attempts: usize,
    pub verified: usize,
    pub rejected: usize,
    pub failed_tasks: usize,
    pub findings_by_header: BTreeMap<String, usize>,
    pub affected_urls: Vec<String>,
    /// Set when Ctrl-C cut the scan short; counts cover what ran before that
    #[serde(default)]
    pub interrupted: bool,
}

impl ScanMetrics {
    pub fn new(target: impl Into<String>, mode: ScanMode) -> Self {
        Self {
            scan_id: uuid::Uuid::new_v4().to_string(),
            target: target.into(),
            mode,
            start_time: Utc::now(),
            end_time: None,
            duration_seconds: 0.0,
            urls_discovered: 0,
            payload_variants: 0,
            total_tests: 0,
            attempts: 0,
            verified: 0,
            rejected: 0,
            failed_tasks: 0,
            findings_by_header: BTreeMap::new(),
            affected_urls: Vec::new(),
            interrupted: false,
        }
    }

    pub fn record_discovery(&mut self, urls: usize, variants: usize) {
        self.urls_discovered = urls;
        self.payload_variants = variants;
        self.total_tests = urls * variants;
    }

    pub fn record_stats(&mut self, stats: &ScanStats) {
        self.attempts = stats.attempts;
        self.verified = stats.verified;
        self.rejected = stats.rejected;
        self.failed_tasks = stats.failed_tasks;
    }

    pub fn record_finding(&mut self, finding: &VerifiedFinding) {
        let (name, _) = finding.header_parts();
        *self.findings_by_header.entry(name.to_string()).or_insert(0) += 1;
        if !self.affected_urls.contains(&finding.url) {
            self.affected_urls.push(finding.url.clone());
        }
    }

    pub fn finalize(&mut self) {
        let end = Utc::now();
        self.duration_seconds = (end - self.start_time).num_milliseconds() as f64 / 1000.0;
        self.end_time = Some(end);
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| ScanError::resource(path, e))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ScanError::resource(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Scan ID: {}\nTarget: {}\nMode: {}\nDuration: {:.2}s\n\
             \nResults:\n\
             - URLs Discovered: {}\n\
             - Payload Variants: {}\n\
             - Total Tests: {}\n\
             - Attempts: {}\n\
             - Verified: {}\n\
             - Rejected: {}\n",
            self.scan_id,
            self.target,
            self.mode,
            self.duration_seconds,
            self.urls_discovered,
            self.payload_variants,
            self.total_tests,
            self.attempts,
            self.verified,
            self.rejected,
        );
        if self.interrupted {
            summary.push_str("- Interrupted: partial results\n");
        }
        if self.failed_tasks > 0 {
            summary.push_str(&format!("- Failed Tasks: {}\n", self.failed_tasks));
        }
        for (header, count) in &self.findings_by_header {
            summary.push_str(&format!("  * {}: {}\n", header, count));
        }
        summary
    }
}
