// cacherust - Web cache poisoning scanner
// Discovers same-host URLs, injects unkeyed-header payloads and only reports 302 redirects
// whose Location reflects the payload consistently across cache-busted probes.

pub mod comparator;
pub mod config;
pub mod discovery;
pub mod error;
pub mod findings;
pub mod http;
pub mod logger;
pub mod metrics;
pub mod orchestrator;
pub mod payloads;
pub mod progress;
pub mod report;
pub mod scanner;
pub mod target;
pub mod verifier;

pub use config::{ScanConfig, ScanContext, ScanMode};
pub use error::{Result, ScanError, TransportError};
pub use findings::{aggregate_findings, FindingLog, VerifiedFinding};
pub use http::{HttpTransport, ProbeRequest, ProbeResult, ReqwestTransport};
pub use scanner::{scan, scan_target, TargetOutcome};
pub use target::Target;
