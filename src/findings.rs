// findings.rs - Verified findings and the append-only finding log
// One JSON object per line. Lines are written whole under a lock so concurrent
// URL tasks never interleave partial records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::{ALL_RESULTS_FILE, RESULTS_FILE};
use crate::error::{Result, ScanError};
use crate::verifier::ProbeSuccess;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionEvidence {
    pub is_reflected: bool,
    pub location_reflection: bool,
    pub context: Option<String>,
    pub similarity_score: f64,
    pub status_changed: bool,
    pub changed_headers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationInfo {
    pub status: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedFinding {
    pub url: String,
    /// `Name: value`
    pub header: String,
    pub status_code: u16,
    pub location: String,
    pub reflection_details: ReflectionEvidence,
    pub response_headers: BTreeMap<String, String>,
    pub verification: VerificationInfo,
    pub found_at: DateTime<Utc>,
}

impl VerifiedFinding {
    pub fn from_success(url: &str, header: &str, value: &str, success: &ProbeSuccess) -> Self {
        let report = &success.comparison;
        Self {
            url: url.to_string(),
            header: format!("{}: {}", header, value),
            status_code: success.status,
            location: success.location.clone(),
            reflection_details: ReflectionEvidence {
                is_reflected: report.reflection_found,
                location_reflection: report.reflection_found,
                context: Some(format!("Location: {}", success.location)),
                similarity_score: report.similarity_score,
                status_changed: report.status_changed,
                changed_headers: report.header_changes.iter().map(|c| c.header.clone()).collect(),
            },
            response_headers: success.headers.clone(),
            verification: VerificationInfo {
                status: "verified".to_string(),
                kind: "302_redirect".to_string(),
            },
            found_at: Utc::now(),
        }
    }

    /// Split `header` back into name and value
    pub fn header_parts(&self) -> (&str, &str) {
        self.header.split_once(": ").unwrap_or((self.header.as_str(), ""))
    }
}

/// Shared handle to one target's `results.txt`
#[derive(Clone)]
pub struct FindingLog {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl FindingLog {
    /// Create (or truncate) the log file
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| ScanError::resource(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn append(&self, finding: &VerifiedFinding) -> Result<()> {
        let mut line = serde_json::to_string(finding)?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| ScanError::resource(&self.path, io::Error::other("finding log lock poisoned")))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| ScanError::resource(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        count_records(&self.path)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Non-empty lines in a JSON-lines file; 0 when the file is missing
pub fn count_records(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|c| c.lines().filter(|l| !l.trim().is_empty()).count())
        .unwrap_or(0)
}

/// Parse a finding log, skipping lines that are not valid records
pub fn read_findings(path: &Path) -> Vec<VerifiedFinding> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| serde_json::from_str(line.trim()).ok())
        .collect()
}

fn collect_result_files(dir: &Path, found: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_result_files(&path, found)?;
        } else if path.file_name().map(|n| n == RESULTS_FILE).unwrap_or(false) {
            found.push(path);
        }
    }
    Ok(())
}

/// Concatenate every per-target `results.txt` under `output_dir` into `all_results.txt`.
/// Returns the aggregate path and the number of records in it.
pub fn aggregate_findings(output_dir: &Path) -> Result<(PathBuf, usize)> {
    let mut files = Vec::new();
    collect_result_files(output_dir, &mut files).map_err(|e| ScanError::resource(output_dir, e))?;
    files.sort();

    let all_path = output_dir.join(ALL_RESULTS_FILE);
    let mut out = File::create(&all_path).map_err(|e| ScanError::resource(&all_path, e))?;
    for file in &files {
        let content = fs::read_to_string(file).map_err(|e| ScanError::resource(file, e))?;
        if content.is_empty() {
            continue;
        }
        out.write_all(content.as_bytes())
            .map_err(|e| ScanError::resource(&all_path, e))?;
        if !content.ends_with('\n') {
            out.write_all(b"\n").map_err(|e| ScanError::resource(&all_path, e))?;
        }
    }

    Ok((all_path.clone(), count_records(&all_path)))
}
