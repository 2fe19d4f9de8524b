// report.rs - HTML report for a whole run
// Built from all_results.txt plus every per-target scan_metrics.json

use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::config::{ALL_RESULTS_FILE, METRICS_FILE, REPORT_FILE, VERSION};
use crate::error::{Result, ScanError};
use crate::findings::{read_findings, VerifiedFinding};
use crate::metrics::ScanMetrics;

/// Generate `report.html` in `output_dir` and return its path
pub fn generate_html_report(output_dir: &Path, duration_secs: f64) -> Result<PathBuf> {
    let report_path = output_dir.join(REPORT_FILE);
    let findings = read_findings(&output_dir.join(ALL_RESULTS_FILE));
    let metrics = read_target_metrics(output_dir);

    let html = render_report(&findings, &metrics, duration_secs);
    fs::write(&report_path, html).map_err(|e| ScanError::resource(&report_path, e))?;
    Ok(report_path)
}

/// Metrics of every target directory directly under `output_dir`, sorted by target
pub fn read_target_metrics(output_dir: &Path) -> Vec<ScanMetrics> {
    let Ok(entries) = fs::read_dir(output_dir) else {
        return Vec::new();
    };
    let mut metrics: Vec<ScanMetrics> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().join(METRICS_FILE))
        .filter(|path| path.exists())
        .filter_map(|path| ScanMetrics::load(&path).ok())
        .collect();
    metrics.sort_by(|a, b| a.target.cmp(&b.target));
    metrics
}

/// Manual reproduction steps for one finding
pub fn curl_commands(url: &str, header: &str, value: &str) -> String {
    let probe = r#"curl -i -s -o /dev/null -w "Status: %{http_code}\nLocation: %{redirect_url}\n""#;
    format!(
        r#"# Baseline request:
{probe} \
    -H "User-Agent: Mozilla/5.0" \
    "{url}?cb=$(date +%s)"

# Test with {header}:
{probe} \
    -H "{header}: {value}" \
    -H "User-Agent: Mozilla/5.0" \
    "{url}?cb=$(date +%s)"

# Verify cached response:
{probe} \
    -H "User-Agent: Mozilla/5.0" \
    "{url}?cb=$(date +%s)"
"#
    )
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn unique_hosts(findings: &[VerifiedFinding]) -> usize {
    let mut hosts: Vec<String> = findings
        .iter()
        .filter_map(|f| Url::parse(&f.url).ok())
        .filter_map(|u| u.host_str().map(|h| match u.port() {
            Some(port) => format!("{}:{}", h, port),
            None => h.to_string(),
        }))
        .collect();
    hosts.sort();
    hosts.dedup();
    hosts.len()
}

pub fn render_report(findings: &[VerifiedFinding], metrics: &[ScanMetrics], duration_secs: f64) -> String {
    let current_date = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let attempts: usize = metrics.iter().map(|m| m.attempts).sum();
    let urls: usize = metrics.iter().map(|m| m.urls_discovered).sum();

    let stats = generate_stats_summary(findings.len(), unique_hosts(findings), metrics.len(), urls, attempts);
    let findings_html = if findings.is_empty() {
        r#"<p class="empty">No vulnerabilities were found during the scan.</p>"#.to_string()
    } else {
        format!("{}{}", generate_findings_table(findings), generate_finding_details(findings))
    };
    let raw_html = generate_raw_data(metrics);

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Cache Poisoning Scan Report</title>
    <style>
        * {{ margin: 0; padding: 0; box-sizing: border-box; }}
        :root {{
            --bg-dark: #0f172a;
            --bg-card: #1e293b;
            --text-primary: #f1f5f9;
            --text-secondary: #94a3b8;
            --border-color: #334155;
            --accent-blue: #3b82f6;
            --accent-green: #22c55e;
            --accent-red: #ef4444;
            --accent-yellow: #eab308;
        }}
        body {{ font-family: 'Inter', 'Segoe UI', Arial, sans-serif; background: var(--bg-dark); color: var(--text-primary); line-height: 1.6; }}
        .container {{ max-width: 1200px; margin: 0 auto; padding: 2rem; }}
        .header {{ background: linear-gradient(135deg, #1e3a8a 0%, #3b82f6 100%); padding: 2rem; border-radius: 12px; margin-bottom: 2rem; }}
        .header p {{ opacity: 0.9; }}
        .stats-bar {{ display: flex; flex-wrap: wrap; gap: 1rem; margin-bottom: 2rem; }}
        .stat-item {{ flex: 1; min-width: 160px; background: var(--bg-card); border: 1px solid var(--border-color); border-radius: 10px; padding: 1.25rem; text-align: center; }}
        .stat-value {{ font-size: 1.75rem; font-weight: 700; }}
        .stat-value.critical {{ color: var(--accent-red); }}
        .stat-value.success {{ color: var(--accent-green); }}
        .stat-label {{ color: var(--text-secondary); font-size: 0.85rem; }}
        h2 {{ margin: 2rem 0 1rem; }}
        table {{ width: 100%; border-collapse: collapse; background: var(--bg-card); border-radius: 10px; overflow: hidden; }}
        th, td {{ padding: 0.75rem 1rem; border-bottom: 1px solid var(--border-color); text-align: left; word-break: break-all; }}
        th {{ color: var(--text-secondary); font-weight: 600; }}
        .card {{ background: var(--bg-card); border: 1px solid var(--border-color); border-radius: 10px; padding: 1.5rem; margin-bottom: 1.5rem; }}
        .card h3 {{ color: var(--accent-red); margin-bottom: 1rem; }}
        .reflection {{ border-left: 4px solid var(--accent-red); padding: 0.75rem 1rem; margin: 1rem 0; background: rgba(239, 68, 68, 0.1); }}
        .badge {{ display: inline-block; padding: 2px 8px; border-radius: 4px; font-size: 0.75rem; font-weight: 600; }}
        .badge-danger {{ background: var(--accent-red); }}
        .badge-warning {{ background: var(--accent-yellow); color: #111; }}
        .badge-success {{ background: var(--accent-green); }}
        pre {{ background: #020617; padding: 1rem; border-radius: 8px; overflow: auto; font-family: 'JetBrains Mono', monospace; font-size: 0.85rem; }}
        .empty {{ color: var(--text-secondary); }}
        .recommendations li {{ margin-left: 1.5rem; }}
        .footer {{ margin-top: 3rem; text-align: center; color: var(--text-secondary); font-size: 0.85rem; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="header">
            <h1>Cache Poisoning Scan Report</h1>
            <p><strong>Scan Duration:</strong> {duration:.2} seconds</p>
            <p><strong>Date:</strong> {date}</p>
            <p><strong>Scanner Version:</strong> {version}</p>
        </div>

        {stats}

        <h2>Detailed Findings</h2>
        {findings}

        <div class="card recommendations">
            <h2>Recommendations</h2>
            <ul>
                <li>Review and validate all identified cache poisoning vectors</li>
                <li>Include every request component that influences the response in the cache key</li>
                <li>Ignore or strip forwarding headers that are not set by trusted proxies</li>
                <li>Use Vary headers where responses depend on request headers</li>
                <li>Monitor caching behavior after deployments</li>
            </ul>
        </div>

        <h2>Raw Scan Data</h2>
        {raw}

        <div class="footer">
            <p>Generated by cacherust v{version}</p>
            <p>Report generated at {date}</p>
        </div>
    </div>
</body>
</html>"#,
        duration = duration_secs,
        date = current_date,
        version = VERSION,
        stats = stats,
        findings = findings_html,
        raw = raw_html,
    )
}

fn generate_stats_summary(
    vulnerabilities: usize,
    hosts: usize,
    targets: usize,
    urls: usize,
    attempts: usize,
) -> String {
    format!(
        r#"<div class="stats-bar">
            <div class="stat-item">
                <div class="stat-value critical">{}</div>
                <div class="stat-label">Verified Vulnerabilities</div>
            </div>
            <div class="stat-item">
                <div class="stat-value">{}</div>
                <div class="stat-label">Affected Hosts</div>
            </div>
            <div class="stat-item">
                <div class="stat-value success">{}</div>
                <div class="stat-label">Targets Scanned</div>
            </div>
            <div class="stat-item">
                <div class="stat-value">{}</div>
                <div class="stat-label">URLs Tested</div>
            </div>
            <div class="stat-item">
                <div class="stat-value">{}</div>
                <div class="stat-label">Verification Attempts</div>
            </div>
        </div>"#,
        vulnerabilities, hosts, targets, urls, attempts
    )
}

fn generate_findings_table(findings: &[VerifiedFinding]) -> String {
    let mut html = String::from(
        r#"<table>
            <tr><th>Target URL</th><th>Vulnerable Header</th><th>Status Code</th><th>Vulnerability Type</th></tr>"#,
    );
    for finding in findings {
        html.push_str(&format!(
            r#"
            <tr>
                <td>{}</td>
                <td>{}</td>
                <td><span class="badge badge-warning">{}</span></td>
                <td><span class="badge badge-danger">{}</span></td>
            </tr>"#,
            html_escape(&finding.url),
            html_escape(&finding.header),
            finding.status_code,
            html_escape(&finding.verification.kind),
        ));
    }
    html.push_str("\n        </table>\n");
    html
}

fn generate_finding_details(findings: &[VerifiedFinding]) -> String {
    let mut html = String::from("<h2>Detailed Vulnerability Analysis</h2>");
    for (i, finding) in findings.iter().enumerate() {
        let (name, value) = finding.header_parts();
        let reflection = if finding.reflection_details.location_reflection {
            r#"<div class="reflection">
                <h4>Payload Reflection</h4>
                <p>The injected value was reflected in the Location header of consistent 302 responses.</p>
            </div>"#
        } else {
            ""
        };

        html.push_str(&format!(
            r#"
        <div class="card">
            <h3>Vulnerability #{index}</h3>
            <p><strong>Target URL:</strong> {url}</p>
            <p><strong>Vulnerable Header:</strong> {header}</p>
            <p><strong>Status Code:</strong> <span class="badge badge-warning">{status}</span></p>
            <ul>
                <li>Type: <span class="badge badge-danger">{kind}</span></li>
                <li>Redirects to: {location}</li>
                <li>Verification Status: <span class="badge badge-success">{verification}</span></li>
                <li>Similarity to baseline: {similarity:.2}</li>
            </ul>
            {reflection}
            <h4>Validation Commands</h4>
            <pre>{curl}</pre>
        </div>"#,
            index = i + 1,
            url = html_escape(&finding.url),
            header = html_escape(&finding.header),
            status = finding.status_code,
            kind = html_escape(&finding.verification.kind),
            location = html_escape(&finding.location),
            verification = html_escape(&finding.verification.status),
            similarity = finding.reflection_details.similarity_score,
            reflection = reflection,
            curl = html_escape(&curl_commands(&finding.url, name, value)),
        ));
    }
    html
}

fn generate_raw_data(metrics: &[ScanMetrics]) -> String {
    if metrics.is_empty() {
        return r#"<p class="empty">No metrics data available</p>"#.to_string();
    }
    let mut html = String::from("<pre><code>");
    for metric in metrics {
        let json = serde_json::to_string_pretty(metric).unwrap_or_default();
        html.push_str(&html_escape(&json));
        html.push_str("\n\n");
    }
    html.push_str("</code></pre>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::ComparisonReport;
    use crate::config::{ScanMode, RESULTS_FILE};
    use crate::findings::{aggregate_findings, FindingLog};
    use crate::verifier::ProbeSuccess;
    use std::collections::BTreeMap;

    fn finding(url: &str, value: &str) -> VerifiedFinding {
        let location = format!("https://{}/dashboard", value);
        let success = ProbeSuccess {
            url: format!("{}?cb=verify_1_1_00000000", url),
            status: 302,
            location: location.clone(),
            headers: BTreeMap::from([("location".to_string(), location)]),
            comparison: ComparisonReport {
                status_changed: true,
                length_changed: false,
                headers_changed: true,
                header_changes: vec![],
                reflection_found: true,
                similarity_score: 0.5,
            },
        };
        VerifiedFinding::from_success(url, "X-Forwarded-Host", value, &success)
    }

    #[test]
    fn test_curl_commands() {
        let commands = curl_commands("https://example.com/", "X-Forwarded-Host", "evil.com");
        assert!(commands.contains(r#"-H "X-Forwarded-Host: evil.com""#));
        assert_eq!(commands.matches("curl -i").count(), 3);
        assert!(commands.contains(r#""https://example.com/?cb=$(date +%s)""#));
    }

    #[test]
    fn test_report_escapes_injected_values() {
        let html = render_report(&[finding("https://example.com/", "<script>x</script>")], &[], 1.0);
        assert!(!html.contains("<script>x</script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_empty_report() {
        let html = render_report(&[], &[], 0.5);
        assert!(html.contains("No vulnerabilities were found"));
        assert!(html.contains("No metrics data available"));
    }

    #[test]
    fn test_unique_hosts() {
        let findings = vec![
            finding("https://a.com/x", "evil.com"),
            finding("https://a.com/y", "evil.com"),
            finding("https://b.com:8443/", "evil.com"),
        ];
        assert_eq!(unique_hosts(&findings), 2);
    }

    #[test]
    fn test_generate_from_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let target_dir = dir.path().join("example.com");
        fs::create_dir_all(&target_dir).unwrap();

        let log = FindingLog::create(&target_dir.join(RESULTS_FILE)).unwrap();
        log.append(&finding("https://example.com/login", "evil.com")).unwrap();
        let mut metrics = ScanMetrics::new("https://example.com", ScanMode::Standard);
        metrics.finalize();
        metrics.save_to_file(&target_dir.join(METRICS_FILE)).unwrap();

        aggregate_findings(dir.path()).unwrap();
        let path = generate_html_report(dir.path(), 12.5).unwrap();

        let html = fs::read_to_string(path).unwrap();
        assert!(html.contains("Vulnerability #1"));
        assert!(html.contains("https://example.com/login"));
        assert!(html.contains("302_redirect"));
        assert!(html.contains(&metrics.scan_id));
    }
}
