// Regenerate all_results.txt and report.html for an existing output directory
use std::path::Path;

use cacherust::aggregate_findings;
use cacherust::report::{generate_html_report, read_target_metrics};

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: regen_report <output_directory>");
        eprintln!("Example: regen_report cache_scan_20240101_120000");
        std::process::exit(1);
    }

    let output_dir = Path::new(&args[1]);

    if !output_dir.is_dir() {
        eprintln!("Error: Directory not found: {}", output_dir.display());
        std::process::exit(1);
    }

    println!("Regenerating report for: {}", output_dir.display());

    let findings = match aggregate_findings(output_dir) {
        Ok((_, count)) => count,
        Err(e) => {
            eprintln!("Error aggregating results: {}", e);
            std::process::exit(1);
        }
    };

    // The original run time is the sum of per-target durations
    let duration: f64 = read_target_metrics(output_dir)
        .iter()
        .map(|m| m.duration_seconds)
        .sum();

    match generate_html_report(output_dir, duration) {
        Ok(path) => {
            println!("Report generated successfully! ({} finding(s))", findings);
            println!("Output: {}", path.display());
        }
        Err(e) => {
            eprintln!("Error generating report: {}", e);
            std::process::exit(1);
        }
    }
}
