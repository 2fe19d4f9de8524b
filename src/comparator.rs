// comparator.rs - Baseline vs. probe response comparison
// Heuristic difference signal only; the verification decision lives in verifier.rs.

use serde::{Deserialize, Serialize};

use crate::http::ProbeResult;

pub const DEFAULT_THRESHOLD: f64 = 0.85;

/// Headers whose change between baseline and probe is worth reporting
pub const IMPORTANT_HEADERS: &[&str] = &["server", "x-powered-by", "x-cache", "cache-control", "location"];

/// Characters of each body fed to the similarity score
const SIMILARITY_WINDOW: usize = 1000;
const LENGTH_CHANGE_RATIO: f64 = 0.15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderChange {
    pub header: String,
    pub baseline: Option<String>,
    pub test: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub status_changed: bool,
    pub length_changed: bool,
    pub headers_changed: bool,
    pub header_changes: Vec<HeaderChange>,
    pub reflection_found: bool,
    pub similarity_score: f64,
}

/// True when `injected` appears (case-insensitively) inside the Location header
pub fn detect_reflection(location: Option<&str>, injected: &str) -> bool {
    match location {
        Some(location) if !location.is_empty() && !injected.is_empty() => location
            .to_lowercase()
            .contains(&injected.to_lowercase()),
        _ => false,
    }
}

/// Compare a probe against its baseline. Returns `(is_different, report)`.
pub fn compare_responses(
    baseline: &ProbeResult,
    test: &ProbeResult,
    injected: &str,
    threshold: f64,
) -> (bool, ComparisonReport) {
    let status_changed = (i32::from(baseline.status) - i32::from(test.status)).abs() >= 100;

    let length_changed = if baseline.length > 0 {
        let delta = (test.length as f64 - baseline.length as f64).abs();
        delta / baseline.length as f64 > LENGTH_CHANGE_RATIO
    } else {
        false
    };

    let header_changes: Vec<HeaderChange> = IMPORTANT_HEADERS
        .iter()
        .filter_map(|name| {
            let before = baseline.header(name);
            let after = test.header(name);
            (before != after).then(|| HeaderChange {
                header: name.to_string(),
                baseline: before.map(str::to_string),
                test: after.map(str::to_string),
            })
        })
        .collect();

    let reflection_found = detect_reflection(test.location(), injected);

    let similarity_score = if baseline.body.is_empty() || test.body.is_empty() {
        1.0
    } else {
        let a: Vec<char> = baseline.body.chars().take(SIMILARITY_WINDOW).collect();
        let b: Vec<char> = test.body.chars().take(SIMILARITY_WINDOW).collect();
        similarity_ratio(&a, &b)
    };

    let dissimilar = similarity_score < threshold;
    let is_different = status_changed
        || length_changed
        || (reflection_found && dissimilar)
        || (header_changes.len() >= 2 && dissimilar);

    let report = ComparisonReport {
        status_changed,
        length_changed,
        headers_changed: !header_changes.is_empty(),
        header_changes,
        reflection_found,
        similarity_score,
    };

    (is_different, report)
}

/// Ratcliff/Obershelp ratio: 2·M / (|a| + |b|), M = characters in matching blocks
pub fn similarity_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let mut matched = 0usize;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, k) = longest_match(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        matched += k;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            pending.push((i + k, ahi, j + k, bhi));
        }
    }

    2.0 * matched as f64 / total as f64
}

/// Longest common run of `a[alo..ahi]` and `b[blo..bhi]`, earliest in `a` on ties
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let width = bhi - blo + 1;
    let mut prev = vec![0usize; width];
    let mut cur = vec![0usize; width];
    let mut best = (alo, blo, 0);

    for i in alo..ahi {
        cur.iter_mut().for_each(|c| *c = 0);
        for j in blo..bhi {
            if a[i] == b[j] {
                let run = prev[j - blo] + 1;
                cur[j - blo + 1] = run;
                if run > best.2 {
                    best = (i + 1 - run, j + 1 - run, run);
                }
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(status: u16, body: &str) -> ProbeResult {
        ProbeResult::new("https://example.com/", status)
            .with_header("Server", "nginx")
            .with_body(body)
    }

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_identical_responses_are_not_different() {
        let response = page(200, "<html><body>hello world</body></html>")
            .with_header("Location", "https://example.com/home");
        let (different, report) = compare_responses(&response, &response, "evil.com", DEFAULT_THRESHOLD);
        assert!(!different);
        assert_eq!(report.similarity_score, 1.0);
        assert!(!report.headers_changed);
        assert!(!report.status_changed);
    }

    #[test]
    fn test_status_change_needs_a_full_class() {
        let base = page(200, "same");
        let (different, report) = compare_responses(&base, &page(204, "same"), "x", DEFAULT_THRESHOLD);
        assert!(!different);
        assert!(!report.status_changed);

        let (different, report) = compare_responses(&base, &page(302, "same"), "x", DEFAULT_THRESHOLD);
        assert!(different);
        assert!(report.status_changed);
    }

    #[test]
    fn test_length_change_threshold() {
        let base = page(200, &"a".repeat(100));
        let (_, report) = compare_responses(&base, &page(200, &"a".repeat(114)), "x", DEFAULT_THRESHOLD);
        assert!(!report.length_changed);
        let (different, report) = compare_responses(&base, &page(200, &"a".repeat(120)), "x", DEFAULT_THRESHOLD);
        assert!(report.length_changed);
        assert!(different);
    }

    #[test]
    fn test_empty_baseline_never_flags_length() {
        let base = page(200, "");
        let (different, report) = compare_responses(&base, &page(200, "a long body"), "x", DEFAULT_THRESHOLD);
        assert!(!report.length_changed);
        assert_eq!(report.similarity_score, 1.0);
        assert!(!different);
    }

    #[test]
    fn test_reflection_counts_only_when_content_diverges() {
        let base = page(302, "abcdefghij");
        let same_body = page(302, "abcdefghij").with_header("Location", "https://evil.com/");
        let (different, report) = compare_responses(&base, &same_body, "EVIL.com", DEFAULT_THRESHOLD);
        assert!(report.reflection_found);
        assert!(!different);

        let other_body = page(302, "zyxwvutsrq").with_header("Location", "https://evil.com/");
        let (different, _) = compare_responses(&base, &other_body, "evil.com", DEFAULT_THRESHOLD);
        assert!(different);
    }

    #[test]
    fn test_two_header_changes_with_dissimilar_body() {
        let base = page(200, "abcdefghij");
        let one_change = page(200, "zyxwvutsrq").with_header("X-Cache", "HIT");
        let (different, report) = compare_responses(&base, &one_change, "x", DEFAULT_THRESHOLD);
        assert_eq!(report.header_changes.len(), 1);
        assert!(!different);

        let two_changes = one_change.with_header("Server", "varnish");
        let (different, report) = compare_responses(&base, &two_changes, "x", DEFAULT_THRESHOLD);
        assert_eq!(report.header_changes.len(), 2);
        assert!(different);
    }

    #[test]
    fn test_similarity_ratio() {
        assert_eq!(similarity_ratio(&chars("abcd"), &chars("bcde")), 0.75);
        assert_eq!(similarity_ratio(&chars("abc"), &chars("xyz")), 0.0);
        assert_eq!(similarity_ratio(&chars(""), &chars("")), 1.0);
        assert_eq!(similarity_ratio(&chars("hello world"), &chars("hello world")), 1.0);
        // matching blocks "a" + "c": 2 * 2 / 6
        let ratio = similarity_ratio(&chars("abc"), &chars("axc"));
        assert!((ratio - 4.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_detect_reflection() {
        assert!(detect_reflection(Some("https://EVIL.com/dashboard"), "evil.COM"));
        assert!(!detect_reflection(Some("https://example.com/"), "evil.com"));
        assert!(!detect_reflection(Some(""), "evil.com"));
        assert!(!detect_reflection(None, "evil.com"));
        assert!(!detect_reflection(Some("https://example.com/"), ""));
    }
}
