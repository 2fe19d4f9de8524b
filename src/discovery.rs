// discovery.rs - Scoped URL discovery
// Seeds well-known paths, then crawls a FIFO frontier to a fixed depth pulling references
// out of HTML and inline scripts with regexes. Everything stays on the target host.

use regex::Regex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::MAX_URLS;
use crate::http::{HttpTransport, ProbeRequest};
use crate::progress::ProgressSink;
use crate::target::Target;

pub const MAX_DEPTH: usize = 2;

/// Paths probed before any crawling, relative to the target root
pub const SEED_PATHS: &[&str] = &[
    "", "api", "v1", "v2", "admin", "portal", "graphql", "wp-json", ".well-known", "actuator",
    "metrics", "health", "status", "api-docs", "swagger", "openapi", "docs", "help", "debug",
    "internal", "private", "public", "auth", "login", "user", "dashboard", "console",
    "management", "monitor", "static", "assets", "images", "css", "js", "lib", "vendor",
    "includes", "upload", "uploads", "files", "temp", "cache",
];

const EXCLUDED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "css", "js", "svg", "ico", "woff", "ttf", "eot",
];

lazy_static::lazy_static! {
    static ref ATTRIBUTE_REF: Regex = Regex::new(r#"(?:href|src|action|url)=["']([^"']+)["']"#).unwrap();
    static ref PATH_LITERAL: Regex = Regex::new(r#"(?:"|'|`)(/[^"'`]+)(?:"|'|`)"#).unwrap();
    static ref API_LITERAL: Regex = Regex::new(r#"(?:"|'|`)(/api/[^"'`]+)(?:"|'|`)"#).unwrap();
}

/// Raw references found in a page body, in scan order (duplicates kept)
pub fn extract_references(body: &str) -> Vec<String> {
    [&*ATTRIBUTE_REF, &*PATH_LITERAL, &*API_LITERAL]
        .into_iter()
        .flat_map(|re| re.captures_iter(body))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|r| !r.is_empty())
        .collect()
}

/// Absolute paths resolve against the target root, other relative references against the page
pub fn resolve_reference(target: &Target, page: &Url, reference: &str) -> Option<Url> {
    if let Some(rest) = reference.strip_prefix("//") {
        return Url::parse(&format!("{}://{}", page.scheme(), rest)).ok();
    }
    if reference.starts_with('/') {
        return target.root().join(reference).ok();
    }
    let lower = reference.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Url::parse(reference).ok();
    }
    page.join(reference).ok()
}

/// Target root + the URL's path without trailing slash. Query and fragment are dropped.
pub fn normalize_url(target: &Target, url: &Url) -> String {
    let path = url.path().trim_end_matches('/');
    let mut normalized = target.root().clone();
    normalized.set_path(if path.is_empty() { "/" } else { path });
    normalized.to_string()
}

fn has_excluded_extension(url: &Url) -> bool {
    let last = url.path().rsplit('/').next().unwrap_or_default();
    match last.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            EXCLUDED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
        }
        _ => false,
    }
}

/// Discovered set plus the frontier still to crawl
struct CrawlState {
    discovered: HashSet<String>,
    frontier: VecDeque<(String, usize)>,
    max_urls: usize,
}

impl CrawlState {
    fn new(max_urls: usize) -> Self {
        Self {
            discovered: HashSet::new(),
            frontier: VecDeque::new(),
            max_urls,
        }
    }

    fn is_full(&self) -> bool {
        self.discovered.len() >= self.max_urls
    }

    /// Record `url`; queue it for crawling at `depth` when that is still within bounds
    fn insert(&mut self, url: String, depth: usize) -> bool {
        if self.is_full() || self.discovered.contains(&url) {
            return false;
        }
        if depth < MAX_DEPTH {
            self.frontier.push_back((url.clone(), depth));
        }
        self.discovered.insert(url);
        true
    }
}

pub struct UrlDiscoverer {
    transport: Arc<dyn HttpTransport>,
    timeout: Duration,
    max_urls: usize,
    cancel: CancellationToken,
}

impl UrlDiscoverer {
    pub fn new(transport: Arc<dyn HttpTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            max_urls: MAX_URLS,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_max_urls(mut self, max_urls: usize) -> Self {
        self.max_urls = max_urls;
        self
    }

    /// Stop crawling once `cancel` fires; what was found so far is still returned
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sorted, deduplicated, in-scope URLs. Empty when the target never answered.
    pub async fn discover(&self, target: &Target, progress: &dyn ProgressSink) -> Vec<String> {
        let mut state = CrawlState::new(self.max_urls);
        for seed in SEED_PATHS {
            if let Ok(url) = target.root().join(seed) {
                state.insert(normalize_url(target, &url), 0);
            }
        }

        let mut fetched: u64 = 0;
        let mut responded = false;
        progress.set_total(state.frontier.len() as u64);

        while let Some((url, depth)) = state.frontier.pop_front() {
            if self.cancel.is_cancelled() {
                break;
            }
            progress.set_label(&format!("Crawling {}", url));
            let request = ProbeRequest::get(&url, self.timeout).following_redirects();
            let response = tokio::select! {
                response = self.transport.fetch(request) => response,
                _ = self.cancel.cancelled() => break,
            };
            fetched += 1;
            progress.advance(1);

            let page = match response {
                Ok(page) => {
                    responded = true;
                    page
                }
                Err(_) => continue,
            };
            if !page.is_success() {
                continue;
            }
            let Ok(page_url) = Url::parse(&url) else {
                continue;
            };

            for reference in extract_references(&page.body) {
                if state.is_full() {
                    break;
                }
                let Some(resolved) = resolve_reference(target, &page_url, &reference) else {
                    continue;
                };
                if target.in_scope(&resolved) {
                    state.insert(normalize_url(target, &resolved), depth + 1);
                }
            }

            if state.is_full() {
                state.frontier.clear();
            }
            progress.set_total(fetched + state.frontier.len() as u64);
        }

        if !responded {
            return Vec::new();
        }

        let mut urls: Vec<String> = state
            .discovered
            .into_iter()
            .filter(|u| {
                Url::parse(u)
                    .map(|parsed| target.in_scope(&parsed) && !has_excluded_extension(&parsed))
                    .unwrap_or(false)
            })
            .collect();
        urls.sort();
        urls.truncate(self.max_urls);
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::stub::{unreachable, StubTransport};
    use crate::http::ProbeResult;
    use crate::progress::CountingProgress;

    fn target() -> Target {
        Target::normalize("example.com").unwrap()
    }

    fn discoverer(transport: Arc<StubTransport>) -> UrlDiscoverer {
        UrlDiscoverer::new(transport, Duration::from_secs(1))
    }

    fn site(pages: &'static [(&'static str, &'static str)]) -> Arc<StubTransport> {
        Arc::new(StubTransport::new(move |req| {
            match pages.iter().find(|(url, _)| *url == req.url) {
                Some((_, body)) => Ok(ProbeResult::new(&req.url, 200).with_body(*body)),
                None => Ok(ProbeResult::new(&req.url, 404)),
            }
        }))
    }

    #[test]
    fn test_extract_references() {
        let body = r#"<a href="/about">x</a><img src='logo.png'><script>fetch("/api/users")</script>"#;
        let refs = extract_references(body);
        assert!(refs.contains(&"/about".to_string()));
        assert!(refs.contains(&"logo.png".to_string()));
        assert!(refs.contains(&"/api/users".to_string()));
    }

    #[test]
    fn test_resolve_and_normalize() {
        let target = target();
        let page = Url::parse("https://example.com/docs/index").unwrap();

        let abs_path = resolve_reference(&target, &page, "/login/").unwrap();
        assert_eq!(normalize_url(&target, &abs_path), "https://example.com/login");

        let relative = resolve_reference(&target, &page, "guide?x=1#top").unwrap();
        assert_eq!(normalize_url(&target, &relative), "https://example.com/docs/guide");

        let absolute = resolve_reference(&target, &page, "https://example.com/a/b/").unwrap();
        assert_eq!(normalize_url(&target, &absolute), "https://example.com/a/b");

        let proto_relative = resolve_reference(&target, &page, "//cdn.example.net/x").unwrap();
        assert!(!target.in_scope(&proto_relative));

        let root = Url::parse("https://example.com/").unwrap();
        assert_eq!(normalize_url(&target, &root), "https://example.com/");
    }

    #[test]
    fn test_excluded_extensions() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert!(has_excluded_extension(&url("https://example.com/static/app.JS")));
        assert!(has_excluded_extension(&url("https://example.com/logo.png")));
        assert!(!has_excluded_extension(&url("https://example.com/index.php")));
        assert!(!has_excluded_extension(&url("https://example.com/.well-known")));
        assert!(!has_excluded_extension(&url("https://example.com/css")));
    }

    #[tokio::test]
    async fn test_crawl_follows_references_in_scope() {
        static PAGES: &[(&str, &str)] = &[(
            "https://example.com/",
            r#"<a href="/products">p</a>
               <a href="https://evil.com/steal">x</a>
               <a href="https://example.com:8443/other">y</a>
               <link href="/theme.css"><script src="/app.js"></script>"#,
        )];
        let transport = site(PAGES);
        let progress = CountingProgress::quiet();

        let urls = discoverer(transport.clone()).discover(&target(), &progress).await;

        assert!(urls.contains(&"https://example.com/products".to_string()));
        assert!(urls.contains(&"https://example.com/".to_string()));
        assert!(urls.contains(&"https://example.com/admin".to_string()));
        assert!(urls.iter().all(|u| u.starts_with("https://example.com/")));
        assert!(!urls.iter().any(|u| u.ends_with(".css") || u.ends_with(".js")));

        let mut sorted = urls.clone();
        sorted.sort();
        assert_eq!(urls, sorted);

        assert!(transport.requests().iter().all(|r| r.follow_redirects));
        assert_eq!(progress.advanced() as usize, transport.count());
    }

    #[tokio::test]
    async fn test_plain_http_link_on_same_host_is_kept() {
        static PAGES: &[(&str, &str)] = &[(
            "https://example.com/",
            r#"<a href="http://example.com/account">account</a>"#,
        )];
        let transport = site(PAGES);

        let urls = discoverer(transport).discover(&target(), &CountingProgress::quiet()).await;

        assert!(urls.contains(&"https://example.com/account".to_string()));
        assert!(!urls.iter().any(|u| u.starts_with("http://")));
    }

    #[tokio::test]
    async fn test_cancelled_crawl_sends_nothing() {
        let transport = Arc::new(StubTransport::new(|req| Ok(ProbeResult::new(&req.url, 200))));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let urls = discoverer(transport.clone())
            .with_cancel(cancel)
            .discover(&target(), &CountingProgress::quiet())
            .await;

        assert!(urls.is_empty());
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_depth_limit() {
        static PAGES: &[(&str, &str)] = &[
            ("https://example.com/", r#"<a href="/level1">"#),
            ("https://example.com/level1", r#"<a href="/level2">"#),
            ("https://example.com/level2", r#"<a href="/level3">"#),
        ];
        let transport = site(PAGES);

        let urls = discoverer(transport.clone()).discover(&target(), &CountingProgress::quiet()).await;

        assert!(urls.contains(&"https://example.com/level1".to_string()));
        assert!(urls.contains(&"https://example.com/level2".to_string()));
        assert!(!urls.contains(&"https://example.com/level3".to_string()));
        // level2 was recorded from a depth-1 page and never fetched
        assert!(!transport.requests().iter().any(|r| r.url == "https://example.com/level2"));
    }

    #[tokio::test]
    async fn test_cap_is_respected() {
        let transport = Arc::new(StubTransport::new(|req| {
            let links: String = (0..50).map(|i| format!("<a href=\"/page{}\">", i)).collect();
            Ok(ProbeResult::new(&req.url, 200).with_body(links))
        }));

        let urls = discoverer(transport).with_max_urls(60).discover(&target(), &CountingProgress::quiet()).await;
        assert!(urls.len() <= 60);
        assert!(!urls.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let transport = Arc::new(StubTransport::new(|req| {
            if req.url == "https://example.com/" {
                Ok(ProbeResult::new(&req.url, 200).with_body(r#"<a href="/ok">"#))
            } else {
                Err(unreachable(req))
            }
        }));

        let urls = discoverer(transport).discover(&target(), &CountingProgress::quiet()).await;
        assert!(urls.contains(&"https://example.com/ok".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_target_yields_nothing() {
        let transport = Arc::new(StubTransport::new(|req| Err(unreachable(req))));
        let urls = discoverer(transport.clone()).discover(&target(), &CountingProgress::quiet()).await;
        assert!(urls.is_empty());
        assert_eq!(transport.count(), SEED_PATHS.len());
    }
}
