// http.rs - HTTP transport used by discovery and verification
// One reqwest client follows redirects (crawling, validation), the other never does (probing).

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::USER_AGENT;
use crate::error::{ScanError, TransportError};

/// Only a prefix of each body is kept; comparisons never look further than this.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
}

#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub follow_redirects: bool,
    pub timeout: Duration,
}

impl ProbeRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            follow_redirects: false,
            timeout,
        }
    }

    pub fn head(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(url, timeout)
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn following_redirects(mut self) -> Self {
        self.follow_redirects = true;
        self
    }

    /// Value of an injected header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Captured outcome of one request. Header names are stored lowercase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    /// Length of the full body, before truncation
    pub length: usize,
}

impl ProbeResult {
    pub fn new(url: impl Into<String>, status: u16) -> Self {
        Self {
            url: url.into(),
            status,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        let mut body = body.into();
        self.length = body.len();
        truncate_at_char_boundary(&mut body, MAX_BODY_BYTES);
        self.body = body;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn location(&self) -> Option<&str> {
        self.header("location")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn truncate_at_char_boundary(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

/// Keeps the first `MAX_BODY_BYTES` of a streamed body and counts the rest
#[derive(Debug, Default)]
struct BodyPrefix {
    kept: Vec<u8>,
    total: usize,
}

impl BodyPrefix {
    fn push(&mut self, chunk: &[u8]) {
        self.total += chunk.len();
        let room = MAX_BODY_BYTES.saturating_sub(self.kept.len());
        self.kept.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn finish(self) -> (String, usize) {
        let mut text = String::from_utf8_lossy(&self.kept).into_owned();
        // a multi-byte char cut at the limit decodes to a trailing U+FFFD
        if self.total > self.kept.len() && text.ends_with('\u{FFFD}') {
            text.pop();
        }
        (text, self.total)
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn fetch(&self, request: ProbeRequest) -> Result<ProbeResult, TransportError>;
}

pub struct ReqwestTransport {
    direct: Client,
    following: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, ScanError> {
        let direct = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .redirect(Policy::none())
            .build()?;

        let following = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .redirect(Policy::limited(10))
            .build()?;

        Ok(Self { direct, following })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn fetch(&self, request: ProbeRequest) -> Result<ProbeResult, TransportError> {
        let client = if request.follow_redirects {
            &self.following
        } else {
            &self.direct
        };

        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Head => client.head(&request.url),
        }
        .timeout(request.timeout);

        for (name, value) in &request.headers {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::InvalidHeader {
                    name: name.clone(),
                    reason: e.to_string(),
                })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            builder = builder.header(header_name, header_value);
        }

        let mut response = builder
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&request.url, e))?;

        let status = response.status().as_u16();
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            match headers.entry(name.as_str().to_string()) {
                Entry::Occupied(mut existing) => {
                    let joined = existing.get_mut();
                    joined.push_str(", ");
                    joined.push_str(&value);
                }
                Entry::Vacant(slot) => {
                    slot.insert(value);
                }
            }
        }

        let mut body = BodyPrefix::default();
        if request.method == Method::Get {
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| TransportError::from_reqwest(&request.url, e))?
            {
                body.push(&chunk);
            }
        }

        let (body, length) = body.finish();
        let mut result = ProbeResult::new(&request.url, status);
        result.headers = headers;
        result.body = body;
        result.length = length;
        Ok(result)
    }
}
