//! HTTP pool-data fetching with ordered endpoint fallback and a TTL cache.

use crate::config::schema::HttpConfig;
use anyhow::{bail, Context, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, USER_AGENT};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A named data source.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: &'static str,
    pub url: String,
}

impl Endpoint {
    pub fn new(name: &'static str, url: impl Into<String>) -> Self {
        Self {
            name,
            url: url.into(),
        }
    }
}

/// Shared HTTP client for protocol data APIs.
#[derive(Debug, Clone)]
pub struct PoolFetcher {
    http: reqwest::Client,
}

impl PoolFetcher {
    pub fn new(cfg: &HttpConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&cfg.user_agent).context("Invalid user agent")?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .context("Failed to build pool data HTTP client")?;
        Ok(Self { http })
    }

    /// GET a URL and parse the body as JSON.
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("GET {} failed ({}): {}", url, status, truncate(&body, 200));
        }

        resp.json().await.context("Failed to parse pool data JSON")
    }

    /// Try each endpoint in order and return the first non-empty parse.
    pub async fn first_match<T, F>(&self, endpoints: &[Endpoint], parse: F) -> Option<(String, Vec<T>)>
    where
        F: Fn(&Endpoint, &Value) -> Vec<T>,
    {
        for endpoint in endpoints {
            debug!("Fetching pools from {} ({})", endpoint.name, endpoint.url);
            match self.get_json(&endpoint.url).await {
                Ok(body) => {
                    let items = parse(endpoint, &body);
                    if items.is_empty() {
                        debug!("{} returned no usable pools", endpoint.name);
                        continue;
                    }
                    info!("Loaded {} pools from {}", items.len(), endpoint.name);
                    return Some((endpoint.name.to_string(), items));
                }
                Err(e) => warn!("{} unavailable: {:#}", endpoint.name, e),
            }
        }
        None
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// Live pool data kept for a fixed time-to-live.
pub struct PoolCache<T> {
    ttl: Duration,
    inner: RwLock<Option<(Instant, String, Vec<T>)>>,
}

impl<T: Clone> PoolCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(None),
        }
    }

    /// Cached pools and their endpoint name, if still fresh.
    pub async fn get(&self) -> Option<(String, Vec<T>)> {
        let guard = self.inner.read().await;
        match &*guard {
            Some((at, endpoint, items)) if at.elapsed() < self.ttl => {
                Some((endpoint.clone(), items.clone()))
            }
            _ => None,
        }
    }

    pub async fn put(&self, endpoint: &str, items: Vec<T>) {
        *self.inner.write().await = Some((Instant::now(), endpoint.to_string(), items));
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// Numbers in protocol APIs arrive as JSON numbers or numeric strings.
pub fn num(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn uint(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// First present numeric field among `keys`.
pub fn num_field(obj: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| obj.get(*k).and_then(num))
}

pub fn str_field<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

/// The array of pool objects inside a response: a bare list or a
/// `results`/`pools`/`data`/`markets` wrapper.
pub fn items(body: &Value) -> &[Value] {
    if let Some(list) = body.as_array() {
        return list;
    }
    for key in ["results", "pools", "data", "markets"] {
        if let Some(list) = body.get(key).and_then(Value::as_array) {
            return list;
        }
    }
    &[]
}
