//! HTTP client wrapper with bounded reads and request tracking

use crate::error::{Result, VigilError};
use crate::matcher::{ResponseData, MAX_BODY_BYTES};
use reqwest::{Client, Method};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const MAX_REDIRECTS: usize = 10;

/// Default headers applied before user headers
const DEFAULT_HEADERS: &[(&str, &str)] = &[
    (
        "User-Agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
    ),
    ("Accept", "*/*"),
    ("Connection", "close"),
];

/// A completed request/response pair, captured for matching and evidence
#[derive(Debug)]
pub struct HttpExchange {
    pub response: ResponseData,
    /// e.g. `HTTP/1.1 200 OK`
    pub status_line: String,
    /// The URL the final response came from (after redirects)
    pub final_url: String,
}

/// Shared, internally thread-safe HTTP client for one scan job
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    request_count: Arc<AtomicU64>,
}

impl HttpClient {
    /// Builds a client with a per-request timeout, a redirect cap, and an
    /// optional proxy.
    pub fn build(timeout_secs: u64, proxy_url: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .danger_accept_invalid_certs(false);

        if let Some(proxy_url) = proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| VigilError::InvalidArgument(format!("invalid proxy URL: {e}")))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            client: builder.build()?,
            request_count: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Total requests dispatched through this client
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Sends one request and reads at most [`MAX_BODY_BYTES`] of the body.
    pub async fn dispatch(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
        body: Option<&str>,
    ) -> Result<HttpExchange> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| VigilError::InvalidArgument(format!("bad HTTP method: {method}")))?;

        let mut req = self.client.request(method, url);
        for (key, value) in DEFAULT_HEADERS {
            req = req.header(*key, *value);
        }
        for (key, value) in headers {
            req = req.header(key.as_str(), value.as_str());
        }
        if let Some(body) = body {
            req = req.body(body.to_string());
        }

        self.request_count.fetch_add(1, Ordering::Relaxed);
        let mut response = req.send().await?;

        let status = response.status();
        debug!("{} -> {}", url, status);

        let status_line = format!(
            "{:?} {} {}",
            response.version(),
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        );
        let final_url = response.url().to_string();

        let resp_headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        // Bounded read: stop pulling chunks once the cap is reached.
        let mut body_bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let remaining = MAX_BODY_BYTES - body_bytes.len();
            if chunk.len() >= remaining {
                body_bytes.extend_from_slice(&chunk[..remaining]);
                break;
            }
            body_bytes.extend_from_slice(&chunk);
        }

        Ok(HttpExchange {
            response: ResponseData {
                status: status.as_u16(),
                headers: resp_headers,
                body: body_bytes,
            },
            status_line,
            final_url,
        })
    }
}
