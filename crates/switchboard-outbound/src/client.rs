//! Pooled HTTP client for calls to the upstream origin.
//!
//! One `reqwest::Client` is shared by every connection, so TCP and TLS
//! handshakes are paid once per pooled connection rather than once per call.
//! Request paths are resolved against the configured base URL and must stay
//! on its origin; redirects that would leave it are not followed.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url, redirect};
use switchboard_types::RetryPolicy;

use crate::config::OutboundConfig;
use crate::error::CallError;
use crate::request::{CallRequest, CallResponse};

/// Shared outbound client. Clones share the connection pool.
#[derive(Debug, Clone)]
pub struct OutboundClient {
    http: reqwest::Client,
    base: Option<Url>,
    timeout: Duration,
    retry: RetryPolicy,
}

/// A request validated and ready to send, reused across retry attempts.
struct Prepared {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Vec<u8>>,
    timeout: Duration,
}

impl OutboundClient {
    /// Build the client and its connection pool.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::InvalidRequest`] if the base URL is not an
    /// absolute `http`/`https` URL.
    pub fn new(config: &OutboundConfig) -> Result<Self, CallError> {
        let base = config.base_url.as_deref().map(parse_base).transpose()?;

        let max_redirects = config.max_redirects;
        let origin = base.as_ref().map(Url::origin);
        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= max_redirects {
                attempt.error("too many redirects")
            } else if origin
                .as_ref()
                .is_some_and(|origin| attempt.url().origin() != *origin)
            {
                attempt.stop()
            } else {
                attempt.follow()
            }
        });

        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(config.pool_idle_timeout)
            .redirect(policy)
            .build()?;

        Ok(Self {
            http,
            base,
            timeout: config.timeout,
            retry: config.retry,
        })
    }

    /// Base URL requests are resolved against, if configured.
    pub const fn base_url(&self) -> Option<&Url> {
        self.base.as_ref()
    }

    /// Issue a call, retrying connect failures per the retry policy.
    ///
    /// Any received status, 2xx or not, is returned as a response.
    pub async fn call(&self, request: &CallRequest) -> Result<CallResponse, CallError> {
        let prepared = self.prepare(request)?;
        let mut attempts = 0_u32;
        loop {
            attempts = attempts.saturating_add(1);
            match self.send_once(&prepared).await {
                Err(e) if e.is_transient() && self.retry.allows_retry(attempts) => {
                    let delay = self.retry.delay_for(attempts.saturating_sub(1));
                    tracing::warn!(
                        url = %prepared.url,
                        attempt = attempts,
                        error = %e,
                        "Upstream connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    /// Resolve `path` against the base URL.
    fn resolve(&self, path: &str) -> Result<Url, CallError> {
        let base = self.base.as_ref().ok_or(CallError::NotConfigured)?;
        let url = base
            .join(path.trim_start_matches('/'))
            .map_err(|e| CallError::InvalidRequest(format!("bad path `{path}`: {e}")))?;
        if url.origin() != base.origin() {
            return Err(CallError::InvalidRequest(format!(
                "path `{path}` leaves the upstream origin"
            )));
        }
        Ok(url)
    }

    fn prepare(&self, request: &CallRequest) -> Result<Prepared, CallError> {
        let url = self.resolve(&request.path)?;
        let method = Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| CallError::InvalidRequest(format!("bad method: {e}")))?;

        let mut headers = HeaderMap::with_capacity(request.headers.len());
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CallError::InvalidRequest(format!("bad header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| CallError::InvalidRequest(format!("bad header value: {e}")))?;
            headers.append(name, value);
        }

        Ok(Prepared {
            method,
            url,
            headers,
            body: request.body.clone(),
            timeout: request.timeout.unwrap_or(self.timeout),
        })
    }

    async fn send_once(&self, prepared: &Prepared) -> Result<CallResponse, CallError> {
        let started = Instant::now();
        let mut builder = self
            .http
            .request(prepared.method.clone(), prepared.url.clone())
            .headers(prepared.headers.clone())
            .timeout(prepared.timeout);
        if let Some(body) = &prepared.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        tracing::debug!(
            method = %prepared.method,
            url = %prepared.url,
            status,
            bytes = body.len(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Upstream call completed"
        );
        Ok(CallResponse {
            status,
            headers,
            body,
        })
    }
}

fn parse_base(raw: &str) -> Result<Url, CallError> {
    let mut url = Url::parse(raw)
        .map_err(|e| CallError::InvalidRequest(format!("invalid upstream URL `{raw}`: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CallError::InvalidRequest(format!(
            "upstream URL `{raw}` must be http or https"
        )));
    }
    // Without a trailing slash `join` would replace the last path segment.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
