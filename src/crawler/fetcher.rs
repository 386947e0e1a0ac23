//! HTTP fetcher implementation
//!
//! This module handles the lightweight fetch path:
//! - Building an HTTP client that presents browser-like headers
//! - Serving repeat requests from the on-disk cache
//! - Rate limiting every outbound GET
//! - Retrying transient failures with backoff
//! - Classifying responses as fetched, blocked or failed

use crate::config::FetchConfig;
use crate::crawler::retry::{Attempt, RetryError, RetryPolicy};
use crate::crawler::{
    BlockDetector, BlockReason, FetchKind, FetchRequest, FetchResult, FetchSource, RateLimiter,
};
use crate::storage::CacheStore;
use crate::FetchError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, REFERER};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Builds an HTTP client that looks like a desktop browser
///
/// # Arguments
///
/// * `config` - Fetch settings providing User-Agent, Accept-Language and timeout
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use laprop_fetch::config::FetchConfig;
/// use laprop_fetch::crawler::build_http_client;
///
/// let client = build_http_client(&FetchConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
    match HeaderValue::from_str(&config.accept_language) {
        Ok(value) => {
            headers.insert(ACCEPT_LANGUAGE, value);
        }
        Err(_) => {
            tracing::warn!(
                "Ignoring invalid Accept-Language value: {:?}",
                config.accept_language
            );
        }
    }

    Client::builder()
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .timeout(config.timeout())
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Cache-aware GET with retry, backoff and block detection
///
/// The fetcher never fails: every failure mode ends up on the returned
/// [`FetchResult`]. It is shared between worker tasks behind an `Arc`.
pub struct HttpFetcher {
    client: Client,
    limiter: RateLimiter,
    policy: RetryPolicy,
    cache: Arc<CacheStore>,
    detector: BlockDetector,
}

impl HttpFetcher {
    pub fn new(
        client: Client,
        limiter: RateLimiter,
        policy: RetryPolicy,
        cache: Arc<CacheStore>,
        detector: BlockDetector,
    ) -> Self {
        Self {
            client,
            limiter,
            policy,
            cache,
            detector,
        }
    }

    /// Creates a fetcher with a client and retry policy built from `config`
    pub fn from_config(
        config: &FetchConfig,
        limiter: RateLimiter,
        cache: Arc<CacheStore>,
        detector: BlockDetector,
    ) -> Result<Self, reqwest::Error> {
        let client = build_http_client(config)?;
        Ok(Self::new(
            client,
            limiter,
            RetryPolicy::from_config(config),
            cache,
            detector,
        ))
    }

    /// Fetches `url` without a referrer
    pub async fn fetch_url(
        &self,
        url: &str,
        kind: FetchKind,
        cancel: &CancellationToken,
    ) -> FetchResult {
        self.fetch(&FetchRequest::new(url, kind), cancel).await
    }

    /// Fetches a document
    ///
    /// # Request Flow
    ///
    /// 1. Cache hit → re-classify the cached body, return `source = cache`
    /// 2. Per attempt: wait on the rate limiter, send one GET
    /// 3. Classify the response:
    ///
    /// | Condition | Action |
    /// |-----------|--------|
    /// | Network error | Retry |
    /// | Retryable status, challenge content | Blocked |
    /// | Retryable status, other content | Retry |
    /// | Blocked (status, empty body, title, fingerprint) | Blocked, dumped to `blocked/` |
    /// | 200 with body | Fetched, written to cache |
    /// | Any other status | Failed, no retry |
    ///
    /// 4. Budget spent → Failed with `RetriesExhausted`
    /// 5. Cancelled → Failed with `Cancelled`
    pub async fn fetch(&self, request: &FetchRequest, cancel: &CancellationToken) -> FetchResult {
        if cancel.is_cancelled() {
            return self.failed(request, None, FetchError::Cancelled);
        }

        if let Some(cached) = self.from_cache(request) {
            return cached;
        }

        let outcome = self
            .policy
            .run(cancel, |attempt| self.attempt(request, attempt, cancel))
            .await;

        match outcome {
            Ok(result) => result,
            Err(RetryError::Exhausted {
                attempts,
                status,
                last_error,
            }) => {
                tracing::warn!(
                    "Giving up on {} after {} attempts: {}",
                    request.url,
                    attempts,
                    last_error
                );
                self.failed(
                    request,
                    status,
                    FetchError::RetriesExhausted {
                        status,
                        attempts,
                        last_error,
                    },
                )
                .with_attempts(attempts)
            }
            Err(RetryError::Cancelled { attempts }) => {
                self.failed(request, None, FetchError::Cancelled)
                    .with_attempts(attempts)
            }
        }
    }

    fn from_cache(&self, request: &FetchRequest) -> Option<FetchResult> {
        let text = self.cache.read(request.kind, &request.url)?;
        let path = Some(self.cache.entry_path(request.kind, &request.url));

        let result = match self.detector.classify(None, Some(&text)) {
            Some(reason) => {
                tracing::debug!("Cached {} for {} is blocked: {}", request.kind, request.url, reason);
                FetchResult::blocked(
                    &request.url,
                    request.kind,
                    FetchSource::Cache,
                    None,
                    Some(text),
                    reason,
                )
                .with_blocked_path(path.clone())
            }
            None => {
                tracing::debug!("Serving {} from cache: {}", request.kind, request.url);
                FetchResult::fetched(&request.url, request.kind, FetchSource::Cache, None, text)
            }
        };

        Some(result.with_cache_path(path))
    }

    async fn attempt(
        &self,
        request: &FetchRequest,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Attempt<FetchResult> {
        if !self.limiter.wait(cancel).await {
            return Attempt::Done(
                self.failed(request, None, FetchError::Cancelled)
                    .with_attempts(attempt - 1),
            );
        }

        tracing::debug!("GET {} (attempt {})", request.url, attempt);

        let mut builder = self.client.get(&request.url);
        if let Some(referrer) = &request.referrer {
            builder = builder.header(REFERER, referrer.as_str());
        }

        let response = tokio::select! {
            response = builder.send() => response,
            _ = cancel.cancelled() => {
                return Attempt::Done(
                    self.failed(request, None, FetchError::Cancelled).with_attempts(attempt),
                );
            }
        };

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return Attempt::Retry {
                    status: None,
                    error: describe_error(&e),
                }
            }
        };

        let status = response.status();
        let code = status.as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return Attempt::Retry {
                    status: Some(code),
                    error: describe_error(&e),
                }
            }
        };

        if self.policy.is_retryable(code) {
            return match self.detector.classify_content(&body) {
                Some(reason) => Attempt::Done(self.blocked(request, code, body, reason, attempt)),
                None => Attempt::Retry {
                    status: Some(code),
                    error: format!("http_{}", code),
                },
            };
        }

        if let Some(reason) = self.detector.classify(Some(code), Some(&body)) {
            return Attempt::Done(self.blocked(request, code, body, reason, attempt));
        }

        if status == StatusCode::OK {
            let path = self.cache.write(request.kind, &request.url, &body);
            tracing::debug!("Fetched {} ({} bytes)", request.url, body.len());
            return Attempt::Done(
                FetchResult::fetched(
                    &request.url,
                    request.kind,
                    FetchSource::Http,
                    Some(code),
                    body,
                )
                .with_cache_path(path)
                .with_attempts(attempt),
            );
        }

        tracing::debug!("Terminal status {} for {}", code, request.url);
        Attempt::Done(
            self.failed(request, Some(code), FetchError::TerminalStatus { status: code })
                .with_attempts(attempt),
        )
    }

    fn blocked(
        &self,
        request: &FetchRequest,
        status: u16,
        body: String,
        reason: BlockReason,
        attempt: u32,
    ) -> FetchResult {
        tracing::warn!("Blocked on {} ({}): {}", request.url, status, reason);
        let dump = self.cache.save_blocked(request.kind, &request.url, &body);
        FetchResult::blocked(
            &request.url,
            request.kind,
            FetchSource::Http,
            Some(status),
            Some(body),
            reason,
        )
        .with_blocked_path(dump)
        .with_attempts(attempt)
    }

    fn failed(&self, request: &FetchRequest, status: Option<u16>, error: FetchError) -> FetchResult {
        FetchResult::failed(&request.url, request.kind, FetchSource::Http, status, error)
    }
}

fn describe_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        format!("request timeout: {}", e)
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}
