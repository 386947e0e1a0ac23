//! Browser escalation for blocked pages
//!
//! When the HTTP path is blocked, a page is retried through a real browser
//! running on a persistent profile, so clearance cookies survive between
//! runs. A fetch walks through these states:
//!
//! ```text
//! INIT ─► NAVIGATE ─► CHECK ──ok──────────────────────────────► Fetched
//!                       │
//!                    blocked
//!                       ▼
//!                   AUTO_WAIT ──cleared─────────────────────────► Fetched
//!                       │
//!                 still blocked
//!                       ▼
//!          headed: MANUAL_PAUSE ──"abort"────────────────────► Blocked(manual_abort)
//!                       │ enter
//!                       ▼
//!                   re-CHECK ──ok─► Fetched, else ──────────────► Blocked
//! ```
//!
//! Automation sits behind [`BrowserDriver`] and the operator behind
//! [`OperatorPrompt`]; production uses [`ChromiumDriver`] and [`StdinPrompt`].

use crate::config::{BrowserSettings, FetchConfig};
use crate::crawler::retry::{Attempt, RetryError, RetryPolicy};
use crate::crawler::{
    BlockDetector, BlockReason, FetchRequest, FetchResult, FetchSource, RateLimiter,
};
use crate::storage::CacheStore;
use crate::FetchError;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Operator replies that end escalation for the rest of the run
const ABORT_WORDS: &[&str] = &["abort", "q", "quit", "exit"];

/// Errors raised by a browser driver
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("page error: {0}")]
    Page(String),

    #[error("browser is not running")]
    NotRunning,
}

/// Minimal browser automation surface used by [`BrowserFetcher`]
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Starts the browser; called once before the first navigation
    async fn launch(&mut self) -> Result<(), BrowserError>;

    /// Loads `url` in the working tab
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Rendered HTML of the working tab
    async fn content(&self) -> Result<String, BrowserError>;

    /// Writes a full-page PNG of the working tab to `path`
    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError>;

    /// Shuts the browser down; must tolerate being called when not running
    async fn close(&mut self);
}

/// Asks a human to solve a challenge in the visible browser window
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    /// Shows `message` and returns the operator's reply
    async fn ask(&self, message: &str) -> String;
}

/// Prompts on stdout and reads one line from stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinPrompt;

#[async_trait]
impl OperatorPrompt for StdinPrompt {
    async fn ask(&self, message: &str) -> String {
        println!("{}", message);
        let mut line = String::new();
        let mut reader = tokio::io::BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            // A closed stdin cannot answer; give up instead of pretending it was solved
            Ok(0) => "abort".to_string(),
            Ok(_) => line,
            Err(e) => {
                tracing::warn!("Failed to read operator reply: {}", e);
                "abort".to_string()
            }
        }
    }
}

/// Launch options for [`ChromiumDriver`]
#[derive(Debug, Clone)]
pub struct ChromiumOptions {
    pub profile_dir: PathBuf,
    pub headless: bool,
    pub executable: Option<PathBuf>,
    pub navigation_timeout: Duration,
    pub user_agent: String,
    pub accept_language: String,
}

impl ChromiumOptions {
    pub fn from_config(browser: &BrowserSettings, fetch: &FetchConfig) -> Self {
        Self {
            profile_dir: PathBuf::from(&browser.profile_dir),
            headless: browser.headless,
            executable: browser.executable.as_ref().map(PathBuf::from),
            navigation_timeout: Duration::from_secs(browser.navigation_timeout.max(1)),
            user_agent: fetch.user_agent.clone(),
            accept_language: fetch.accept_language.clone(),
        }
    }
}

/// Chrome/Chromium over the DevTools protocol
pub struct ChromiumDriver {
    options: ChromiumOptions,
    browser: Option<Browser>,
    page: Option<Page>,
    handler: Option<JoinHandle<()>>,
}

impl ChromiumDriver {
    pub fn new(options: ChromiumOptions) -> Self {
        Self {
            options,
            browser: None,
            page: None,
            handler: None,
        }
    }

    fn page(&self) -> Result<&Page, BrowserError> {
        self.page.as_ref().ok_or(BrowserError::NotRunning)
    }

    fn browser_config(&self) -> Result<BrowserConfig, BrowserError> {
        let opts = &self.options;
        let mut builder = BrowserConfig::builder()
            .user_data_dir(opts.profile_dir.clone())
            .request_timeout(opts.navigation_timeout)
            .window_size(1366, 900);

        builder = if opts.headless {
            builder.headless_mode(HeadlessMode::default())
        } else {
            builder.with_head()
        };

        if let Some(executable) = &opts.executable {
            builder = builder.chrome_executable(executable.clone());
        }

        builder
            .arg(format!("--user-agent={}", opts.user_agent))
            .arg(format!("--lang={}", primary_language(&opts.accept_language)))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .build()
            .map_err(BrowserError::Launch)
    }
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    async fn launch(&mut self) -> Result<(), BrowserError> {
        if self.browser.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.options.profile_dir).map_err(|e| {
            BrowserError::Launch(format!(
                "cannot create profile dir {}: {}",
                self.options.profile_dir.display(),
                e
            ))
        })?;

        let config = self.browser_config()?;
        tracing::info!(
            "Launching browser (headless={}) with profile {}",
            self.options.headless,
            self.options.profile_dir.display()
        );

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::trace!("Browser handler event error: {}", e);
                }
            }
            tracing::debug!("Browser handler task completed");
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(BrowserError::Launch(format!("cannot open tab: {}", e)));
            }
        };

        self.browser = Some(browser);
        self.page = Some(page);
        self.handler = Some(handler_task);
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let page = self.page()?;
        match tokio::time::timeout(self.options.navigation_timeout, page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Navigation(e.to_string())),
            Err(_) => Err(BrowserError::Navigation(format!(
                "timed out after {:?}",
                self.options.navigation_timeout
            ))),
        }
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.page()?
            .content()
            .await
            .map_err(|e| BrowserError::Page(e.to_string()))
    }

    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError> {
        let params = ScreenshotParams::builder().full_page(true).build();
        self.page()?
            .save_screenshot(params, path)
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Page(e.to_string()))
    }

    async fn close(&mut self) {
        self.page = None;
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                tracing::debug!("Browser close returned: {}", e);
            }
            if let Err(e) = browser.wait().await {
                tracing::debug!("Waiting for browser exit failed: {}", e);
            }
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

fn primary_language(accept_language: &str) -> &str {
    accept_language
        .split(',')
        .next()
        .map(|l| l.split(';').next().unwrap_or(l).trim())
        .filter(|l| !l.is_empty())
        .unwrap_or("en-US")
}

/// Challenge handling knobs
#[derive(Debug, Clone)]
pub struct EscalationOptions {
    pub headless: bool,
    /// Total time spent polling for automatic clearance
    pub challenge_wait: Duration,
    pub poll_interval: Duration,
}

impl EscalationOptions {
    pub fn from_config(browser: &BrowserSettings) -> Self {
        Self {
            headless: browser.headless,
            challenge_wait: Duration::from_secs(browser.challenge_wait),
            poll_interval: Duration::from_secs(browser.poll_interval.max(1)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DriverState {
    Idle,
    Ready,
    Failed(String),
}

/// Escalation fetcher over a single browser tab
///
/// Used from one task only, serially. Launches lazily on first use and
/// remembers a failed launch instead of retrying it on every call.
pub struct BrowserFetcher {
    driver: Box<dyn BrowserDriver>,
    prompt: Box<dyn OperatorPrompt>,
    limiter: RateLimiter,
    policy: RetryPolicy,
    cache: Arc<CacheStore>,
    detector: BlockDetector,
    options: EscalationOptions,
    state: DriverState,
}

impl BrowserFetcher {
    pub fn new(
        driver: Box<dyn BrowserDriver>,
        prompt: Box<dyn OperatorPrompt>,
        limiter: RateLimiter,
        policy: RetryPolicy,
        cache: Arc<CacheStore>,
        detector: BlockDetector,
        options: EscalationOptions,
    ) -> Self {
        Self {
            driver,
            prompt,
            limiter,
            policy,
            cache,
            detector,
            options,
            state: DriverState::Idle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == DriverState::Ready
    }

    /// Launches the browser now instead of on first fetch
    pub async fn initialize(&mut self) -> Result<(), BrowserError> {
        match &self.state {
            DriverState::Ready => Ok(()),
            DriverState::Failed(message) => Err(BrowserError::Launch(message.clone())),
            DriverState::Idle => match self.driver.launch().await {
                Ok(()) => {
                    self.state = DriverState::Ready;
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("Browser unavailable: {}", e);
                    self.state = DriverState::Failed(e.to_string());
                    Err(e)
                }
            },
        }
    }

    /// Releases the browser; safe to call repeatedly
    pub async fn close(&mut self) {
        if self.state == DriverState::Ready {
            tracing::info!("Closing browser");
            self.driver.close().await;
            self.state = DriverState::Idle;
        }
    }

    /// Fetches a page through the browser, handling challenges on the way
    pub async fn fetch(&mut self, request: &FetchRequest, cancel: &CancellationToken) -> FetchResult {
        if cancel.is_cancelled() {
            return self.failed(request, FetchError::Cancelled);
        }

        if let Err(e) = self.initialize().await {
            return self.failed(
                request,
                FetchError::Browser {
                    message: e.to_string(),
                },
            );
        }

        tracing::info!("Browser fetch: {}", request.url);
        let driver = &self.driver;
        let limiter = &self.limiter;
        // Err carries the attempts made before the slot wait was cancelled
        let navigation = self
            .policy
            .run(cancel, |attempt| async move {
                if !limiter.wait(cancel).await {
                    return Attempt::Done(Err(attempt - 1));
                }
                match driver.navigate(&request.url).await {
                    Ok(()) => Attempt::Done(Ok(())),
                    Err(e) => Attempt::Retry {
                        status: None,
                        error: e.to_string(),
                    },
                }
            })
            .await;

        match navigation {
            Ok(Ok(())) => {}
            Ok(Err(attempts)) | Err(RetryError::Cancelled { attempts }) => {
                return self
                    .failed(request, FetchError::Cancelled)
                    .with_attempts(attempts);
            }
            Err(RetryError::Exhausted {
                attempts,
                last_error,
                ..
            }) => {
                tracing::warn!("Browser navigation to {} failed: {}", request.url, last_error);
                return self
                    .failed(request, FetchError::TransientNetwork { message: last_error })
                    .with_attempts(attempts);
            }
        }

        let mut html = match self.driver.content().await {
            Ok(html) => html,
            Err(e) => {
                return self.failed(
                    request,
                    FetchError::Browser {
                        message: e.to_string(),
                    },
                )
            }
        };

        let mut blocked = self.detector.classify(None, Some(&html));
        if let Some(reason) = &blocked {
            tracing::warn!("Challenge on {} ({}), waiting for clearance", request.url, reason);
            match self.auto_wait(cancel).await {
                Ok(Some(cleared)) => {
                    html = cleared;
                    blocked = None;
                }
                Ok(None) => {}
                Err(error) => return self.failed(request, error),
            }
        }

        let Some(reason) = blocked else {
            return self.success(request, html);
        };

        let screenshot = self.take_screenshot(request).await;

        if self.options.headless {
            return self.blocked(request, html, reason, screenshot);
        }

        let reply = tokio::select! {
            reply = self.prompt.ask(
                "[manual] Challenge detected. Solve it in the browser window, then press Enter (or type 'abort' to stop):",
            ) => reply,
            _ = cancel.cancelled() => return self.failed(request, FetchError::Cancelled),
        };

        if is_abort(&reply) {
            tracing::warn!("Operator aborted on {}", request.url);
            return self.blocked(request, html, BlockReason::ManualAbort, screenshot);
        }

        let html = match self.driver.content().await {
            Ok(html) => html,
            Err(e) => {
                return self.failed(
                    request,
                    FetchError::Browser {
                        message: e.to_string(),
                    },
                )
            }
        };

        match self.detector.classify(None, Some(&html)) {
            None => self.success(request, html),
            Some(reason) => self.blocked(request, html, reason, screenshot),
        }
    }

    /// Polls the rendered page until it stops looking blocked or time runs out
    async fn auto_wait(&self, cancel: &CancellationToken) -> Result<Option<String>, FetchError> {
        let deadline = Instant::now() + self.options.challenge_wait;

        while Instant::now() < deadline {
            tokio::select! {
                _ = tokio::time::sleep(self.options.poll_interval) => {}
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            }

            match self.driver.content().await {
                Ok(html) if self.detector.classify(None, Some(&html)).is_none() => {
                    tracing::info!("Challenge cleared");
                    return Ok(Some(html));
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("Polling page content failed: {}", e),
            }
        }

        Ok(None)
    }

    async fn take_screenshot(&self, request: &FetchRequest) -> Option<PathBuf> {
        let path = self.cache.screenshot_path(request.kind, &request.url)?;
        match self.driver.screenshot(&path).await {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!("Screenshot of {} failed: {}", request.url, e);
                None
            }
        }
    }

    fn success(&self, request: &FetchRequest, html: String) -> FetchResult {
        let path = self.cache.write(request.kind, &request.url, &html);
        FetchResult::fetched(
            &request.url,
            request.kind,
            FetchSource::Browser,
            Some(200),
            html,
        )
        .with_cache_path(path)
        .with_attempts(1)
    }

    fn blocked(
        &self,
        request: &FetchRequest,
        html: String,
        reason: BlockReason,
        screenshot: Option<PathBuf>,
    ) -> FetchResult {
        let dump = self.cache.save_blocked(request.kind, &request.url, &html);
        FetchResult::blocked(
            &request.url,
            request.kind,
            FetchSource::Browser,
            None,
            Some(html),
            reason,
        )
        .with_blocked_path(dump)
        .with_screenshot_path(screenshot)
        .with_attempts(1)
    }

    fn failed(&self, request: &FetchRequest, error: FetchError) -> FetchResult {
        FetchResult::failed(&request.url, request.kind, FetchSource::Browser, None, error)
    }
}

fn is_abort(reply: &str) -> bool {
    let reply = reply.trim().to_lowercase();
    ABORT_WORDS.contains(&reply.as_str())
}
