// src/crawler/loader.rs
use std::collections::HashMap;
use std::time::{Duration, Instant};
use anyhow::Context;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::config::AuthContext;
use crate::error::{DiscoveryError, DiscoveryResult};

/// A fetched page ready for link extraction
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedPage {
    /// Final URL after redirects; relative links resolve against it
    pub url: Url,
    pub html: String,
    pub status: Option<u16>,
}

/// Fetches one page, applying authentication headers before the request
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn load(&self, url: &Url, auth: Option<&AuthContext>) -> DiscoveryResult<LoadedPage>;

    /// Whether pages are rendered with JavaScript
    fn renders_javascript(&self) -> bool {
        false
    }
}

/// DOM size and finished resource count; unchanged readings mean the page is idle
const PAGE_FINGERPRINT_JS: &str =
    "document.documentElement.outerHTML.length + ':' + performance.getEntriesByType('resource').length";
const QUIET_WINDOW: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Tracks page fingerprints until one holds for the quiet window
#[derive(Debug)]
struct Quiescence {
    window: Duration,
    last: Option<Value>,
    since: Instant,
}

impl Quiescence {
    fn new(window: Duration, now: Instant) -> Self {
        Self { window, last: None, since: now }
    }

    /// Record a reading taken at `now`; true once it has been stable long enough
    fn observe(&mut self, reading: Value, now: Instant) -> bool {
        if self.last.as_ref() != Some(&reading) {
            self.last = Some(reading);
            self.since = now;
            return false;
        }
        now.duration_since(self.since) >= self.window
    }
}

/// Headless Chrome backend; each page gets its own incognito context
#[derive(Clone)]
pub struct BrowserLoader {
    browser: Browser,
    page_timeout: Duration,
}

impl BrowserLoader {
    /// Launch a headless browser. Blocking, call from a blocking-safe context.
    pub fn launch(page_timeout: Duration) -> anyhow::Result<Self> {
        let options = LaunchOptions::default_builder()
            .headless(true)
            .idle_browser_timeout(page_timeout.max(Duration::from_secs(60)) * 4)
            .build()
            .map_err(|e| anyhow::anyhow!("Browser launch options error: {}", e))?;
        let browser = Browser::new(options).context("Failed to launch Chrome/Chromium")?;
        info!("Headless browser launched");
        Ok(Self { browser, page_timeout })
    }

    /// Launch without blocking the async runtime
    pub async fn launch_async(page_timeout: Duration) -> anyhow::Result<Self> {
        tokio::task::spawn_blocking(move || Self::launch(page_timeout))
            .await
            .context("Browser launch task panicked")?
    }

    /// Poll until the DOM and network activity stop changing, at most `budget`
    fn wait_for_quiescence(tab: &Tab, budget: Duration) {
        let started = Instant::now();
        let mut quiet = Quiescence::new(QUIET_WINDOW, started);

        while started.elapsed() < budget {
            let reading = match tab.evaluate(PAGE_FINGERPRINT_JS, false) {
                Ok(object) => object.value.unwrap_or(Value::Null),
                Err(e) => {
                    debug!("Page fingerprint unavailable: {}", e);
                    return;
                }
            };
            if quiet.observe(reading, Instant::now()) {
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        debug!("Page still busy after {:?}", budget);
    }

    fn load_sync(
        browser: &Browser,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> anyhow::Result<(String, String)> {
        let started = Instant::now();
        let context = browser.new_context().context("Failed to create browser context")?;
        let tab = context.new_tab().context("Failed to create tab")?;
        tab.set_default_timeout(timeout);

        if !headers.is_empty() {
            let extra: HashMap<&str, &str> = headers.iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            tab.set_extra_http_headers(extra).context("Failed to set request headers")?;
        }

        tab.navigate_to(url).context("Failed to navigate")?;
        tab.wait_until_navigated().context("Navigation timeout")?;
        Self::wait_for_quiescence(&tab, timeout.saturating_sub(started.elapsed()));

        let html = tab.get_content().context("Failed to read rendered DOM")?;
        let final_url = tab.get_url();
        if let Err(e) = tab.close(true) {
            debug!("Failed to close tab for {}: {}", url, e);
        }
        Ok((final_url, html))
    }
}

#[async_trait]
impl PageLoader for BrowserLoader {
    async fn load(&self, url: &Url, auth: Option<&AuthContext>) -> DiscoveryResult<LoadedPage> {
        let browser = self.browser.clone();
        let target = url.to_string();
        let headers: HashMap<String, String> = auth
            .map(|a| a.headers.clone().into_iter().collect())
            .unwrap_or_default();
        let timeout = self.page_timeout;

        let (final_url, html) = tokio::task::spawn_blocking(move || {
            Self::load_sync(&browser, &target, &headers, timeout)
        })
        .await
        .map_err(|e| DiscoveryError::Browser(format!("Browser task panicked: {}", e)))?
        .map_err(|e| DiscoveryError::Browser(format!("{}: {:#}", url, e)))?;

        Ok(LoadedPage {
            url: Url::parse(&final_url).unwrap_or_else(|_| url.clone()),
            html,
            status: None,
        })
    }

    fn renders_javascript(&self) -> bool {
        true
    }
}

/// Plain HTTP backend used when no browser is available
#[derive(Clone)]
pub struct HttpLoader {
    client: Client,
}

impl HttpLoader {
    pub fn new(user_agent: &str, page_timeout: Duration) -> DiscoveryResult<Self> {
        let client = Client::builder()
            .timeout(page_timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| DiscoveryError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn header_map(auth: Option<&AuthContext>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in auth.map(|a| a.headers.iter()).into_iter().flatten() {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => debug!("Skipping invalid header {}", name),
            }
        }
        headers
    }
}

#[async_trait]
impl PageLoader for HttpLoader {
    async fn load(&self, url: &Url, auth: Option<&AuthContext>) -> DiscoveryResult<LoadedPage> {
        debug!("GET {}", url);
        let response = self.client
            .get(url.clone())
            .headers(Self::header_map(auth))
            .send()
            .await
            .map_err(|e| DiscoveryError::Network(format!("Failed to GET {}: {}", url, e)))?;

        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let is_html = response.headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html"))
            .unwrap_or(true);

        let html = if is_html {
            response.text()
                .await
                .map_err(|e| DiscoveryError::Network(format!("Failed to read body of {}: {}", url, e)))?
        } else {
            String::new()
        };

        Ok(LoadedPage { url: final_url, html, status: Some(status) })
    }
}
