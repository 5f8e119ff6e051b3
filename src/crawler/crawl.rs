// src/crawler/crawl.rs
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::{Origin, Url};

use super::extract::extract_links;
use super::loader::PageLoader;
use crate::config::{AuthContext, DiscoveryConfig};
use crate::core::{DiscoveredUrl, DiscoveryChannel, FormRecord};
use crate::utils::normalized_key;

/// Budgets bounding one crawl
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrawlLimits {
    pub max_depth: u32,
    pub max_urls: usize,
    pub page_timeout: Duration,
    pub crawl_timeout: Duration,
}

impl CrawlLimits {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            max_depth: config.max_crawl_depth,
            max_urls: config.max_urls_per_domain,
            page_timeout: config.page_timeout(),
            crawl_timeout: config.crawl_timeout(),
        }
    }
}

/// Everything a crawl found. Partial results after a timeout are still valid.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlOutcome {
    pub urls: Vec<DiscoveredUrl>,
    pub forms: Vec<FormRecord>,
    pub pages_visited: usize,
    pub max_depth_reached: u32,
    pub timed_out: bool,
}

/// Breadth-first, same-origin crawler over a `PageLoader`
#[derive(Clone)]
pub struct DepthBoundedCrawler {
    loader: Arc<dyn PageLoader>,
    limits: CrawlLimits,
}

struct CrawlState {
    outcome: CrawlOutcome,
    /// normalized URL -> index into outcome.urls
    known: HashMap<String, usize>,
    queued: HashSet<String>,
    form_signatures: HashSet<String>,
    authenticated: bool,
}

impl CrawlState {
    /// Record a URL unless known or over budget. Returns true when newly recorded.
    fn record(&mut self, url: &Url, depth: u32, channel: DiscoveryChannel, source: Option<&Url>, max_urls: usize) -> bool {
        let key = normalized_key(url.as_str());
        if self.known.contains_key(&key) || self.outcome.urls.len() >= max_urls {
            return false;
        }
        let mut record = DiscoveredUrl::new(key.clone(), channel, depth);
        record.source_page = source.map(|s| s.to_string());
        record.authenticated = self.authenticated;
        for (name, value) in url.query_pairs() {
            record.parameters.entry(name.into_owned()).or_insert_with(|| value.into_owned());
        }
        self.known.insert(key, self.outcome.urls.len());
        self.outcome.urls.push(record);
        true
    }
}

impl DepthBoundedCrawler {
    pub fn new(loader: Arc<dyn PageLoader>, limits: CrawlLimits) -> Self {
        Self { loader, limits }
    }

    /// Crawl from `seeds` (depth 0). Links are followed only within the origin of
    /// the seed they descend from; others are recorded once.
    pub async fn crawl(&self, seeds: &[Url], auth: Option<&AuthContext>) -> CrawlOutcome {
        let limits = self.limits;
        let deadline = Instant::now() + limits.crawl_timeout;

        let mut state = CrawlState {
            outcome: CrawlOutcome::default(),
            known: HashMap::new(),
            queued: HashSet::new(),
            form_signatures: HashSet::new(),
            authenticated: auth.is_some(),
        };
        let mut queue: VecDeque<(Url, u32, Origin)> = VecDeque::new();

        for seed in seeds {
            state.record(seed, 0, DiscoveryChannel::BrowserCrawl, None, limits.max_urls);
            if state.queued.insert(normalized_key(seed.as_str())) {
                queue.push_back((seed.clone(), 0, seed.origin()));
            }
        }

        info!("Crawling {} seed(s), max depth {}, max urls {}", seeds.len(), limits.max_depth, limits.max_urls);

        while let Some((url, depth, origin)) = queue.pop_front() {
            // seeds are always visited; past them, a full budget ends the crawl
            if depth > 0 && state.outcome.urls.len() >= limits.max_urls {
                debug!("URL budget of {} exhausted with {} pages queued", limits.max_urls, queue.len() + 1);
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                state.outcome.timed_out = true;
                break;
            }

            let page_budget = limits.page_timeout.min(deadline - now);
            let page = match tokio::time::timeout(page_budget, self.loader.load(&url, auth)).await {
                Ok(Ok(page)) => page,
                Ok(Err(e)) => {
                    warn!("Failed to load {}: {}", url, e);
                    continue;
                }
                Err(_) => {
                    if Instant::now() >= deadline {
                        state.outcome.timed_out = true;
                        break;
                    }
                    warn!("Page load timed out after {:?}: {}", page_budget, url);
                    continue;
                }
            };

            state.outcome.pages_visited += 1;
            state.outcome.max_depth_reached = state.outcome.max_depth_reached.max(depth);
            if let Some(&index) = state.known.get(&normalized_key(url.as_str())) {
                state.outcome.urls[index].status_code = page.status;
                state.outcome.urls[index].javascript = self.loader.renders_javascript();
            }

            let extracted = extract_links(&page.url, &page.html);
            let child_depth = depth + 1;

            for link in extracted.links {
                state.record(&link, child_depth, DiscoveryChannel::BrowserCrawl, Some(&url), limits.max_urls);

                let key = normalized_key(link.as_str());
                let followable = child_depth <= limits.max_depth
                    && link.origin() == origin
                    && state.known.contains_key(&key);
                if followable && state.queued.insert(key) {
                    queue.push_back((link, child_depth, origin.clone()));
                }
            }

            for mut form in extracted.forms {
                form.authenticated = state.authenticated;
                let budget_full = state.outcome.urls.len() >= limits.max_urls;
                if budget_full && !state.known.contains_key(&normalized_key(&form.action)) {
                    continue;
                }
                if !state.form_signatures.insert(form.signature()) {
                    continue;
                }
                if let Ok(action) = Url::parse(&form.action) {
                    let is_new = state.record(&action, child_depth, DiscoveryChannel::Form, Some(&url), limits.max_urls);
                    if is_new {
                        if let Some(record) = state.outcome.urls.last_mut() {
                            record.method = form.method.clone();
                            for field in &form.fields {
                                record.parameters.entry(field.name.clone()).or_default();
                            }
                        }
                    }
                }
                state.outcome.forms.push(form);
            }
        }

        if state.outcome.timed_out {
            warn!("Crawl timed out after {:?}, returning partial results", limits.crawl_timeout);
        }
        info!(
            "Crawl finished: {} pages visited, {} URLs, {} forms",
            state.outcome.pages_visited,
            state.outcome.urls.len(),
            state.outcome.forms.len()
        );
        state.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use async_trait::async_trait;

    use crate::crawler::loader::LoadedPage;
    use crate::error::{DiscoveryError, DiscoveryResult};

    /// Serves fixed HTML per URL and remembers what was loaded
    #[derive(Default)]
    struct FakeLoader {
        pages: HashMap<String, String>,
        delay: Option<Duration>,
        loaded: Mutex<Vec<String>>,
        headers_seen: Mutex<Vec<Option<AuthContext>>>,
    }

    impl FakeLoader {
        fn with_pages(pages: &[(&str, &str)]) -> Self {
            Self {
                pages: pages.iter().map(|(u, h)| (u.to_string(), h.to_string())).collect(),
                ..Default::default()
            }
        }

        fn loaded(&self) -> Vec<String> {
            self.loaded.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageLoader for FakeLoader {
        async fn load(&self, url: &Url, auth: Option<&AuthContext>) -> DiscoveryResult<LoadedPage> {
            self.loaded.lock().unwrap().push(url.to_string());
            self.headers_seen.lock().unwrap().push(auth.cloned());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.pages.get(url.as_str()) {
                Some(html) => Ok(LoadedPage { url: url.clone(), html: html.clone(), status: Some(200) }),
                None => Err(DiscoveryError::Network(format!("404 {}", url))),
            }
        }
    }

    fn limits(max_depth: u32, max_urls: usize) -> CrawlLimits {
        CrawlLimits {
            max_depth,
            max_urls,
            page_timeout: Duration::from_secs(5),
            crawl_timeout: Duration::from_secs(30),
        }
    }

    fn seed() -> Url {
        Url::parse("https://site.test/").unwrap()
    }

    #[tokio::test]
    async fn test_same_origin_links_recursed_off_origin_recorded() {
        let loader = Arc::new(FakeLoader::with_pages(&[
            ("https://site.test/", r#"<a href="/a">A</a><a href="/b">B</a><a href="https://other.test/">O</a>"#),
            ("https://site.test/a", r#"<a href="/c">C</a><a href="https://other.test/">O</a>"#),
            ("https://site.test/b", "<p>leaf</p>"),
        ]));
        let crawler = DepthBoundedCrawler::new(loader.clone(), limits(1, 100));

        let outcome = crawler.crawl(&[seed()], None).await;

        assert_eq!(
            loader.loaded(),
            vec!["https://site.test/", "https://site.test/a", "https://site.test/b"]
        );
        assert_eq!(outcome.pages_visited, 3);
        assert_eq!(outcome.max_depth_reached, 1);

        let off_origin: Vec<_> = outcome.urls.iter().filter(|u| u.url == "https://other.test/").collect();
        assert_eq!(off_origin.len(), 1);
        assert_eq!(off_origin[0].depth, 1);

        let beyond = outcome.urls.iter().find(|u| u.url == "https://site.test/c").unwrap();
        assert_eq!(beyond.depth, 2);
        assert!(!loader.loaded().contains(&"https://site.test/c".to_string()));
    }

    #[tokio::test]
    async fn test_cyclic_links_terminate() {
        let loader = Arc::new(FakeLoader::with_pages(&[
            ("https://site.test/", r#"<a href="/a">A</a>"#),
            ("https://site.test/a", r#"<a href="/">home</a><a href="/a#self">self</a>"#),
        ]));
        let crawler = DepthBoundedCrawler::new(loader.clone(), limits(10, 100));

        let outcome = crawler.crawl(&[seed()], None).await;
        assert_eq!(outcome.pages_visited, 2);
        assert_eq!(outcome.urls.len(), 2);
    }

    #[tokio::test]
    async fn test_url_budget_bounds_visits_and_records() {
        let many: String = (0..20).map(|i| format!(r#"<a href="/p{i}">p</a>"#)).collect();
        let mut pages = vec![("https://site.test/".to_string(), many)];
        for i in 0..20 {
            pages.push((format!("https://site.test/p{i}"), "<p>x</p>".to_string()));
        }
        let refs: Vec<(&str, &str)> = pages.iter().map(|(u, h)| (u.as_str(), h.as_str())).collect();
        let loader = Arc::new(FakeLoader::with_pages(&refs));
        let crawler = DepthBoundedCrawler::new(loader.clone(), limits(3, 5));

        let outcome = crawler.crawl(&[seed()], None).await;
        assert_eq!(outcome.urls.len(), 5);
        assert!(outcome.pages_visited <= 5);
        assert!(loader.loaded().len() <= 5);
    }

    #[tokio::test]
    async fn test_full_budget_stops_loading_queued_pages() {
        let links: String = (0..10).map(|i| format!(r#"<a href="/p{i}">p</a>"#)).collect();
        let mut pages = vec![("https://site.test/".to_string(), links)];
        for i in 0..10 {
            let form = format!(r#"<form action="/submit{i}" method="post"><input name="q"></form>"#);
            pages.push((format!("https://site.test/p{i}"), form));
        }
        let refs: Vec<(&str, &str)> = pages.iter().map(|(u, h)| (u.as_str(), h.as_str())).collect();
        let loader = Arc::new(FakeLoader::with_pages(&refs));
        let crawler = DepthBoundedCrawler::new(loader.clone(), limits(3, 4));

        let outcome = crawler.crawl(&[seed()], None).await;

        assert_eq!(loader.loaded(), vec!["https://site.test/"]);
        assert_eq!(outcome.pages_visited, 1);
        assert_eq!(outcome.urls.len(), 4);
        assert!(outcome.forms.is_empty());
    }

    #[tokio::test]
    async fn test_links_followed_only_within_their_seed_origin() {
        let loader = Arc::new(FakeLoader::with_pages(&[
            ("https://site.test/", r#"<a href="https://other.test/private">X</a><a href="/a">A</a>"#),
            ("https://site.test/a", "<p>a</p>"),
            ("https://other.test/", r#"<a href="/public">P</a>"#),
            ("https://other.test/public", "<p>p</p>"),
            ("https://other.test/private", "<p>x</p>"),
        ]));
        let crawler = DepthBoundedCrawler::new(loader.clone(), limits(2, 100));
        let seeds = [seed(), Url::parse("https://other.test/").unwrap()];

        let outcome = crawler.crawl(&seeds, None).await;
        let loaded = loader.loaded();

        assert!(loaded.contains(&"https://site.test/a".to_string()));
        assert!(loaded.contains(&"https://other.test/public".to_string()));
        assert!(!loaded.contains(&"https://other.test/private".to_string()));
        assert!(outcome.urls.iter().any(|u| u.url == "https://other.test/private"));
    }

    #[tokio::test]
    async fn test_page_failure_is_skipped() {
        let loader = Arc::new(FakeLoader::with_pages(&[
            ("https://site.test/", r#"<a href="/missing">M</a><a href="/ok">OK</a>"#),
            ("https://site.test/ok", "<p>fine</p>"),
        ]));
        let crawler = DepthBoundedCrawler::new(loader.clone(), limits(2, 100));

        let outcome = crawler.crawl(&[seed()], None).await;
        assert_eq!(outcome.pages_visited, 2);
        assert_eq!(outcome.urls.len(), 3);
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn test_crawl_timeout_returns_partial_results() {
        let mut loader = FakeLoader::with_pages(&[
            ("https://site.test/", r#"<a href="/a">A</a>"#),
            ("https://site.test/a", "<p>slow</p>"),
        ]);
        loader.delay = Some(Duration::from_millis(300));
        let crawler = DepthBoundedCrawler::new(Arc::new(loader), CrawlLimits {
            max_depth: 3,
            max_urls: 100,
            page_timeout: Duration::from_secs(5),
            crawl_timeout: Duration::from_millis(450),
        });

        let outcome = crawler.crawl(&[seed()], None).await;
        assert!(outcome.timed_out);
        assert_eq!(outcome.pages_visited, 1);
        assert_eq!(outcome.urls.len(), 2);
    }

    #[tokio::test]
    async fn test_auth_context_reaches_every_load_and_flags_results() {
        let loader = Arc::new(FakeLoader::with_pages(&[
            ("https://site.test/", r#"<a href="/account">A</a><form action="/settings" method="post"><input name="email"></form>"#),
            ("https://site.test/account", "<p>me</p>"),
        ]));
        let crawler = DepthBoundedCrawler::new(loader.clone(), limits(2, 100));
        let mut auth = AuthContext::default();
        auth.headers.insert("Cookie".to_string(), "sid=1".to_string());

        let outcome = crawler.crawl(&[seed()], Some(&auth)).await;

        let seen = loader.headers_seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|h| h.as_ref() == Some(&auth)));
        assert!(outcome.urls.iter().all(|u| u.authenticated));

        let settings = outcome.urls.iter().find(|u| u.url == "https://site.test/settings").unwrap();
        assert_eq!(settings.channel, DiscoveryChannel::Form);
        assert_eq!(settings.method, "POST");
        assert!(settings.parameters.contains_key("email"));
        assert_eq!(outcome.forms.len(), 1);
        assert!(outcome.forms[0].authenticated);
    }
}
