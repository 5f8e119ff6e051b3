// src/stages/authenticated.rs
use std::collections::BTreeMap;
use std::sync::Arc;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};
use url::Url;

use super::deep::tag_fast_crawl_depth;
use super::{StageContext, StageModule};
use crate::config::{AuthContext, AuthSettings, DiscoveryConfig};
use crate::core::{DiscoveredUrl, FormRecord, LiveService, PathParameter, Stage};
use crate::crawler::{CrawlLimits, CrawlOutcome, DepthBoundedCrawler, PageLoader};
use crate::engine::ParallelExecutor;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::tools::{commands, decode, CommandRunner};
use crate::utils::normalized_key;

/// Segment shapes that mark a variable path component, checked in order
static PATH_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("uuid", r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$"),
        ("date", r"^\d{4}-\d{2}-\d{2}$"),
        ("id", r"^\d+$"),
        ("hash", r"(?i)^[a-f0-9]{32,}$"),
        ("email", r"(?i)^[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}$"),
    ]
    .into_iter()
    .map(|(name, pattern)| (name, Regex::new(pattern).unwrap()))
    .collect()
});

/// Group variable path segments by (kind, position), collecting example values
pub fn mine_path_parameters<'a>(urls: impl IntoIterator<Item = &'a str>) -> Vec<PathParameter> {
    let mut found: BTreeMap<(usize, &'static str), PathParameter> = BTreeMap::new();

    for raw in urls {
        let Ok(url) = Url::parse(raw) else { continue };
        let segments = url.path().split('/').filter(|s| !s.is_empty());

        for (position, segment) in segments.enumerate() {
            let Some((name, re)) = PATH_PATTERNS.iter().find(|(_, re)| re.is_match(segment)) else {
                continue;
            };
            let param = found.entry((position, *name)).or_insert_with(|| PathParameter {
                name: name.to_string(),
                pattern: re.as_str().to_string(),
                position,
                example_values: Vec::new(),
            });
            if !param.example_values.iter().any(|v| v == segment) {
                param.example_values.push(segment.to_string());
            }
        }
    }

    let params: Vec<PathParameter> = found.into_values().collect();
    debug!("Mined {} path parameters", params.len());
    params
}

#[derive(Debug, Clone, Default)]
pub struct AuthenticatedInput {
    pub settings: AuthSettings,
    pub services: Vec<LiveService>,
}

#[derive(Debug, Clone, Default)]
pub struct AuthenticatedOutput {
    pub urls: Vec<DiscoveredUrl>,
    pub forms: Vec<FormRecord>,
    pub path_parameters: Vec<PathParameter>,
    pub seeds: usize,
}

/// Everything one seed contributed
struct SeedResult {
    seed: String,
    fast: DiscoveryResult<Vec<DiscoveredUrl>>,
    rendered: Option<CrawlOutcome>,
}

pub struct AuthenticatedStage {
    ctx: StageContext,
}

impl AuthenticatedStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    /// Entry URLs first, then every live service some entry covers
    fn seeds(input: &AuthenticatedInput) -> Vec<(String, AuthContext)> {
        let mut seeds: Vec<(String, AuthContext)> = Vec::new();
        let candidates = input.settings.authentication.iter()
            .map(|a| a.url.as_str())
            .chain(input.services.iter().map(|s| s.url.as_str()));

        for url in candidates {
            let Some(entry) = input.settings.for_url(url) else { continue };
            if seeds.iter().any(|(seen, _)| normalized_key(seen) == normalized_key(url)) {
                continue;
            }
            seeds.push((url.to_string(), entry.context()));
        }
        seeds
    }

    async fn crawl_seed(
        config: Arc<DiscoveryConfig>,
        runner: Arc<dyn CommandRunner>,
        loader: Option<Arc<dyn PageLoader>>,
        seed: String,
        auth: AuthContext,
    ) -> SeedResult {
        let seeds = [seed.clone()];
        let invocation = commands::katana(&config, &seeds, config.crawl_depth + 1, Some(&auth));
        let fast = runner.run(&invocation).await.map(|output| {
            let mut decoded = decode::decode_crawl(&output.stdout);
            tag_fast_crawl_depth(&mut decoded.records, &seeds);
            decoded.records
        });

        let rendered = match (loader, Url::parse(&seed)) {
            (Some(loader), Ok(start)) => {
                let crawler = DepthBoundedCrawler::new(loader, CrawlLimits::from_config(&config));
                Some(crawler.crawl(&[start], Some(&auth)).await)
            }
            _ => None,
        };

        SeedResult { seed, fast, rendered }
    }
}

#[async_trait]
impl StageModule for AuthenticatedStage {
    type Input = AuthenticatedInput;
    type Output = AuthenticatedOutput;

    fn stage(&self) -> Stage {
        Stage::AuthenticatedDiscovery
    }

    async fn run(&self, input: &AuthenticatedInput) -> DiscoveryResult<AuthenticatedOutput> {
        let seeds = Self::seeds(input);
        info!("Starting authenticated discovery from {} seeds", seeds.len());

        let jobs: Vec<_> = seeds.into_iter()
            .map(|(seed, auth)| Self::crawl_seed(
                self.ctx.config.clone(),
                self.ctx.runner.clone(),
                self.ctx.loader.clone(),
                seed,
                auth,
            ))
            .collect();
        let total = jobs.len();
        let results = ParallelExecutor::new(self.ctx.config.parallel).run_all(jobs).await;

        let mut output = AuthenticatedOutput { seeds: total, ..Default::default() };
        let mut failures = Vec::new();
        let mut productive = 0;

        for result in results {
            let mut seed_ok = false;
            match result.fast {
                Ok(urls) => {
                    seed_ok = true;
                    output.urls.extend(urls);
                }
                Err(e) => {
                    warn!("Authenticated fast crawl of {} failed: {}", result.seed, e);
                    failures.push(format!("{}: {}", result.seed, e));
                }
            }
            if let Some(outcome) = result.rendered {
                seed_ok |= outcome.pages_visited > 0;
                output.urls.extend(outcome.urls);
                output.forms.extend(outcome.forms);
            }
            if seed_ok {
                productive += 1;
            }
        }

        if total > 0 && productive == 0 {
            return Err(DiscoveryError::StageFailure {
                stage: Stage::AuthenticatedDiscovery,
                message: failures.join("; "),
            });
        }

        for url in &mut output.urls {
            url.authenticated = true;
        }
        for form in &mut output.forms {
            form.authenticated = true;
        }
        output.path_parameters = mine_path_parameters(output.urls.iter().map(|u| u.url.as_str()));

        info!(
            "Authenticated discovery complete: {} URLs, {} forms, {} path parameters",
            output.urls.len(),
            output.forms.len(),
            output.path_parameters.len()
        );
        Ok(output)
    }
}
