// src/stages/deep.rs
use std::collections::HashSet;
use async_trait::async_trait;
use tracing::{info, warn};
use url::Url;

use super::{StageContext, StageModule};
use crate::core::{DiscoveredUrl, FormRecord, LiveService, Stage};
use crate::crawler::{CrawlLimits, CrawlOutcome, DepthBoundedCrawler};
use crate::engine::ParallelExecutor;
use crate::error::DiscoveryResult;
use crate::tools::{commands, decode};
use crate::utils::normalized_key;

#[derive(Debug, Clone, Default)]
pub struct DeepOutput {
    pub urls: Vec<DiscoveredUrl>,
    pub forms: Vec<FormRecord>,
    pub seeds: usize,
    pub fast_crawl_urls: usize,
    pub browser_pages_visited: usize,
    pub decode_warnings: usize,
}

pub struct DeepStage {
    ctx: StageContext,
}

/// Fast-crawler records carry no depth: seeds are depth 0, everything else one hop out
pub(crate) fn tag_fast_crawl_depth(urls: &mut [DiscoveredUrl], seeds: &[String]) {
    let seed_keys: HashSet<String> = seeds.iter().map(|s| normalized_key(s)).collect();
    for url in urls {
        url.depth = if seed_keys.contains(&url.url) { 0 } else { 1 };
    }
}

impl DeepStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    async fn fast_crawl(&self, seeds: &[String]) -> DiscoveryResult<(Vec<DiscoveredUrl>, usize)> {
        let invocation = commands::katana(&self.ctx.config, seeds, self.ctx.config.crawl_depth, None);
        let output = self.ctx.runner.run(&invocation).await?;
        let mut decoded = decode::decode_crawl(&output.stdout);
        tag_fast_crawl_depth(&mut decoded.records, seeds);
        Ok((decoded.records, decoded.warnings))
    }

    /// One depth-bounded crawl per seed. None when no rendering crawl is configured.
    async fn browser_crawl(&self, seeds: &[String]) -> Option<Vec<CrawlOutcome>> {
        if !self.ctx.config.browser_crawl {
            return None;
        }
        let Some(loader) = self.ctx.loader.clone() else {
            warn!("Browser crawl requested but no page loader is available");
            return None;
        };

        let crawler = DepthBoundedCrawler::new(loader, CrawlLimits::from_config(&self.ctx.config));
        let jobs: Vec<_> = seeds.iter()
            .filter_map(|seed| Url::parse(seed).ok())
            .map(|seed| {
                let crawler = crawler.clone();
                async move { crawler.crawl(&[seed], None).await }
            })
            .collect();

        let executor = ParallelExecutor::new(self.ctx.config.parallel);
        Some(executor.run_all(jobs).await)
    }
}

#[async_trait]
impl StageModule for DeepStage {
    type Input = Vec<LiveService>;
    type Output = DeepOutput;

    fn stage(&self) -> Stage {
        Stage::DeepDiscovery
    }

    async fn run(&self, services: &Vec<LiveService>) -> DiscoveryResult<DeepOutput> {
        let seeds: Vec<String> = services.iter()
            .take(self.ctx.config.max_crawl_services)
            .map(|s| s.url.clone())
            .collect();
        info!("Starting deep discovery from {} of {} services", seeds.len(), services.len());

        let mut output = DeepOutput { seeds: seeds.len(), ..Default::default() };

        let fast_error = match self.fast_crawl(&seeds).await {
            Ok((urls, warnings)) => {
                output.fast_crawl_urls = urls.len();
                output.decode_warnings = warnings;
                output.urls.extend(urls);
                None
            }
            Err(e) => {
                warn!("Fast crawl failed: {}", e);
                Some(e)
            }
        };

        let browser_ok = match self.browser_crawl(&seeds).await {
            Some(outcomes) => {
                let visited: usize = outcomes.iter().map(|o| o.pages_visited).sum();
                output.browser_pages_visited = visited;
                for outcome in outcomes {
                    output.urls.extend(outcome.urls);
                    output.forms.extend(outcome.forms);
                }
                if visited == 0 && !seeds.is_empty() {
                    warn!("Browser crawl could not load any page");
                    false
                } else {
                    true
                }
            }
            None => false,
        };

        if let Some(e) = fast_error {
            if !browser_ok {
                return Err(e);
            }
        }

        info!(
            "Deep discovery complete: {} URLs ({} from fast crawl), {} forms",
            output.urls.len(),
            output.fast_crawl_urls,
            output.forms.len()
        );
        Ok(output)
    }
}
