use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{load_config, AuthSettings, DiscoveryConfig, Tool};
use crate::core::{RunResult, Stage};
use crate::crawler::{BrowserLoader, HttpLoader, PageLoader};
use crate::engine::Pipeline;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::reporting::ReportManager;
use crate::tools::ProcessRunner;
use crate::utils::extract_domain;

use super::commands::Args;

/// The command-line application: one discovery run per invocation
pub struct App {
    args: Args,
}

impl App {
    pub fn new(args: Args) -> Self {
        Self { args }
    }

    /// Run the application, returning the process exit code
    pub async fn run(&self) -> DiscoveryResult<i32> {
        if self.args.check_tools {
            return Ok(Self::check_tools());
        }

        let raw_target = self.args.url.as_deref()
            .ok_or_else(|| DiscoveryError::InvalidInput("--url is required".to_string()))?;
        let domain = extract_domain(raw_target)
            .ok_or_else(|| DiscoveryError::InvalidInput(format!("Cannot extract a domain from '{}'", raw_target)))?;

        let mut config = load_config(self.args.config.as_deref(), self.args.depth)?;
        config.apply_overrides(&self.args.overrides())?;
        let config = Arc::new(config);

        let auth = match &self.args.auth_config {
            Some(path) => Some(AuthSettings::load(path)?),
            None => None,
        };

        info!("Starting surface-discovery v{} against {}", env!("CARGO_PKG_VERSION"), domain);
        let mut pipeline = Pipeline::new(config.clone(), Arc::new(ProcessRunner::new()));
        if config.browser_crawl || auth.is_some() {
            if let Some(loader) = Self::page_loader(&config).await {
                pipeline = pipeline.with_loader(loader);
            }
        }
        if let Some(auth) = auth {
            pipeline = pipeline.with_auth(auth);
        }

        let result = pipeline.run(&domain).await?;

        let output = self.args.output.clone()
            .unwrap_or_else(|| ReportManager::default_output_path(&domain));
        ReportManager::new().write(&result, &output).await?;

        Self::print_summary(&result);
        println!("Report written to {}", output.display());

        Ok(if result.metadata.status == Stage::Failed { 1 } else { 0 })
    }

    /// Headless Chrome when it can be launched, plain HTTP otherwise
    async fn page_loader(config: &DiscoveryConfig) -> Option<Arc<dyn PageLoader>> {
        match BrowserLoader::launch_async(config.page_timeout()).await {
            Ok(browser) => return Some(Arc::new(browser)),
            Err(e) => warn!("Headless browser unavailable, falling back to HTTP crawling: {:#}", e),
        }
        match HttpLoader::new(&config.user_agent, config.page_timeout()) {
            Ok(http) => Some(Arc::new(http)),
            Err(e) => {
                warn!("HTTP crawler unavailable: {}", e);
                None
            }
        }
    }

    fn check_tools() -> i32 {
        let binaries: Vec<&str> = Tool::ALL.iter().map(|t| t.binary()).collect();
        let found = ProcessRunner::check_dependencies(&binaries);

        println!("External tools:");
        for (tool, path) in &found {
            match path {
                Some(path) => println!("  [ok]      {:<10} {}", tool, path.display()),
                None => println!("  [missing] {}", tool),
            }
        }

        if found.values().all(Option::is_some) { 0 } else { 1 }
    }

    fn print_summary(result: &RunResult) {
        let meta = &result.metadata;
        let stats = &result.statistics;

        println!();
        println!("Discovery of {} {} in {:.1}s", meta.target, meta.status, meta.duration_seconds.unwrap_or(0.0));
        if let Some(error) = &meta.error {
            println!("  Error:            {}", error);
        }
        println!("  Subdomains:       {}", stats.total_subdomains);
        println!("  Live hosts:       {}", stats.live_hosts);
        println!("  Open ports:       {}", stats.open_ports);
        println!("  Live services:    {}", stats.live_services);
        println!("  Technologies:     {}", stats.technologies_detected);
        println!("  URLs:             {}", stats.urls_discovered);
        println!("  Forms:            {}", stats.forms_discovered);
        if stats.authenticated_urls > 0 {
            println!("  Authenticated:    {}", stats.authenticated_urls);
        }
        println!("  Coverage:         {:.0}%", stats.coverage_completeness * 100.0);
    }
}
