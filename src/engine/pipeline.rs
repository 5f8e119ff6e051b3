// src/engine/pipeline.rs
use std::collections::BTreeMap;
use std::sync::Arc;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::config::{AuthSettings, DiscoveryConfig};
use crate::core::{RunResult, Stage};
use crate::crawler::PageLoader;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::stages::{
    ActiveStage, AuthenticatedInput, AuthenticatedStage, DeepStage, EnrichmentInput,
    EnrichmentStage, PassiveStage, PortStage, StageContext, StageModule,
};
use crate::tools::CommandRunner;
use crate::utils::is_valid_domain;

fn details<const N: usize>(pairs: [(&str, Value); N]) -> BTreeMap<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Sequences the discovery stages over one run result.
///
/// Passive and active discovery failures abort the run; every other
/// stage failure is recorded and leaves that stage's contribution empty.
pub struct Pipeline {
    ctx: StageContext,
    auth: Option<AuthSettings>,
}

impl Pipeline {
    pub fn new(config: Arc<DiscoveryConfig>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            ctx: StageContext::new(config, runner),
            auth: None,
        }
    }

    /// Page loader for the rendering crawler
    pub fn with_loader(mut self, loader: Arc<dyn PageLoader>) -> Self {
        self.ctx = self.ctx.with_loader(loader);
        self
    }

    /// Enables authenticated discovery when at least one entry is configured
    pub fn with_auth(mut self, auth: AuthSettings) -> Self {
        self.auth = (!auth.is_empty()).then_some(auth);
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.ctx.config
    }

    /// Run a stage module, recording its start and any failure
    async fn run_stage<S: StageModule>(
        &self,
        result: &mut RunResult,
        module: &S,
        input: &S::Input,
    ) -> DiscoveryResult<S::Output> {
        let stage = module.stage();
        result.metadata.advance(stage);
        result.record(stage, format!("Starting {}", stage), BTreeMap::new());

        match module.run(input).await {
            Ok(output) => Ok(output),
            Err(e) => {
                let fatal = stage.is_fatal();
                error!("{} failed{}: {}", stage, if fatal { " (fatal)" } else { "" }, e);
                result.record(
                    stage,
                    format!("{} failed", stage),
                    details([("error", json!(e.to_string())), ("fatal", json!(fatal))]),
                );
                Err(e.into_stage_failure(stage))
            }
        }
    }

    fn skip(result: &mut RunResult, stage: Stage, reason: &str) {
        info!("Skipping {}: {}", stage, reason);
        result.metadata.advance(stage);
        result.record(stage, format!("Skipped {}", stage), details([("reason", json!(reason))]));
    }

    fn fail(mut result: RunResult, e: DiscoveryError) -> RunResult {
        result.metadata.error = Some(e.to_string());
        result.record(Stage::Failed, "Discovery failed", details([("error", json!(e.to_string()))]));
        result.finalize(Stage::Failed);
        result
    }

    /// Discover the attack surface of `target`
    pub async fn run(&self, target: &str) -> DiscoveryResult<RunResult> {
        let domain = target.trim().trim_end_matches('.').to_lowercase();
        if !is_valid_domain(&domain) {
            return Err(DiscoveryError::InvalidInput(format!("Invalid target domain: {}", target)));
        }

        let config = &self.ctx.config;
        let mut result = RunResult::new(&domain, config.depth);
        info!("Starting discovery run {} for {} (depth {})", result.metadata.run_id, domain, config.depth);
        result.record(
            Stage::Initialized,
            format!("Discovery started for {}", domain),
            details([
                ("depth", json!(config.depth.as_str())),
                ("authenticated", json!(self.auth.is_some())),
            ]),
        );

        // Passive discovery (fatal)
        let passive = match self.run_stage(&mut result, &PassiveStage::new(self.ctx.clone()), &domain).await {
            Ok(output) => output,
            Err(e) => return Ok(Self::fail(result, e)),
        };
        result.hosts = passive.hosts;
        result.root_dns = passive.root_dns;
        result.record(
            Stage::PassiveDiscovery,
            "Passive discovery completed",
            details([
                ("subdomains", json!(result.hosts.len())),
                ("unique_ips", json!(passive.unique_ips.len())),
                ("decode_warnings", json!(passive.decode_warnings)),
            ]),
        );

        // Port discovery
        if result.hosts.is_empty() {
            Self::skip(&mut result, Stage::PortDiscovery, "no hosts discovered");
        } else {
            let hosts = result.hosts.clone();
            if let Ok(ports) = self.run_stage(&mut result, &PortStage::new(self.ctx.clone()), &hosts).await {
                let merged = result.merge_ports(ports.ports_by_host);
                result.record(
                    Stage::PortDiscovery,
                    "Port discovery completed",
                    details([("open_ports", json!(merged)), ("hosts_scanned", json!(ports.hosts_scanned))]),
                );
            }
        }

        // Active discovery (fatal)
        if result.hosts.is_empty() {
            Self::skip(&mut result, Stage::ActiveDiscovery, "no hosts discovered");
        } else {
            let names: Vec<String> = result.hosts.iter().map(|h| h.name.clone()).collect();
            let active = match self.run_stage(&mut result, &ActiveStage::new(self.ctx.clone()), &names).await {
                Ok(output) => output,
                Err(e) => return Ok(Self::fail(result, e)),
            };
            let merged = result.merge_services(active.services);
            result.record(
                Stage::ActiveDiscovery,
                "Active discovery completed",
                details([
                    ("live_services", json!(merged)),
                    ("decode_warnings", json!(active.decode_warnings)),
                ]),
            );
        }

        // Deep discovery
        if result.services.is_empty() {
            Self::skip(&mut result, Stage::DeepDiscovery, "no live services");
        } else {
            let services = result.services.clone();
            if let Ok(deep) = self.run_stage(&mut result, &DeepStage::new(self.ctx.clone()), &services).await {
                let urls = result.merge_urls(deep.urls);
                let forms = result.merge_forms(deep.forms);
                result.record(
                    Stage::DeepDiscovery,
                    "Deep discovery completed",
                    details([
                        ("urls", json!(urls)),
                        ("forms", json!(forms)),
                        ("seeds", json!(deep.seeds)),
                        ("browser_pages_visited", json!(deep.browser_pages_visited)),
                    ]),
                );
            }
        }

        // Enrichment
        let input = EnrichmentInput { hosts: result.hosts.clone(), services: result.services.clone() };
        if let Ok(enrichment) = self.run_stage(&mut result, &EnrichmentStage, &input).await {
            for host in &mut result.hosts {
                host.cloud_provider = enrichment.host_cloud.get(&host.name).cloned();
                host.cdn = enrichment.host_cdn.get(&host.name).cloned();
            }
            result.infrastructure = enrichment.infrastructure;
            result.record(
                Stage::Enrichment,
                "Enrichment completed",
                details([
                    ("cloud_hosts", json!(enrichment.host_cloud.len())),
                    ("cdn_hosts", json!(enrichment.host_cdn.len())),
                ]),
            );
        }

        // Authenticated discovery
        if let Some(settings) = &self.auth {
            let input = AuthenticatedInput { settings: settings.clone(), services: result.services.clone() };
            let stage = AuthenticatedStage::new(self.ctx.clone());
            if let Ok(auth) = self.run_stage(&mut result, &stage, &input).await {
                let urls = result.merge_urls(auth.urls);
                let forms = result.merge_forms(auth.forms);
                result.merge_path_parameters(auth.path_parameters);
                result.record(
                    Stage::AuthenticatedDiscovery,
                    "Authenticated discovery completed",
                    details([
                        ("urls", json!(urls)),
                        ("forms", json!(forms)),
                        ("path_parameters", json!(result.path_parameters.len())),
                    ]),
                );
            }
        }

        result.finalize(Stage::Completed);
        if result.statistics.live_services == 0 {
            warn!("Run completed without any live service");
        }
        result.record(
            Stage::Completed,
            "Discovery completed",
            details([("duration_seconds", json!(result.metadata.duration_seconds))]),
        );
        info!(
            "Discovery of {} completed: {} subdomains, {} live services, {} URLs",
            domain,
            result.statistics.total_subdomains,
            result.statistics.live_services,
            result.statistics.urls_discovered
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthEntry, Depth};
    use crate::core::HostStatus;
    use crate::tools::{MockCommandRunner, ToolInvocation, ToolOutput};

    fn out(text: &str) -> DiscoveryResult<ToolOutput> {
        Ok(ToolOutput { stdout: text.to_string(), stderr: String::new(), exit_code: Some(0) })
    }

    /// Scenario A tool outputs, with per-tool overrides
    fn scenario(inv: &ToolInvocation, failing: &str) -> DiscoveryResult<ToolOutput> {
        if inv.program == failing {
            return Err(DiscoveryError::ToolExecution {
                tool: failing.to_string(),
                exit_code: Some(2),
                stderr: "boom".to_string(),
            });
        }
        match inv.program.as_str() {
            "subfinder" => out("a.example.com\nb.example.com\n"),
            "dnsx" => out("{\"host\":\"a.example.com\",\"a\":[\"52.0.0.1\"]}\n"),
            "naabu" => out("{\"host\":\"a.example.com\",\"port\":80}\n"),
            "httpx" => out("{\"url\":\"http://a.example.com\",\"status_code\":200,\"webserver\":\"cloudflare\"}\n"),
            "katana" => out("{\"url\":\"http://a.example.com/\"}\n{\"url\":\"http://a.example.com/users/17\"}\n"),
            other => panic!("unexpected tool {other}"),
        }
    }

    fn pipeline(mock: MockCommandRunner) -> Pipeline {
        Pipeline::new(Arc::new(DiscoveryConfig::preset(Depth::Normal)), Arc::new(mock))
    }

    fn assert_timeline_monotonic(result: &RunResult) {
        for pair in result.timeline.windows(2) {
            assert!(pair[0].stage <= pair[1].stage, "{:?} before {:?}", pair[0].stage, pair[1].stage);
        }
    }

    #[tokio::test]
    async fn test_scenario_a_full_run() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|inv| scenario(inv, ""));

        let result = pipeline(mock).run("example.com").await.unwrap();

        assert_eq!(result.metadata.status, Stage::Completed);
        assert_eq!(result.hosts.len(), 2);
        assert_eq!(result.host("a.example.com").unwrap().open_ports_count(), 1);
        assert_eq!(result.host("b.example.com").unwrap().open_ports_count(), 0);
        assert_eq!(result.host("a.example.com").unwrap().status, HostStatus::Live);
        assert_eq!(result.host("b.example.com").unwrap().status, HostStatus::Dead);
        assert_eq!(result.host("a.example.com").unwrap().cloud_provider.as_deref(), Some("aws"));
        assert_eq!(result.urls.len(), 2);
        assert_eq!(result.statistics.total_subdomains, 2);
        assert!(result.metadata.end_time.is_some());
        assert_timeline_monotonic(&result);
    }

    #[tokio::test]
    async fn test_port_failure_is_not_fatal() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|inv| scenario(inv, "naabu"));

        let result = pipeline(mock).run("example.com").await.unwrap();

        assert_eq!(result.metadata.status, Stage::Completed);
        assert!(result.hosts.iter().all(|h| h.open_ports.is_empty()));
        assert!(result.timeline.iter().any(|e| e.stage == Stage::PortDiscovery && e.message.contains("failed")));
        assert_eq!(result.services.len(), 1);
    }

    #[tokio::test]
    async fn test_active_failure_is_fatal() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|inv| scenario(inv, "httpx"));

        let result = pipeline(mock).run("example.com").await.unwrap();

        assert_eq!(result.metadata.status, Stage::Failed);
        assert!(result.metadata.error.as_deref().unwrap().contains("httpx"));
        assert!(result.urls.is_empty());
        assert!(!result.timeline.iter().any(|e| e.stage == Stage::DeepDiscovery));
        assert_timeline_monotonic(&result);
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_fatal() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|inv| scenario(inv, "subfinder"));

        let result = pipeline(mock).run("example.com").await.unwrap();
        assert_eq!(result.metadata.status, Stage::Failed);
        assert!(result.hosts.is_empty());
    }

    #[tokio::test]
    async fn test_zero_hosts_skips_later_tool_stages() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .withf(|inv| inv.program == "subfinder" || inv.program == "dnsx")
            .returning(|inv| match inv.program.as_str() {
                "subfinder" => out("not-in-scope.org\n"),
                _ => out(""),
            });

        let result = pipeline(mock).run("example.com").await.unwrap();

        assert_eq!(result.metadata.status, Stage::Completed);
        assert!(result.hosts.is_empty());
        let skipped: Vec<Stage> = result.timeline.iter()
            .filter(|e| e.message.starts_with("Skipped"))
            .map(|e| e.stage)
            .collect();
        assert_eq!(skipped, vec![Stage::PortDiscovery, Stage::ActiveDiscovery, Stage::DeepDiscovery]);
    }

    #[tokio::test]
    async fn test_authenticated_discovery_runs_with_auth() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|inv| scenario(inv, ""));

        let auth = AuthSettings {
            authentication: vec![AuthEntry {
                url: "http://a.example.com".to_string(),
                headers: BTreeMap::from([("X-Token".to_string(), "abc".to_string())]),
                cookies: BTreeMap::new(),
                basic: None,
            }],
        };
        let result = pipeline(mock).with_auth(auth).run("example.com").await.unwrap();

        assert_eq!(result.metadata.status, Stage::Completed);
        assert!(result.urls.iter().all(|u| u.authenticated));
        assert_eq!(result.path_parameters.len(), 1);
        assert_eq!(result.path_parameters[0].name, "id");
        assert!(result.timeline.iter().any(|e| e.stage == Stage::AuthenticatedDiscovery));
    }

    #[tokio::test]
    async fn test_invalid_target_is_rejected() {
        let err = pipeline(MockCommandRunner::new()).run("not a domain").await.unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidInput(_)));
    }
}
