// src/stages/active.rs
use std::collections::HashSet;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{StageContext, StageModule};
use crate::core::{LiveService, Stage};
use crate::error::DiscoveryResult;
use crate::tools::{commands, decode};

#[derive(Debug, Clone, Default)]
pub struct ActiveOutput {
    pub services: Vec<LiveService>,
    pub decode_warnings: usize,
}

impl ActiveOutput {
    /// Host names with at least one live service
    pub fn live_hosts(&self) -> HashSet<&str> {
        self.services.iter().map(|s| s.host.as_str()).collect()
    }
}

pub struct ActiveStage {
    ctx: StageContext,
}

impl ActiveStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl StageModule for ActiveStage {
    /// Host names to probe
    type Input = Vec<String>;
    type Output = ActiveOutput;

    fn stage(&self) -> Stage {
        Stage::ActiveDiscovery
    }

    async fn run(&self, hosts: &Vec<String>) -> DiscoveryResult<ActiveOutput> {
        info!("Starting active discovery for {} hosts", hosts.len());
        let output = self.ctx.runner.run(&commands::httpx(&self.ctx.config, hosts)).await?;
        let decoded = decode::decode_probe(&output.stdout);

        let known: HashSet<&str> = hosts.iter().map(String::as_str).collect();
        let services: Vec<LiveService> = decoded.records
            .into_iter()
            .filter(|s| {
                let owned = known.contains(s.host.as_str());
                if !owned {
                    debug!("Dropping service {} for unknown host {}", s.url, s.host);
                }
                owned
            })
            .collect();

        let result = ActiveOutput { services, decode_warnings: decoded.warnings };
        info!(
            "Active discovery complete: {} live services on {} hosts",
            result.services.len(),
            result.live_hosts().len()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::config::{Depth, DiscoveryConfig};
    use crate::error::DiscoveryError;
    use crate::tools::{MockCommandRunner, ToolOutput};

    fn stage(mock: MockCommandRunner) -> ActiveStage {
        ActiveStage::new(StageContext::new(
            Arc::new(DiscoveryConfig::preset(Depth::Normal)),
            Arc::new(mock),
        ))
    }

    #[tokio::test]
    async fn test_services_for_unknown_hosts_are_dropped() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|_| Ok(ToolOutput {
            stdout: concat!(
                "not json\n",
                "{\"url\":\"https://a.example.com\",\"status_code\":200,\"tech\":[\"Nginx\"]}\n",
                "{\"url\":\"http://a.example.com\",\"status_code\":301}\n",
                "{\"url\":\"https://cdn.other.net\",\"status_code\":200}\n",
            ).to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        }));

        let hosts = vec!["a.example.com".to_string(), "b.example.com".to_string()];
        let output = stage(mock).run(&hosts).await.unwrap();

        assert_eq!(output.services.len(), 2);
        assert_eq!(output.decode_warnings, 1);
        assert_eq!(output.live_hosts().len(), 1);
    }

    #[tokio::test]
    async fn test_prober_failure_is_raised() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|_| Err(DiscoveryError::ToolExecution {
            tool: "httpx".to_string(),
            exit_code: Some(1),
            stderr: "flag provided but not defined".to_string(),
        }));

        let err = stage(mock).run(&vec!["a.example.com".to_string()]).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::ToolExecution { .. }));
    }
}
