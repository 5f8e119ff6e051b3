// src/stages/passive.rs
use std::collections::{BTreeMap, BTreeSet};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{StageContext, StageModule};
use crate::core::{DiscoveredHost, DnsRecords, Stage};
use crate::error::DiscoveryResult;
use crate::tools::{commands, decode};
use crate::utils::{is_subdomain, is_valid_domain};

/// Subdomains of the target plus their DNS records
#[derive(Debug, Clone, Default)]
pub struct PassiveOutput {
    pub hosts: Vec<DiscoveredHost>,
    pub root_dns: Option<DnsRecords>,
    pub unique_ips: BTreeSet<String>,
    pub decode_warnings: usize,
}

pub struct PassiveStage {
    ctx: StageContext,
}

impl PassiveStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }

    async fn enumerate(&self, domain: &str) -> DiscoveryResult<Vec<String>> {
        let output = self.ctx.runner.run(&commands::subfinder(&self.ctx.config, domain)).await?;
        let mut names: Vec<String> = decode::decode_hostnames(&output.stdout)
            .into_iter()
            .filter(|name| {
                let keep = is_valid_domain(name) && is_subdomain(name, domain);
                if !keep {
                    debug!("Dropping out-of-scope name {}", name);
                }
                keep
            })
            .collect();

        if let Some(limit) = self.ctx.config.max_subdomains {
            if names.len() > limit {
                debug!("Limiting {} subdomains to {}", names.len(), limit);
                names.truncate(limit);
            }
        }
        Ok(names)
    }

    /// Full records for the root, addresses only for subdomains
    async fn resolve(
        &self,
        domain: &str,
        names: &[String],
    ) -> DiscoveryResult<(BTreeMap<String, DnsRecords>, usize)> {
        let config = &self.ctx.config;
        let root = self.ctx.runner
            .run(&commands::dnsx(config, &[domain.to_string()], true))
            .await?;
        let mut decoded = decode::decode_dns(&root.stdout);

        if !names.is_empty() {
            info!("Resolving {} subdomains", names.len());
            let output = self.ctx.runner.run(&commands::dnsx(config, names, false)).await?;
            let subs = decode::decode_dns(&output.stdout);
            decoded.warnings += subs.warnings;
            for (host, records) in subs.records {
                decoded.records.entry(host).or_default().merge(records);
            }
        }
        Ok((decoded.records, decoded.warnings))
    }
}

#[async_trait]
impl StageModule for PassiveStage {
    type Input = String;
    type Output = PassiveOutput;

    fn stage(&self) -> Stage {
        Stage::PassiveDiscovery
    }

    async fn run(&self, domain: &String) -> DiscoveryResult<PassiveOutput> {
        info!("Starting passive discovery for {}", domain);
        let names = self.enumerate(domain).await?;
        info!("Discovered {} subdomains", names.len());

        let (mut dns, decode_warnings) = match self.resolve(domain, &names).await {
            Ok(result) => result,
            Err(e) => {
                error!("DNS collection failed: {}", e);
                (BTreeMap::new(), 0)
            }
        };

        let mut output = PassiveOutput {
            root_dns: dns.get(domain.as_str()).cloned(),
            decode_warnings,
            ..Default::default()
        };

        for name in names {
            let mut host = DiscoveredHost::new(name.clone(), Stage::PassiveDiscovery);
            if let Some(records) = dns.remove(&name) {
                host.ips = records.ips();
                output.unique_ips.extend(host.ips.iter().cloned());
                host.dns_records = Some(records);
            }
            output.hosts.push(host);
        }
        if let Some(root) = &output.root_dns {
            output.unique_ips.extend(root.ips());
        }

        if output.hosts.iter().all(|h| h.ips.is_empty()) && !output.hosts.is_empty() {
            warn!("No subdomain resolved to an address");
        }
        info!(
            "Passive discovery complete: {} subdomains, {} unique IPs",
            output.hosts.len(),
            output.unique_ips.len()
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::config::{Depth, DiscoveryConfig};
    use crate::error::DiscoveryError;
    use crate::tools::{MockCommandRunner, ToolOutput};

    fn stdout(text: &str) -> ToolOutput {
        ToolOutput { stdout: text.to_string(), stderr: String::new(), exit_code: Some(0) }
    }

    fn stage(mock: MockCommandRunner, depth: Depth) -> PassiveStage {
        let config = Arc::new(DiscoveryConfig::preset(depth));
        PassiveStage::new(StageContext::new(config, Arc::new(mock)))
    }

    #[tokio::test]
    async fn test_scope_filter_and_dns() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|inv| {
            let out = match (inv.program.as_str(), inv.args.contains(&"-mx".to_string())) {
                ("subfinder", _) => "a.example.com\nB.example.com\nexample.org\nevil-example.com\n",
                ("dnsx", true) => "{\"host\":\"example.com\",\"a\":[\"93.184.216.34\"],\"mx\":[\"mx.example.com\"]}\n",
                ("dnsx", false) => "{\"host\":\"a.example.com\",\"a\":[\"1.2.3.4\"]}\n",
                _ => "",
            };
            Ok(stdout(out))
        });

        let output = stage(mock, Depth::Normal).run(&"example.com".to_string()).await.unwrap();
        let names: Vec<&str> = output.hosts.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["a.example.com", "b.example.com"]);
        assert_eq!(output.hosts[0].ips, vec!["1.2.3.4".to_string()]);
        assert!(output.hosts[1].ips.is_empty());
        assert_eq!(output.root_dns.as_ref().unwrap().mx, vec!["mx.example.com".to_string()]);
        assert_eq!(output.unique_ips.len(), 2);
    }

    #[tokio::test]
    async fn test_dns_failure_is_not_fatal() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|inv| match inv.program.as_str() {
            "subfinder" => Ok(stdout("a.example.com\n")),
            _ => Err(DiscoveryError::ToolNotFound("dnsx".to_string())),
        });

        let output = stage(mock, Depth::Normal).run(&"example.com".to_string()).await.unwrap();
        assert_eq!(output.hosts.len(), 1);
        assert!(output.root_dns.is_none());
    }

    #[tokio::test]
    async fn test_enumeration_failure_propagates() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run()
            .returning(|_| Err(DiscoveryError::ToolNotFound("subfinder".to_string())));

        let err = stage(mock, Depth::Normal).run(&"example.com".to_string()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_max_subdomains_cap() {
        let mut mock = MockCommandRunner::new();
        mock.expect_run().returning(|inv| {
            if inv.program == "subfinder" {
                let names: String = (0..30).map(|i| format!("h{:02}.example.com\n", i)).collect();
                Ok(stdout(&names))
            } else {
                Ok(stdout(""))
            }
        });

        let output = stage(mock, Depth::Shallow).run(&"example.com".to_string()).await.unwrap();
        assert_eq!(output.hosts.len(), 20);
    }
}
