// src/stages/ports.rs
use std::collections::BTreeMap;
use async_trait::async_trait;
use tracing::{debug, info};

use super::{StageContext, StageModule};
use crate::core::{DiscoveredHost, OpenPort, Stage};
use crate::error::DiscoveryResult;
use crate::tools::{commands, decode};

#[derive(Debug, Clone, Default)]
pub struct PortOutput {
    /// Open ports keyed by host name
    pub ports_by_host: BTreeMap<String, Vec<OpenPort>>,
    pub hosts_scanned: usize,
    pub decode_warnings: usize,
}

impl PortOutput {
    pub fn total_ports(&self) -> usize {
        self.ports_by_host.values().map(Vec::len).sum()
    }
}

pub struct PortStage {
    ctx: StageContext,
}

impl PortStage {
    pub fn new(ctx: StageContext) -> Self {
        Self { ctx }
    }
}

/// Map scanner keys (host name or address) back to host names
fn attribute_ports(
    hosts: &[DiscoveredHost],
    scanned: BTreeMap<String, Vec<OpenPort>>,
) -> BTreeMap<String, Vec<OpenPort>> {
    let mut by_host: BTreeMap<String, Vec<OpenPort>> = BTreeMap::new();
    for (key, ports) in scanned {
        let owners: Vec<&str> = match hosts.iter().find(|h| h.name == key) {
            Some(host) => vec![host.name.as_str()],
            None => hosts.iter()
                .filter(|h| h.ips.iter().any(|ip| *ip == key))
                .map(|h| h.name.as_str())
                .collect(),
        };
        if owners.is_empty() {
            debug!("No host owns scan result {}", key);
            continue;
        }
        for owner in owners {
            let entry = by_host.entry(owner.to_string()).or_default();
            for port in &ports {
                if !entry.iter().any(|p| p.port == port.port && p.protocol == port.protocol) {
                    entry.push(port.clone());
                }
            }
        }
    }
    by_host
}

#[async_trait]
impl StageModule for PortStage {
    type Input = Vec<DiscoveredHost>;
    type Output = PortOutput;

    fn stage(&self) -> Stage {
        Stage::PortDiscovery
    }

    async fn run(&self, hosts: &Vec<DiscoveredHost>) -> DiscoveryResult<PortOutput> {
        let targets: Vec<String> = hosts.iter().map(|h| h.name.clone()).collect();
        info!("Starting port discovery on {} hosts (depth {})", targets.len(), self.ctx.config.depth);

        let output = self.ctx.runner.run(&commands::naabu(&self.ctx.config, &targets)).await?;
        let decoded = decode::decode_ports(&output.stdout);

        let result = PortOutput {
            ports_by_host: attribute_ports(hosts, decoded.records),
            hosts_scanned: targets.len(),
            decode_warnings: decoded.warnings,
        };
        info!(
            "Port discovery complete: {} open ports across {} hosts",
            result.total_ports(),
            result.ports_by_host.len()
        );
        Ok(result)
    }
}
