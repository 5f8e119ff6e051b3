// src/tools/commands.rs
use crate::config::{AuthContext, Depth, DiscoveryConfig, Tool};
use super::runner::ToolInvocation;

/// Host count above which a deep run stops scanning the full port range
const FULL_RANGE_HOST_LIMIT: usize = 50;
/// Minimum packet rate of a deep scan
const DEEP_SCAN_RATE: u32 = 3000;

/// Which ports to scan and how fast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortPlan {
    Top { ports: u32, rate: u32 },
    Full { rate: u32 },
}

impl PortPlan {
    pub fn for_depth(depth: Depth, host_count: usize, rate: u32) -> Self {
        match depth {
            Depth::Shallow => PortPlan::Top { ports: 100, rate },
            Depth::Normal => PortPlan::Top { ports: 1000, rate },
            Depth::Deep if host_count <= FULL_RANGE_HOST_LIMIT => {
                PortPlan::Full { rate: rate.max(DEEP_SCAN_RATE) }
            }
            Depth::Deep => PortPlan::Top { ports: 10000, rate: rate.max(DEEP_SCAN_RATE) },
        }
    }

    fn args(&self) -> Vec<String> {
        match self {
            PortPlan::Top { ports, rate } => vec![
                "-rate".to_string(), rate.to_string(),
                "-top-ports".to_string(), ports.to_string(),
            ],
            PortPlan::Full { rate } => vec![
                "-rate".to_string(), rate.to_string(),
                "-p".to_string(), "-".to_string(),
            ],
        }
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Subdomain enumeration for one domain
pub fn subfinder(config: &DiscoveryConfig, domain: &str) -> ToolInvocation {
    ToolInvocation::new(
        Tool::Subfinder.binary(),
        args(&["-d", domain, "-silent"]),
        config.tool_timeout(Tool::Subfinder),
    )
}

/// DNS resolution; `full` adds MX, TXT, NS and CNAME lookups
pub fn dnsx(config: &DiscoveryConfig, domains: &[String], full: bool) -> ToolInvocation {
    let mut argv = args(&["-silent", "-json", "-a", "-aaaa"]);
    if full {
        argv.extend(args(&["-mx", "-txt", "-ns", "-cname"]));
    }
    ToolInvocation::new(Tool::Dnsx.binary(), argv, config.tool_timeout(Tool::Dnsx))
        .stdin_lines(domains)
}

pub fn naabu(config: &DiscoveryConfig, hosts: &[String]) -> ToolInvocation {
    let mut argv = args(&["-silent", "-json"]);
    argv.extend(PortPlan::for_depth(config.depth, hosts.len(), config.port_scan_rate).args());
    ToolInvocation::new(Tool::Naabu.binary(), argv, config.tool_timeout(Tool::Naabu))
        .stdin_lines(hosts)
}

/// HTTP probing; the only tool whose non-zero exit is an error
pub fn httpx(config: &DiscoveryConfig, hosts: &[String]) -> ToolInvocation {
    let argv = args(&[
        "-silent", "-json", "-tech-detect", "-follow-redirects", "-include-response-header",
    ]);
    ToolInvocation::new(Tool::Httpx.binary(), argv, config.tool_timeout(Tool::Httpx))
        .fail_on_nonzero(true)
        .stdin_lines(hosts)
}

/// Fast crawl of seed URLs, optionally with authentication headers
pub fn katana(
    config: &DiscoveryConfig,
    seeds: &[String],
    depth: u32,
    auth: Option<&AuthContext>,
) -> ToolInvocation {
    let mut argv = args(&["-silent", "-jsonl", "-depth"]);
    argv.push(depth.to_string());
    argv.push("-jc".to_string());
    if let Some(auth) = auth {
        for line in auth.header_lines() {
            argv.push("-H".to_string());
            argv.push(line);
        }
    }
    ToolInvocation::new(Tool::Katana.binary(), argv, config.tool_timeout(Tool::Katana))
        .stdin_lines(seeds)
}
