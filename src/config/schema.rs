use std::fmt;
use std::time::Duration;
use serde::{Serialize, Deserialize};

use crate::error::{DiscoveryError, DiscoveryResult};

/// Depth preset selecting budgets for every component of a run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    Shallow,
    #[default]
    Normal,
    Deep,
}

impl Depth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Depth::Shallow => "shallow",
            Depth::Normal => "normal",
            Depth::Deep => "deep",
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External tools driven by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Subfinder,
    Dnsx,
    Naabu,
    Httpx,
    Katana,
}

impl Tool {
    pub const ALL: [Tool; 5] = [Tool::Subfinder, Tool::Dnsx, Tool::Naabu, Tool::Httpx, Tool::Katana];

    pub fn binary(&self) -> &'static str {
        match self {
            Tool::Subfinder => "subfinder",
            Tool::Dnsx => "dnsx",
            Tool::Naabu => "naabu",
            Tool::Httpx => "httpx",
            Tool::Katana => "katana",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.binary().eq_ignore_ascii_case(name.trim()))
    }
}

/// Per-tool timeouts in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolTimeouts {
    pub subfinder: u64,
    pub dnsx: u64,
    pub naabu: u64,
    pub httpx: u64,
    pub katana: u64,
}

impl ToolTimeouts {
    pub fn get(&self, tool: Tool) -> u64 {
        match tool {
            Tool::Subfinder => self.subfinder,
            Tool::Dnsx => self.dnsx,
            Tool::Naabu => self.naabu,
            Tool::Httpx => self.httpx,
            Tool::Katana => self.katana,
        }
    }

    pub fn set(&mut self, tool: Tool, seconds: u64) {
        match tool {
            Tool::Subfinder => self.subfinder = seconds,
            Tool::Dnsx => self.dnsx = seconds,
            Tool::Naabu => self.naabu = seconds,
            Tool::Httpx => self.httpx = seconds,
            Tool::Katana => self.katana = seconds,
        }
    }
}

/// Immutable configuration for one discovery run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveryConfig {
    pub depth: Depth,
    /// Upper bound for any single tool invocation
    pub timeout: u64,
    pub parallel: usize,
    pub port_scan_rate: u32,
    pub max_subdomains: Option<usize>,
    pub max_crawl_services: usize,
    /// Depth handed to the fast crawler
    pub crawl_depth: u32,
    pub max_crawl_depth: u32,
    pub max_urls_per_domain: usize,
    pub browser_crawl: bool,
    pub crawl_timeout: u64,
    pub page_timeout: u64,
    pub user_agent: String,
    pub tools: ToolTimeouts,
}

/// Values supplied on the command line, applied last
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub timeout: Option<u64>,
    pub parallel: Option<usize>,
    pub tool_timeouts: Vec<(String, u64)>,
}

impl DiscoveryConfig {
    pub fn preset(depth: Depth) -> Self {
        let user_agent = format!("surface-discovery/{}", env!("CARGO_PKG_VERSION"));
        match depth {
            Depth::Shallow => Self {
                depth,
                timeout: 300,
                parallel: 5,
                port_scan_rate: 1000,
                max_subdomains: Some(20),
                max_crawl_services: 3,
                crawl_depth: 2,
                max_crawl_depth: 2,
                max_urls_per_domain: 100,
                browser_crawl: false,
                crawl_timeout: 300,
                page_timeout: 30,
                user_agent,
                tools: ToolTimeouts { subfinder: 60, dnsx: 120, naabu: 90, httpx: 180, katana: 120 },
            },
            Depth::Normal => Self {
                depth,
                timeout: 600,
                parallel: 10,
                port_scan_rate: 1500,
                max_subdomains: None,
                max_crawl_services: 10,
                crawl_depth: 3,
                max_crawl_depth: 3,
                max_urls_per_domain: 500,
                browser_crawl: false,
                crawl_timeout: 600,
                page_timeout: 30,
                user_agent,
                tools: ToolTimeouts { subfinder: 180, dnsx: 120, naabu: 180, httpx: 180, katana: 120 },
            },
            Depth::Deep => Self {
                depth,
                timeout: 900,
                parallel: 15,
                port_scan_rate: 2000,
                max_subdomains: None,
                max_crawl_services: 20,
                crawl_depth: 5,
                max_crawl_depth: 5,
                max_urls_per_domain: 2000,
                browser_crawl: true,
                crawl_timeout: 1200,
                page_timeout: 30,
                user_agent,
                tools: ToolTimeouts { subfinder: 300, dnsx: 120, naabu: 900, httpx: 180, katana: 120 },
            },
        }
    }

    /// Timeout for one tool invocation, capped by the run-wide `timeout`
    pub fn tool_timeout(&self, tool: Tool) -> Duration {
        Duration::from_secs(self.tools.get(tool).min(self.timeout).max(1))
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout.max(1))
    }

    pub fn crawl_timeout(&self) -> Duration {
        Duration::from_secs(self.crawl_timeout.max(1))
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> DiscoveryResult<()> {
        if let Some(timeout) = overrides.timeout {
            self.timeout = timeout;
        }
        if let Some(parallel) = overrides.parallel {
            self.parallel = parallel;
        }
        for (name, seconds) in &overrides.tool_timeouts {
            let tool = Tool::from_name(name)
                .ok_or_else(|| DiscoveryError::InvalidInput(format!("Unknown tool: {}", name)))?;
            self.tools.set(tool, *seconds);
        }
        self.validate()
    }

    pub fn validate(&self) -> DiscoveryResult<()> {
        if self.parallel == 0 {
            return Err(DiscoveryError::Config("parallel must be at least 1".to_string()));
        }
        if self.timeout == 0 {
            return Err(DiscoveryError::Config("timeout must be at least 1 second".to_string()));
        }
        if self.max_urls_per_domain == 0 {
            return Err(DiscoveryError::Config("max_urls_per_domain must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Parse a `tool=seconds` pair as given to `--tool-timeout`
pub fn parse_tool_timeout(raw: &str) -> Result<(String, u64), String> {
    let (name, secs) = raw.split_once('=')
        .ok_or_else(|| format!("expected tool=seconds, got '{}'", raw))?;
    let tool = Tool::from_name(name).ok_or_else(|| format!("unknown tool '{}'", name))?;
    let seconds = secs.trim().parse::<u64>()
        .map_err(|e| format!("invalid seconds '{}': {}", secs, e))?;
    Ok((tool.binary().to_string(), seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let shallow = DiscoveryConfig::preset(Depth::Shallow);
        assert_eq!(shallow.timeout, 300);
        assert_eq!(shallow.max_subdomains, Some(20));
        assert!(!shallow.browser_crawl);

        let deep = DiscoveryConfig::preset(Depth::Deep);
        assert_eq!(deep.parallel, 15);
        assert_eq!(deep.max_urls_per_domain, 2000);
        assert!(deep.browser_crawl);
        assert_eq!(deep.tool_timeout(Tool::Naabu), Duration::from_secs(900));
    }

    #[test]
    fn test_tool_timeout_is_capped_by_run_timeout() {
        let mut config = DiscoveryConfig::preset(Depth::Deep);
        config.apply_overrides(&ConfigOverrides {
            timeout: Some(100),
            tool_timeouts: vec![("httpx".to_string(), 30)],
            ..Default::default()
        }).unwrap();

        assert_eq!(config.tool_timeout(Tool::Naabu), Duration::from_secs(100));
        assert_eq!(config.tool_timeout(Tool::Httpx), Duration::from_secs(30));
    }

    #[test]
    fn test_overrides_reject_unknown_tool_and_zero_parallel() {
        let mut config = DiscoveryConfig::preset(Depth::Normal);
        let unknown = ConfigOverrides {
            tool_timeouts: vec![("nmap".to_string(), 30)],
            ..Default::default()
        };
        assert!(config.apply_overrides(&unknown).is_err());

        let zero = ConfigOverrides { parallel: Some(0), ..Default::default() };
        assert!(config.apply_overrides(&zero).is_err());
    }

    #[test]
    fn test_parse_tool_timeout() {
        assert_eq!(parse_tool_timeout("Naabu=45"), Ok(("naabu".to_string(), 45)));
        assert!(parse_tool_timeout("naabu").is_err());
        assert!(parse_tool_timeout("naabu=abc").is_err());
        assert!(parse_tool_timeout("nmap=10").is_err());
    }
}
