use clap::Parser;
use std::path::PathBuf;

use crate::config::{parse_tool_timeout, ConfigOverrides, Depth};

#[derive(Parser, Debug)]
#[command(name = "surface-discovery")]
#[command(about = "Attack surface discovery for a target domain", version)]
pub struct Args {
    #[arg(short, long, required_unless_present = "check_tools", help = "Target URL or domain")]
    pub url: Option<String>,

    #[arg(short, long, help = "Report path (.json or .md), default discovery_<domain>.json")]
    pub output: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = Depth::Normal, help = "Discovery depth preset")]
    pub depth: Depth,

    #[arg(long, help = "Run-wide timeout cap in seconds")]
    pub timeout: Option<u64>,

    #[arg(short, long, help = "Maximum concurrent sub-operations")]
    pub parallel: Option<usize>,

    #[arg(long = "tool-timeout", value_parser = parse_tool_timeout, help = "Per-tool timeout, e.g. naabu=300")]
    pub tool_timeout: Vec<(String, u64)>,

    #[arg(short, long, help = "Path to a TOML config file")]
    pub config: Option<PathBuf>,

    #[arg(long = "auth-config", help = "Path to an authentication config (YAML or JSON)")]
    pub auth_config: Option<PathBuf>,

    #[arg(short, long)]
    pub verbose: bool,

    #[arg(long = "check-tools", help = "Report which external tools are installed and exit")]
    pub check_tools: bool,
}

impl Args {
    /// Command-line values that override the loaded configuration
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            timeout: self.timeout,
            parallel: self.parallel,
            tool_timeouts: self.tool_timeout.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_command_line() {
        let args = Args::try_parse_from([
            "surface-discovery",
            "--url", "https://app.example.com",
            "--depth", "deep",
            "--tool-timeout", "naabu=300",
            "--tool-timeout", "katana=60",
            "--parallel", "4",
            "-o", "report.md",
        ]).unwrap();

        assert_eq!(args.url.as_deref(), Some("https://app.example.com"));
        assert_eq!(args.depth, Depth::Deep);
        let overrides = args.overrides();
        assert_eq!(overrides.parallel, Some(4));
        assert_eq!(overrides.tool_timeouts, vec![("naabu".to_string(), 300), ("katana".to_string(), 60)]);
    }

    #[test]
    fn test_url_required_unless_checking_tools() {
        assert!(Args::try_parse_from(["surface-discovery"]).is_err());
        assert!(Args::try_parse_from(["surface-discovery", "--check-tools"]).is_ok());
        assert!(Args::try_parse_from(["surface-discovery", "-u", "example.com", "--tool-timeout", "nmap=5"]).is_err());
    }
}
