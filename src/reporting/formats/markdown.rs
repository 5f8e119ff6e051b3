// src/reporting/formats/markdown.rs
use std::path::Path;
use async_trait::async_trait;

use crate::core::{HostStatus, RunResult};
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::reporting::formats::{ReportFormat, ReportGenerator};

/// URLs listed before the report switches to a count
const MAX_LISTED_URLS: usize = 200;

/// Markdown report generator
#[derive(Debug, Default)]
pub struct MarkdownReportGenerator;

impl MarkdownReportGenerator {
    /// Create a new Markdown report generator
    pub fn new() -> Self {
        Self
    }

    /// Render the full report body
    pub fn render(&self, result: &RunResult) -> String {
        let meta = &result.metadata;
        let stats = &result.statistics;
        let mut md = String::new();

        md.push_str(&format!("# Surface Discovery: {}\n\n", meta.target));
        md.push_str(&format!("- **Run ID:** {}\n", meta.run_id));
        md.push_str(&format!("- **Depth:** {}\n", meta.depth));
        md.push_str(&format!("- **Status:** {}\n", meta.status));
        md.push_str(&format!("- **Started:** {}\n", meta.start_time.format("%Y-%m-%d %H:%M:%S UTC")));
        if let Some(duration) = meta.duration_seconds {
            md.push_str(&format!("- **Duration:** {:.1}s\n", duration));
        }
        if let Some(error) = &meta.error {
            md.push_str(&format!("- **Error:** {}\n", error));
        }

        md.push_str("\n## Statistics\n\n| Metric | Value |\n|---|---|\n");
        let rows = [
            ("Subdomains", stats.total_subdomains),
            ("Resolved hosts", stats.resolved_hosts),
            ("Live hosts", stats.live_hosts),
            ("Open ports", stats.open_ports),
            ("Live services", stats.live_services),
            ("Technologies", stats.technologies_detected),
            ("URLs", stats.urls_discovered),
            ("Forms", stats.forms_discovered),
            ("Authenticated URLs", stats.authenticated_urls),
            ("Path parameters", stats.path_parameters),
            ("Cloud hosts", stats.cloud_hosts),
            ("CDN services", stats.cdn_services),
        ];
        for (label, value) in rows {
            md.push_str(&format!("| {} | {} |\n", label, value));
        }
        md.push_str(&format!("| Coverage | {:.0}% |\n", stats.coverage_completeness * 100.0));

        if !result.hosts.is_empty() {
            md.push_str("\n## Hosts\n\n| Host | Status | IPs | Open ports | Cloud | CDN |\n|---|---|---|---|---|---|\n");
            for host in &result.hosts {
                let status = match host.status {
                    HostStatus::Live => "live",
                    HostStatus::Dead => "dead",
                    HostStatus::Unknown => "unknown",
                };
                let ports = host.open_ports.iter()
                    .map(|p| p.port.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                md.push_str(&format!(
                    "| {} | {} | {} | {} | {} | {} |\n",
                    host.name,
                    status,
                    host.ips.join(", "),
                    ports,
                    host.cloud_provider.as_deref().unwrap_or("-"),
                    host.cdn.as_deref().unwrap_or("-"),
                ));
            }
        }

        if !result.services.is_empty() {
            md.push_str("\n## Live Services\n\n| URL | Status | Title | Technologies |\n|---|---|---|---|\n");
            for service in &result.services {
                let tech = service.technologies.iter()
                    .map(|t| match &t.version {
                        Some(v) => format!("{} {}", t.name, v),
                        None => t.name.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                md.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    service.url,
                    service.status_code,
                    service.title.as_deref().unwrap_or("").replace('|', "\\|"),
                    tech,
                ));
            }
        }

        if !result.urls.is_empty() {
            md.push_str(&format!("\n## URLs ({})\n\n", result.urls.len()));
            for url in result.urls.iter().take(MAX_LISTED_URLS) {
                let mut flags = Vec::new();
                if url.authenticated {
                    flags.push("auth");
                }
                if url.javascript {
                    flags.push("js");
                }
                let suffix = if flags.is_empty() { String::new() } else { format!(" [{}]", flags.join(", ")) };
                md.push_str(&format!("- `{} {}` (depth {}){}\n", url.method, url.url, url.depth, suffix));
            }
            if result.urls.len() > MAX_LISTED_URLS {
                md.push_str(&format!("- ... {} more\n", result.urls.len() - MAX_LISTED_URLS));
            }
        }

        if !result.forms.is_empty() {
            md.push_str("\n## Forms\n\n");
            for form in &result.forms {
                let fields = form.fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ");
                md.push_str(&format!("- `{} {}` fields: {}\n", form.method, form.action, fields));
            }
        }

        if !result.path_parameters.is_empty() {
            md.push_str("\n## Path Parameters\n\n| Name | Position | Examples |\n|---|---|---|\n");
            for param in &result.path_parameters {
                md.push_str(&format!(
                    "| {} | {} | {} |\n",
                    param.name,
                    param.position,
                    param.example_values.join(", ")
                ));
            }
        }

        let infra = &result.infrastructure;
        if !infra.cloud_providers.is_empty() || !infra.cdn_providers.is_empty() {
            md.push_str("\n## Infrastructure\n\n");
            for (provider, hosts) in &infra.cloud_providers {
                md.push_str(&format!("- **{}** (cloud): {}\n", provider, hosts.len()));
            }
            for (cdn, services) in &infra.cdn_providers {
                md.push_str(&format!("- **{}** (CDN): {}\n", cdn, services.len()));
            }
        }

        md.push_str("\n## Timeline\n\n");
        for event in &result.timeline {
            md.push_str(&format!(
                "- {} `{}` {}\n",
                event.timestamp.format("%H:%M:%S"),
                event.stage,
                event.message
            ));
        }

        md
    }
}

#[async_trait]
impl ReportGenerator for MarkdownReportGenerator {
    async fn generate(&self, result: &RunResult, output_path: &Path) -> DiscoveryResult<()> {
        tokio::fs::write(output_path, self.render(result)).await
            .map_err(|e| DiscoveryError::File {
                path: output_path.to_path_buf(),
                message: format!("Failed to write report: {}", e),
            })
    }

    fn supported_format(&self) -> ReportFormat {
        ReportFormat::Markdown
    }
}
