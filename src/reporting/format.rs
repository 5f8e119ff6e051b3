// src/reporting/format.rs
use std::path::Path;
use async_trait::async_trait;
use serde::{Serialize, Deserialize};

use crate::core::RunResult;
use crate::error::DiscoveryResult;

/// Report format enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ReportFormat {
    JSON,
    Markdown,
}

/// Report generator trait
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Write the run result to `output_path`
    async fn generate(&self, result: &RunResult, output_path: &Path) -> DiscoveryResult<()>;

    /// Get the supported format
    fn supported_format(&self) -> ReportFormat;
}

/// Convert report format to file extension
pub fn format_to_extension(format: &ReportFormat) -> &'static str {
    match format {
        ReportFormat::JSON => "json",
        ReportFormat::Markdown => "md",
    }
}

/// Convert file extension to report format
pub fn extension_to_format(extension: &str) -> Option<ReportFormat> {
    match extension.to_lowercase().as_str() {
        "json" => Some(ReportFormat::JSON),
        "md" | "markdown" => Some(ReportFormat::Markdown),
        _ => None,
    }
}

/// Format implied by an output path; JSON when the extension is unknown
pub fn format_for_path(path: &Path) -> ReportFormat {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(extension_to_format)
        .unwrap_or(ReportFormat::JSON)
}
