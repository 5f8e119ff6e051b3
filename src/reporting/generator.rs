use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::format::format_for_path;
use super::formats::{ReportFormat, ReportGenerator};
use super::formats::json::JsonReportGenerator;
use super::formats::markdown::MarkdownReportGenerator;
use crate::core::RunResult;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::utils::sanitize_filename;

/// Report generation manager
pub struct ReportManager {
    generators: HashMap<ReportFormat, Box<dyn ReportGenerator>>,
}

impl Default for ReportManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportManager {
    /// Create a manager with the JSON and Markdown generators registered
    pub fn new() -> Self {
        let mut manager = Self { generators: HashMap::new() };
        manager.register_generator(Box::new(JsonReportGenerator::new()));
        manager.register_generator(Box::new(MarkdownReportGenerator::new()));
        manager
    }

    /// Register a new report generator
    pub fn register_generator(&mut self, generator: Box<dyn ReportGenerator>) {
        let format = generator.supported_format();
        debug!("Registering report generator for format: {:?}", format);
        self.generators.insert(format, generator);
    }

    /// Default report location for a target: `discovery_<domain>.json`
    pub fn default_output_path(target: &str) -> PathBuf {
        PathBuf::from(format!("discovery_{}.json", sanitize_filename(target)))
    }

    /// Write the report, choosing the format from the file extension
    pub async fn write(&self, result: &RunResult, output_path: &Path) -> DiscoveryResult<ReportFormat> {
        let format = format_for_path(output_path);
        let generator = self.generators.get(&format)
            .ok_or_else(|| DiscoveryError::Config(format!("No generator found for format {:?}", format)))?;

        if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                debug!("Creating report directory: {}", parent.display());
                tokio::fs::create_dir_all(parent).await
                    .map_err(|e| DiscoveryError::File {
                        path: parent.to_path_buf(),
                        message: format!("Failed to create directory: {}", e),
                    })?;
            }
        }

        info!("Writing {:?} report to {}", format, output_path.display());
        generator.generate(result, output_path).await?;
        Ok(format)
    }
}
