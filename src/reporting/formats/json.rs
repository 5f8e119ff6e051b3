use std::path::Path;
use async_trait::async_trait;

use crate::core::RunResult;
use crate::error::{DiscoveryError, DiscoveryResult};
use crate::reporting::formats::{ReportFormat, ReportGenerator};

/// JSON report generator
#[derive(Debug, Default)]
pub struct JsonReportGenerator;

impl JsonReportGenerator {
    /// Create a new JSON report generator
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ReportGenerator for JsonReportGenerator {
    async fn generate(&self, result: &RunResult, output_path: &Path) -> DiscoveryResult<()> {
        let json = serde_json::to_string_pretty(result)
            .map_err(|e| DiscoveryError::Serialization(e.to_string()))?;
        tokio::fs::write(output_path, json).await
            .map_err(|e| DiscoveryError::File {
                path: output_path.to_path_buf(),
                message: format!("Failed to write report: {}", e),
            })
    }

    fn supported_format(&self) -> ReportFormat {
        ReportFormat::JSON
    }
}
