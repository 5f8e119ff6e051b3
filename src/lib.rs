pub mod cli;
pub mod config;
pub mod core;
pub mod crawler;
pub mod engine;
pub mod error;
pub mod reporting;
pub mod stages;
pub mod tools;
pub mod utils;

// Re-export main types for easier access
pub use config::{AuthSettings, Depth, DiscoveryConfig};
pub use core::{RunResult, Stage};
pub use engine::Pipeline;
pub use error::{DiscoveryError, DiscoveryResult};
pub use reporting::{ReportFormat, ReportManager};
pub use tools::{CommandRunner, ProcessRunner};
