mod format;
mod generator;
pub mod formats;

pub use format::{format_for_path, ReportFormat, ReportGenerator};
pub use generator::ReportManager;
