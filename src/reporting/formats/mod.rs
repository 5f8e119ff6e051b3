pub mod json;
pub mod markdown;

pub use super::format::{ReportFormat, ReportGenerator, format_to_extension, extension_to_format};
