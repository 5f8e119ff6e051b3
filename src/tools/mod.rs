pub mod commands;
pub mod decode;
mod runner;

pub use decode::Decoded;
pub use runner::{CommandRunner, ProcessRunner, ToolInvocation, ToolOutput};
#[cfg(test)]
pub use runner::MockCommandRunner;
