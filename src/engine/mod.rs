mod parallel;
mod pipeline;

pub use parallel::ParallelExecutor;
pub use pipeline::Pipeline;
