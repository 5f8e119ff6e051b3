mod app;
mod commands;

pub use app::App;
pub use commands::Args;
