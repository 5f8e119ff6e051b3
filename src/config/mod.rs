// src/config/mod.rs
mod auth;
mod loader;
mod schema;

pub use auth::{AuthContext, AuthEntry, AuthSettings, BasicAuth};
pub use loader::{get_default_config_path, load_config};
pub use schema::{
    ConfigOverrides, Depth, DiscoveryConfig, Tool, ToolTimeouts,
    parse_tool_timeout,
};
