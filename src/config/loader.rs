use std::path::{Path, PathBuf};
use config::{Config as ConfigLoader, Environment, File};
use tracing::{info, warn};

use super::schema::{Depth, DiscoveryConfig};
use crate::error::{DiscoveryError, DiscoveryResult};

/// Build the run configuration.
///
/// Sources, later ones winning: depth preset, user TOML file (explicit path or
/// the default location), `SURFACE_` environment variables (`__` separates
/// nested keys, e.g. `SURFACE_TOOLS__NAABU=300`).
pub fn load_config(config_path: Option<&Path>, depth: Depth) -> DiscoveryResult<DiscoveryConfig> {
    info!("Loading configuration for depth preset {}", depth);

    let preset = ConfigLoader::try_from(&DiscoveryConfig::preset(depth))
        .map_err(|e| DiscoveryError::Config(format!("Failed to build preset: {}", e)))?;
    let mut config_builder = ConfigLoader::builder().add_source(preset);

    match config_path {
        Some(path) if path.exists() => {
            info!("Loading user configuration from: {}", path.display());
            config_builder = config_builder.add_source(File::from(path));
        }
        Some(path) => {
            return Err(DiscoveryError::File {
                path: path.to_path_buf(),
                message: "Configuration file not found".to_string(),
            });
        }
        None => {
            let default_path = get_default_config_path();
            if default_path.exists() {
                info!("Loading default configuration from: {}", default_path.display());
                config_builder = config_builder.add_source(File::from(default_path.as_path()));
            }
        }
    }

    config_builder = config_builder.add_source(
        Environment::with_prefix("SURFACE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let mut config: DiscoveryConfig = config_builder
        .build()
        .map_err(|e| DiscoveryError::Config(format!("Failed to build configuration: {}", e)))?
        .try_deserialize()
        .map_err(|e| DiscoveryError::Config(format!("Failed to parse configuration: {}", e)))?;

    if config.depth != depth {
        warn!("Ignoring depth '{}' from configuration, using '{}'", config.depth, depth);
        config.depth = depth;
    }

    config.validate()?;
    Ok(config)
}

/// Get the default configuration path
pub fn get_default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".surface-discovery/config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_user_file_overrides_preset() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "parallel = 3\nbrowser_crawl = true\n\n[tools]\nnaabu = 50").unwrap();

        let config = load_config(Some(file.path()), Depth::Shallow).unwrap();
        assert_eq!(config.parallel, 3);
        assert!(config.browser_crawl);
        assert_eq!(config.tools.naabu, 50);
        assert_eq!(config.tools.subfinder, 60);
        assert_eq!(config.max_urls_per_domain, 100);
        assert_eq!(config.depth, Depth::Shallow);
    }

    #[test]
    fn test_environment_overrides_file() {
        std::env::set_var("SURFACE_PAGE_TIMEOUT", "45");
        let config = load_config(None, Depth::Normal).unwrap();
        std::env::remove_var("SURFACE_PAGE_TIMEOUT");

        assert_eq!(config.page_timeout, 45);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = load_config(Some(Path::new("/nonexistent/surface.toml")), Depth::Normal).unwrap_err();
        assert!(matches!(err, DiscoveryError::File { .. }));
    }
}
