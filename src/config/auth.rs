use std::collections::BTreeMap;
use std::path::Path;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::error::{DiscoveryError, DiscoveryResult};

static ENV_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"[$%]\{([^}]+)\}").unwrap());

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Credentials applied to every URL under `url`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthEntry {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(default)]
    pub basic: Option<BasicAuth>,
}

/// Headers to send with every request of an authenticated crawl
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthContext {
    pub headers: BTreeMap<String, String>,
}

impl AuthContext {
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// `Name: value` pairs as fast-crawler `-H` arguments expect them
    pub fn header_lines(&self) -> Vec<String> {
        self.headers.iter().map(|(k, v)| format!("{}: {}", k, v)).collect()
    }
}

impl AuthEntry {
    /// Fold headers, cookies and basic credentials into one header map
    pub fn context(&self) -> AuthContext {
        let mut headers = self.headers.clone();

        if !self.cookies.is_empty() {
            let cookie = self.cookies.iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ");
            headers.insert("Cookie".to_string(), cookie);
        }

        if let Some(basic) = &self.basic {
            let token = STANDARD.encode(format!("{}:{}", basic.username, basic.password));
            headers.insert("Authorization".to_string(), format!("Basic {}", token));
        }

        AuthContext { headers }
    }

    fn substitute_env(&mut self) -> DiscoveryResult<()> {
        for value in self.headers.values_mut().chain(self.cookies.values_mut()) {
            *value = substitute(value)?;
        }
        if let Some(basic) = &mut self.basic {
            basic.username = substitute(&basic.username)?;
            basic.password = substitute(&basic.password)?;
        }
        Ok(())
    }
}

/// Authentication configuration loaded from `--auth-config`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthSettings {
    #[serde(default)]
    pub authentication: Vec<AuthEntry>,
}

impl AuthSettings {
    /// Load from a YAML or JSON file (chosen by extension, YAML otherwise)
    pub fn load(path: &Path) -> DiscoveryResult<Self> {
        info!("Loading auth config from {}", path.display());
        let content = std::fs::read_to_string(path)
            .map_err(|e| DiscoveryError::File {
                path: path.to_path_buf(),
                message: format!("Failed to read file: {}", e),
            })?;

        let is_json = path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let mut settings: AuthSettings = if is_json {
            serde_json::from_str(&content)
                .map_err(|e| DiscoveryError::Config(format!("Invalid JSON in auth config: {}", e)))?
        } else {
            serde_yaml::from_str(&content)
                .map_err(|e| DiscoveryError::Config(format!("Invalid YAML in auth config: {}", e)))?
        };

        for entry in &mut settings.authentication {
            entry.substitute_env()?;
        }

        info!("Loaded {} auth configurations", settings.authentication.len());
        Ok(settings)
    }

    pub fn is_empty(&self) -> bool {
        self.authentication.is_empty()
    }

    /// Entry for a URL: an exact match, else the first entry whose url is a prefix
    pub fn for_url(&self, url: &str) -> Option<&AuthEntry> {
        let found = self.authentication.iter()
            .find(|a| a.url == url)
            .or_else(|| self.authentication.iter().find(|a| url.starts_with(&a.url)));
        if let Some(entry) = found {
            debug!("Using auth entry {} for {}", entry.url, url);
        }
        found
    }
}

fn substitute(value: &str) -> DiscoveryResult<String> {
    let mut missing = None;
    let replaced = ENV_REF.replace_all(value, |caps: &Captures| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(DiscoveryError::Config(format!(
            "Environment variable '{}' referenced in auth config is not set", name
        ))),
        None => Ok(replaced.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml_with_env_substitution() {
        std::env::set_var("SD_TEST_AUTH_TOKEN", "s3cret");
        let file = write_temp(".yaml", r#"
authentication:
  - url: https://app.example.com
    headers:
      Authorization: "Bearer ${SD_TEST_AUTH_TOKEN}"
    cookies:
      session: "%{SD_TEST_AUTH_TOKEN}-1"
"#);

        let settings = AuthSettings::load(file.path()).unwrap();
        let entry = &settings.authentication[0];
        assert_eq!(entry.headers["Authorization"], "Bearer s3cret");
        assert_eq!(entry.cookies["session"], "s3cret-1");
    }

    #[test]
    fn test_missing_env_var_is_config_error() {
        let file = write_temp(".yml", r#"
authentication:
  - url: https://app.example.com
    headers:
      X-Api-Key: "${SD_TEST_DEFINITELY_UNSET_VAR}"
"#);
        let err = AuthSettings::load(file.path()).unwrap_err();
        assert!(matches!(err, DiscoveryError::Config(ref m) if m.contains("SD_TEST_DEFINITELY_UNSET_VAR")));
    }

    #[test]
    fn test_load_json_and_build_context() {
        let file = write_temp(".json", r#"{"authentication": [
            {"url": "https://api.example.com", "basic": {"username": "admin", "password": "pw"},
             "cookies": {"a": "1", "b": "2"}}
        ]}"#);

        let settings = AuthSettings::load(file.path()).unwrap();
        let context = settings.authentication[0].context();
        assert_eq!(context.headers["Authorization"], "Basic YWRtaW46cHc=");
        assert_eq!(context.headers["Cookie"], "a=1; b=2");
        assert!(context.header_lines().contains(&"Cookie: a=1; b=2".to_string()));
    }

    #[test]
    fn test_for_url_prefers_exact_then_first_prefix() {
        let entry = |url: &str| AuthEntry {
            url: url.to_string(),
            headers: BTreeMap::new(),
            cookies: BTreeMap::new(),
            basic: None,
        };
        let settings = AuthSettings {
            authentication: vec![
                entry("https://app.example.com"),
                entry("https://app.example.com/admin"),
            ],
        };

        assert_eq!(settings.for_url("https://app.example.com/admin").unwrap().url, "https://app.example.com/admin");
        assert_eq!(settings.for_url("https://app.example.com/admin/users").unwrap().url, "https://app.example.com");
        assert!(settings.for_url("https://other.example.com").is_none());
    }
}
