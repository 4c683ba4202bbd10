use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::DEFAULT_BASE_URL;
use crate::session::CredentialStore;

const CANDIDATES: [&str; 4] = [
    "pipewatch.toml",
    "pipewatch.json",
    "pipewatch.yaml",
    "pipewatch.yml",
];

/// Configuration file structure for pipewatch.
///
/// Holds the backend location, where the session credential lives, and output
/// preferences. Command-line flags override what is set here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiConfig {
    /// Backend base URL; the event channel is served from the same origin
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SessionConfig {
    /// Where the credential is persisted. Defaults to the user config directory.
    pub credential_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Summary,
    Json,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SessionConfig {
    pub fn store(&self) -> Result<CredentialStore> {
        match &self.credential_file {
            Some(path) => Ok(CredentialStore::at(path)),
            None => CredentialStore::default_location()
                .context("Failed to locate the credential file"),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Uses `path` when given, otherwise the first of `pipewatch.toml`,
    /// `pipewatch.json`, `pipewatch.yaml` and `pipewatch.yml` found in the
    /// current directory. Returns defaults if there is none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) if path.exists() => Self::load_from_path(path),
            Some(path) => {
                log::warn!("Config file {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            None => Self::discover(Path::new(".")),
        }
    }

    fn discover(dir: &Path) -> Result<Self> {
        for candidate in CANDIDATES {
            let path = dir.join(candidate);
            if path.exists() {
                log::debug!("Using config file {}", path.display());
                return Self::load_from_path(&path);
            }
        }

        Ok(Self::default())
    }

    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.api.base_url, "http://localhost:5000");
        assert_eq!(config.api.timeout(), Duration::from_secs(30));
        assert!(config.session.credential_file.is_none());
        assert_eq!(config.output.format, OutputFormat::Summary);
        assert!(!config.output.pretty);
    }

    #[test]
    fn test_load_toml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(
            temp_file,
            r#"
[api]
base-url = "https://ci.example.com"
timeout-secs = 5

[session]
credential-file = "/tmp/pipewatch-token.json"

[output]
format = "json"
pretty = true
"#
        )
        .unwrap();

        let config = Config::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.api.base_url, "https://ci.example.com");
        assert_eq!(config.api.timeout_secs, 5);
        assert_eq!(
            config.session.credential_file,
            Some(PathBuf::from("/tmp/pipewatch-token.json"))
        );
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(config.output.pretty);
    }

    #[test]
    fn test_load_json_config_keeps_defaults_for_missing_keys() {
        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, r#"{{"api": {{"base-url": "http://ci.internal:8080"}}}}"#).unwrap();

        let config = Config::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.api.base_url, "http://ci.internal:8080");
        assert_eq!(config.api.timeout_secs, 30);
        assert_eq!(config.output.format, OutputFormat::Summary);
    }

    #[test]
    fn test_load_yaml_config() {
        let mut temp_file = NamedTempFile::with_suffix(".yml").unwrap();
        write!(temp_file, "output:\n  format: json\n").unwrap();

        let config = Config::load(Some(temp_file.path())).unwrap();
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "[api\nbase-url = ").unwrap();

        let err = Config::load(Some(temp_file.path())).unwrap_err();
        assert!(err.to_string().contains("Failed to parse TOML config"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::load(Some(Path::new("nonexistent.toml"))).unwrap();
        assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_discover_from_candidates() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join("pipewatch.yaml"),
            "api:\n  base-url: https://yaml.example.com\n",
        )
        .unwrap();

        let config = Config::discover(temp_dir.path()).unwrap();
        assert_eq!(config.api.base_url, "https://yaml.example.com");

        // TOML wins over YAML
        std::fs::write(
            temp_dir.path().join("pipewatch.toml"),
            "[api]\nbase-url = \"https://toml.example.com\"\n",
        )
        .unwrap();
        let config = Config::discover(temp_dir.path()).unwrap();
        assert_eq!(config.api.base_url, "https://toml.example.com");
    }

    #[test]
    fn test_credential_store_location() {
        let config = SessionConfig {
            credential_file: Some(PathBuf::from("/tmp/creds.json")),
        };
        let store = config.store().unwrap();
        assert_eq!(store.path(), Some(Path::new("/tmp/creds.json")));
    }
}
