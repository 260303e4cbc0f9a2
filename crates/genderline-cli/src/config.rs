//! Configuration loading from TOML files

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use genderline_core::HttpConfig;
use genderline_infer::backend::{DEFAULT_API_KEY_VAR, DEFAULT_HOSTED_URL, DEFAULT_LOCAL_URL};
use genderline_infer::{BackendKind, BackendSettings, ColumnNames};
use serde::Deserialize;

/// Global configuration for genderline
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub limits: LimitsConfig,
    pub backend: BackendConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
}

/// Concurrency bounds; unset fields fall through to env vars and defaults
#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_loaded_models: Option<usize>,
    pub num_parallel: Option<usize>,
    pub max_queue: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// `local-model` or `hosted-chat`
    pub kind: String,
    pub local_url: String,
    pub hosted_url: String,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        let http = HttpConfig::default();
        Self {
            kind: BackendKind::LocalModel.to_string(),
            local_url: DEFAULT_LOCAL_URL.to_string(),
            hosted_url: DEFAULT_HOSTED_URL.to_string(),
            api_key: std::env::var(DEFAULT_API_KEY_VAR).ok(),
            timeout_secs: http.request_timeout.as_secs(),
            connect_timeout_secs: http.connect_timeout.as_secs(),
        }
    }
}

impl BackendConfig {
    /// Resolve into backend settings; `kind_override` comes from the CLI.
    ///
    /// An unknown backend name or a zero timeout is a configuration error.
    pub fn settings(&self, kind_override: Option<&str>) -> Result<BackendSettings> {
        let kind: BackendKind = kind_override.unwrap_or(&self.kind).parse()?;
        anyhow::ensure!(
            self.timeout_secs > 0,
            "backend.timeout_secs must be at least 1 second"
        );
        anyhow::ensure!(
            self.connect_timeout_secs > 0,
            "backend.connect_timeout_secs must be at least 1 second"
        );
        Ok(BackendSettings {
            kind,
            local_url: self.local_url.clone(),
            hosted_url: self.hosted_url.clone(),
            api_key: self.api_key.clone(),
            http: HttpConfig {
                connect_timeout: Duration::from_secs(self.connect_timeout_secs),
                request_timeout: Duration::from_secs(self.timeout_secs),
            },
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub data: PathBuf,
    pub columns: ColumnNames,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            data: PathBuf::from("data/enriched_aggregated_papers.tsv"),
            columns: ColumnNames::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
        }
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./genderline.toml (current directory)
    /// 2. ~/.config/genderline/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("genderline.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "genderline") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
