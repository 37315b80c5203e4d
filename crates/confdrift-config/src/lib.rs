use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFDRIFT_DIR_NAME: &str = ".confdrift";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_STORE_FILE_NAME: &str = "drift.sqlite";
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_LIST_LIMIT: u32 = 50;
pub const DEFAULT_EXPORT_PAGE_SIZE: u32 = 100;
pub const MAX_PAGE_LIMIT: u32 = 500;
pub const DEFAULT_LOG_FILTER: &str = "info";
pub const LOG_FILTER_ENV: &str = "CONFDRIFT_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConfdriftConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub list: ListConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file, relative to the workspace root unless absolute. Defaults
    /// to `.confdrift/drift.sqlite`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListConfig {
    #[serde(default = "default_list_limit")]
    pub default_limit: u32,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            default_limit: default_list_limit(),
        }
    }
}

impl ListConfig {
    pub fn effective_default_limit(&self) -> u32 {
        self.default_limit.clamp(1, MAX_PAGE_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_page_size")]
    pub page_size: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            page_size: default_export_page_size(),
        }
    }
}

impl ExportConfig {
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Human,
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialize config TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

pub fn confdrift_dir(workspace_root: impl AsRef<Path>) -> PathBuf {
    workspace_root.as_ref().join(CONFDRIFT_DIR_NAME)
}

pub fn config_path(workspace_root: impl AsRef<Path>) -> PathBuf {
    confdrift_dir(workspace_root).join(CONFIG_FILE_NAME)
}

pub fn resolve_store_path(workspace_root: impl AsRef<Path>, config: &StoreConfig) -> PathBuf {
    let workspace_root = workspace_root.as_ref();
    match config.path.as_deref() {
        Some(path) if Path::new(path).is_absolute() => PathBuf::from(path),
        Some(path) => workspace_root.join(path),
        None => confdrift_dir(workspace_root).join(DEFAULT_STORE_FILE_NAME),
    }
}

pub fn load_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<ConfdriftConfig, ConfigError> {
    let path = config_path(workspace_root);
    if !path.exists() {
        return Ok(ConfdriftConfig::default());
    }

    let raw = fs::read_to_string(path)?;
    let parsed: ConfdriftConfig = toml::from_str(&raw)?;
    Ok(normalize_config(parsed))
}

pub fn ensure_workspace_config(
    workspace_root: impl AsRef<Path>,
) -> Result<ConfdriftConfig, ConfigError> {
    let workspace_root = workspace_root.as_ref();
    fs::create_dir_all(confdrift_dir(workspace_root))?;

    let path = config_path(workspace_root);
    if path.exists() {
        return load_workspace_config(workspace_root);
    }

    let config = ConfdriftConfig::default();
    let content = toml::to_string_pretty(&config)?;
    fs::write(path, content)?;

    Ok(config)
}

pub fn validate_config(config: &ConfdriftConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    if config.store.busy_timeout_ms == 0 {
        warnings.push(ConfigWarning {
            code: "store_busy_timeout_zero",
            message: "store.busy_timeout_ms is 0; concurrent writers will fail immediately on lock contention".to_owned(),
        });
    }
    if !(1..=MAX_PAGE_LIMIT).contains(&config.list.default_limit) {
        warnings.push(ConfigWarning {
            code: "list_default_limit_out_of_range",
            message: format!(
                "list.default_limit={} is outside 1..={MAX_PAGE_LIMIT}; using {}",
                config.list.default_limit,
                config.list.effective_default_limit()
            ),
        });
    }
    if !(1..=MAX_PAGE_LIMIT).contains(&config.export.page_size) {
        warnings.push(ConfigWarning {
            code: "export_page_size_out_of_range",
            message: format!(
                "export.page_size={} is outside 1..={MAX_PAGE_LIMIT}; using {}",
                config.export.page_size,
                config.export.effective_page_size()
            ),
        });
    }

    warnings
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_list_limit() -> u32 {
    DEFAULT_LIST_LIMIT
}

fn default_export_page_size() -> u32 {
    DEFAULT_EXPORT_PAGE_SIZE
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

fn normalize_optional(input: Option<String>) -> Option<String> {
    input
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn normalize_config(mut config: ConfdriftConfig) -> ConfdriftConfig {
    config.store.path = normalize_optional(config.store.path.take());

    let filter = config.logging.filter.trim();
    if filter.is_empty() {
        config.logging.filter = default_log_filter();
    } else {
        config.logging.filter = filter.to_owned();
    }

    config
}
