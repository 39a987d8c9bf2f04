use anyhow::{Context, Result};
use common::NamingTemplate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSection {
    #[serde(default = "default_expression")]
    pub expression: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub run_on_start: bool,
}

fn default_expression() -> String { common::DEFAULT_SCHEDULE.to_string() }
fn default_timezone() -> String { "UTC".to_string() }

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            expression: default_expression(),
            timezone: default_timezone(),
            run_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSection {
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub name_template: NamingTemplate,
    #[serde(default = "common::default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub keep_local: bool,
    #[serde(default)]
    pub include_hidden: bool,
    /// gzip level 0-9; flate2's default when unset
    #[serde(default)]
    pub compression: Option<u32>,
}

fn default_source_dir() -> PathBuf { PathBuf::from(".") }
fn default_output_dir() -> PathBuf { PathBuf::from(".") }

impl Default for BackupSection {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            output_dir: default_output_dir(),
            name_template: NamingTemplate::default(),
            concurrency: common::default_concurrency(),
            keep_local: false,
            include_hidden: false,
            compression: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_bucket_dir")]
    pub bucket_dir: PathBuf,
}

fn default_bucket_dir() -> PathBuf { PathBuf::from(common::DEFAULT_BUCKET_PATH) }

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            bucket_dir: default_bucket_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    pub output: Option<PathBuf>,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub backup: BackupSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Detect file type by extension and load
    pub fn from_file(path: &Path) -> Result<Self> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "toml" => Self::from_toml_file(path),
            _ => Err(anyhow::anyhow!("Unsupported config file format. Use .yaml, .yml, or .toml")),
        }
    }
}

/// Per-user config file, e.g. `~/.config/foldup/config.yaml` on Linux.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("foldup").join("config.yaml"))
}

/// Explicit path first, then the system path, then the per-user path.
/// Falls back to built-in defaults when none of them exist.
pub fn load(explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>)> {
    if let Some(path) = explicit {
        return Ok((Config::from_file(path)?, Some(path.to_path_buf())));
    }

    let candidates: Vec<PathBuf> = std::iter::once(PathBuf::from(common::DEFAULT_CONFIG_PATH))
        .chain(user_config_path())
        .collect();
    load_first(&candidates)
}

/// Loads the first existing file in `candidates`. Later files are not
/// layered over earlier ones.
fn load_first(candidates: &[PathBuf]) -> Result<(Config, Option<PathBuf>)> {
    match candidates.iter().find(|path| path.exists()) {
        Some(path) => Ok((Config::from_file(path)?, Some(path.clone()))),
        None => Ok((Config::default(), None)),
    }
}
