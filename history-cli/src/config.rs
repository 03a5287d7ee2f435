//! Configuration loading and parsing

use anyhow::{Context, Result};
use history_analyzer::AnalyzerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub analysis: AnalyzerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputConfig {
    /// Checkin battery history dump
    pub history: PathBuf,
    /// Full checkin dump with `apk` lines, for UID to package resolution
    pub checkin: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    /// Base directory for relative output paths
    pub output_dir: Option<PathBuf>,
    /// Report destination (default: stdout)
    pub report: Option<PathBuf>,
    pub summary_csv: Option<PathBuf>,
    pub timeline_csv: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Txt,
    Json,
}

impl AppConfig {
    /// Configuration for a plain `--history` run without a config file
    pub fn for_history(history: PathBuf) -> Self {
        Self {
            input: InputConfig {
                history,
                checkin: None,
            },
            analysis: AnalyzerConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl OutputConfig {
    /// Place `path` under `output_dir` unless it is absolute
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.output_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    Ok(config)
}
