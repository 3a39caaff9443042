use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

#[cfg(windows)]
pub fn config_dir() -> PathBuf {
    std::env::var("APPDATA")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("taintscope")
}

#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".config")
        .join("taintscope")
}

fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

fn default_rule_dirs() -> Vec<PathBuf> {
    vec![config_dir().join("rules")]
}

#[derive(Serialize, Deserialize)]
pub struct RuleConfig {
    #[serde(default = "default_rule_dirs")]
    pub rule_dirs: Vec<PathBuf>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            rule_dirs: default_rule_dirs(),
        }
    }
}

#[derive(Serialize, Deserialize, Default)]
pub struct AnalysisConfig {
    pub threads: Option<usize>,
    pub max_summary_iterations: Option<usize>,
    pub timeout_ms: Option<u64>,
}

#[derive(Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub rules: RuleConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Loads the configuration from `path`, or from the platform config dir
/// when no path is given. A missing default file yields the defaults; a
/// missing explicit file is an error.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (config_file_path(), false),
    };
    if !path.exists() {
        if explicit {
            anyhow::bail!("config file {} not found", path.display());
        }
        return Ok(Config::default());
    }
    let content =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}
