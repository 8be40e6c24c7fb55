use anyhow::{Context, Result};
use keel_runtime::{EngineConfig, HookConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Base hook layer; `--hooks` files are merged on top of it
    #[serde(default)]
    pub hooks: Option<Value>,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub shell: ShellConfig,

    #[serde(default)]
    pub filesystem: FilesystemConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ShellConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub blocklist: Vec<String>,

    #[serde(default)]
    pub allowlist: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FilesystemConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_max_file_size_mb() -> u64 {
    10
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell: ShellConfig::default(),
            filesystem: FilesystemConfig::default(),
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            blocklist: Vec::new(),
            allowlist: Vec::new(),
        }
    }
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_file_size_mb: default_max_file_size_mb(),
        }
    }
}

/// Load config from file or use defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let content =
        fs::read_to_string(path).context(format!("Failed to read config file: {:?}", path))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).context("Failed to parse TOML config")
}

/// Merge the config's `[hooks]` table with extra layer files, in order.
/// `.json` files are read as JSON, anything else as TOML.
pub fn load_hook_config(config: &Config, extra: &[PathBuf]) -> Result<HookConfig> {
    let mut layers = Vec::with_capacity(extra.len() + 1);
    if let Some(base) = config.hooks.as_ref().filter(|v| !v.is_null()) {
        layers.push(base.clone());
    }
    for path in extra {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read hook layer: {:?}", path))?;
        let layer: Value = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .context(format!("Failed to parse hook layer {:?}", path))?
        } else {
            toml::from_str(&content).context(format!("Failed to parse hook layer {:?}", path))?
        };
        layers.push(layer);
    }
    HookConfig::merge_layers(&layers)
}
