//! Configuration for symmetric memory and the native allocator plugin.
//!
//! Defaults can be overridden from the environment ([`SymmMemConfig::from_env`])
//! or a TOML file ([`SymmMemConfig::from_file`]).
//!
//! | Variable | Field |
//! |----------|-------|
//! | `SYMM_MEM_ENABLE` | `enable_symm_mem` |
//! | `SYMM_MEM_PLUGIN_DIR` | `plugin.build_dir` |
//! | `SYMM_MEM_PLUGIN_VERBOSE` | `plugin.verbose` |
//! | `CXX` | `plugin.compiler` |
//! | `NCCL_HOME` | `plugin.nccl_home` |
//! | `CUDA_HOME` | `plugin.cuda_home` |

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymmMemConfig {
    /// Whether symmetric memory is enabled at all.
    pub enable_symm_mem: bool,
    /// How the native allocator plugin is built.
    pub plugin: PluginConfig,
}

/// Native allocator plugin build settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Directory holding the built plugin. `None` means the process temp dir.
    pub build_dir: Option<PathBuf>,
    /// C++ compiler used to build the plugin.
    pub compiler: String,
    /// NCCL install prefix (headers in `include/`, library in `lib/`).
    pub nccl_home: Option<PathBuf>,
    /// CUDA toolkit prefix.
    pub cuda_home: Option<PathBuf>,
    /// Log the compiler invocation and its output.
    pub verbose: bool,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            build_dir: None,
            compiler: "c++".to_string(),
            nccl_home: None,
            cuda_home: None,
            verbose: true,
        }
    }
}

impl PluginConfig {
    /// The directory the plugin is built into.
    pub fn resolved_build_dir(&self) -> PathBuf {
        self.build_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl SymmMemConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(flag) = lookup("SYMM_MEM_ENABLE").and_then(|v| parse_flag(&v)) {
            config.enable_symm_mem = flag;
        }
        if let Some(dir) = lookup("SYMM_MEM_PLUGIN_DIR").filter(|v| !v.is_empty()) {
            config.plugin.build_dir = Some(PathBuf::from(dir));
        }
        if let Some(flag) = lookup("SYMM_MEM_PLUGIN_VERBOSE").and_then(|v| parse_flag(&v)) {
            config.plugin.verbose = flag;
        }
        if let Some(cxx) = lookup("CXX").filter(|v| !v.is_empty()) {
            config.plugin.compiler = cxx;
        }
        if let Some(home) = lookup("NCCL_HOME").filter(|v| !v.is_empty()) {
            config.plugin.nccl_home = Some(PathBuf::from(home));
        }
        if let Some(home) = lookup("CUDA_HOME").filter(|v| !v.is_empty()) {
            config.plugin.cuda_home = Some(PathBuf::from(home));
        }

        config
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Save configuration to a TOML file.
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
