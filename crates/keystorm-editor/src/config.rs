//! Typed configuration, consumed by the core as a key -> value lookup.
//!
//! Layers merge in order: built-in defaults, the user file under the config
//! directory, then the project-local `.keystorm.json`. Later layers win per
//! key.

use std::path::{Path, PathBuf};
use std::time::Duration;

use keystorm_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::index::IndexerConfig;
use crate::lsp::{LspServerConfig, SupervisorConfig};

pub const PROJECT_CONFIG_NAME: &str = ".keystorm.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub editor: EditorConfig,
    pub lsp: LspConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Frame ticker rate for the event loop.
    pub target_fps: u32,
    pub tab_size: u32,
    pub scroll_margin: u32,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            tab_size: 4,
            scroll_margin: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LspConfig {
    pub autostart: bool,
    pub servers: Vec<LspServerConfig>,
    pub max_restarts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    pub reset_window_secs: u64,
}

impl Default for LspConfig {
    fn default() -> Self {
        Self {
            autostart: true,
            servers: Vec::new(),
            max_restarts: 5,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60_000,
            multiplier: 2.0,
            reset_window_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub enabled: bool,
    pub excludes: Vec<String>,
    pub max_file_size: u64,
    pub workers: usize,
    pub batch_size: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        let defaults = IndexerConfig::default();
        Self {
            enabled: true,
            excludes: defaults.excludes,
            max_file_size: defaults.max_file_size,
            workers: defaults.workers,
            batch_size: defaults.batch_size,
        }
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| Error::InvalidFormat(e.to_string()))
    }

    /// Merge defaults, the user config file, and the project config file.
    pub fn load_with_layers(user_config_dir: Option<&Path>, working_dir: &Path) -> Self {
        let mut merged = serde_json::to_value(Config::default()).unwrap_or(Value::Null);

        let mut layers = Vec::new();
        if let Some(dir) = user_config_dir {
            layers.push(dir.join("config.json"));
        }
        layers.push(working_dir.join(PROJECT_CONFIG_NAME));

        for path in layers {
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<Value>(&content) {
                Ok(layer) => merge_values(&mut merged, layer),
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping unparsable config layer");
                }
            }
        }

        match serde_json::from_value(merged) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(%err, "merged config was invalid, using defaults");
                Config::default()
            }
        }
    }

    /// Dotted-path lookup over the serialized configuration, e.g.
    /// `editor.target_fps`.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut current = serde_json::to_value(self).ok()?;
        for segment in key.split('.') {
            current = current.get(segment)?.clone();
        }
        Some(current)
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            initial_backoff: Duration::from_millis(self.lsp.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.lsp.max_backoff_ms),
            multiplier: self.lsp.multiplier,
            max_restarts: self.lsp.max_restarts,
            reset_window: Duration::from_secs(self.lsp.reset_window_secs),
            ..SupervisorConfig::default()
        }
    }

    pub fn indexer_config(&self) -> IndexerConfig {
        IndexerConfig {
            excludes: self.index.excludes.clone(),
            max_file_size: self.index.max_file_size,
            workers: self.index.workers,
            batch_size: self.index.batch_size,
        }
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.editor.target_fps.max(1) as f64)
    }
}

/// Recursive JSON merge: objects merge key-wise, everything else replaces.
fn merge_values(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, layer_value) => *base_slot = layer_value,
    }
}

/// The per-user configuration directory (`~/.config/keystorm` on Unix).
pub fn user_config_dir() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    Some(PathBuf::from(home).join(".config").join("keystorm"))
}
