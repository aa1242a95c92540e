//! Process configuration.
//!
//! Loaded once at boot from `gateway.yaml` (if present) with built-in
//! defaults for everything the file omits. Missing file is not an error —
//! it is logged once at `info` and the defaults apply. This replaces the
//! template's stubbed `load_config`/`get_tool_config` pair with a real
//! YAML-backed loader.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

fn default_max_steps() -> usize {
    50
}
fn default_max_depth() -> usize {
    5
}
fn default_max_parallel() -> usize {
    8
}
fn default_hold_timeout_secs() -> u64 {
    300
}
fn default_body_log_cap_bytes() -> usize {
    4 * 1024
}
fn default_recorder_capacity() -> usize {
    10_000
}

/// Pipeline evaluation limits (C8). Config may raise these; it must never
/// disable them (there is no "unlimited" variant).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineLimits {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_depth: default_max_depth(),
            max_parallel: default_max_parallel(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_name: String,
    pub server_version: String,
    pub host: String,
    pub port: u16,
    pub pipeline: PipelineLimits,
    #[serde(default = "default_hold_timeout_secs")]
    pub hold_timeout_secs: u64,
    #[serde(default = "default_body_log_cap_bytes")]
    pub body_log_cap_bytes: usize,
    #[serde(default = "default_recorder_capacity")]
    pub recorder_capacity: usize,
    /// Per-tool configuration blocks, e.g. `tools.file_read.project_root`.
    #[serde(default)]
    pub tools: HashMap<String, HashMap<String, serde_json::Value>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: "mcp-gateway".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            host: "0.0.0.0".to_string(),
            port: 3000,
            pipeline: PipelineLimits::default(),
            hold_timeout_secs: default_hold_timeout_secs(),
            body_log_cap_bytes: default_body_log_cap_bytes(),
            recorder_capacity: default_recorder_capacity(),
            tools: HashMap::new(),
        }
    }
}

impl Config {
    /// Load from `path` if it exists, falling back to defaults. Environment
    /// variables `SERVER_NAME`, `SERVER_VERSION`, `HOST`, `PORT` override
    /// whatever the file (or the default) provides, matching the template's
    /// existing environment-variable surface.
    pub fn load(path: &Path) -> Self {
        let mut config = if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(contents) => match serde_yaml::from_str::<Config>(&contents) {
                    Ok(cfg) => cfg,
                    Err(err) => {
                        tracing::warn!(%err, path = %path.display(), "failed to parse config file, using defaults");
                        Config::default()
                    }
                },
                Err(err) => {
                    tracing::warn!(%err, path = %path.display(), "failed to read config file, using defaults");
                    Config::default()
                }
            }
        } else {
            info!(path = %path.display(), "no config file found, using built-in defaults");
            Config::default()
        };

        if let Ok(v) = std::env::var("SERVER_NAME") {
            config.server_name = v;
        }
        if let Ok(v) = std::env::var("SERVER_VERSION") {
            config.server_version = v;
        }
        if let Ok(v) = std::env::var("HOST") {
            config.host = v;
        }
        if let Ok(v) = std::env::var("PORT") {
            if let Ok(port) = v.parse() {
                config.port = port;
            }
        }
        config
    }

    /// Tool-specific configuration block, e.g. a sandboxed project root for
    /// `file_read`. Returns an empty map when the tool has no section.
    pub fn tool_config(&self, tool_name: &str) -> HashMap<String, serde_json::Value> {
        self.tools.get(tool_name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/gateway.yaml"));
        assert_eq!(config.pipeline.max_steps, 50);
        assert_eq!(config.hold_timeout_secs, 300);
    }

    #[test]
    fn tool_config_defaults_to_empty_map() {
        let config = Config::default();
        assert!(config.tool_config("file_read").is_empty());
    }
}
