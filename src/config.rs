//! Host-side configuration: built-in defaults, merged with an optional TOML
//! file, merged with CLI flags (CLI wins).

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

fn default_base_port() -> u16 {
    25989
}

fn default_stat_ttl_ms() -> u64 {
    200
}

fn default_scan_period_ms() -> u64 {
    5_000
}

fn default_buffer_size() -> usize {
    4096
}

fn default_bridge_binary() -> String {
    "adb".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_agent_ready_timeout_ms() -> u64 {
    15_000
}

/// Deserialised shape of the optional TOML config file; every field has a
/// matching default so a missing or partial file is never an error.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_stat_ttl_ms")]
    pub stat_ttl_ms: u64,
    #[serde(default = "default_scan_period_ms")]
    pub scan_period_ms: u64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_bridge_binary")]
    pub bridge_binary: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_agent_ready_timeout_ms")]
    pub agent_ready_timeout_ms: u64,
    #[serde(default)]
    pub debug_throughput_log: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_port: default_base_port(),
            stat_ttl_ms: default_stat_ttl_ms(),
            scan_period_ms: default_scan_period_ms(),
            buffer_size: default_buffer_size(),
            bridge_binary: default_bridge_binary(),
            poll_interval_ms: default_poll_interval_ms(),
            agent_ready_timeout_ms: default_agent_ready_timeout_ms(),
            debug_throughput_log: false,
        }
    }
}

impl Config {
    /// Loads the file at `path` if it exists, falling back to built-in
    /// defaults for any field the file omits or if the file is absent.
    pub fn load(path: Option<&PathBuf>) -> std::io::Result<Self> {
        let Some(path) = path else { return Ok(Config::default()) };
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    pub fn stat_ttl(&self) -> Duration {
        Duration::from_millis(self.stat_ttl_ms)
    }

    pub fn scan_period(&self) -> Duration {
        Duration::from_millis(self.scan_period_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn agent_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_ready_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let cfg = Config::default();
        assert_eq!(cfg.base_port, 25989);
        assert_eq!(cfg.stat_ttl(), Duration::from_millis(200));
        assert_eq!(cfg.scan_period(), Duration::from_secs(5));
    }

    #[test]
    fn partial_toml_fills_remaining_fields_from_defaults() {
        let cfg: Config = toml::from_str("base_port = 30000\n").unwrap();
        assert_eq!(cfg.base_port, 30000);
        assert_eq!(cfg.buffer_size, 4096);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load(Some(&PathBuf::from("/nonexistent/nandroid.toml"))).unwrap();
        assert_eq!(cfg.base_port, 25989);
    }
}
