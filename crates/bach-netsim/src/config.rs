//! Configuration types for bach-netsim

use anyhow::{bail, Result};
use bach_peering::PeeringConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Simulator configuration, read from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Peering settings shared by every node
    #[serde(default)]
    pub peering: PeeringConfig,
    /// Interval between heartbeat broadcasts
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Time allowed for the mesh to settle after the run
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Host advertised by every simulated node
    #[serde(default = "default_host")]
    pub host: String,
    /// Port of the first node; the others count up from it
    #[serde(default = "default_base_port")]
    pub base_port: u16,
}

fn default_tick_ms() -> u64 {
    100
}

fn default_settle_ms() -> u64 {
    5_000
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_base_port() -> u16 {
    9870
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            peering: PeeringConfig::default(),
            tick_ms: default_tick_ms(),
            settle_ms: default_settle_ms(),
            host: default_host(),
            base_port: default_base_port(),
        }
    }
}

impl SimConfig {
    /// Heartbeat interval
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Settle timeout
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Check values the peering layer does not check itself
    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            bail!("tick_ms must be positive");
        }
        self.peering.validate()?;
        Ok(())
    }
}

/// Load simulator configuration from file
pub fn load_config(path: &Path) -> Result<SimConfig> {
    tracing::info!("Loading config from {:?}", path);
    let content = std::fs::read_to_string(path)?;
    let config: SimConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();
        assert_eq!(config.tick(), Duration::from_millis(100));
        assert_eq!(config.peering, PeeringConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        let json = r#"{
            "peering": { "reconnect_min_ms": 10, "reconnect_max_ms": 20 },
            "tick_ms": 50
        }"#;
        file.write_all(json.as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.tick_ms, 50);
        assert_eq!(config.peering.reconnect_min_ms, 10);
        assert_eq!(config.peering.backup_connect_min_ms, 1000);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_load_invalid_config() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{ "tick_ms": 0 }"#).unwrap();
        assert!(load_config(file.path()).is_err());

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{ "peering": { "inbound_capacity": 0 } }"#).unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_config(Path::new("/nonexistent/sim.json")).is_err());
    }
}
