//! Engine configuration.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default UDP port every node listens on.
pub const DEFAULT_PORT: u16 = 30330;

/// Tunables for a node. Every field has a default, so a JSON file only needs
/// the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Overlay id; packets from other overlays are dropped.
    pub network_id: u32,
    /// Bucket capacity.
    pub k: usize,
    pub bind: SocketAddr,
    /// Port every peer listens on. Peer records carry only IP addresses.
    pub overlay_port: u16,
    /// Receive timeout; bounds the time between loop iterations.
    pub recv_timeout_ms: u64,
    /// Interval between keepalive and eviction passes.
    pub maintenance_interval_ms: u64,
    pub stale_after_ms: u64,
    pub dead_after_ms: u64,
    /// How long an unacknowledged packet is retransmitted before it is
    /// reported as a delivery failure.
    pub ack_timeout_ms: u64,
    pub max_retries: u32,
    /// Minimum gap between two sends of the same pending packet.
    pub retry_interval_ms: u64,
    /// How long an incomplete inbound message is kept.
    pub reassembly_timeout_ms: u64,
    /// Peers offered in a peer-list reply.
    pub peer_sample_size: usize,
    /// Largest fragment count accepted from the network.
    pub max_set_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network_id: 0,
            k: 20,
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            overlay_port: DEFAULT_PORT,
            recv_timeout_ms: 100,
            maintenance_interval_ms: 1_000,
            stale_after_ms: 5_000,
            dead_after_ms: 15_000,
            ack_timeout_ms: 10_000,
            max_retries: 50,
            retry_interval_ms: 100,
            reassembly_timeout_ms: 30_000,
            peer_sample_size: 31,
            max_set_size: 1024,
        }
    }
}

impl EngineConfig {
    /// Load a config from a JSON file and validate it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::Config("k must be at least 1".into()));
        }
        if self.dead_after_ms <= self.stale_after_ms {
            return Err(Error::Config(format!(
                "dead_after_ms ({}) must exceed stale_after_ms ({})",
                self.dead_after_ms, self.stale_after_ms
            )));
        }
        if self.max_set_size == 0 {
            return Err(Error::Config("max_set_size must be at least 1".into()));
        }
        if self.recv_timeout_ms == 0 {
            return Err(Error::Config("recv_timeout_ms must be at least 1".into()));
        }
        Ok(())
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn dead_after(&self) -> Duration {
        Duration::from_millis(self.dead_after_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn reassembly_timeout(&self) -> Duration {
        Duration::from_millis(self.reassembly_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.k, 20);
        assert_eq!(config.peer_sample_size, 31);
        assert_eq!(config.stale_after(), Duration::from_secs(5));
        assert_eq!(config.dead_after(), Duration::from_secs(15));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig { k: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.k = 4;
        config.dead_after_ms = config.stale_after_ms;
        assert!(config.validate().is_err());

        config.dead_after_ms = 20_000;
        config.max_set_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "network_id": 7, "k": 8, "bind": "127.0.0.1:4000" }"#).unwrap();
        assert_eq!(config.network_id, 7);
        assert_eq!(config.k, 8);
        assert_eq!(config.bind, "127.0.0.1:4000".parse().unwrap());
        assert_eq!(config.max_retries, 50);
        assert_eq!(config.retry_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!("udp2p-config-{}.json", std::process::id()));
        fs::write(&path, r#"{ "network_id": 3, "ack_timeout_ms": 500 }"#).unwrap();
        let config = EngineConfig::from_json_file(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.network_id, 3);
        assert_eq!(config.ack_timeout(), Duration::from_millis(500));

        assert!(EngineConfig::from_json_file(&path).is_err());
    }
}
