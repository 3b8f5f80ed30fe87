//! Client configuration
//!
//! Loaded from TOML. A minimal config file:
//!
//! ```toml
//! admin_public_key = "59bbe2014e2418b9e7f7b2b837b1ae74a572b4466432a491e0c0d3f05a1ee5ec"
//!
//! [[computors]]
//! url = "wss://one.example.net"
//! [[computors]]
//! url = "wss://two.example.net"
//! [[computors]]
//! url = "wss://three.example.net"
//! ```

use std::path::Path;
use std::time::Duration;

use ed25519_dalek::VerifyingKey;
use serde::Deserialize;
use url::Url;

use crate::error::{ClientError, ClientResult};
use crate::types::COMPUTOR_COUNT;

fn default_synchronization_interval_ms() -> u64 {
    10_000
}

fn default_reconnect_timeout_ms() -> u64 {
    100
}

fn default_db_path() -> String {
    "triad.redb".to_string()
}

/// One computor endpoint slot
#[derive(Debug, Clone, Deserialize)]
pub struct ComputorEndpoint {
    /// WebSocket URL (`ws://` or `wss://`)
    pub url: String,
    /// Opaque per-endpoint options, passed through to the transport
    #[serde(default)]
    pub options: Option<serde_json::Value>,
}

/// Connection-core configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Exactly [`COMPUTOR_COUNT`] computor endpoints
    pub computors: Vec<ComputorEndpoint>,
    /// 32-byte hex public key the signed tick broadcasts verify against
    pub admin_public_key: String,
    /// Watchdog period; sync demotes to 0 when no progress within one interval
    #[serde(default = "default_synchronization_interval_ms")]
    pub synchronization_interval_ms: u64,
    /// Delay before a closed computor socket is redialed
    #[serde(default = "default_reconnect_timeout_ms")]
    pub reconnect_timeout_ms: u64,
    /// Seed for the client-layer identity (optional; queries work without it)
    #[serde(default)]
    pub seed: Option<String>,
    /// Key index under the seed
    #[serde(default)]
    pub index: u64,
    /// Path of the durable outbox database
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl ClientConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> ClientResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check endpoint count, URL schemes, and the admin key encoding
    pub fn validate(&self) -> ClientResult<()> {
        if self.computors.len() != COMPUTOR_COUNT {
            return Err(ClientError::Config(format!(
                "Expected {} computor endpoints, found {}",
                COMPUTOR_COUNT,
                self.computors.len()
            )));
        }
        for endpoint in &self.computors {
            let url = Url::parse(&endpoint.url)
                .map_err(|e| ClientError::Config(format!("Bad URL {}: {}", endpoint.url, e)))?;
            match url.scheme() {
                "ws" | "wss" => {}
                other => {
                    return Err(ClientError::Config(format!(
                        "Unsupported scheme {} in {}",
                        other, endpoint.url
                    )))
                }
            }
        }
        self.admin_key()?;
        Ok(())
    }

    /// Decode the admin public key
    pub fn admin_key(&self) -> ClientResult<VerifyingKey> {
        let bytes = hex::decode(&self.admin_public_key)
            .map_err(|e| ClientError::Config(format!("Admin key is not hex: {}", e)))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ClientError::Config("Admin key must be 32 bytes".to_string()))?;
        VerifyingKey::from_bytes(&arr)
            .map_err(|e| ClientError::Config(format!("Admin key is not a valid point: {}", e)))
    }

    /// Watchdog period as a Duration
    pub fn synchronization_interval(&self) -> Duration {
        Duration::from_millis(self.synchronization_interval_ms)
    }

    /// Reconnect delay as a Duration
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admin_hex() -> String {
        // Generator-derived point so from_bytes accepts it
        let key = ed25519_dalek::SigningKey::from_bytes(&[7u8; 32]);
        hex::encode(key.verifying_key().to_bytes())
    }

    fn base_config() -> ClientConfig {
        ClientConfig {
            computors: (0..3)
                .map(|i| ComputorEndpoint {
                    url: format!("ws://127.0.0.1:900{}", i),
                    options: None,
                })
                .collect(),
            admin_public_key: admin_hex(),
            synchronization_interval_ms: default_synchronization_interval_ms(),
            reconnect_timeout_ms: default_reconnect_timeout_ms(),
            seed: None,
            index: 0,
            db_path: default_db_path(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_wrong_endpoint_count_rejected() {
        let mut config = base_config();
        config.computors.pop();
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_http_scheme_rejected() {
        let mut config = base_config();
        config.computors[0].url = "http://127.0.0.1:9000".to_string();
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_bad_admin_key_rejected() {
        let mut config = base_config();
        config.admin_public_key = "abcd".to_string();
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_toml_defaults() {
        let text = format!(
            r#"
            admin_public_key = "{}"
            [[computors]]
            url = "ws://a.example:1"
            [[computors]]
            url = "ws://b.example:2"
            [[computors]]
            url = "ws://c.example:3"
            "#,
            admin_hex()
        );
        let config: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(config.reconnect_timeout(), Duration::from_millis(100));
        assert_eq!(config.synchronization_interval(), Duration::from_secs(10));
        assert_eq!(config.db_path, "triad.redb");
        assert!(config.validate().is_ok());
    }
}
