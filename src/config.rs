//! # Configuration Management
//!
//! Centralized configuration for the framing library.
//!
//! This module provides structured configuration for the protocol, session
//! defaults, buffer pool, and server limits.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`PACKET_LINK_*` variables)

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{ByteOrder, Protocol};
use crate::error::{LinkError, Result};
use crate::session::{DEFAULT_READ_BUFFER_SIZE, DEFAULT_SEND_QUEUE_SIZE};

/// Top-level configuration covering every tunable in the library.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LinkConfig {
    /// Framing protocol configuration
    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Per-session defaults
    #[serde(default)]
    pub session: SessionConfig,

    /// Buffer pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Server limits
    #[serde(default)]
    pub server: ServerConfig,
}

impl LinkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| LinkError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| LinkError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| LinkError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables, starting from
    /// defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PACKET_LINK_HEAD_LEN") {
            if let Ok(v) = val.parse::<usize>() {
                config.protocol.head_len = v;
            }
        }
        if let Ok(val) = std::env::var("PACKET_LINK_BYTE_ORDER") {
            match val.as_str() {
                "big_endian" => config.protocol.byte_order = ByteOrder::BigEndian,
                "little_endian" => config.protocol.byte_order = ByteOrder::LittleEndian,
                _ => {}
            }
        }
        if let Ok(val) = std::env::var("PACKET_LINK_MAX_READ") {
            if let Ok(v) = val.parse::<usize>() {
                config.protocol.max_read = v;
            }
        }
        if let Ok(val) = std::env::var("PACKET_LINK_MAX_WRITE") {
            if let Ok(v) = val.parse::<usize>() {
                config.protocol.max_write = v;
            }
        }
        if let Ok(val) = std::env::var("PACKET_LINK_AUTH_KEY") {
            config.protocol.auth_key = Some(val);
        }
        if let Ok(val) = std::env::var("PACKET_LINK_SEND_QUEUE_SIZE") {
            if let Ok(v) = val.parse::<usize>() {
                config.session.send_queue_size = v;
            }
        }
        if let Ok(val) = std::env::var("PACKET_LINK_READ_BUFFER_SIZE") {
            if let Ok(v) = val.parse::<usize>() {
                config.session.read_buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("PACKET_LINK_ASYNC_SEND_TIMEOUT_MS") {
            if let Ok(v) = val.parse::<u64>() {
                config.session.async_send_timeout = Duration::from_millis(v);
            }
        }
        if let Ok(val) = std::env::var("PACKET_LINK_POOL_REGION_SIZE") {
            if let Ok(v) = val.parse::<usize>() {
                config.pool.region_size = v;
            }
        }
        if let Ok(val) = std::env::var("PACKET_LINK_MAX_SESSIONS") {
            if let Ok(v) = val.parse::<usize>() {
                config.server.max_sessions = v;
            }
        }

        Ok(config)
    }

    /// Collect every validation problem instead of stopping at the first.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.protocol.validate());
        errors.extend(self.session.validate());
        errors.extend(self.pool.validate());
        errors
    }

    /// Validate, failing on the first collected problem.
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LinkError::ConfigError(errors.join("; ")))
        }
    }
}

/// Framing protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Length header width in bytes (1, 2, 4 or 8)
    pub head_len: usize,

    /// Byte order of the header and trailer fields
    pub byte_order: ByteOrder,

    /// Largest accepted incoming body; 0 disables the limit
    pub max_read: usize,

    /// Largest accepted outgoing body; 0 disables the limit
    pub max_write: usize,

    /// Enables the authenticated variant when set
    pub auth_key: Option<String>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            head_len: 4,
            byte_order: ByteOrder::BigEndian,
            max_read: 0,
            max_write: 0,
            auth_key: None,
        }
    }
}

impl ProtocolConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !matches!(self.head_len, 1 | 2 | 4 | 8) {
            errors.push(format!(
                "protocol.head_len must be 1, 2, 4 or 8, got {}",
                self.head_len
            ));
        }
        if let Some(key) = &self.auth_key {
            if key.is_empty() {
                errors.push("protocol.auth_key must not be empty when set".into());
            }
            if self.max_read != self.max_write {
                errors.push(format!(
                    "authenticated protocol uses a single size limit, got max_read {} and max_write {}",
                    self.max_read, self.max_write
                ));
            }
        }
        errors
    }

    /// Build the configured [`Protocol`].
    ///
    /// Unlike the panicking constructors, a bad header width surfaces as
    /// [`LinkError::ConfigError`] so file-driven setups can report it.
    pub fn build_protocol(&self) -> Result<Protocol> {
        if !matches!(self.head_len, 1 | 2 | 4 | 8) {
            return Err(LinkError::ConfigError(format!(
                "unsupported packet head size: {}",
                self.head_len
            )));
        }
        Ok(match &self.auth_key {
            Some(key) => Protocol::auth_packet_n(self.head_len, key, self.byte_order, self.max_read),
            None => Protocol::packet_n(self.head_len, self.byte_order, self.max_read, self.max_write),
        })
    }
}

/// Per-session defaults applied by the server to accepted connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capacity of each async send queue
    pub send_queue_size: usize,

    /// Read-buffering size; 0 disables buffering
    pub read_buffer_size: usize,

    /// Default wait for a slot on a full async queue
    #[serde(with = "duration_millis")]
    pub async_send_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_queue_size: DEFAULT_SEND_QUEUE_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            async_send_timeout: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.send_queue_size == 0 {
            errors.push("session.send_queue_size must be at least 1".into());
        }
        errors
    }
}

/// Buffer pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Default region size; also the boundary of the pooling tiers
    pub region_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            region_size: crate::buffer::DEFAULT_REGION_SIZE,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.region_size == 0 {
            errors.push("pool.region_size must be at least 1".into());
        }
        errors
    }
}

/// Server limits.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Cap on concurrent sessions; 0 means unlimited
    pub max_sessions: usize,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(LinkConfig::default().validate().is_empty());
    }

    #[test]
    fn test_toml_round_trip() {
        let toml = r#"
            [protocol]
            head_len = 2
            byte_order = "little_endian"
            max_read = 4096
            max_write = 4096

            [session]
            send_queue_size = 8
            async_send_timeout = 250

            [pool]
            region_size = 2048

            [server]
            max_sessions = 100
        "#;
        let config = LinkConfig::from_toml(toml).unwrap();
        assert_eq!(config.protocol.head_len, 2);
        assert_eq!(config.protocol.byte_order, ByteOrder::LittleEndian);
        assert_eq!(config.session.send_queue_size, 8);
        assert_eq!(config.session.async_send_timeout, Duration::from_millis(250));
        assert_eq!(config.pool.region_size, 2048);
        assert_eq!(config.server.max_sessions, 100);
        assert!(config.validate_strict().is_ok());
    }

    #[test]
    fn test_bad_head_len_rejected() {
        let config = LinkConfig::from_toml("[protocol]\nhead_len = 3\n").unwrap();
        assert!(config.validate_strict().is_err());
        assert!(config.protocol.build_protocol().is_err());
    }

    #[test]
    fn test_build_protocol_variants() {
        let plain = ProtocolConfig::default().build_protocol().unwrap();
        assert!(matches!(plain, Protocol::Plain(_)));

        let auth = ProtocolConfig {
            auth_key: Some("secret".into()),
            ..Default::default()
        }
        .build_protocol()
        .unwrap();
        assert!(matches!(auth, Protocol::Auth(_)));
    }
}
