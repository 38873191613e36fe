//! Centralized Configuration Management
//!
//! All tunables of the MCS client live here so the core and the runtime
//! read them from one place. Every struct is serde-derived so the runtime can
//! load a full `McsConfig` from a TOML file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Client Configuration
// ----------------------------------------------------------------------------

/// Configuration for message admission and acknowledgment cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upper bound on the number of queued outgoing messages
    pub max_send_queue_size: usize,
    /// Maximum serialized size of a single outgoing message in bytes
    pub max_message_bytes: usize,
    /// Number of unacknowledged inbound messages that triggers a stream ack
    pub unacked_before_stream_ack: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_send_queue_size: 10_240,
            max_message_bytes: 4096,
            unacked_before_stream_ack: 10,
        }
    }
}

impl ClientConfig {
    /// Small bounds so tests can hit every admission limit quickly
    pub fn testing() -> Self {
        Self {
            max_send_queue_size: 16,
            max_message_bytes: 4096,
            unacked_before_stream_ack: 10,
        }
    }

    pub fn low_memory() -> Self {
        Self {
            max_send_queue_size: 512,
            max_message_bytes: 4096,
            unacked_before_stream_ack: 10,
        }
    }
}

// ----------------------------------------------------------------------------
// Heartbeat Configuration
// ----------------------------------------------------------------------------

/// Configuration for connection liveness detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Time between keep-alive pings in milliseconds
    pub interval_ms: u64,
    /// How long to wait for any traffic after a ping before declaring the
    /// connection dead, in milliseconds
    pub ack_timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 28 * 60 * 1000, // 28 minutes
            ack_timeout_ms: 60 * 1000,   // 1 minute
        }
    }
}

impl HeartbeatConfig {
    /// Short timers for deterministic tests
    pub fn testing() -> Self {
        Self {
            interval_ms: 10_000,
            ack_timeout_ms: 2_000,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

// ----------------------------------------------------------------------------
// Store Configuration
// ----------------------------------------------------------------------------

/// Configuration for the durable message store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum number of persisted outgoing messages per application
    pub max_outgoing_per_app: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_outgoing_per_app: 20,
        }
    }
}

impl StoreConfig {
    pub fn testing() -> Self {
        Self {
            max_outgoing_per_app: 5,
        }
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Configuration for runtime channel buffer sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for Command channels (application → client task)
    pub command_buffer_size: usize,
    /// Buffer size for Event channels (transport/storage → client task)
    pub event_buffer_size: usize,
    /// Buffer size for Effect channels (client task → transport)
    pub effect_buffer_size: usize,
    /// Buffer size for AppEvent channels (client task → application)
    pub app_event_buffer_size: usize,
    /// Buffer size for store write requests (client task → storage task)
    pub storage_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,    // sends are bursty but small
            event_buffer_size: 128,     // inbound frames and store completions
            effect_buffer_size: 64,     // frames headed for the wire
            app_event_buffer_size: 64,  // deliveries and status reports
            storage_buffer_size: 128,   // one request per persisted message
        }
    }
}

impl ChannelConfig {
    pub fn low_memory() -> Self {
        Self {
            command_buffer_size: 10,
            event_buffer_size: 25,
            effect_buffer_size: 25,
            app_event_buffer_size: 50,
            storage_buffer_size: 25,
        }
    }

    pub fn testing() -> Self {
        Self {
            command_buffer_size: 100,
            event_buffer_size: 100,
            effect_buffer_size: 100,
            app_event_buffer_size: 100,
            storage_buffer_size: 100,
        }
    }
}

// ----------------------------------------------------------------------------
// Unified Configuration
// ----------------------------------------------------------------------------

/// Complete configuration of one MCS client and its runtime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McsConfig {
    pub client: ClientConfig,
    pub heartbeat: HeartbeatConfig,
    pub store: StoreConfig,
    pub channels: ChannelConfig,
}

impl McsConfig {
    /// Create new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new builder for McsConfig
    pub fn builder() -> McsConfigBuilder {
        McsConfigBuilder::new()
    }

    /// Configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            client: ClientConfig::testing(),
            heartbeat: HeartbeatConfig::testing(),
            store: StoreConfig::testing(),
            channels: ChannelConfig::testing(),
        }
    }

    /// Configuration for constrained devices
    pub fn low_memory() -> Self {
        Self {
            client: ClientConfig::low_memory(),
            heartbeat: HeartbeatConfig::default(),
            store: StoreConfig::default(),
            channels: ChannelConfig::low_memory(),
        }
    }

    pub fn with_client(mut self, client: ClientConfig) -> Self {
        self.client = client;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_channels(mut self, channels: ChannelConfig) -> Self {
        self.channels = channels;
        self
    }

    /// Validate the configuration for consistency and feasibility
    pub fn validate(&self) -> Result<(), String> {
        if self.client.max_send_queue_size == 0 {
            return Err("Send queue size cannot be zero".into());
        }
        if self.client.max_message_bytes == 0 {
            return Err("Max message bytes cannot be zero".into());
        }
        if self.client.unacked_before_stream_ack == 0 {
            return Err("Unacked-before-stream-ack threshold cannot be zero".into());
        }

        if self.heartbeat.interval_ms == 0 {
            return Err("Heartbeat interval cannot be zero".into());
        }
        if self.heartbeat.ack_timeout_ms == 0 {
            return Err("Heartbeat ack timeout cannot be zero".into());
        }
        if self.heartbeat.ack_timeout_ms >= self.heartbeat.interval_ms {
            return Err("Heartbeat ack timeout must be shorter than the interval".into());
        }

        if self.store.max_outgoing_per_app == 0 {
            return Err("Per-app outgoing quota cannot be zero".into());
        }

        if self.channels.command_buffer_size == 0 {
            return Err("Command buffer size cannot be zero".into());
        }
        if self.channels.event_buffer_size == 0 {
            return Err("Event buffer size cannot be zero".into());
        }
        if self.channels.effect_buffer_size == 0 {
            return Err("Effect buffer size cannot be zero".into());
        }
        if self.channels.app_event_buffer_size == 0 {
            return Err("App event buffer size cannot be zero".into());
        }
        if self.channels.storage_buffer_size == 0 {
            return Err("Storage buffer size cannot be zero".into());
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Configuration Builder Pattern
// ----------------------------------------------------------------------------

/// Builder for McsConfig with validation on build
#[derive(Debug, Clone, Default)]
pub struct McsConfigBuilder {
    client: Option<ClientConfig>,
    heartbeat: Option<HeartbeatConfig>,
    store: Option<StoreConfig>,
    channels: Option<ChannelConfig>,
}

/// Error type for configuration building
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Configuration builder error: {message}")]
pub struct ConfigBuilderError {
    pub message: String,
}

impl McsConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(mut self, config: ClientConfig) -> Self {
        self.client = Some(config);
        self
    }

    pub fn heartbeat(mut self, config: HeartbeatConfig) -> Self {
        self.heartbeat = Some(config);
        self
    }

    pub fn store(mut self, config: StoreConfig) -> Self {
        self.store = Some(config);
        self
    }

    pub fn channels(mut self, config: ChannelConfig) -> Self {
        self.channels = Some(config);
        self
    }

    /// Use the testing preset as base (can be further customized)
    pub fn testing(self) -> Self {
        Self {
            client: Some(ClientConfig::testing()),
            heartbeat: Some(HeartbeatConfig::testing()),
            store: Some(StoreConfig::testing()),
            channels: Some(ChannelConfig::testing()),
        }
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<McsConfig, ConfigBuilderError> {
        let config = self.build_unchecked();
        config
            .validate()
            .map_err(|message| ConfigBuilderError { message })?;
        Ok(config)
    }

    /// Build the configuration without validation
    pub fn build_unchecked(self) -> McsConfig {
        McsConfig {
            client: self.client.unwrap_or_default(),
            heartbeat: self.heartbeat.unwrap_or_default(),
            store: self.store.unwrap_or_default(),
            channels: self.channels.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = McsConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.client.max_send_queue_size, 10_240);
        assert_eq!(config.client.max_message_bytes, 4096);
        assert_eq!(config.heartbeat.interval(), Duration::from_secs(28 * 60));
        assert_eq!(config.store.max_outgoing_per_app, 20);
    }

    #[test]
    fn test_presets_validate() {
        assert!(McsConfig::testing().validate().is_ok());
        assert!(McsConfig::low_memory().validate().is_ok());
        assert!(
            McsConfig::low_memory().channels.command_buffer_size
                < ChannelConfig::default().command_buffer_size
        );
    }

    #[test]
    fn test_invalid_config_validation() {
        let mut config = McsConfig::default();
        config.channels.command_buffer_size = 0;
        assert!(config.validate().is_err());

        let mut config = McsConfig::default();
        config.heartbeat.ack_timeout_ms = config.heartbeat.interval_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder() {
        let config = McsConfig::builder()
            .testing()
            .store(StoreConfig {
                max_outgoing_per_app: 3,
            })
            .build()
            .unwrap();
        assert_eq!(config.store.max_outgoing_per_app, 3);
        assert_eq!(config.client, ClientConfig::testing());

        let err = McsConfig::builder()
            .client(ClientConfig {
                max_send_queue_size: 0,
                ..ClientConfig::default()
            })
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Send queue size"));
    }

    #[test]
    fn test_config_survives_serialization() {
        let config: McsConfig =
            bincode::deserialize(&bincode::serialize(&McsConfig::testing()).unwrap()).unwrap();
        assert_eq!(config, McsConfig::testing());
    }
}
