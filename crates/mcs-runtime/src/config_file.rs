//! Loading [`McsConfig`] from TOML
//!
//! Every section and field is optional; missing values take the defaults.
//!
//! ```toml
//! [client]
//! max_send_queue_size = 512
//!
//! [heartbeat]
//! interval_ms = 600000
//! ```

use std::path::Path;

use anyhow::{anyhow, Context};
use mcs_core::McsConfig;

pub fn parse_config(contents: &str) -> anyhow::Result<McsConfig> {
    let config: McsConfig = toml::from_str(contents).context("invalid MCS configuration")?;
    config
        .validate()
        .map_err(|reason| anyhow!("inconsistent MCS configuration: {}", reason))?;
    Ok(config)
}

pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<McsConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("failed to load {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = parse_config(
            r#"
            [client]
            max_send_queue_size = 512

            [store]
            max_outgoing_per_app = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.client.max_send_queue_size, 512);
        assert_eq!(config.store.max_outgoing_per_app, 3);
        assert_eq!(config.heartbeat, McsConfig::default().heartbeat);
    }

    #[test]
    fn test_inconsistent_heartbeat_rejected() {
        let err = parse_config(
            r#"
            [heartbeat]
            interval_ms = 1000
            ack_timeout_ms = 5000
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("inconsistent"));
    }

    #[test]
    fn test_missing_file() {
        assert!(load_config("/nonexistent/mcs.toml").is_err());
    }
}
