//! # Configuration Management Module
//!
//! Typed TOML configuration for the serial link, protocol timing and logging.
//!
//! ## Configuration Structure
//!
//! - [`SerialConfig`] - Device port and reader settings
//! - [`LinkConfig`] - Protocol timeouts, retry policy and defaults
//! - [`LoggingConfig`] - Log level, optional log file, device forwarding
//!
//! ## Usage
//!
//! ```rust,no_run
//! use loglink::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Serial Port: {}", config.serial.port);
//!
//!     Config::create_default("config.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [serial]
//! port = "/dev/ttyACM0"
//! baud_rate = 115200
//!
//! [link]
//! default_line_len = 19
//! sync_max_attempts = 5
//! # max_retransmits = 20   # unset: retransmit until delivered or cancelled
//!
//! [logging]
//! level = "info"
//! forward_to_device = true
//! ```
//!
//! Every `[link]` key is optional and falls back to the protocol defaults.
//! The serial framing (8 data bits, no parity, 1 stop bit) is fixed by the
//! device firmware and not configurable.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub serial: SerialConfig,
    #[serde(default)]
    pub link: LinkConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// How long the delivery thread blocks in a single port read (ms).
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_read_timeout_ms() -> u64 {
    50
}

/// Protocol timing and retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Line length assumed until a handshake reports the real one.
    pub default_line_len: u8,
    /// Wait for the device's ENQ before polling again (ms).
    pub handshake_poll_ms: u64,
    /// Wait for the ACK that answers our SYN (ms).
    pub sync_ack_timeout_ms: u64,
    /// Wait for the `SOH lineLen EOT` frame (ms).
    pub sync_frame_timeout_ms: u64,
    /// Wait for the first byte of a command once bytes were seen (ms).
    pub command_lead_timeout_ms: u64,
    /// Wait for the rest of a command header or payload (ms).
    pub command_body_timeout_ms: u64,
    /// Wait for the device's answer to a message header or body (ms).
    pub message_timeout_ms: u64,
    pub control_write_timeout_ms: u64,
    pub frame_write_timeout_ms: u64,
    pub sync_max_attempts: u32,
    /// First backoff between failed sync attempts; doubles each retry (ms).
    pub sync_backoff_ms: u64,
    pub sync_backoff_max_ms: u64,
    /// Give up on a message after this many retransmissions. Unset retries forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retransmits: Option<u32>,
    /// Longest park when there is nothing to read or send (ms).
    pub idle_poll_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            default_line_len: 19,
            handshake_poll_ms: 1000,
            sync_ack_timeout_ms: 1000,
            sync_frame_timeout_ms: 500,
            command_lead_timeout_ms: 100,
            command_body_timeout_ms: 500,
            message_timeout_ms: 500,
            control_write_timeout_ms: 100,
            frame_write_timeout_ms: 500,
            sync_max_attempts: 5,
            sync_backoff_ms: 500,
            sync_backoff_max_ms: 8000,
            max_retransmits: None,
            idle_poll_ms: 10,
        }
    }
}

impl LinkConfig {
    pub fn handshake_poll(&self) -> Duration {
        Duration::from_millis(self.handshake_poll_ms)
    }
    pub fn sync_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_ack_timeout_ms)
    }
    pub fn sync_frame_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_frame_timeout_ms)
    }
    pub fn command_lead_timeout(&self) -> Duration {
        Duration::from_millis(self.command_lead_timeout_ms)
    }
    pub fn command_body_timeout(&self) -> Duration {
        Duration::from_millis(self.command_body_timeout_ms)
    }
    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }
    pub fn control_write_timeout(&self) -> Duration {
        Duration::from_millis(self.control_write_timeout_ms)
    }
    pub fn frame_write_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_write_timeout_ms)
    }
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    /// Backoff before sync attempt `attempt + 1` (1-based `attempt`), doubling and capped.
    pub fn sync_backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let ms = self
            .sync_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.sync_backoff_max_ms);
        Duration::from_millis(ms)
    }

    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("handshake_poll_ms", self.handshake_poll_ms),
            ("sync_ack_timeout_ms", self.sync_ack_timeout_ms),
            ("sync_frame_timeout_ms", self.sync_frame_timeout_ms),
            ("command_lead_timeout_ms", self.command_lead_timeout_ms),
            ("command_body_timeout_ms", self.command_body_timeout_ms),
            ("message_timeout_ms", self.message_timeout_ms),
            ("control_write_timeout_ms", self.control_write_timeout_ms),
            ("frame_write_timeout_ms", self.frame_write_timeout_ms),
            ("idle_poll_ms", self.idle_poll_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(anyhow!("link.{} must be greater than zero", name));
            }
        }
        if self.sync_max_attempts == 0 {
            return Err(anyhow!("link.sync_max_attempts must be at least 1"));
        }
        if self.default_line_len == 0 {
            return Err(anyhow!("link.default_line_len must be at least 1"));
        }
        if self.sync_backoff_max_ms < self.sync_backoff_ms {
            return Err(anyhow!(
                "link.sync_backoff_max_ms ({}) is below link.sync_backoff_ms ({})",
                self.sync_backoff_max_ms,
                self.sync_backoff_ms
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Mirror this process's own log records onto the device.
    #[serde(default = "default_forward_to_device")]
    pub forward_to_device: bool,
}

fn default_forward_to_device() -> bool {
    true
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.link.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            serial: SerialConfig {
                port: "/dev/ttyACM0".to_string(),
                baud_rate: default_baud_rate(),
                read_timeout_ms: default_read_timeout_ms(),
            },
            link: LinkConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file: None,
                forward_to_device: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_link_config_matches_protocol_timing() {
        let link = LinkConfig::default();
        assert_eq!(link.handshake_poll(), Duration::from_millis(1000));
        assert_eq!(link.sync_frame_timeout(), Duration::from_millis(500));
        assert_eq!(link.command_lead_timeout(), Duration::from_millis(100));
        assert_eq!(link.default_line_len, 19);
        assert!(link.max_retransmits.is_none());
        assert!(link.validate().is_ok());
    }

    #[test]
    fn sync_backoff_doubles_and_caps() {
        let link = LinkConfig::default();
        assert_eq!(link.sync_backoff(1), Duration::from_millis(500));
        assert_eq!(link.sync_backoff(2), Duration::from_millis(1000));
        assert_eq!(link.sync_backoff(4), Duration::from_millis(4000));
        assert_eq!(link.sync_backoff(5), Duration::from_millis(8000));
        assert_eq!(link.sync_backoff(40), Duration::from_millis(8000));
    }

    #[test]
    fn validate_rejects_zero_values() {
        let mut link = LinkConfig::default();
        link.message_timeout_ms = 0;
        assert!(link.validate().is_err());

        let mut link = LinkConfig::default();
        link.sync_max_attempts = 0;
        assert!(link.validate().is_err());

        let mut link = LinkConfig::default();
        link.default_line_len = 0;
        assert!(link.validate().is_err());
    }

    #[test]
    fn partial_link_section_uses_defaults() {
        let text = r#"
            [serial]
            port = "/dev/ttyUSB1"

            [link]
            default_line_len = 24
            max_retransmits = 7

            [logging]
            level = "debug"
        "#;
        let cfg: Config = toml::from_str(text).unwrap();
        assert_eq!(cfg.serial.baud_rate, 115_200);
        assert_eq!(cfg.link.default_line_len, 24);
        assert_eq!(cfg.link.max_retransmits, Some(7));
        assert_eq!(cfg.link.message_timeout_ms, 500);
        assert!(cfg.logging.forward_to_device);
        assert_eq!(cfg.logging.level_filter(), log::LevelFilter::Debug);
    }

    #[test]
    fn default_config_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.link, LinkConfig::default());
        assert_eq!(back.serial.port, "/dev/ttyACM0");
    }

    #[tokio::test]
    async fn load_reads_and_validates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let cfg = Config::load(path).await.unwrap();
        assert_eq!(cfg.link, LinkConfig::default());

        tokio::fs::write(
            path,
            "[serial]\nport = \"x\"\n[link]\nsync_max_attempts = 0\n[logging]\nlevel = \"info\"\n",
        )
        .await
        .unwrap();
        assert!(Config::load(path).await.is_err());
    }
}
