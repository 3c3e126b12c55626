//! # Configuration Management Module
//!
//! TOML configuration for the endpoint: device identity, network loop
//! timing, the serial actuator link, logging, and the list of light
//! resources to expose.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use oicbridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("oicbridge.toml").await?;
//!     println!("Device: {} ({})", config.device.name, config.device.uuid);
//!     for r in &config.resources {
//!         println!("{} -> channel {}", r.path, r.channel);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [device]
//! name = "Orange PI Kuchnia"
//! uuid = "0000B960-0000-46F7-BEC0-9E6CBD61ADC2"
//!
//! [network]
//! discovery_port = 5683
//! multicast_group = "224.0.1.187"
//!
//! [serial]
//! port = ""          # empty: first adapter whose name contains "USB"
//! baud_rate = 115200
//!
//! [logging]
//! level = "info"
//!
//! [[resources]]
//! path = "/lampa/floor"
//! label = "Floor"
//! channel = 1
//! ```
//!
//! Every section except `[device]` may be omitted; missing values fall back
//! to the defaults shown by `oicbridge init`.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::fs;

pub const DEFAULT_DISCOVERY_PORT: u16 = 5683;
pub const DEFAULT_MULTICAST_GROUP: &str = "224.0.1.187";
pub const DIMMING_RESOURCE_TYPE: &str = "oic.r.light.dimming";
pub const READ_WRITE_INTERFACE: &str = "oic.if.rw";
/// Smallest receive buffer the loops accept.
pub const MIN_RECV_BUFFER: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub device: DeviceConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default = "default_resources")]
    pub resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Human-readable name announced in discovery and `/oic/d`.
    pub name: String,
    /// Device identifier (`di`), UUID formatted.
    pub uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Local IPv4 address both sockets bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,
    #[serde(default = "default_multicast_group")]
    pub multicast_group: String,
    /// Readability wait of the unicast loop (ms).
    #[serde(default = "default_unicast_poll_ms")]
    pub unicast_poll_ms: u64,
    /// Readability wait of the discovery loop (ms).
    #[serde(default = "default_discovery_poll_ms")]
    pub discovery_poll_ms: u64,
    /// Interval between retransmission checks in the unicast loop (ms).
    #[serde(default = "default_housekeeping_interval_ms")]
    pub housekeeping_interval_ms: u64,
    /// Receive buffer per datagram; larger datagrams are truncated.
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}
fn default_multicast_group() -> String {
    DEFAULT_MULTICAST_GROUP.to_string()
}
fn default_unicast_poll_ms() -> u64 {
    20
}
fn default_discovery_poll_ms() -> u64 {
    200
}
fn default_housekeeping_interval_ms() -> u64 {
    1000
}
fn default_recv_buffer_size() -> usize {
    1024
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            discovery_port: default_discovery_port(),
            multicast_group: default_multicast_group(),
            unicast_poll_ms: default_unicast_poll_ms(),
            discovery_poll_ms: default_discovery_poll_ms(),
            housekeeping_interval_ms: default_housekeeping_interval_ms(),
            recv_buffer_size: default_recv_buffer_size(),
        }
    }
}

impl NetworkConfig {
    pub fn unicast_poll(&self) -> Duration {
        Duration::from_millis(self.unicast_poll_ms)
    }
    pub fn discovery_poll(&self) -> Duration {
        Duration::from_millis(self.discovery_poll_ms)
    }
    pub fn housekeeping_interval(&self) -> Duration {
        Duration::from_millis(self.housekeeping_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Serial device name. Empty selects the first adapter containing "USB".
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// How long a command write may block before it is abandoned (ms).
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_baud_rate() -> u32 {
    115200
}
fn default_write_timeout_ms() -> u64 {
    1000
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl SerialConfig {
    pub fn configured_port(&self) -> Option<&str> {
        let p = self.port.trim();
        (!p.is_empty()).then_some(p)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    pub path: String,
    /// Name used in log lines ("Floor updated 12").
    #[serde(default)]
    pub label: String,
    /// Output index on the actuator microcontroller.
    pub channel: u8,
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    #[serde(default = "default_interface")]
    pub interface: String,
    #[serde(default = "default_initial_setting")]
    pub initial_setting: i64,
}

fn default_resource_type() -> String {
    DIMMING_RESOURCE_TYPE.to_string()
}
fn default_interface() -> String {
    READ_WRITE_INTERFACE.to_string()
}
fn default_initial_setting() -> i64 {
    5
}

impl ResourceConfig {
    pub fn dimming(path: &str, label: &str, channel: u8) -> Self {
        Self {
            path: path.to_string(),
            label: label.to_string(),
            channel,
            resource_type: default_resource_type(),
            interface: default_interface(),
            initial_setting: default_initial_setting(),
        }
    }

    pub fn display_label(&self) -> &str {
        if self.label.is_empty() {
            &self.path
        } else {
            &self.label
        }
    }
}

fn default_resources() -> Vec<ResourceConfig> {
    vec![
        ResourceConfig::dimming("/lampa/floor", "Floor", 1),
        ResourceConfig::dimming("/lampa/table", "Table", 2),
        ResourceConfig::dimming("/lampa/kuchnia", "Kuchnia", 3),
    ]
}

impl Config {
    /// Load and validate configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
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

    pub fn validate(&self) -> Result<()> {
        if self.device.name.trim().is_empty() {
            bail!("device.name must not be empty");
        }
        uuid::Uuid::parse_str(&self.device.uuid)
            .map_err(|e| anyhow!("device.uuid {:?} is not a UUID: {}", self.device.uuid, e))?;

        let group: Ipv4Addr = self
            .network
            .multicast_group
            .parse()
            .map_err(|_| anyhow!("network.multicast_group {:?} is not an IPv4 address", self.network.multicast_group))?;
        if !group.is_multicast() {
            bail!("network.multicast_group {} is not a multicast address", group);
        }
        self.network
            .bind_address
            .parse::<Ipv4Addr>()
            .map_err(|_| anyhow!("network.bind_address {:?} is not an IPv4 address", self.network.bind_address))?;
        if self.network.recv_buffer_size < MIN_RECV_BUFFER {
            bail!("network.recv_buffer_size must be at least {} bytes", MIN_RECV_BUFFER);
        }
        if self.network.unicast_poll_ms == 0 || self.network.discovery_poll_ms == 0 {
            bail!("network poll intervals must be non-zero");
        }
        if self.network.housekeeping_interval_ms == 0 {
            bail!("network.housekeeping_interval_ms must be non-zero");
        }

        if self.resources.is_empty() {
            bail!("at least one [[resources]] entry is required");
        }
        let mut seen = HashSet::new();
        for r in &self.resources {
            if !r.path.starts_with('/') {
                bail!("resource path {:?} must start with '/'", r.path);
            }
            if r.path.starts_with("/oic/") {
                bail!("resource path {} collides with the reserved /oic/ namespace", r.path);
            }
            if !seen.insert(r.path.as_str()) {
                bail!("resource path {} is configured twice", r.path);
            }
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device: DeviceConfig {
                name: "oicbridge Lights".to_string(),
                uuid: uuid::Uuid::new_v4().to_string().to_uppercase(),
            },
            network: NetworkConfig::default(),
            serial: SerialConfig::default(),
            logging: LoggingConfig::default(),
            resources: default_resources(),
        }
    }
}
