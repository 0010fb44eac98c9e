// Configuration management for the IPSP gateway
//
// Stored as JSON in:
// - Linux: ~/.config/ipsp-gateway/config.json
// - macOS: ~/Library/Application Support/ipsp-gateway/config.json
// - Windows: %APPDATA%\ipsp-gateway\config.json

use anyhow::{Context, Result};
use ipsp_gateway_core::connect::DEFAULT_CONTROL_PATH;
use ipsp_gateway_core::network::{DEFAULT_IP_BINARY, DEFAULT_SYSFS_NET};
use ipsp_gateway_core::{AddressPlan, ConnectionType, GatewayConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Discovery, orchestration, reconciliation and relay settings
    pub gateway: GatewayConfig,

    /// Kernel 6LoWPAN bootstrap
    pub bootstrap: BootstrapConfig,

    /// Host paths and tools
    pub host: HostConfig,

    /// BLE adapter selection
    pub ble: BleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Load the kernel module and enable 6LoWPAN before starting
    pub enabled: bool,

    /// Kernel module providing BLE 6LoWPAN
    pub module: String,

    /// debugfs switch turning 6LoWPAN on
    pub enable_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// debugfs control file accepting `connect` commands
    pub control_path: String,

    /// Directory listing network interfaces
    pub sysfs_net: String,

    /// iproute2 binary used for address assignment
    pub ip_binary: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// Index into the adapter list reported by the OS
    pub adapter_index: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            module: "bluetooth_6lowpan".to_string(),
            enable_path: "/sys/kernel/debug/bluetooth/6lowpan_enable".to_string(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            control_path: DEFAULT_CONTROL_PATH.to_string(),
            sysfs_net: DEFAULT_SYSFS_NET.to_string(),
            ip_binary: DEFAULT_IP_BINARY.to_string(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("ipsp-gateway");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from `path`, or write defaults there if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    /// Set a config value (does not save)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let gateway = &mut self.gateway;
        match key {
            "relay.enabled" => {
                gateway.relay.enabled = value.parse().context("Invalid boolean value")?;
            }
            "relay.listen" => {
                gateway.relay.listen = value.parse().context("Invalid socket address")?;
            }
            "relay.destination" => {
                anyhow::ensure!(value.contains(':'), "Destination must be host:port");
                gateway.relay.destination = value.to_string();
            }
            "relay.idle_timeout_secs" => {
                gateway.relay.idle_timeout_secs = value.parse().context("Invalid number")?;
            }
            "discovery.dedup_window_secs" => {
                gateway.discovery.dedup_window_secs = value.parse().context("Invalid number")?;
            }
            "discovery.queue_capacity" => {
                gateway.discovery.queue_capacity = value.parse().context("Invalid number")?;
            }
            "orchestrator.max_attempts" => {
                gateway.orchestrator.max_attempts = value.parse().context("Invalid number")?;
            }
            "orchestrator.grace_period_ms" => {
                gateway.orchestrator.grace_period_ms = value.parse().context("Invalid number")?;
            }
            "orchestrator.attempt_interval_ms" => {
                gateway.orchestrator.attempt_interval_ms =
                    value.parse().context("Invalid number")?;
            }
            "orchestrator.connection_type" => {
                gateway.orchestrator.connection_type = value.parse::<ConnectionType>()?;
            }
            "orchestrator.workers" => {
                gateway.orchestrator.workers = value.parse().context("Invalid number")?;
            }
            "reconciler.poll_interval_secs" => {
                gateway.reconciler.poll_interval_secs = value.parse().context("Invalid number")?;
            }
            "reconciler.interface_prefix" => {
                anyhow::ensure!(!value.is_empty(), "Interface prefix cannot be empty");
                gateway.reconciler.interface_prefix = value.to_string();
            }
            "reconciler.address_plan" => {
                gateway.reconciler.address_plan = match value {
                    "shared" => AddressPlan::shared_default(),
                    "per-interface" => AddressPlan::default(),
                    other => anyhow::bail!("Unknown address plan: {} (shared, per-interface)", other),
                };
            }
            "supervision.max_restarts" => {
                gateway.supervision.max_restarts = value.parse().context("Invalid number")?;
            }
            "bootstrap.enabled" => {
                self.bootstrap.enabled = value.parse().context("Invalid boolean value")?;
            }
            "host.control_path" => self.host.control_path = value.to_string(),
            "host.sysfs_net" => self.host.sysfs_net = value.to_string(),
            "host.ip_binary" => self.host.ip_binary = value.to_string(),
            "ble.adapter_index" => {
                self.ble.adapter_index = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let g = &self.gateway;
        vec![
            ("relay.enabled".to_string(), g.relay.enabled.to_string()),
            ("relay.listen".to_string(), g.relay.listen.to_string()),
            ("relay.destination".to_string(), g.relay.destination.clone()),
            ("relay.idle_timeout_secs".to_string(), g.relay.idle_timeout_secs.to_string()),
            ("discovery.dedup_window_secs".to_string(), g.discovery.dedup_window_secs.to_string()),
            ("discovery.queue_capacity".to_string(), g.discovery.queue_capacity.to_string()),
            ("orchestrator.max_attempts".to_string(), g.orchestrator.max_attempts.to_string()),
            ("orchestrator.grace_period_ms".to_string(), g.orchestrator.grace_period_ms.to_string()),
            (
                "orchestrator.attempt_interval_ms".to_string(),
                g.orchestrator.attempt_interval_ms.to_string(),
            ),
            (
                "orchestrator.connection_type".to_string(),
                g.orchestrator.connection_type.to_string(),
            ),
            ("orchestrator.workers".to_string(), g.orchestrator.workers.to_string()),
            (
                "reconciler.poll_interval_secs".to_string(),
                g.reconciler.poll_interval_secs.to_string(),
            ),
            ("reconciler.interface_prefix".to_string(), g.reconciler.interface_prefix.clone()),
            (
                "reconciler.address_plan".to_string(),
                g.reconciler.address_plan.name().to_string(),
            ),
            ("supervision.max_restarts".to_string(), g.supervision.max_restarts.to_string()),
            ("bootstrap.enabled".to_string(), self.bootstrap.enabled.to_string()),
            ("host.control_path".to_string(), self.host.control_path.clone()),
            ("host.sysfs_net".to_string(), self.host.sysfs_net.clone()),
            ("host.ip_binary".to_string(), self.host.ip_binary.clone()),
            ("ble.adapter_index".to_string(), self.ble.adapter_index.to_string()),
        ]
    }
}
