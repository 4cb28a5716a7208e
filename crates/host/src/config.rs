//! Host configuration management

use anyhow::{Context, Result, anyhow};
use protocol::DeviceIdentity;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSettings,
    /// Identity strings sent during accessory negotiation
    #[serde(default)]
    pub identity: DeviceIdentity,
    #[serde(default)]
    pub usb: UsbSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    #[serde(default = "HostSettings::default_log_level")]
    pub log_level: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}

impl HostSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

/// USB timing knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// Timeout for each negotiation control transfer
    #[serde(default = "UsbSettings::default_control_timeout_ms")]
    pub control_timeout_ms: u64,
    /// Timeout for each bulk write
    #[serde(default = "UsbSettings::default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// How long to wait for the device to come back after the mode switch
    #[serde(default = "UsbSettings::default_reenumeration_timeout_ms")]
    pub reenumeration_timeout_ms: u64,
    /// Bus poll interval while waiting for re-enumeration
    #[serde(default = "UsbSettings::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pause after re-enumeration before claiming the interface
    #[serde(default = "UsbSettings::default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl Default for UsbSettings {
    fn default() -> Self {
        Self {
            control_timeout_ms: Self::default_control_timeout_ms(),
            write_timeout_ms: Self::default_write_timeout_ms(),
            reenumeration_timeout_ms: Self::default_reenumeration_timeout_ms(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            settle_delay_ms: Self::default_settle_delay_ms(),
        }
    }
}

impl UsbSettings {
    fn default_control_timeout_ms() -> u64 {
        1000
    }

    fn default_write_timeout_ms() -> u64 {
        1000
    }

    fn default_reenumeration_timeout_ms() -> u64 {
        5000
    }

    fn default_poll_interval_ms() -> u64 {
        250
    }

    fn default_settle_delay_ms() -> u64 {
        500
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host: HostSettings::default(),
            identity: DeviceIdentity::default(),
            usb: UsbSettings::default(),
        }
    }
}

impl HostConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/accessory-kit/host.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: HostConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("accessory-kit").join("host.toml")
        } else {
            PathBuf::from(".config/accessory-kit/host.toml")
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.host.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.host.log_level,
                valid_levels.join(", ")
            ));
        }

        for (index, value) in self.identity.fields() {
            if value.is_empty() {
                return Err(anyhow!("Empty identity string at index {index}"));
            }
            if value.contains('\0') {
                return Err(anyhow!("Identity string at index {index} contains NUL"));
            }
        }

        if self.usb.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than zero"));
        }
        if self.usb.reenumeration_timeout_ms < self.usb.poll_interval_ms {
            return Err(anyhow!(
                "reenumeration_timeout_ms must be at least poll_interval_ms"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HostConfig::default();
        assert_eq!(config.host.log_level, "info");
        assert_eq!(config.identity.manufacturer, "StiffSockets");
        assert_eq!(config.usb.reenumeration_timeout_ms, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = HostConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: HostConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.host.log_level, parsed.host.log_level);
        assert_eq!(config.identity.serial, parsed.identity.serial);
        assert_eq!(config.usb.control_timeout_ms, parsed.usb.control_timeout_ms);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: HostConfig = toml::from_str(
            r#"
            [identity]
            manufacturer = "Acme"
            model = "Widget"
            description = "Widget Link"
            version = "2.0"
            uri = "https://acme.example"
            serial = "AC-001"
            "#,
        )
        .unwrap();

        assert_eq!(config.identity.manufacturer, "Acme");
        assert_eq!(config.host.log_level, "info");
        assert_eq!(config.usb.poll_interval_ms, 250);
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = HostConfig::default();
        config.host.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.host.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_identity() {
        let mut config = HostConfig::default();
        config.identity.model = String::new();
        assert!(config.validate().is_err());

        config.identity.model = "has\0nul".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.toml");

        let mut config = HostConfig::default();
        config.identity.serial = "ROUNDTRIP-42".to_string();
        config.save(&path).unwrap();

        let loaded = HostConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.identity.serial, "ROUNDTRIP-42");
    }
}
