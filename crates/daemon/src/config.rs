//! Daemon configuration management

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tuner::{DUALSENSE_PRODUCT_ID, DUALSENSE_VENDOR_ID, DeviceMatch, TargetInterval};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub daemon: DaemonSettings,
    pub device: DeviceSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    pub log_level: String,
    #[serde(default)]
    pub service_mode: bool,
}

/// Controller to manage and the interval to apply
///
/// # Example Configuration
/// ```toml
/// [device]
/// vendor_id = "0x054c"
/// product_id = "0x0ce6"
/// rate = 1  # bInterval, 1-255; lower polls faster
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Vendor ID in hex ("0x054c")
    #[serde(default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: String,
    /// Product ID in hex ("0x0ce6")
    #[serde(default = "DeviceSettings::default_product_id")]
    pub product_id: String,
    /// Raw target bInterval; clamped into 1-255 when applied
    #[serde(default = "DeviceSettings::default_rate")]
    pub rate: u32,
}

impl DeviceSettings {
    fn default_vendor_id() -> String {
        format!("{:#06x}", DUALSENSE_VENDOR_ID)
    }

    fn default_product_id() -> String {
        format!("{:#06x}", DUALSENSE_PRODUCT_ID)
    }

    fn default_rate() -> u32 {
        1 // 1000 Hz full speed, 8000 Hz high speed
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
            rate: Self::default_rate(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            daemon: DaemonSettings {
                log_level: "info".to_string(),
                service_mode: false,
            },
            device: DeviceSettings::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand_path(&p)
        } else {
            // Try standard locations in order
            let candidates = vec![Self::default_path(), PathBuf::from("/etc/ds-oc/daemon.toml")];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: DaemonConfig = toml::from_str(&content)
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

        // Create parent directories if they don't exist
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
            config_dir.join("ds-oc").join("daemon.toml")
        } else {
            PathBuf::from(".config/ds-oc/daemon.toml")
        }
    }

    /// Device identity to manage
    pub fn matcher(&self) -> Result<DeviceMatch> {
        Ok(DeviceMatch::new(
            Self::parse_hex_id(&self.device.vendor_id, "vendor_id")?,
            Self::parse_hex_id(&self.device.product_id, "product_id")?,
        ))
    }

    /// Target interval with the configured rate clamped into range
    pub fn target_interval(&self) -> TargetInterval {
        TargetInterval::clamp(self.device.rate)
    }

    /// Validate configuration values
    ///
    /// An out-of-range `rate` is not an error; it is clamped when applied.
    fn validate(&self) -> Result<()> {
        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.daemon.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.daemon.log_level,
                valid_levels.join(", ")
            ));
        }

        self.matcher()?;
        Ok(())
    }

    /// Parse a hex ID (VID or PID) such as "0x054c"
    fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
        let digits = id
            .strip_prefix("0x")
            .or_else(|| id.strip_prefix("0X"))
            .ok_or_else(|| anyhow!("Invalid {} '{}', expected hex like '0x054c'", name, id))?;

        if digits.is_empty() || digits.len() > 4 {
            return Err(anyhow!("Invalid {} '{}', expected 1-4 hex digits", name, id));
        }

        u16::from_str_radix(digits, 16)
            .with_context(|| format!("Invalid {} '{}', not a hex number", name, id))
    }
}

/// Expand `~` and environment variables in a user-supplied path
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
    }
}
