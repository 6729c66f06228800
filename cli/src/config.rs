// Configuration management for the Rollcall CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/rollcall/config.json
// - Linux: ~/.config/rollcall/config.json
// - Windows: %APPDATA%\rollcall\config.json

use anyhow::{Context, Result};
use rollcall_core::{Platform, ProtocolConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broadcast and scan settings
    pub protocol: ProtocolConfig,

    /// Platform the permission gate evaluates against
    pub platform: Platform,

    /// Default scan duration in seconds
    pub scan_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol: ProtocolConfig::default(),
            platform: Platform::Desktop,
            scan_seconds: 30,
        }
    }
}

/// Parse `android:31`, `ios` or `desktop`
pub fn parse_platform(value: &str) -> Result<Platform> {
    let lower = value.trim().to_ascii_lowercase();
    match lower.as_str() {
        "ios" => Ok(Platform::Ios),
        "desktop" => Ok(Platform::Desktop),
        other => {
            let level = other
                .strip_prefix("android:")
                .context("Platform must be android:<api-level>, ios or desktop")?;
            let api_level = level.parse().context("Invalid Android API level")?;
            Ok(Platform::Android { api_level })
        }
    }
}

fn format_platform(platform: &Platform) -> String {
    match platform {
        Platform::Android { api_level } => format!("android:{}", api_level),
        Platform::Ios => "ios".to_string(),
        Platform::Desktop => "desktop".to_string(),
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("rollcall");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents =
                std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            config
                .protocol
                .validate()
                .context("Invalid protocol settings in config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value without persisting it
    ///
    /// The config is left untouched if the new value fails validation.
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        let mut next = self.clone();
        next.assign(key, value)?;
        next.protocol
            .validate()
            .context("Value rejected by protocol validation")?;
        *self = next;
        Ok(())
    }

    fn assign(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "filter_key" => {
                self.protocol.filter_key = value.parse().context("Invalid filter key")?;
            }
            "advertising_interval_ms" => {
                self.protocol.advertising_interval_ms =
                    value.parse().context("Invalid number")?;
            }
            "tx_power" => {
                self.protocol.tx_power = value.parse().context("Invalid tx power")?;
            }
            "company_id" => {
                self.protocol.company_id = if value.is_empty() || value == "none" {
                    None
                } else {
                    let hex = value.trim_start_matches("0x").trim_start_matches("0X");
                    Some(u16::from_str_radix(hex, 16).context("Company id must be 16-bit hex")?)
                };
            }
            "include_local_name" => {
                self.protocol.include_local_name =
                    value.parse().context("Invalid boolean value")?;
            }
            "allow_duplicates" => {
                self.protocol.allow_duplicates = value.parse().context("Invalid boolean value")?;
            }
            "platform" => {
                self.platform = parse_platform(value)?;
            }
            "scan_seconds" => {
                self.scan_seconds = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Set a config value and save
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.apply(key, value)?;
        self.save()
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
        vec![
            ("filter_key".to_string(), self.protocol.filter_key.to_string()),
            (
                "advertising_interval_ms".to_string(),
                self.protocol.advertising_interval_ms.to_string(),
            ),
            ("tx_power".to_string(), self.protocol.tx_power.to_string()),
            (
                "company_id".to_string(),
                self.protocol
                    .company_id
                    .map(|c| format!("0x{:04X}", c))
                    .unwrap_or_else(|| "none".to_string()),
            ),
            (
                "include_local_name".to_string(),
                self.protocol.include_local_name.to_string(),
            ),
            (
                "allow_duplicates".to_string(),
                self.protocol.allow_duplicates.to_string(),
            ),
            ("platform".to_string(), format_platform(&self.platform)),
            ("scan_seconds".to_string(), self.scan_seconds.to_string()),
        ]
    }
}
