//! Host-provided persistent configuration: maximum device count and the
//! devices to instantiate at engine start.

use serde::{Deserialize, Serialize};

/// One entry of the startup device list, each with its own flag/filename/
/// size/offset/drive-letter values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupDevice {
    pub device_number: Option<u64>,
    pub filename: Option<String>,
    pub size: u64,
    pub image_offset: u64,
    pub flags: u32,
    pub drive_letter: Option<char>,
}

/// Top-level engine configuration, loaded from TOML via `serde` + `toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_max_devices")]
    pub max_devices: u64,

    #[serde(default)]
    pub startup_devices: Vec<StartupDevice>,

    /// Drive letters the engine refuses to hand out as a `drive_letter`
    /// hint, e.g. ones reserved by the host. The reference driver keeps a
    /// hard-coded deny-list for `A`/`B`/the boot volume; here it's
    /// configuration instead of a constant.
    #[serde(default)]
    pub disallowed_drive_letters: Vec<char>,
}

fn default_max_devices() -> u64 {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_devices: default_max_devices(),
            startup_devices: Vec::new(),
            disallowed_drive_letters: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.max_devices, 64);
        assert!(config.startup_devices.is_empty());
    }

    #[test]
    fn parses_startup_devices_and_deny_list() {
        let toml = r#"
            max_devices = 8
            disallowed_drive_letters = ["A", "B"]

            [[startup_devices]]
            size = 1048576
            image_offset = 0
            flags = 0
            filename = "disk0.img"
        "#;
        let config = EngineConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.max_devices, 8);
        assert_eq!(config.disallowed_drive_letters, vec!['A', 'B']);
        assert_eq!(config.startup_devices.len(), 1);
        assert_eq!(config.startup_devices[0].filename.as_deref(), Some("disk0.img"));
    }
}
