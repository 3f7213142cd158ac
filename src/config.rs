use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::led::{Rgb, WHITE};

/// Device configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub input: InputConfig,
    pub touch: TouchConfig,
    pub led: LedConfig,
    pub macros: MacroConfig,
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from `path` (or the default location), writing defaults on first run
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("parsing {}", config_path.display()))?;
            Ok(config.sanitized())
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")?;
        Ok(PathBuf::from(home).join(".config/macropad/config.toml"))
    }

    /// Pull values the firmware can't work with back into range
    pub fn sanitized(mut self) -> Self {
        self.device.num_keys = self.device.num_keys.max(1);
        self.device.num_profiles = self.device.num_profiles.max(1);
        self.device.start_profile = self
            .device
            .start_profile
            .clamp(1, self.device.num_profiles);
        self.touch.samples = self.touch.samples.max(1);
        self.touch.calibration_samples = self.touch.calibration_samples.max(1);
        self.led.frame_interval_ms = self.led.frame_interval_ms.max(1);
        self.led.breathe_step = self.led.breathe_step.max(1);
        self.macros.max_repeat = self.macros.max_repeat.max(1);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Number of physical keys (ids 1..=num_keys)
    pub num_keys: u8,
    /// Number of profile slots (ids 1..=num_profiles)
    pub num_profiles: u8,
    /// Profile loaded at boot
    pub start_profile: u8,
    /// Sleep between main-loop ticks on the host
    pub loop_idle_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            num_keys: 12,
            num_profiles: 5,
            start_profile: 1,
            loop_idle_ms: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// A level must hold this long before it counts
    pub debounce_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { debounce_ms: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchConfig {
    /// Drop below baseline that counts as a touch
    pub threshold: u16,
    /// Readings averaged per poll
    pub samples: u8,
    /// Readings averaged for a baseline
    pub calibration_samples: u8,
    /// Settle time after sampling
    pub settle_ms: u64,
    /// Minimum time between two gestures from the same pad
    pub cooldown_ms: u64,
    /// Both pads held this long unloads the profile
    pub failsafe_hold_ms: u64,
    /// Both pads idle this long re-captures the baseline (0 disables)
    pub recalibrate_idle_ms: u64,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            threshold: 20,
            samples: 4,
            calibration_samples: 16,
            settle_ms: 1,
            cooldown_ms: 300,
            failsafe_hold_ms: 3000,
            recalibrate_idle_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedConfig {
    /// Pixels on the strip; pixel `i` sits under key `i + 1`
    pub count: usize,
    /// Minimum time between idle animation frames
    pub frame_interval_ms: u64,
    pub breathe_color: Rgb,
    /// Brightness change per breathe frame
    pub breathe_step: u8,
    /// Hue change per rainbow frame
    pub rainbow_step: u8,
    /// Overlay shown under a held key
    pub highlight_color: Rgb,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            count: 12,
            frame_interval_ms: 30,
            breathe_color: Rgb::new(0, 200, 255),
            breathe_step: 5,
            rainbow_step: 2,
            highlight_color: WHITE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroConfig {
    /// Inter-action delay for profiles that don't set one
    pub default_delay_ms: u64,
    pub max_repeat: u32,
    /// Longest text payload, in characters
    pub max_text_len: usize,
    /// Pacing between typed characters
    pub char_delay_ms: u64,
}

impl Default for MacroConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: 30,
            max_repeat: 100,
            max_text_len: 256,
            char_delay_ms: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Host directory standing in for the flash root
    pub root: PathBuf,
    /// Flash directory receiving pre-overwrite snapshots
    pub backup_dir: String,
    /// Largest document accepted over the upload protocol
    pub max_upload_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("flash"),
            backup_dir: "/backups".to_string(),
            max_upload_bytes: 16 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r##"
            [device]
            num_profiles = 3

            [led]
            breathe_color = "#FF0000"
            "##,
        )
        .unwrap();

        assert_eq!(config.device.num_profiles, 3);
        assert_eq!(config.device.num_keys, 12);
        assert_eq!(config.led.breathe_color, Rgb::new(255, 0, 0));
        assert_eq!(config.touch.cooldown_ms, 300);
    }

    #[test]
    fn test_sanitized_clamps_start_profile() {
        let mut config = Config::default();
        config.device.num_profiles = 2;
        config.device.start_profile = 9;
        config.macros.max_repeat = 0;
        let config = config.sanitized();
        assert_eq!(config.device.start_profile, 2);
        assert_eq!(config.macros.max_repeat, 1);
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.led.highlight_color, WHITE);
        assert_eq!(parsed.storage.backup_dir, "/backups");
    }
}
