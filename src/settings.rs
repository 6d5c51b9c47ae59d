//! Relay settings
//!
//! Stored as XML (`<HapRelay>` root). Missing fields fall back to defaults and
//! out-of-range values are clamped on load.

use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::de::from_str;
use quick_xml::se::to_string;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::network::Size;
use crate::pool::PoolConfig;

const MIB: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML parse error: {0}")]
    XmlParse(#[from] quick_xml::DeError),
    #[error("XML write error: {0}")]
    XmlWrite(#[from] quick_xml::SeError),
    #[error("Could not find config directory")]
    NoConfigDir,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "HapRelay")]
pub struct RelaySettings {
    /// Render ticks per second (24-240)
    #[serde(rename = "tickRateHz", default = "default_tick_rate")]
    pub tick_rate_hz: u32,

    /// Published texture size
    #[serde(rename = "outputWidth", default = "default_output_width")]
    pub output_width: u32,
    #[serde(rename = "outputHeight", default = "default_output_height")]
    pub output_height: u32,

    /// Published image is bottom-up
    #[serde(rename = "flipped", default)]
    pub flipped: bool,

    /// Housekeeping passes an idle buffer survives
    #[serde(rename = "retentionTicks", default = "default_retention_ticks")]
    pub retention_ticks: u64,

    /// Idle memory kept warm past the retention window
    #[serde(rename = "idleBudgetBytes", default = "default_idle_budget")]
    pub idle_budget_bytes: usize,

    /// Hard cap on pooled memory
    #[serde(rename = "maxPoolBytes", default = "default_max_pool")]
    pub max_pool_bytes: usize,

    /// Ready frames held ahead of the render tick
    #[serde(rename = "maxPendingFrames", default = "default_max_pending")]
    pub max_pending_frames: usize,

    /// Name receivers see
    #[serde(rename = "serverName", default = "default_server_name")]
    pub server_name: String,
}

fn default_tick_rate() -> u32 {
    60
}

fn default_output_width() -> u32 {
    640
}

fn default_output_height() -> u32 {
    360
}

fn default_retention_ticks() -> u64 {
    30
}

fn default_idle_budget() -> usize {
    64 * MIB
}

fn default_max_pool() -> usize {
    512 * MIB
}

fn default_max_pending() -> usize {
    8
}

fn default_server_name() -> String {
    "Video".to_string()
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate(),
            output_width: default_output_width(),
            output_height: default_output_height(),
            flipped: false,
            retention_ticks: default_retention_ticks(),
            idle_budget_bytes: default_idle_budget(),
            max_pool_bytes: default_max_pool(),
            max_pending_frames: default_max_pending(),
            server_name: default_server_name(),
        }
    }
}

impl RelaySettings {
    /// Clamp values into their valid ranges
    pub fn clamp(&mut self) {
        self.tick_rate_hz = self.tick_rate_hz.clamp(24, 240);
        self.output_width = self.output_width.max(1);
        self.output_height = self.output_height.max(1);
        self.max_pending_frames = self.max_pending_frames.max(1);
        self.idle_budget_bytes = self.idle_budget_bytes.min(self.max_pool_bytes);
        if self.server_name.trim().is_empty() {
            self.server_name = default_server_name();
        }
    }

    pub fn output_size(&self) -> Size {
        Size::new(self.output_width, self.output_height)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_bytes: self.max_pool_bytes,
            retention_ticks: self.retention_ticks,
            idle_budget_bytes: self.idle_budget_bytes,
        }
    }

    pub fn from_xml(xml: &str) -> Result<Self, SettingsError> {
        let mut settings: Self = from_str(xml)?;
        settings.clamp();
        Ok(settings)
    }

    pub fn to_xml(&self) -> Result<String, SettingsError> {
        let xml = to_string(self)?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", xml))
    }

    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = fs::read_to_string(path)?;
        Self::from_xml(&contents)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_xml()?)?;
        Ok(())
    }

    /// `<config dir>/HapRelay/settings.xml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("HapRelay");
            p.push("settings.xml");
            p
        })
    }

    /// Save to the default path, returning it
    pub fn save_default(&self) -> Result<PathBuf, SettingsError> {
        let path = Self::default_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to_file(&path)?;
        Ok(path)
    }

    /// Load from the default path, or defaults if absent or unreadable
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Ignoring settings at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = RelaySettings::default();
        assert_eq!(settings.tick_rate_hz, 60);
        assert_eq!(settings.output_size(), Size::new(640, 360));
        assert!(!settings.flipped);
        assert_eq!(settings.server_name, "Video");
        assert_eq!(settings.pool_config(), PoolConfig::default());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings = RelaySettings::from_xml("<HapRelay><flipped>true</flipped></HapRelay>").unwrap();
        assert!(settings.flipped);
        assert_eq!(settings.tick_rate_hz, 60);
        assert_eq!(settings.max_pending_frames, 8);
    }

    #[test]
    fn test_clamps_on_load() {
        let xml = "<HapRelay><tickRateHz>1000</tickRateHz><maxPendingFrames>0</maxPendingFrames></HapRelay>";
        let settings = RelaySettings::from_xml(xml).unwrap();
        assert_eq!(settings.tick_rate_hz, 240);
        assert_eq!(settings.max_pending_frames, 1);

        let mut blank = RelaySettings {
            server_name: "  ".to_string(),
            idle_budget_bytes: usize::MAX,
            ..RelaySettings::default()
        };
        blank.clamp();
        assert_eq!(blank.server_name, "Video");
        assert_eq!(blank.idle_budget_bytes, blank.max_pool_bytes);
    }

    #[test]
    fn test_xml_round_trip() {
        let settings = RelaySettings {
            tick_rate_hz: 30,
            flipped: true,
            server_name: "Stage Left".to_string(),
            ..RelaySettings::default()
        };
        let restored = RelaySettings::from_xml(&settings.to_xml().unwrap()).unwrap();
        assert_eq!(restored, settings);
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = std::env::temp_dir().join(format!("hap-relay-settings-{}", std::process::id()));
        let path = dir.join("settings.xml");
        let settings = RelaySettings {
            output_width: 1280,
            output_height: 720,
            ..RelaySettings::default()
        };

        settings.save_to_file(&path).unwrap();
        let loaded = RelaySettings::load_from_file(&path).unwrap();
        assert_eq!(loaded.output_size(), Size::new(1280, 720));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_bad_xml_is_parse_error() {
        assert!(matches!(
            RelaySettings::from_xml("<HapRelay><tickRateHz>fast</tickRateHz></HapRelay>"),
            Err(SettingsError::XmlParse(_))
        ));
    }
}
