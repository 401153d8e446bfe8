use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::logger::MessageLogMode;
use crate::types::Exclusions;
use crate::{Error, Result};

pub const PLUGIN_NAME: &str = "homebridge-flexom";
pub const PLATFORM_NAME: &str = "Flexom";

pub const DEFAULT_BASE_URL: &str = "https://hemisphere.ubiant.com";
const DEFAULT_TOLERANCE: f64 = 0.05;
const DEFAULT_POLLING_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    /// Zone discovery toggle.
    #[serde(default)]
    pub zones: bool,
    /// Convergence tolerance as a fraction of full travel.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default)]
    pub exclude_zones: bool,
    #[serde(default)]
    pub excluded_zones: Vec<ZoneExclusion>,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// NDJSON file receiving the backend traffic.
    #[serde(default)]
    pub message_log: Option<String>,
    /// `full` or `diffed` (default).
    #[serde(default)]
    pub message_log_mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneExclusion {
    pub id: String,
    #[serde(default)]
    pub light: bool,
    #[serde(default)]
    pub window: bool,
}

fn default_tolerance() -> f64 {
    DEFAULT_TOLERANCE
}

fn default_polling_interval() -> u64 {
    DEFAULT_POLLING_INTERVAL_SECS
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: None,
            email: String::new(),
            password: String::new(),
            zones: false,
            tolerance: DEFAULT_TOLERANCE,
            exclude_zones: false,
            excluded_zones: Vec::new(),
            polling_interval: DEFAULT_POLLING_INTERVAL_SECS,
            base_url: default_base_url(),
            message_log: None,
            message_log_mode: None,
        }
    }
}

impl PlatformConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.tolerance) {
            return Err(Error::Config(format!(
                "tolerance must be between 0 and 1 (got {})",
                self.tolerance
            )));
        }
        if self.polling_interval == 0 {
            return Err(Error::Config("pollingInterval must be at least 1 second".into()));
        }
        if let Some(exclusion) = self.excluded_zones.iter().find(|z| z.id.trim().is_empty()) {
            return Err(Error::Config(format!(
                "excluded zone with empty id (light: {}, window: {})",
                exclusion.light, exclusion.window
            )));
        }
        if let Some(ref mode) = self.message_log_mode
            && MessageLogMode::from_name(mode).is_none()
        {
            return Err(Error::Config(format!("unknown messageLogMode {mode:?}")));
        }
        Ok(())
    }

    /// Message log destination and mode, when enabled.
    pub fn message_log(&self) -> Option<(MessageLogMode, &str)> {
        let path = self.message_log.as_deref()?;
        let mode = self
            .message_log_mode
            .as_deref()
            .and_then(MessageLogMode::from_name)
            .unwrap_or(MessageLogMode::Diffed);
        Some((mode, path))
    }

    pub fn has_credentials(&self) -> bool {
        !self.email.trim().is_empty() && !self.password.is_empty()
    }

    /// Exclusion flags for a zone; empty unless `excludeZones` is enabled.
    pub fn exclusions_for(&self, zone_id: &str) -> Exclusions {
        if !self.exclude_zones {
            return Exclusions::default();
        }
        self.excluded_zones
            .iter()
            .find(|z| z.id == zone_id)
            .map(|z| Exclusions {
                light: z.light,
                window: z.window,
            })
            .unwrap_or_default()
    }

    /// Tolerance in percentage points of window travel.
    pub fn window_tolerance(&self) -> f64 {
        self.tolerance * 100.0
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_homebridge_style_config() {
        let config = PlatformConfig::from_json(
            r#"{
                "platform": "Flexom",
                "name": "Flexom",
                "email": "me@example.com",
                "password": "secret",
                "zones": true,
                "tolerance": 0.1,
                "excludeZones": true,
                "excludedZones": [{"id": "Z1", "light": true}]
            }"#,
        )
        .unwrap();
        assert!(config.zones);
        assert!(config.has_credentials());
        assert_eq!(config.window_tolerance(), 10.0);
        assert_eq!(config.polling_interval(), Duration::from_secs(10));
        assert_eq!(
            config.exclusions_for("Z1"),
            Exclusions {
                light: true,
                window: false
            }
        );
        assert_eq!(config.exclusions_for("Z2"), Exclusions::default());
    }

    #[test]
    fn exclusions_ignored_when_toggle_off() {
        let config = PlatformConfig::from_json(
            r#"{"excludeZones": false, "excludedZones": [{"id": "Z1", "light": true, "window": true}]}"#,
        )
        .unwrap();
        assert_eq!(config.exclusions_for("Z1"), Exclusions::default());
    }

    #[test]
    fn defaults() {
        let config = PlatformConfig::from_json("{}").unwrap();
        assert!(!config.zones);
        assert!(!config.has_credentials());
        assert_eq!(config.tolerance, 0.05);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn rejects_out_of_range_tolerance() {
        let err = PlatformConfig::from_json(r#"{"tolerance": 5}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err:?}");
    }

    #[test]
    fn rejects_zero_polling_interval() {
        let err = PlatformConfig::from_json(r#"{"pollingInterval": 0}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err:?}");
    }

    #[test]
    fn message_log_defaults_to_diffed() {
        let config = PlatformConfig::from_json(r#"{"messageLog": "/tmp/flexom.ndjson"}"#).unwrap();
        assert_eq!(config.message_log(), Some((MessageLogMode::Diffed, "/tmp/flexom.ndjson")));
        assert_eq!(PlatformConfig::default().message_log(), None);

        let err = PlatformConfig::from_json(r#"{"messageLogMode": "verbose"}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "got {err:?}");
    }

    #[test]
    fn from_path_reads_file() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), r#"{"zones": true, "email": "a@b.c", "password": "p"}"#)
            .unwrap();
        let config = PlatformConfig::from_path(tmp.path()).unwrap();
        assert!(config.zones);
    }
}
