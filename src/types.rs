use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

/// Remote-controllable attribute of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Factor {
    /// `BRI`: light level.
    Brightness,
    /// `BRIEXT`: external brightness, i.e. shading.
    ExternalBrightness,
}

impl Factor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Factor::Brightness => "BRI",
            Factor::ExternalBrightness => "BRIEXT",
        }
    }

    pub fn from_remote_str(s: &str) -> Option<Self> {
        match s {
            "BRI" => Some(Factor::Brightness),
            "BRIEXT" => Some(Factor::ExternalBrightness),
            _ => None,
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSetting {
    pub value: f64,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl FactorSetting {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            metadata: Map::new(),
        }
    }
}

/// Zone settings keyed by factor name. Factors this bridge does not drive
/// are kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ZoneSettings(BTreeMap<String, FactorSetting>);

impl ZoneSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, factor: Factor, value: f64) -> Self {
        self.set(factor, value);
        self
    }

    pub fn get(&self, factor: Factor) -> Option<&FactorSetting> {
        self.0.get(factor.as_str())
    }

    pub fn value(&self, factor: Factor) -> Option<f64> {
        self.get(factor).map(|s| s.value)
    }

    pub fn has(&self, factor: Factor) -> bool {
        self.0.contains_key(factor.as_str())
    }

    /// Replaces the factor's value, keeping its metadata.
    pub fn set(&mut self, factor: Factor, value: f64) {
        self.0
            .entry(factor.as_str().to_string())
            .and_modify(|s| s.value = value)
            .or_insert_with(|| FactorSetting::new(value));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Per-zone administrative exclusions from config.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Exclusions {
    pub light: bool,
    pub window: bool,
}

/// Which synchronizers a zone gets, computed once from its settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ZoneCapabilities {
    pub has_light: bool,
    pub has_window: bool,
}

impl ZoneCapabilities {
    pub fn from_settings(settings: &ZoneSettings, exclusions: Exclusions) -> Self {
        Self {
            has_light: settings.has(Factor::Brightness) && !exclusions.light,
            has_window: settings.has(Factor::ExternalBrightness) && !exclusions.window,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.has_light && !self.has_window
    }
}

/// Hardware-state change pushed by the backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorEvent {
    pub factor: Factor,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetFactorRequest {
    pub zone_id: String,
    pub factor: Factor,
    pub value: f64,
    pub tolerance: f64,
    /// Wait for the remote to report the new value before returning.
    pub wait: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Applied,
    /// The remote suppressed the write as redundant; local state should be
    /// re-read rather than assumed.
    Aborted,
    /// A newer write for the same attribute replaced this one before it was sent.
    Superseded,
}

/// HAP `PositionState` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PositionState {
    Decreasing = 0,
    Increasing = 1,
    #[default]
    Stopped = 2,
}

impl PositionState {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(PositionState::Decreasing),
            1 => Some(PositionState::Increasing),
            2 => Some(PositionState::Stopped),
            _ => None,
        }
    }

    /// `Stopped` when current is within `tolerance` percentage points of
    /// target, otherwise the direction of travel.
    pub fn compute(current: Option<u8>, target: Option<u8>, tolerance: f64) -> Self {
        let (Some(current), Some(target)) = (current, target) else {
            return PositionState::Stopped;
        };
        let delta = (f64::from(target) - f64::from(current)).abs();
        if current == target || delta < tolerance {
            PositionState::Stopped
        } else if current < target {
            PositionState::Increasing
        } else {
            PositionState::Decreasing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_state_bands() {
        assert_eq!(PositionState::compute(Some(40), Some(70), 5.0), PositionState::Increasing);
        assert_eq!(PositionState::compute(Some(68), Some(70), 5.0), PositionState::Stopped);
        assert_eq!(PositionState::compute(Some(70), Some(40), 5.0), PositionState::Decreasing);
    }

    #[test]
    fn position_state_exact_match_with_zero_tolerance() {
        assert_eq!(PositionState::compute(Some(50), Some(50), 0.0), PositionState::Stopped);
        assert_eq!(PositionState::compute(Some(49), Some(50), 0.0), PositionState::Increasing);
    }

    #[test]
    fn position_state_unconfirmed_is_stopped() {
        assert_eq!(PositionState::compute(None, Some(50), 5.0), PositionState::Stopped);
    }

    #[test]
    fn capabilities_follow_settings_and_exclusions() {
        let settings = ZoneSettings::new()
            .with(Factor::Brightness, 0.0)
            .with(Factor::ExternalBrightness, 1.0);
        let caps = ZoneCapabilities::from_settings(&settings, Exclusions::default());
        assert!(caps.has_light && caps.has_window);

        let caps = ZoneCapabilities::from_settings(
            &settings,
            Exclusions {
                light: true,
                window: false,
            },
        );
        assert!(!caps.has_light && caps.has_window);

        let caps = ZoneCapabilities::from_settings(&ZoneSettings::new(), Exclusions::default());
        assert!(caps.is_empty());
    }

    #[test]
    fn settings_deserialize_keeps_metadata_and_unknown_factors() {
        let settings: ZoneSettings = serde_json::from_str(
            r#"{"BRI": {"value": 0.4, "unit": "%"}, "TMP": {"value": 21.5}}"#,
        )
        .unwrap();
        assert_eq!(settings.value(Factor::Brightness), Some(0.4));
        assert_eq!(settings.get(Factor::Brightness).unwrap().metadata["unit"], "%");
        assert!(!settings.has(Factor::ExternalBrightness));
        assert!(!settings.is_empty());
    }

    #[test]
    fn set_preserves_metadata() {
        let mut settings: ZoneSettings =
            serde_json::from_str(r#"{"BRIEXT": {"value": 0.2, "min": 0}}"#).unwrap();
        settings.set(Factor::ExternalBrightness, 0.9);
        let setting = settings.get(Factor::ExternalBrightness).unwrap();
        assert_eq!(setting.value, 0.9);
        assert_eq!(setting.metadata["min"], 0);
    }

    #[test]
    fn factor_names() {
        assert_eq!(Factor::from_remote_str("BRIEXT"), Some(Factor::ExternalBrightness));
        assert_eq!(Factor::from_remote_str("TMP"), None);
        assert_eq!(Factor::Brightness.to_string(), "BRI");
    }
}
