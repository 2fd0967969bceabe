use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    // ── Noise filter ──
    pub noise_speed_threshold: f64,
    pub significant_distance_m: f64,
    pub max_ignored_fixes: u32,

    // ── Confidence buffer ──
    pub confidence_max: u8,

    // ── Duty cycle ──
    pub motion_threshold: f64,
    pub soft_sleep_timeout_ms: u64,
    pub hard_sleep_timeout_ms: u64,
    pub update_interval_ms: u64,

    // ── Bearing fusion ──
    pub heading_smoothing: f64,
    pub compass_to_gps_speed: f64,
    pub gps_to_compass_speed: f64,
    pub bearing_min_distance_m: f64,

    // ── Dead reckoning ──
    pub max_prediction_ms: f64,
    pub min_prediction_speed: f64,

    // ── Feature flags ──
    pub motion_sensor_enabled: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            noise_speed_threshold: 0.5,
            significant_distance_m: 3.0,
            max_ignored_fixes: 20,
            confidence_max: 3,
            motion_threshold: 0.5,
            soft_sleep_timeout_ms: 30_000,
            hard_sleep_timeout_ms: 90_000,
            update_interval_ms: 1_000,
            heading_smoothing: 0.1,
            compass_to_gps_speed: 2.0,
            gps_to_compass_speed: 1.0,
            bearing_min_distance_m: 0.5,
            max_prediction_ms: 2_000.0,
            min_prediction_speed: 0.1,
            motion_sensor_enabled: false,
        }
    }
}

impl TrackerConfig {
    pub fn from_json_file(path: &Path) -> TrackerResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| TrackerError::InvalidConfig(format!("{}: {e}", path.display())))?;
        let config: TrackerConfig = serde_json::from_str(&text)
            .map_err(|e| TrackerError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TrackerResult<()> {
        if self.confidence_max == 0 {
            return Err(TrackerError::InvalidConfig("confidence_max must be at least 1".to_string()));
        }
        if self.soft_sleep_timeout_ms >= self.hard_sleep_timeout_ms {
            return Err(TrackerError::InvalidConfig(format!(
                "soft sleep timeout ({} ms) must be shorter than hard sleep timeout ({} ms)",
                self.soft_sleep_timeout_ms, self.hard_sleep_timeout_ms
            )));
        }
        if self.gps_to_compass_speed > self.compass_to_gps_speed {
            return Err(TrackerError::InvalidConfig(
                "bearing hysteresis band is inverted".to_string(),
            ));
        }
        if !(self.heading_smoothing > 0.0 && self.heading_smoothing <= 1.0) {
            return Err(TrackerError::InvalidConfig(format!(
                "heading_smoothing {} outside (0, 1]",
                self.heading_smoothing
            )));
        }
        let non_negative = [
            ("noise_speed_threshold", self.noise_speed_threshold),
            ("significant_distance_m", self.significant_distance_m),
            ("motion_threshold", self.motion_threshold),
            ("bearing_min_distance_m", self.bearing_min_distance_m),
            ("max_prediction_ms", self.max_prediction_ms),
            ("min_prediction_speed", self.min_prediction_speed),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(TrackerError::InvalidConfig(format!("{name} must be >= 0, got {value}")));
            }
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub(crate) fn soft_sleep_timeout_nanos(&self) -> i64 {
        ms_to_nanos(self.soft_sleep_timeout_ms)
    }

    pub(crate) fn hard_sleep_timeout_nanos(&self) -> i64 {
        ms_to_nanos(self.hard_sleep_timeout_ms)
    }
}

fn ms_to_nanos(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX / 1_000_000).saturating_mul(1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_ignored_fixes, 20);
        assert_eq!(config.confidence_max, 3);
        assert_eq!(config.soft_sleep_timeout_nanos(), 30_000_000_000);
        assert_eq!(config.hard_sleep_timeout_nanos(), 90_000_000_000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TrackerConfig =
            serde_json::from_str(r#"{"max_ignored_fixes": 5, "motion_sensor_enabled": true}"#).unwrap();
        assert_eq!(config.max_ignored_fixes, 5);
        assert!(config.motion_sensor_enabled);
        assert_eq!(config.significant_distance_m, 3.0);
    }

    #[test]
    fn test_rejects_inverted_timeouts() {
        let config = TrackerConfig {
            soft_sleep_timeout_ms: 90_000,
            hard_sleep_timeout_ms: 30_000,
            ..TrackerConfig::default()
        };
        assert!(matches!(config.validate(), Err(TrackerError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_inverted_hysteresis() {
        let config = TrackerConfig {
            gps_to_compass_speed: 3.0,
            ..TrackerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
