//! Configuration for a timegrapher session and the reference-clock sync.
//!
//! Both structs deserialize from camelCase JSON with every field optional,
//! so a UI can persist only the settings the user changed.

use serde::{Deserialize, Serialize};

use crate::display::frames;
use crate::dsp::peak::PeakDetectionMethod;
use crate::error::TimegrapherError;

/// Settings for tick detection and display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimegrapherConfig {
    /// Nominal beats per hour of the movement (3600 = one tick per second).
    pub bph: f64,
    pub peak_detection_method: PeakDetectionMethod,
    /// Threshold used by [`PeakDetectionMethod::ThresholdCrossing`].
    pub db_cutoff: f64,
    pub max_frames_visible: usize,
    /// How much audio the sample buffer retains.
    pub retention_ms: f64,
    /// Cadence at which the host should call `scan`.
    pub scan_interval_ms: f64,
    /// Apply the reference-clock drift rate to displayed offsets.
    pub use_network_time: bool,
}

impl Default for TimegrapherConfig {
    fn default() -> Self {
        Self {
            bph: 3600.0,
            peak_detection_method: PeakDetectionMethod::MaxMagnitude,
            db_cutoff: 7.0,
            max_frames_visible: 100,
            retention_ms: 3000.0,
            scan_interval_ms: 500.0,
            use_network_time: false,
        }
    }
}

impl TimegrapherConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, TimegrapherError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Nominal time between beats in ms.
    pub fn frame_span_ms(&self) -> f64 {
        frames::frame_span_ms(self.bph)
    }

    pub fn validate(&self) -> Result<(), TimegrapherError> {
        if !(self.bph.is_finite() && self.bph > 0.0) {
            return Err(TimegrapherError::InvalidConfig(format!("bph must be positive, got {}", self.bph)));
        }
        if !self.db_cutoff.is_finite() {
            return Err(TimegrapherError::InvalidConfig("dbCutoff must be finite".into()));
        }
        if self.max_frames_visible == 0 {
            return Err(TimegrapherError::InvalidConfig("maxFramesVisible must be at least 1".into()));
        }
        // The extractor needs 1.5 s of history before it starts
        if self.retention_ms.is_nan() || self.retention_ms < 1500.0 {
            return Err(TimegrapherError::InvalidConfig(format!(
                "retentionMs must be at least 1500, got {}",
                self.retention_ms
            )));
        }
        if !(self.scan_interval_ms.is_finite() && self.scan_interval_ms > 0.0) {
            return Err(TimegrapherError::InvalidConfig("scanIntervalMs must be positive".into()));
        }
        Ok(())
    }
}

/// Settings for reference-clock synchronisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClockSyncConfig {
    /// Warm answers averaged into one sync round.
    pub samples_per_refresh: usize,
    pub refresh_interval_minutes: f64,
    /// URL answering `{"date": "<ISO8601>", "serverCold": bool}`.
    pub endpoint: String,
    /// Pause after every answered query, cold or warm.
    pub query_spacing_ms: u64,
    /// Pause after a failed query.
    pub failure_backoff_ms: u64,
    pub watchdog_interval_ms: u64,
    /// Wall/monotonic shift treated as a clock step.
    pub discontinuity_threshold_ms: f64,
    /// Measurement error budget of one round.
    pub per_check_error_ms: f64,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            samples_per_refresh: 10,
            refresh_interval_minutes: 10.0,
            endpoint: "https://f6lxt414xb.execute-api.us-east-1.amazonaws.com/default/getTime".to_string(),
            query_spacing_ms: 1000,
            failure_backoff_ms: 10_000,
            watchdog_interval_ms: 1000,
            discontinuity_threshold_ms: 30_000.0,
            per_check_error_ms: 100.0,
        }
    }
}

impl ClockSyncConfig {
    pub fn from_json(json: &str) -> Result<Self, TimegrapherError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn refresh_interval_ms(&self) -> f64 {
        self.refresh_interval_minutes * 60.0 * 1000.0
    }

    pub fn validate(&self) -> Result<(), TimegrapherError> {
        if self.samples_per_refresh == 0 {
            return Err(TimegrapherError::InvalidConfig("samplesPerRefresh must be at least 1".into()));
        }
        if !(self.refresh_interval_minutes.is_finite() && self.refresh_interval_minutes > 0.0) {
            return Err(TimegrapherError::InvalidConfig("refreshIntervalMinutes must be positive".into()));
        }
        if self.endpoint.is_empty() {
            return Err(TimegrapherError::InvalidConfig("endpoint must not be empty".into()));
        }
        if self.watchdog_interval_ms == 0 {
            return Err(TimegrapherError::InvalidConfig("watchdogIntervalMs must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_empty_json() {
        let config = TimegrapherConfig::from_json("{}").unwrap();
        assert_eq!(config, TimegrapherConfig::default());
        assert_eq!(config.frame_span_ms(), 1000.0);
    }

    #[test]
    fn camel_case_fields() {
        let config = TimegrapherConfig::from_json(
            r#"{"bph": 21600, "peakDetectionMethod": "thresholdCrossing", "dbCutoff": 3.5, "useNetworkTime": true}"#,
        )
        .unwrap();
        assert_eq!(config.bph, 21600.0);
        assert_eq!(config.peak_detection_method, PeakDetectionMethod::ThresholdCrossing);
        assert_eq!(config.db_cutoff, 3.5);
        assert!(config.use_network_time);
        assert!((config.frame_span_ms() - 166.666_666_666_666_66).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            TimegrapherConfig::from_json(r#"{"bph": 0}"#),
            Err(TimegrapherError::InvalidConfig(_))
        ));
        assert!(matches!(
            TimegrapherConfig::from_json(r#"{"retentionMs": 1000}"#),
            Err(TimegrapherError::InvalidConfig(_))
        ));
        assert!(matches!(
            TimegrapherConfig::from_json(r#"{"bph": "fast"}"#),
            Err(TimegrapherError::Json(_))
        ));
    }

    #[test]
    fn clock_sync_defaults() {
        let config = ClockSyncConfig::from_json(r#"{"samplesPerRefresh": 4}"#).unwrap();
        assert_eq!(config.samples_per_refresh, 4);
        assert_eq!(config.refresh_interval_ms(), 600_000.0);
        assert_eq!(config.failure_backoff_ms, 10_000);

        assert!(ClockSyncConfig::from_json(r#"{"samplesPerRefresh": 0}"#).is_err());
    }
}
