//! Safety, curve, and daemon configuration.
//!
//! Every section has built-in defaults and a `validate` step; invalid
//! sections loaded from disk are replaced by their defaults (see
//! [`crate::storage`]).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, Result};
use crate::protocol::MAX_PERCENT;

/// Lowest temperature accepted anywhere in the configuration.
pub const MIN_CONFIG_TEMP: f32 = 0.0;

/// Highest temperature accepted anywhere in the configuration.
pub const MAX_CONFIG_TEMP: f32 = 120.0;

// =============================================================================
// Safety
// =============================================================================

/// Emergency boost thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub enabled: bool,
    /// CPU temperature that forces full speed.
    pub cpu_threshold: f32,
    /// Coolant temperature that forces full speed.
    pub water_threshold: f32,
    /// Degrees below each threshold required before releasing the boost.
    pub hysteresis_margin: f32,
    /// Raise an alarm while the CPU is at or above its threshold.
    pub alarm_enabled: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cpu_threshold: 85.0,
            water_threshold: 45.0,
            hysteresis_margin: 5.0,
            alarm_enabled: false,
        }
    }
}

impl SafetyConfig {
    /// Check thresholds and margin.
    ///
    /// The margin must be strictly positive so a reading parked exactly on
    /// the threshold cannot toggle the boost.
    pub fn validate(&self) -> Result<()> {
        validate_temp("cpu_threshold", self.cpu_threshold)?;
        validate_temp("water_threshold", self.water_threshold)?;

        if !(self.hysteresis_margin.is_finite() && self.hysteresis_margin > 0.0) {
            return Err(ControlError::InvalidConfig(format!(
                "hysteresis_margin must be greater than 0, got {}",
                self.hysteresis_margin
            )));
        }

        Ok(())
    }
}

// =============================================================================
// Curves
// =============================================================================

/// One (temperature, percentage) control point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub temp: f32,
    pub percent: u8,
}

impl CurvePoint {
    pub const fn new(temp: f32, percent: u8) -> Self {
        Self { temp, percent }
    }
}

/// Three-point curve for one temperature source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCurve {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub points: [CurvePoint; 3],
}

impl SourceCurve {
    pub const fn new(points: [CurvePoint; 3]) -> Self {
        Self {
            enabled: true,
            points,
        }
    }

    /// Check point ordering and ranges.
    ///
    /// Non-monotonic percentages are allowed; callers may warn about them.
    pub fn validate(&self, source: &str) -> Result<()> {
        for point in &self.points {
            validate_temp(source, point.temp)?;
            if point.percent > MAX_PERCENT {
                return Err(ControlError::InvalidConfig(format!(
                    "{} curve percentage {} exceeds 100",
                    source, point.percent
                )));
            }
        }

        if self.points.windows(2).any(|w| w[1].temp < w[0].temp) {
            return Err(ControlError::InvalidConfig(format!(
                "{} curve points must be sorted by temperature",
                source
            )));
        }

        Ok(())
    }

    /// Whether percentages never decrease as temperature rises.
    pub fn is_monotonic(&self) -> bool {
        self.points.windows(2).all(|w| w[1].percent >= w[0].percent)
    }
}

/// Temperature-driven speed curves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveConfig {
    pub enabled: bool,
    /// Drive the pump from the curve target as well as the fans.
    pub apply_to_pump: bool,
    pub cpu: SourceCurve,
    pub water: SourceCurve,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            apply_to_pump: true,
            cpu: default_cpu_curve(),
            water: default_water_curve(),
        }
    }
}

impl CurveConfig {
    pub fn validate(&self) -> Result<()> {
        self.cpu.validate("cpu")?;
        self.water.validate("water")
    }
}

/// Built-in CPU curve: (30,20) (60,60) (80,100).
pub fn default_cpu_curve() -> SourceCurve {
    SourceCurve::new([
        CurvePoint::new(30.0, 20),
        CurvePoint::new(60.0, 60),
        CurvePoint::new(80.0, 100),
    ])
}

/// Built-in coolant curve: (30,20) (40,60) (50,100).
pub fn default_water_curve() -> SourceCurve {
    SourceCurve::new([
        CurvePoint::new(30.0, 20),
        CurvePoint::new(40.0, 60),
        CurvePoint::new(50.0, 100),
    ])
}

// =============================================================================
// Daemon
// =============================================================================

/// Control loop and driver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Device description passed to `liquidctl -m`.
    pub device: Option<String>,
    /// Path or name of the liquidctl executable.
    pub liquidctl_path: String,
    /// Control loop period.
    pub tick_interval_ms: u64,
    /// Upper bound on any single external command.
    pub command_timeout_ms: u64,
    /// Consecutive failed status reads before the device is offline.
    pub offline_after: u32,
    /// Minimum change (percentage points) that triggers a new command.
    pub debounce_epsilon: u8,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            device: None,
            liquidctl_path: "liquidctl".to_string(),
            tick_interval_ms: 2000,
            command_timeout_ms: 3000,
            offline_after: 5,
            debounce_epsilon: 0,
        }
    }
}

impl DaemonSettings {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms < 100 {
            return Err(ControlError::InvalidConfig(
                "tick_interval_ms must be at least 100".into(),
            ));
        }
        if self.command_timeout_ms == 0 {
            return Err(ControlError::InvalidConfig(
                "command_timeout_ms must be positive".into(),
            ));
        }
        if self.offline_after == 0 {
            return Err(ControlError::InvalidConfig(
                "offline_after must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn default_true() -> bool {
    true
}

fn validate_temp(field: &str, temp: f32) -> Result<()> {
    if !temp.is_finite() || !(MIN_CONFIG_TEMP..=MAX_CONFIG_TEMP).contains(&temp) {
        return Err(ControlError::InvalidConfig(format!(
            "{} temperature {} outside {}-{}°C",
            field, temp, MIN_CONFIG_TEMP, MAX_CONFIG_TEMP
        )));
    }
    Ok(())
}
