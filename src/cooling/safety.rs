//! Emergency boost with hysteresis.
//!
//! The monitor forces every channel to full speed once a present reading
//! reaches its threshold, and only releases after every present reading has
//! dropped strictly below `threshold - margin`. Missing readings can never
//! start a boost but never hold one either.

use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::SafetyConfig;

/// Minimum spacing between repeated over-temperature alarms.
pub const ALARM_INTERVAL: Duration = Duration::from_secs(10);

/// Safety monitor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SafetyMode {
    #[default]
    Normal,
    /// All channels forced to 100%.
    Boosted,
}

/// Hysteresis state machine driving the emergency boost.
#[derive(Debug, Default)]
pub struct SafetyMonitor {
    mode: SafetyMode,
    last_alarm: Option<Instant>,
}

impl SafetyMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_boosted(&self) -> bool {
        self.mode == SafetyMode::Boosted
    }

    /// Feed one tick of readings and return the resulting mode.
    pub fn update(
        &mut self,
        config: &SafetyConfig,
        cpu_temp: Option<f32>,
        water_temp: Option<f32>,
    ) -> SafetyMode {
        if !config.enabled {
            if self.is_boosted() {
                info!("Safety disabled, releasing emergency boost");
            }
            self.mode = SafetyMode::Normal;
            return self.mode;
        }

        match self.mode {
            SafetyMode::Normal => {
                let cpu_hot = cpu_temp.is_some_and(|t| t >= config.cpu_threshold);
                let water_hot = water_temp.is_some_and(|t| t >= config.water_threshold);
                if cpu_hot || water_hot {
                    warn!(
                        cpu = ?cpu_temp,
                        water = ?water_temp,
                        "Emergency boost ON: temperature over threshold, all channels 100%"
                    );
                    self.mode = SafetyMode::Boosted;
                }
            }
            SafetyMode::Boosted => {
                let margin = config.hysteresis_margin;
                let cpu_clear = cpu_temp.is_none_or(|t| t < config.cpu_threshold - margin);
                let water_clear = water_temp.is_none_or(|t| t < config.water_threshold - margin);
                if cpu_clear && water_clear {
                    info!(
                        cpu = ?cpu_temp,
                        water = ?water_temp,
                        "Emergency boost OFF: temperatures below release point"
                    );
                    self.mode = SafetyMode::Normal;
                }
            }
        }

        self.mode
    }

    /// Check the CPU alarm condition; returns true when an alarm fires.
    ///
    /// Alarms repeat at most once per [`ALARM_INTERVAL`].
    pub fn check_alarm(&mut self, config: &SafetyConfig, cpu_temp: Option<f32>) -> bool {
        self.check_alarm_at(config, cpu_temp, Instant::now())
    }

    fn check_alarm_at(&mut self, config: &SafetyConfig, cpu_temp: Option<f32>, now: Instant) -> bool {
        if !alarm_active(config, cpu_temp) {
            return false;
        }
        if self
            .last_alarm
            .is_some_and(|last| now.duration_since(last) < ALARM_INTERVAL)
        {
            return false;
        }

        self.last_alarm = Some(now);
        error!(cpu = ?cpu_temp, threshold = config.cpu_threshold, "CPU temperature alarm");
        true
    }
}

/// Whether the CPU alarm condition currently holds.
pub fn alarm_active(config: &SafetyConfig, cpu_temp: Option<f32>) -> bool {
    config.enabled && config.alarm_enabled && cpu_temp.is_some_and(|t| t >= config.cpu_threshold)
}
