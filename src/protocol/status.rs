//! Device status parsing and immutable status snapshots.
//!
//! liquidctl reports status either as JSON (`status --json`) or as an
//! aligned text table (`status`). Drivers spell their keys differently
//! (`Fan speed 1`, `fan1 speed`, `Fan 1 Speed`), so both parsers funnel
//! key/value pairs through one tolerant classifier.

use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::SystemTime;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::{ControlError, Result};
use crate::protocol::Capabilities;

// =============================================================================
// Key Patterns
// =============================================================================

/// Fan index in keys like `fan speed 1`, `fan1 speed`, `fan 1 speed`.
static FAN_INDEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"fan\s*(?:speed)?\s*(\d+)").expect("valid regex"));

/// `key: value` or `key    value` with an aligned column gap.
static TEXT_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S.*?)(?:\s*:\s*|\s{2,})([+-]?\d+(?:\.\d+)?)").expect("valid regex")
});

/// Single-space fallbacks for compact text layouts.
static TEXT_FAN_RPM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"fan\s*(?:speed)?\s*(\d+)\s+(\d+)\s*rpm").expect("valid regex")
});
static TEXT_PUMP_RPM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"pump\s*(?:speed)?\s+(\d+)\s*rpm").expect("valid regex"));
static TEXT_WATER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:water|liquid|coolant)\s*temperature\s+([\d.]+)").expect("valid regex")
});

// =============================================================================
// Device Status
// =============================================================================

/// Raw values extracted from one status read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceStatus {
    /// Fan RPM keyed by 1-based fan index.
    pub fans: BTreeMap<u8, u32>,
    /// Pump speed in RPM, if the device reports one.
    pub pump_rpm: Option<u32>,
    /// Coolant temperature in Celsius.
    pub water_temp: Option<f32>,
}

impl DeviceStatus {
    /// Parse `liquidctl status --json` output.
    ///
    /// Accepts the standard list of device blocks (`[{"status": [...]}]`),
    /// a single block, or a bare list of `{key, value}` entries.
    ///
    /// # Errors
    /// Returns `Json` for malformed JSON and `InvalidResponse` when no
    /// recognizable entry is present.
    pub fn parse_json(raw: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(raw)?;
        let mut status = DeviceStatus::default();

        for entry in status_entries(&root) {
            let Some(key) = entry.get("key").and_then(Value::as_str) else {
                continue;
            };
            let value = match entry.get("value") {
                Some(Value::Number(n)) => n.as_f64(),
                Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            if let Some(value) = value {
                status.classify(key, value);
            }
        }

        status.ensure_recognized("JSON")
    }

    /// Parse plain `liquidctl status` output.
    ///
    /// # Errors
    /// Returns `InvalidResponse` when no recognizable line is present.
    pub fn parse_text(raw: &str) -> Result<Self> {
        let mut status = DeviceStatus::default();

        for line in raw.lines() {
            let line = line
                .trim_start_matches(|c: char| c.is_whitespace() || "├└│─|`-".contains(c))
                .trim()
                .to_lowercase();
            if line.is_empty() {
                continue;
            }

            if let Some(caps) = TEXT_PAIR.captures(&line)
                && let Ok(value) = caps[2].parse::<f64>()
                && status.classify(&caps[1], value)
            {
                continue;
            }

            if let Some(caps) = TEXT_FAN_RPM.captures(&line)
                && let (Ok(index), Ok(rpm)) = (caps[1].parse::<u8>(), caps[2].parse::<u32>())
                && index > 0
            {
                status.fans.insert(index, rpm);
            } else if let Some(caps) = TEXT_PUMP_RPM.captures(&line)
                && let Ok(rpm) = caps[1].parse::<u32>()
            {
                status.pump_rpm = Some(rpm);
            } else if let Some(caps) = TEXT_WATER.captures(&line)
                && let Ok(temp) = caps[1].parse::<f32>()
            {
                status.water_temp = Some(temp);
            }
        }

        status.ensure_recognized("text")
    }

    /// Channels implied by this status.
    ///
    /// Pump support is assumed until a pump command is rejected.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            fans: self.fans.keys().copied().collect(),
            pump_present: self.pump_rpm.is_some(),
            pump_supported: self.pump_rpm.is_some(),
        }
    }

    /// Record one key/value pair. Returns whether the key was recognized.
    fn classify(&mut self, key: &str, value: f64) -> bool {
        let key = key.trim().to_lowercase();

        if key.contains("fan") && key.contains("speed") {
            // Single-fan devices report a bare "fan speed"
            let index = match FAN_INDEX.captures(&key) {
                Some(caps) => caps[1].parse::<u8>().ok().filter(|&i| i > 0),
                None => Some(1),
            };
            match index {
                Some(index) => {
                    self.fans.insert(index, value.max(0.0).round() as u32);
                }
                None => debug!(key = %key, "Ignoring fan entry with an out-of-range index"),
            }
            return true;
        }

        if key.contains("pump") && key.contains("speed") {
            self.pump_rpm = Some(value.max(0.0).round() as u32);
            return true;
        }

        if ["water", "liquid", "coolant"].iter().any(|w| key.contains(w))
            && key.contains("temperature")
        {
            self.water_temp = Some(value as f32);
            return true;
        }

        false
    }

    fn ensure_recognized(self, layout: &str) -> Result<Self> {
        if self.fans.is_empty() && self.pump_rpm.is_none() && self.water_temp.is_none() {
            return Err(ControlError::InvalidResponse {
                message: format!("No fan, pump, or temperature entries in {} status", layout),
            });
        }
        Ok(self)
    }
}

/// Flatten the accepted JSON layouts into a list of status entries.
fn status_entries(root: &Value) -> Vec<&Value> {
    let blocks: Vec<&Value> = match root {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut entries = Vec::new();
    for block in blocks {
        match block.get("status") {
            Some(Value::Array(items)) => entries.extend(items.iter()),
            _ if block.get("key").is_some() => entries.push(block),
            _ => {}
        }
    }
    entries
}

// =============================================================================
// Snapshots
// =============================================================================

/// Whether a snapshot reflects the latest read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Produced by the most recent poll.
    Fresh,
    /// Last known values retained after a failed poll.
    Stale,
}

/// Device reachability as seen by the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Online,
    /// Too many consecutive status failures.
    Offline,
}

/// One fan's measured speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanReading {
    /// 1-based fan index, stable across ticks.
    pub index: u8,
    pub rpm: u32,
}

/// Immutable capture of device status, published once per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub taken_at: SystemTime,
    /// Fan readings ordered by index.
    pub fans: Vec<FanReading>,
    pub pump_rpm: Option<u32>,
    pub water_temp: Option<f32>,
    pub freshness: Freshness,
    pub link: LinkState,
    /// Status reads failed in a row.
    pub consecutive_failures: u32,
}

impl StatusSnapshot {
    /// Placeholder before the first successful poll.
    pub fn empty() -> Self {
        Self {
            taken_at: SystemTime::now(),
            fans: Vec::new(),
            pump_rpm: None,
            water_temp: None,
            freshness: Freshness::Stale,
            link: LinkState::Online,
            consecutive_failures: 0,
        }
    }

    /// Fresh snapshot from a successful read.
    pub fn from_status(status: &DeviceStatus) -> Self {
        Self {
            taken_at: SystemTime::now(),
            fans: status
                .fans
                .iter()
                .map(|(&index, &rpm)| FanReading { index, rpm })
                .collect(),
            pump_rpm: status.pump_rpm,
            water_temp: status.water_temp,
            freshness: Freshness::Fresh,
            link: LinkState::Online,
            consecutive_failures: 0,
        }
    }

    /// Copy of these values marked stale after a failed read.
    pub fn retained(&self, consecutive_failures: u32, link: LinkState) -> Self {
        Self {
            freshness: Freshness::Stale,
            link,
            consecutive_failures,
            ..self.clone()
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.freshness == Freshness::Fresh
    }
}

impl std::fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "+-----------------------------------+")?;
        writeln!(f, "|           Device Status           |")?;
        writeln!(f, "+-----------------------------------+")?;
        match self.water_temp {
            Some(t) => writeln!(f, "|  Water Temp:     {:>5.1} C          |", t)?,
            None => writeln!(f, "|  Water Temp:       N/A            |")?,
        }
        writeln!(f, "+-----------------------------------+")?;
        match self.pump_rpm {
            Some(rpm) => writeln!(f, "|  Pump Speed:    {:>5} RPM         |", rpm)?,
            None => writeln!(f, "|  Pump Speed:       N/A            |")?,
        }
        for fan in &self.fans {
            writeln!(f, "|  Fan {:<2} Speed:  {:>5} RPM         |", fan.index, fan.rpm)?;
        }
        writeln!(f, "+-----------------------------------+")?;
        if self.link == LinkState::Offline {
            writeln!(f, "|  DEVICE OFFLINE (last known data) |")?;
        } else if !self.is_fresh() {
            writeln!(f, "|  stale: {:>2} failed reads          |", self.consecutive_failures)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_JSON: &str = r#"[
        {
            "bus": "hid",
            "address": "/dev/hidraw3",
            "description": "Corsair Commander Core",
            "status": [
                {"key": "Liquid temperature", "value": 31.4, "unit": "°C"},
                {"key": "Pump speed", "value": 2510, "unit": "rpm"},
                {"key": "Fan speed 1", "value": 812, "unit": "rpm"},
                {"key": "Fan speed 2", "value": "1004", "unit": "rpm"},
                {"key": "Fan duty 2", "value": 50, "unit": "%"}
            ]
        }
    ]"#;

    #[test]
    fn test_parse_json() {
        let status = DeviceStatus::parse_json(SAMPLE_JSON).unwrap();
        assert_eq!(status.water_temp, Some(31.4));
        assert_eq!(status.pump_rpm, Some(2510));
        assert_eq!(status.fans.get(&1), Some(&812));
        assert_eq!(status.fans.get(&2), Some(&1004));
        assert_eq!(status.fans.len(), 2);
    }

    #[test]
    fn test_parse_json_rejects_garbage() {
        assert!(DeviceStatus::parse_json("{").is_err());
        assert!(DeviceStatus::parse_json(r#"[{"status": []}]"#).is_err());
    }

    #[test]
    fn test_parse_text_tree_layout() {
        let text = "Corsair Commander Core\n\
                    ├── Liquid temperature    31.1  °C\n\
                    ├── Pump speed            1907  rpm\n\
                    ├── Fan speed 1            800  rpm\n\
                    └── Fan speed 3           1200  rpm\n";
        let status = DeviceStatus::parse_text(text).unwrap();
        assert_eq!(status.water_temp, Some(31.1));
        assert_eq!(status.pump_rpm, Some(1907));
        assert_eq!(status.fans.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_parse_text_colon_layout() {
        let text = "Fan 1 Speed: 800\nFan 2 Speed: 1000\nPump Speed: 2500\nWater Temperature: 31.5";
        let status = DeviceStatus::parse_text(text).unwrap();
        assert_eq!(status.fans.get(&1), Some(&800));
        assert_eq!(status.fans.get(&2), Some(&1000));
        assert_eq!(status.pump_rpm, Some(2500));
        assert_eq!(status.water_temp, Some(31.5));
    }

    #[test]
    fn test_parse_text_single_space_fallback() {
        let status = DeviceStatus::parse_text("fan1 950 rpm\npump 2100 rpm").unwrap();
        assert_eq!(status.fans.get(&1), Some(&950));
        assert_eq!(status.pump_rpm, Some(2100));
    }

    #[test]
    fn test_parse_text_unrecognized() {
        assert!(DeviceStatus::parse_text("Firmware version  1.2.3\n").is_err());
    }

    #[test]
    fn test_bare_fan_speed_is_fan_one() {
        let status = DeviceStatus::parse_text("Fan speed    640  rpm").unwrap();
        assert_eq!(status.fans.get(&1), Some(&640));
    }

    #[test]
    fn test_out_of_range_fan_index_skipped() {
        let raw = r#"[{"status": [
            {"key": "Fan speed 300", "value": 700, "unit": "rpm"},
            {"key": "Fan speed 0", "value": 710, "unit": "rpm"},
            {"key": "Fan speed 2", "value": 720, "unit": "rpm"}
        ]}]"#;
        let status = DeviceStatus::parse_json(raw).unwrap();
        assert_eq!(status.fans.keys().copied().collect::<Vec<_>>(), vec![2]);

        let status = DeviceStatus::parse_text("Fan speed 300    700  rpm\nFan speed 1    640  rpm").unwrap();
        assert_eq!(status.fans.keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_snapshot_retained() {
        let status = DeviceStatus::parse_json(SAMPLE_JSON).unwrap();
        let fresh = StatusSnapshot::from_status(&status);
        assert!(fresh.is_fresh());
        assert_eq!(fresh.fans[0], FanReading { index: 1, rpm: 812 });

        let stale = fresh.retained(2, LinkState::Online);
        assert_eq!(stale.freshness, Freshness::Stale);
        assert_eq!(stale.fans, fresh.fans);
        assert_eq!(stale.water_temp, fresh.water_temp);
        assert_eq!(stale.consecutive_failures, 2);
    }

    #[test]
    fn test_capabilities_from_status() {
        let status = DeviceStatus::parse_json(SAMPLE_JSON).unwrap();
        let caps = status.capabilities();
        assert_eq!(caps.fans, vec![1, 2]);
        assert!(caps.pump_usable());
    }
}
