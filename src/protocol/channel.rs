//! Controllable output channels and the device capabilities that gate them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ControlError, Result};

// =============================================================================
// Constants
// =============================================================================

/// Maximum speed percentage accepted by any channel.
pub const MAX_PERCENT: u8 = 100;

// =============================================================================
// Channel
// =============================================================================

/// Speed control channel identifiers.
///
/// Fan indices are 1-based, matching the driver's `fan1`, `fan2`, ... naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel {
    /// A single fan header.
    Fan(u8),
    /// Logical aggregate of every fan channel.
    AllFans,
    /// Pump channel.
    Pump,
}

impl Channel {
    /// Whether this channel addresses one or more fans.
    pub const fn is_fan(&self) -> bool {
        matches!(self, Channel::Fan(_) | Channel::AllFans)
    }

    /// Validate a speed percentage for this channel.
    pub fn validate_percent(&self, percent: u8) -> Result<u8> {
        if percent > MAX_PERCENT {
            return Err(ControlError::InvalidPercent {
                channel: self.to_string(),
                value: percent,
            });
        }

        Ok(percent)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Fan(index) => write!(f, "fan{}", index),
            Channel::AllFans => write!(f, "fans"),
            Channel::Pump => write!(f, "pump"),
        }
    }
}

impl FromStr for Channel {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "pump" => return Ok(Channel::Pump),
            "fans" | "all" | "all-fans" => return Ok(Channel::AllFans),
            _ => {}
        }

        let digits = lower
            .strip_prefix("fan")
            .map(str::trim)
            .ok_or_else(|| unknown_channel(s))?;
        let index: u8 = digits.parse().map_err(|_| unknown_channel(s))?;
        if index == 0 {
            return Err(unknown_channel(s));
        }

        Ok(Channel::Fan(index))
    }
}

fn unknown_channel(name: &str) -> ControlError {
    ControlError::InvalidInput(format!(
        "Unknown channel '{}'. Use: fanN, fans, or pump",
        name
    ))
}

impl Serialize for Channel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Channel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Target percentage per channel.
pub type ChannelTargets = BTreeMap<Channel, u8>;

// =============================================================================
// Capabilities
// =============================================================================

/// Channels the connected device exposes, as observed from its status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Fan indices reported by the device, ascending.
    pub fans: Vec<u8>,
    /// Whether the device reports a pump speed.
    pub pump_present: bool,
    /// Whether pump speed commands are accepted.
    pub pump_supported: bool,
}

impl Capabilities {
    /// Whether the pump can be driven.
    pub fn pump_usable(&self) -> bool {
        self.pump_present && self.pump_supported
    }

    /// Whether a channel exists on this device.
    pub fn supports(&self, channel: Channel) -> bool {
        match channel {
            Channel::Fan(index) => self.fans.contains(&index),
            Channel::AllFans => !self.fans.is_empty(),
            Channel::Pump => self.pump_usable(),
        }
    }

    /// Every concrete channel this device supports.
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.fans.iter().map(|&i| Channel::Fan(i)).collect();
        if self.pump_usable() {
            channels.push(Channel::Pump);
        }
        channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::Fan(2).to_string(), "fan2");
        assert_eq!(Channel::AllFans.to_string(), "fans");
        assert_eq!(Channel::Pump.to_string(), "pump");
    }

    #[test]
    fn test_channel_parse() {
        assert_eq!("fan3".parse::<Channel>().unwrap(), Channel::Fan(3));
        assert_eq!("Fan 1".parse::<Channel>().unwrap(), Channel::Fan(1));
        assert_eq!("FANS".parse::<Channel>().unwrap(), Channel::AllFans);
        assert_eq!("pump".parse::<Channel>().unwrap(), Channel::Pump);
        assert!("fan0".parse::<Channel>().is_err());
        assert!("cpu".parse::<Channel>().is_err());
    }

    #[test]
    fn test_percent_validation() {
        assert!(Channel::Pump.validate_percent(0).is_ok());
        assert!(Channel::Fan(1).validate_percent(100).is_ok());
        assert!(Channel::Fan(1).validate_percent(101).is_err());
    }

    #[test]
    fn test_targets_json_keys() {
        let mut targets = ChannelTargets::new();
        targets.insert(Channel::Fan(1), 40);
        targets.insert(Channel::Pump, 70);

        let json = serde_json::to_string(&targets).unwrap();
        assert_eq!(json, r#"{"fan1":40,"pump":70}"#);

        let back: ChannelTargets = serde_json::from_str(&json).unwrap();
        assert_eq!(back, targets);
    }

    #[test]
    fn test_capabilities() {
        let caps = Capabilities {
            fans: vec![1, 2],
            pump_present: true,
            pump_supported: false,
        };
        assert!(caps.supports(Channel::Fan(2)));
        assert!(!caps.supports(Channel::Fan(3)));
        assert!(!caps.supports(Channel::Pump));
        assert_eq!(caps.channels(), vec![Channel::Fan(1), Channel::Fan(2)]);
    }
}
