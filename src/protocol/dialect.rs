//! Command dialects accepted by liquidctl drivers.
//!
//! Drivers disagree on how a speed command is spelled: some take `speed`,
//! others `duty`; some address fans individually (`fan1` or `fan 1`), others
//! only as a group (`fans` or the legacy `fan`). A [`Dialect`] pins one
//! verb and one addressing mode for a device.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::Channel;

// =============================================================================
// Dialect Parts
// =============================================================================

/// Command verb for a fixed-speed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    Speed,
    Duty,
}

impl Verb {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Verb::Speed => "speed",
            Verb::Duty => "duty",
        }
    }
}

/// How fan channels are named on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Addressing {
    /// `fan1`, `fan2`, ...
    IndexedCompact,
    /// `fan 1`, `fan 2`, ...
    IndexedSpaced,
    /// `fans` addresses every fan at once.
    Global,
    /// `fan` addresses every fan at once (older drivers).
    GlobalLegacy,
}

impl Addressing {
    /// Whether fans can only be driven together.
    pub const fn is_global(&self) -> bool {
        matches!(self, Addressing::Global | Addressing::GlobalLegacy)
    }
}

// =============================================================================
// Dialect
// =============================================================================

/// Negotiated verb and addressing pair for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dialect {
    pub verb: Verb,
    pub addressing: Addressing,
}

/// Probe order: per-channel addressing first, speed before duty.
pub const DIALECT_CANDIDATES: [Dialect; 8] = [
    Dialect::new(Verb::Speed, Addressing::IndexedCompact),
    Dialect::new(Verb::Duty, Addressing::IndexedCompact),
    Dialect::new(Verb::Speed, Addressing::IndexedSpaced),
    Dialect::new(Verb::Duty, Addressing::IndexedSpaced),
    Dialect::new(Verb::Speed, Addressing::Global),
    Dialect::new(Verb::Duty, Addressing::Global),
    Dialect::new(Verb::Speed, Addressing::GlobalLegacy),
    Dialect::new(Verb::Duty, Addressing::GlobalLegacy),
];

impl Dialect {
    pub const fn new(verb: Verb, addressing: Addressing) -> Self {
        Self { verb, addressing }
    }

    /// Candidate dialects worth probing with a command for `channel`.
    ///
    /// The pump has a single fixed name, so only the verb varies; those
    /// candidates record per-channel addressing.
    pub fn candidates_for(channel: Channel) -> Vec<Dialect> {
        match channel {
            Channel::Pump => vec![
                Dialect::new(Verb::Speed, Addressing::IndexedCompact),
                Dialect::new(Verb::Duty, Addressing::IndexedCompact),
            ],
            Channel::AllFans => DIALECT_CANDIDATES
                .iter()
                .copied()
                .filter(|d| d.addressing.is_global())
                .collect(),
            Channel::Fan(_) => DIALECT_CANDIDATES.to_vec(),
        }
    }

    /// Driver channel argument for `channel` under this dialect.
    pub fn channel_arg(&self, channel: Channel) -> String {
        match (channel, self.addressing) {
            (Channel::Pump, _) => "pump".to_string(),
            (Channel::Fan(index), Addressing::IndexedCompact) => format!("fan{}", index),
            (Channel::Fan(index), Addressing::IndexedSpaced) => format!("fan {}", index),
            (_, Addressing::GlobalLegacy) => "fan".to_string(),
            (_, _) => "fans".to_string(),
        }
    }

    /// Full `set` argument list, e.g. `["set", "fan1", "speed", "40"]`.
    pub fn set_args(&self, channel: Channel, percent: u8) -> Vec<String> {
        vec![
            "set".to_string(),
            self.channel_arg(channel),
            self.verb.as_str().to_string(),
            percent.to_string(),
        ]
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.addressing, self.verb.as_str())
    }
}
