//! Parsing utilities for CLI arguments.
//!
//! This module provides reusable parsing functions for the compact text
//! forms accepted on the command line.

use crate::config::CurvePoint;
use crate::error::{ControlError, Result};
use crate::protocol::{Channel, ChannelTargets};

// =============================================================================
// Channel Parsing
// =============================================================================

/// Parse a channel name into a Channel.
///
/// # Arguments
/// * `name` - `fanN`, `fan N`, `fans`, or `pump`
pub fn parse_channel(name: &str) -> Result<Channel> {
    name.parse()
}

/// Parse a percentage, accepting an optional trailing `%`.
pub fn parse_percent(raw: &str) -> Result<u8> {
    let trimmed = raw.trim().trim_end_matches('%');
    trimmed
        .parse::<u8>()
        .ok()
        .filter(|&p| p <= 100)
        .ok_or_else(|| ControlError::InvalidInput(format!("Invalid percentage '{}'. Use 0-100", raw)))
}

// =============================================================================
// Target Parsing
// =============================================================================

/// Parse `channel=percent` pairs separated by commas.
///
/// # Example
/// ```
/// use liquid_cooling_control::utils::parsing::parse_targets;
/// use liquid_cooling_control::protocol::Channel;
///
/// let targets = parse_targets("fan1=40, fan2=45, pump=70").unwrap();
/// assert_eq!(targets[&Channel::Fan(2)], 45);
/// assert_eq!(targets[&Channel::Pump], 70);
/// ```
pub fn parse_targets(raw: &str) -> Result<ChannelTargets> {
    let mut targets = ChannelTargets::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (channel, percent) = pair.split_once('=').ok_or_else(|| {
            ControlError::InvalidInput(format!("Expected channel=percent, got '{}'", pair))
        })?;
        targets.insert(parse_channel(channel)?, parse_percent(percent)?);
    }

    if targets.is_empty() {
        return Err(ControlError::InvalidInput("No channel targets given".into()));
    }
    Ok(targets)
}

// =============================================================================
// Curve Parsing
// =============================================================================

/// Parse exactly three `temp:percent` points, e.g. `30:20,60:60,80:100`.
pub fn parse_curve_points(raw: &str) -> Result<[CurvePoint; 3]> {
    let points = raw
        .split(',')
        .map(str::trim)
        .map(|pair| {
            let (temp, percent) = pair.split_once(':').ok_or_else(|| {
                ControlError::InvalidInput(format!("Expected temp:percent, got '{}'", pair))
            })?;
            let temp: f32 = temp.trim().parse().map_err(|_| {
                ControlError::InvalidInput(format!("Invalid temperature '{}'", temp))
            })?;
            Ok(CurvePoint::new(temp, parse_percent(percent)?))
        })
        .collect::<Result<Vec<_>>>()?;

    <[CurvePoint; 3]>::try_from(points).map_err(|points| {
        ControlError::InvalidInput(format!("A curve needs exactly 3 points, got {}", points.len()))
    })
}

// =============================================================================
// Tests
// =============================================================================
