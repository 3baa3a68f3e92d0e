//! Piecewise-linear speed curves.
//!
//! Each temperature source has a three-point curve. Below the first point
//! and above the last the curve is flat; in between it interpolates
//! linearly. When several sources are enabled the hottest answer wins.

use crate::config::{CurveConfig, CurvePoint, SourceCurve};
use crate::protocol::MAX_PERCENT;

/// Temperature source feeding a curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempSource {
    /// CPU package temperature from system sensors.
    Cpu,
    /// Coolant temperature reported by the device.
    Water,
}

/// Evaluate a curve at `temp`.
///
/// Returns the first point's percentage at or below its temperature, the
/// last point's at or above its temperature, and a linear blend between.
/// Control points are hit exactly. Points must be sorted by temperature.
///
/// # Arguments
/// * `points` - Control points sorted ascending by temperature
/// * `temp` - Current temperature in Celsius
pub fn evaluate(points: &[CurvePoint], temp: f32) -> f32 {
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return 0.0;
    };

    if temp <= first.temp {
        return first.percent as f32;
    }
    if temp >= last.temp {
        return last.percent as f32;
    }

    for window in points.windows(2) {
        let (lo, hi) = (window[0], window[1]);
        if temp > hi.temp {
            continue;
        }
        if temp == hi.temp {
            return hi.percent as f32;
        }
        // Duplicate temperatures would divide by zero
        if hi.temp == lo.temp {
            return lo.percent as f32;
        }

        let p0 = lo.percent as f32;
        let p1 = hi.percent as f32;
        return p0 + (p1 - p0) * (temp - lo.temp) / (hi.temp - lo.temp);
    }

    last.percent as f32
}

/// Round an evaluated curve value into a command percentage.
pub fn to_percent(value: f32) -> u8 {
    value.round().clamp(0.0, MAX_PERCENT as f32) as u8
}

impl CurveConfig {
    /// Curve for one source.
    pub fn source(&self, source: TempSource) -> &SourceCurve {
        match source {
            TempSource::Cpu => &self.cpu,
            TempSource::Water => &self.water,
        }
    }

    /// Combined curve target for the given readings.
    ///
    /// Disabled curves and absent readings contribute nothing; `None` means
    /// no curve applies this tick.
    pub fn target(&self, cpu_temp: Option<f32>, water_temp: Option<f32>) -> Option<u8> {
        if !self.enabled {
            return None;
        }

        [(TempSource::Cpu, cpu_temp), (TempSource::Water, water_temp)]
            .into_iter()
            .filter_map(|(source, temp)| {
                let curve = self.source(source);
                let temp = temp?;
                curve.enabled.then(|| evaluate(&curve.points, temp))
            })
            .reduce(f32::max)
            .map(to_percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_points() -> [CurvePoint; 3] {
        [
            CurvePoint::new(30.0, 20),
            CurvePoint::new(50.0, 50),
            CurvePoint::new(80.0, 100),
        ]
    }

    #[test]
    fn test_evaluate_exact_points() {
        let points = cpu_points();
        assert_eq!(evaluate(&points, 30.0), 20.0);
        assert_eq!(evaluate(&points, 50.0), 50.0);
        assert_eq!(evaluate(&points, 80.0), 100.0);
    }

    #[test]
    fn test_evaluate_middle() {
        // 50 + (100-50) * (65-50)/(80-50) = 75
        assert_eq!(evaluate(&cpu_points(), 65.0), 75.0);
        assert_eq!(evaluate(&cpu_points(), 40.0), 35.0);
    }

    #[test]
    fn test_evaluate_clamps() {
        assert_eq!(evaluate(&cpu_points(), 10.0), 20.0);
        assert_eq!(evaluate(&cpu_points(), 95.0), 100.0);
    }

    #[test]
    fn test_evaluate_duplicate_temperatures() {
        let points = [
            CurvePoint::new(30.0, 20),
            CurvePoint::new(50.0, 40),
            CurvePoint::new(50.0, 90),
        ];
        assert_eq!(evaluate(&points, 30.0), 20.0);
        assert_eq!(evaluate(&points, 60.0), 90.0);
        assert!(evaluate(&points, 49.0).is_finite());
    }

    #[test]
    fn test_target_takes_maximum() {
        let mut config = CurveConfig {
            enabled: true,
            ..CurveConfig::default()
        };
        config.cpu.points = cpu_points();
        // CPU 65°C -> 75%, water 35°C -> 40%
        assert_eq!(config.target(Some(65.0), Some(35.0)), Some(75));
        // water 45°C -> 80% beats CPU
        assert_eq!(config.target(Some(65.0), Some(45.0)), Some(80));
    }

    #[test]
    fn test_disabled_curves_contribute_nothing() {
        let mut config = CurveConfig {
            enabled: true,
            ..CurveConfig::default()
        };
        config.water.enabled = false;
        assert_eq!(config.target(None, Some(50.0)), None);

        config.enabled = false;
        assert_eq!(config.target(Some(90.0), Some(50.0)), None);
    }
}
