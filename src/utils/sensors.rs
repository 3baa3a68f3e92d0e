//! Host temperature sources: CPU and GPU.
//!
//! CPU temperature comes from `sensors -j`, then plain `sensors` text, then
//! the platform component list. GPU temperature walks the vendor tool
//! (`nvidia-smi`), the generic `sensors` text, and finally the platform
//! component list. The first source producing a value wins.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use sysinfo::Components;
use tracing::debug;

use crate::error::{ControlError, Result};
use crate::utils::command::run_capture;

/// Plausible CPU temperature window; readings outside are sensor noise.
pub const CPU_TEMP_RANGE: std::ops::RangeInclusive<f32> = 5.0..=120.0;

/// Upper bound for generic GPU `tempN` readings.
pub const GPU_TEMP_MAX: f32 = 120.0;

static CPU_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(tctl|tdie|package|core|cpu)").expect("valid regex"));
static TEXT_CELSIUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\+?\d+(?:\.\d+)?)\s*°?c").expect("valid regex"));
static GPU_EDGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(edge|junction):\s*\+?([\d.]+)").expect("valid regex"));
static GPU_GENERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(gpu.*temp|temp\d+):\s*\+?([\d.]+)").expect("valid regex"));

const CPU_CHIPS: [&str; 3] = ["k10temp", "coretemp", "zenpower"];
const GPU_CHIPS: [&str; 5] = ["amdgpu", "radeon", "nouveau", "i915", "xe-"];

// =============================================================================
// Provider Trait
// =============================================================================

/// Supplies host temperatures to the status poller.
///
/// `Ok(None)` means no source has a reading; `Err` means a source failed
/// transiently and the previous value should be kept.
#[async_trait]
pub trait SensorProvider: Send + Sync {
    async fn cpu_temp(&self) -> Result<Option<f32>>;
    async fn gpu_temp(&self) -> Result<Option<f32>>;
}

// =============================================================================
// Output Parsers
// =============================================================================

/// Hottest plausible CPU reading from `sensors -j` output.
///
/// A reading counts when its chip is a known CPU driver or its label names
/// a CPU sensor (`tctl`, `tdie`, `package`, `core`, `cpu`).
pub fn parse_sensors_json(raw: &str) -> Option<f32> {
    let root: Value = serde_json::from_str(raw).ok()?;
    let chips = root.as_object()?;

    let mut best: Option<f32> = None;
    for (chip, sections) in chips {
        let chip_is_cpu = {
            let lower = chip.to_lowercase();
            CPU_CHIPS.iter().any(|c| lower.contains(c))
        };
        let Some(sections) = sections.as_object() else {
            continue;
        };

        for (label, section) in sections {
            let Some(section) = section.as_object() else {
                continue;
            };
            for (key, value) in section {
                if !(key.starts_with("temp") && key.ends_with("_input")) {
                    continue;
                }
                let Some(temp) = value.as_f64().map(|v| v as f32) else {
                    continue;
                };
                let sub_label = section
                    .get(&key.replace("_input", "_label"))
                    .and_then(Value::as_str)
                    .unwrap_or(label.as_str());
                if (chip_is_cpu || CPU_LABEL.is_match(sub_label)) && CPU_TEMP_RANGE.contains(&temp) {
                    best = Some(best.map_or(temp, |b| b.max(temp)));
                }
            }
        }
    }
    best
}

/// Hottest plausible CPU reading from plain `sensors` output.
pub fn parse_sensors_text_cpu(raw: &str) -> Option<f32> {
    raw.lines()
        .filter(|line| CPU_LABEL.is_match(line))
        .filter_map(|line| TEXT_CELSIUS.captures(line))
        .filter_map(|caps| caps[1].parse::<f32>().ok())
        .filter(|temp| CPU_TEMP_RANGE.contains(temp))
        .fold(None, |best, temp| Some(best.map_or(temp, |b: f32| b.max(temp))))
}

/// First positive reading from `nvidia-smi --query-gpu=temperature.gpu`.
pub fn parse_nvidia_smi(raw: &str) -> Option<f32> {
    raw.lines()
        .filter_map(|line| line.trim().parse::<f32>().ok())
        .find(|&temp| temp > 0.0)
}

/// GPU reading from plain `sensors` output.
///
/// `edge`/`junction` lines are trusted anywhere; generic `tempN` lines only
/// inside a GPU chip block.
pub fn parse_sensors_text_gpu(raw: &str) -> Option<f32> {
    let mut in_gpu_chip = false;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            in_gpu_chip = false;
            continue;
        }
        // Chip headers have no colon, e.g. "amdgpu-pci-0300"
        if !trimmed.contains(':') && !line.starts_with(char::is_whitespace) {
            let lower = trimmed.to_lowercase();
            in_gpu_chip = GPU_CHIPS.iter().any(|c| lower.starts_with(c));
            continue;
        }

        if let Some(caps) = GPU_EDGE.captures(trimmed)
            && let Ok(temp) = caps[2].parse::<f32>()
        {
            return Some(temp);
        }
        if let Some(caps) = GPU_GENERIC.captures(trimmed)
            && let Ok(temp) = caps[2].parse::<f32>()
            && temp < GPU_TEMP_MAX
            && (in_gpu_chip || caps[1].to_lowercase().starts_with("gpu"))
        {
            return Some(temp);
        }
    }
    None
}

// =============================================================================
// Platform Components
// =============================================================================

/// Information about a detected platform sensor.
#[derive(Debug, Clone)]
pub struct SensorInfo {
    pub label: String,
    pub temperature: Option<f32>,
    pub critical: Option<f32>,
}

/// Platform temperature components via `sysinfo`.
pub struct SystemSensors {
    components: Components,
}

impl SystemSensors {
    pub fn new() -> Self {
        Self {
            components: Components::new_with_refreshed_list(),
        }
    }

    pub fn refresh(&mut self) {
        self.components.refresh(true);
    }

    /// Hottest component whose label looks like a CPU sensor.
    pub fn find_cpu_temp(&self) -> Option<f32> {
        self.hottest(|label| {
            CPU_LABEL.is_match(label) || label.contains("computer") // some Windows systems
        })
        .filter(|t| CPU_TEMP_RANGE.contains(t))
    }

    /// Hottest component whose label looks like a GPU sensor.
    pub fn find_gpu_temp(&self) -> Option<f32> {
        self.hottest(|label| {
            ["gpu", "nvidia", "amdgpu", "edge", "junction"]
                .iter()
                .any(|p| label.contains(p))
        })
        .filter(|&t| t > 0.0 && t < GPU_TEMP_MAX)
    }

    pub fn list_all(&self) -> Vec<SensorInfo> {
        self.components
            .iter()
            .map(|c| SensorInfo {
                label: c.label().to_string(),
                temperature: c.temperature(),
                critical: c.critical(),
            })
            .collect()
    }

    fn hottest(&self, matches: impl Fn(&str) -> bool) -> Option<f32> {
        self.components
            .iter()
            .filter(|c| matches(&c.label().to_lowercase()))
            .filter_map(|c| c.temperature())
            .filter(|t| t.is_finite())
            .reduce(f32::max)
    }
}

impl Default for SystemSensors {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// System Provider
// =============================================================================

/// [`SensorProvider`] using lm-sensors, nvidia-smi, and platform components.
pub struct SystemSensorProvider {
    timeout: Duration,
    platform: Arc<Mutex<SystemSensors>>,
}

impl SystemSensorProvider {
    /// # Arguments
    /// * `timeout` - Upper bound on each helper tool invocation
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            platform: Arc::new(Mutex::new(SystemSensors::new())),
        }
    }

    /// Run a helper tool. Missing tools yield `Ok(None)`; timeouts are kept
    /// so the caller can report a transient failure.
    async fn tool_output(&self, program: &str, args: &[&str]) -> Result<Option<String>> {
        match run_capture(program, args, self.timeout).await {
            Ok(out) => Ok(Some(out)),
            Err(e @ ControlError::Timeout { .. }) => Err(e),
            Err(e) => {
                debug!(program, error = %e, "Sensor tool unavailable");
                Ok(None)
            }
        }
    }

    /// Refresh the platform component list off the async workers.
    async fn platform_reading(&self, pick: fn(&SystemSensors) -> Option<f32>) -> Option<f32> {
        let platform = Arc::clone(&self.platform);
        let reading = tokio::task::spawn_blocking(move || {
            let mut platform = platform.lock();
            platform.refresh();
            pick(&*platform)
        })
        .await;

        reading.unwrap_or_else(|e| {
            debug!(error = %e, "Platform sensor read did not complete");
            None
        })
    }
}

/// Walk a chain of source results; the first value wins, a timeout with no
/// value surfaces as the error.
fn settle(results: Vec<Result<Option<f32>>>) -> Result<Option<f32>> {
    let mut timeout = None;
    for result in results {
        match result {
            Ok(Some(temp)) => return Ok(Some(temp)),
            Ok(None) => {}
            Err(e) => timeout = timeout.or(Some(e)),
        }
    }
    match timeout {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

#[async_trait]
impl SensorProvider for SystemSensorProvider {
    async fn cpu_temp(&self) -> Result<Option<f32>> {
        let mut results = Vec::new();

        let json = self
            .tool_output("sensors", &["-j"])
            .await
            .map(|out| out.as_deref().and_then(parse_sensors_json));
        if let Ok(Some(temp)) = json {
            return Ok(Some(temp));
        }
        results.push(json);

        let text = self
            .tool_output("sensors", &[])
            .await
            .map(|out| out.as_deref().and_then(parse_sensors_text_cpu));
        if let Ok(Some(temp)) = text {
            return Ok(Some(temp));
        }
        results.push(text);

        results.push(Ok(self.platform_reading(SystemSensors::find_cpu_temp).await));
        settle(results)
    }

    async fn gpu_temp(&self) -> Result<Option<f32>> {
        let mut results = Vec::new();

        let vendor = self
            .tool_output(
                "nvidia-smi",
                &["--query-gpu=temperature.gpu", "--format=csv,noheader"],
            )
            .await
            .map(|out| out.as_deref().and_then(parse_nvidia_smi));
        if let Ok(Some(temp)) = vendor {
            return Ok(Some(temp));
        }
        results.push(vendor);

        let generic = self
            .tool_output("sensors", &[])
            .await
            .map(|out| out.as_deref().and_then(parse_sensors_text_gpu));
        if let Ok(Some(temp)) = generic {
            return Ok(Some(temp));
        }
        results.push(generic);

        results.push(Ok(self.platform_reading(SystemSensors::find_gpu_temp).await));
        settle(results)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SENSORS_JSON: &str = r#"{
        "k10temp-pci-00c3": {
            "Adapter": "PCI adapter",
            "Tctl": {"temp1_input": 61.25},
            "Tccd1": {"temp3_input": 58.0}
        },
        "nvme-pci-0100": {
            "Adapter": "PCI adapter",
            "Composite": {"temp1_input": 71.85, "temp1_max": 84.85}
        },
        "acpitz-acpi-0": {
            "Adapter": "ACPI interface",
            "temp1": {"temp1_input": 16.8}
        }
    }"#;

    const SENSORS_TEXT: &str = "\
coretemp-isa-0000
Adapter: ISA adapter
Package id 0:  +52.0°C  (high = +80.0°C, crit = +100.0°C)
Core 0:        +49.0°C  (high = +80.0°C, crit = +100.0°C)
Core 1:        +55.0°C  (high = +80.0°C, crit = +100.0°C)

acpitz-acpi-0
Adapter: ACPI interface
temp1:        +27.8°C

amdgpu-pci-0300
Adapter: PCI adapter
vddgfx:      781.00 mV
temp1:        +44.0°C  (crit = +94.0°C)
";

    #[test]
    fn test_parse_sensors_json_takes_hottest_cpu() {
        // nvme is hotter but not a CPU chip or label
        assert_eq!(parse_sensors_json(SENSORS_JSON), Some(61.25));
    }

    #[test]
    fn test_parse_sensors_json_garbage() {
        assert_eq!(parse_sensors_json("not json"), None);
        assert_eq!(parse_sensors_json("{}"), None);
    }

    #[test]
    fn test_parse_sensors_json_ignores_implausible() {
        let raw = r#"{"coretemp-isa-0000": {"Core 0": {"temp2_input": 127.0}}}"#;
        assert_eq!(parse_sensors_json(raw), None);
    }

    #[test]
    fn test_parse_sensors_text_cpu() {
        assert_eq!(parse_sensors_text_cpu(SENSORS_TEXT), Some(55.0));
        assert_eq!(parse_sensors_text_cpu("acpitz-acpi-0\ntemp1: +27.8°C"), None);
    }

    #[test]
    fn test_parse_nvidia_smi() {
        assert_eq!(parse_nvidia_smi("47\n"), Some(47.0));
        assert_eq!(parse_nvidia_smi("[N/A]\n0\n"), None);
    }

    #[test]
    fn test_parse_sensors_text_gpu_block_only() {
        // acpitz temp1 must not be taken for the GPU
        assert_eq!(parse_sensors_text_gpu(SENSORS_TEXT), Some(44.0));
    }

    #[test]
    fn test_parse_sensors_text_gpu_edge() {
        let text = "amdgpu-pci-0a00\nAdapter: PCI adapter\nedge:         +39.0°C  (crit = +100.0°C)\njunction:     +41.0°C\n";
        assert_eq!(parse_sensors_text_gpu(text), Some(39.0));
    }

    #[test]
    fn test_settle_prefers_value_over_timeout() {
        let timeout = || ControlError::Timeout {
            operation: "sensors".into(),
            timeout_ms: 3000,
        };
        assert_eq!(settle(vec![Err(timeout()), Ok(Some(50.0))]).unwrap(), Some(50.0));
        assert!(settle(vec![Err(timeout()), Ok(None)]).is_err());
        assert_eq!(settle(vec![Ok(None), Ok(None)]).unwrap(), None);
    }

    #[test]
    fn test_system_sensors_creation() {
        let sensors = SystemSensors::new();
        // Sensor availability depends on the host
        let _ = sensors.list_all();
        let _ = sensors.find_cpu_temp();
    }
}
