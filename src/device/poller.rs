//! Periodic device status and host sensor polling.
//!
//! Each [`StatusPoller::poll`] produces a new status snapshot and sensor
//! reading. Failed reads never surface as errors: the previous values are
//! kept and marked stale, and enough consecutive failures take the device
//! offline until the next successful read.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use crate::device::{DeviceAdapter, StatusFormat, with_timeout};
use crate::error::Result;
use crate::protocol::{Capabilities, DeviceStatus, Freshness, LinkState, StatusSnapshot};
use crate::utils::sensors::SensorProvider;

/// Longest source chain a sensor provider walks; each step is bounded by
/// the command timeout, so a whole read is bounded by this many timeouts.
pub const SENSOR_CHAIN_STEPS: u32 = 3;

// =============================================================================
// Sensor Reading
// =============================================================================

/// Immutable capture of host temperatures, published once per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub taken_at: SystemTime,
    pub cpu_temp: Option<f32>,
    pub gpu_temp: Option<f32>,
    /// Stale when any source failed and its previous value was kept.
    pub freshness: Freshness,
}

impl SensorReading {
    /// Placeholder before the first poll.
    pub fn empty() -> Self {
        Self {
            taken_at: SystemTime::now(),
            cpu_temp: None,
            gpu_temp: None,
            freshness: Freshness::Stale,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.freshness == Freshness::Fresh
    }
}

// =============================================================================
// Poll Outcome
// =============================================================================

/// Result of one poll cycle.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub status: Arc<StatusSnapshot>,
    pub sensors: Arc<SensorReading>,
    /// Channels observed in this read; `None` when the read failed.
    pub capabilities: Option<Capabilities>,
    /// The device came back after being offline.
    pub reconnected: bool,
}

// =============================================================================
// Status Poller
// =============================================================================

pub struct StatusPoller {
    adapter: Arc<dyn DeviceAdapter>,
    sensors: Arc<dyn SensorProvider>,
    device: String,
    timeout: Duration,
    offline_after: u32,
    status: Arc<StatusSnapshot>,
    reading: Arc<SensorReading>,
}

impl StatusPoller {
    /// # Arguments
    /// * `adapter` - Driver boundary for status reads
    /// * `sensors` - Host temperature provider
    /// * `device` - Device identity passed to the adapter
    /// * `timeout` - Upper bound on each external read
    /// * `offline_after` - Consecutive failures before the device is offline
    pub fn new(
        adapter: Arc<dyn DeviceAdapter>,
        sensors: Arc<dyn SensorProvider>,
        device: impl Into<String>,
        timeout: Duration,
        offline_after: u32,
    ) -> Self {
        Self {
            adapter,
            sensors,
            device: device.into(),
            timeout,
            offline_after: offline_after.max(1),
            status: Arc::new(StatusSnapshot::empty()),
            reading: Arc::new(SensorReading::empty()),
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> Arc<StatusSnapshot> {
        Arc::clone(&self.status)
    }

    /// Current sensor reading.
    pub fn sensors(&self) -> Arc<SensorReading> {
        Arc::clone(&self.reading)
    }

    /// Read device status and host sensors once.
    pub async fn poll(&mut self) -> PollOutcome {
        let (capabilities, reconnected) = self.poll_status().await;
        self.poll_sensors().await;

        PollOutcome {
            status: self.status(),
            sensors: self.sensors(),
            capabilities,
            reconnected,
        }
    }

    async fn poll_status(&mut self) -> (Option<Capabilities>, bool) {
        let previous = Arc::clone(&self.status);

        match self.read_status().await {
            Ok(status) => {
                let reconnected = previous.link == LinkState::Offline;
                if reconnected {
                    info!(device = %self.device, "Device back online");
                }
                self.status = Arc::new(StatusSnapshot::from_status(&status));
                (Some(status.capabilities()), reconnected)
            }
            Err(e) => {
                let failures = previous.consecutive_failures.saturating_add(1);
                let link = if failures >= self.offline_after {
                    LinkState::Offline
                } else {
                    previous.link
                };

                if link == LinkState::Offline && previous.link == LinkState::Online {
                    warn!(
                        device = %self.device,
                        failures,
                        error = %e,
                        "Device offline, keeping last known status"
                    );
                } else {
                    debug!(device = %self.device, failures, error = %e, "Status read failed");
                }

                self.status = Arc::new(previous.retained(failures, link));
                (None, false)
            }
        }
    }

    /// Structured status first, text on command or parse failure.
    async fn read_status(&self) -> Result<DeviceStatus> {
        let structured = self
            .fetch(StatusFormat::Structured)
            .await
            .and_then(|raw| DeviceStatus::parse_json(&raw));

        match structured {
            Ok(status) => Ok(status),
            Err(e) => {
                debug!(device = %self.device, error = %e, "Structured status unavailable, trying text");
                let raw = self.fetch(StatusFormat::Text).await?;
                DeviceStatus::parse_text(&raw)
            }
        }
    }

    async fn fetch(&self, format: StatusFormat) -> Result<String> {
        let operation = format!("{:?} status of '{}'", format, self.device);
        with_timeout(self.timeout, &operation, self.adapter.status(&self.device, format)).await
    }

    async fn poll_sensors(&mut self) {
        let previous = Arc::clone(&self.reading);

        let limit = self.timeout * SENSOR_CHAIN_STEPS;
        let (cpu, gpu) = tokio::join!(
            with_timeout(limit, "CPU temperature", self.sensors.cpu_temp()),
            with_timeout(limit, "GPU temperature", self.sensors.gpu_temp()),
        );

        let mut freshness = Freshness::Fresh;
        let mut settle = |result: Result<Option<f32>>, kept: Option<f32>, source: &str| match result {
            Ok(value) => value,
            Err(e) => {
                debug!(source, error = %e, "Sensor read failed, keeping previous value");
                freshness = Freshness::Stale;
                kept
            }
        };
        let cpu_temp = settle(cpu, previous.cpu_temp, "cpu");
        let gpu_temp = settle(gpu, previous.gpu_temp, "gpu");

        self.reading = Arc::new(SensorReading {
            taken_at: SystemTime::now(),
            cpu_temp,
            gpu_temp,
            freshness,
        });
    }
}
