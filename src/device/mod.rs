//! Device access layer for liquidctl-driven coolers.
//!
//! The [`DeviceAdapter`] trait is the boundary to the driver process. On top
//! of it sit the [`CommandNegotiator`], which discovers and caches the
//! command dialect each device accepts, and the [`StatusPoller`], which turns
//! raw status output and sensor readings into immutable snapshots.

pub mod liquidctl;
pub mod negotiator;
pub mod poller;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ControlError, Result};
use crate::protocol::{Channel, Dialect};

pub use liquidctl::LiquidctlCli;
pub use negotiator::CommandNegotiator;
pub use poller::{PollOutcome, SensorReading, StatusPoller};

// =============================================================================
// Adapter Trait
// =============================================================================

/// Status output layout requested from the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFormat {
    /// Machine-readable JSON.
    Structured,
    /// Human-readable table.
    Text,
}

/// Executes status reads and speed commands against a device driver.
///
/// Implementations must tolerate being dropped mid-call: callers bound
/// every call with a timeout and discard late results.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Run the driver's initialization sequence for `device`.
    async fn initialize(&self, device: &str) -> Result<()>;

    /// Read raw status output for `device` in the requested layout.
    async fn status(&self, device: &str, format: StatusFormat) -> Result<String>;

    /// Set a fixed speed on one channel using the given dialect.
    async fn set_speed(
        &self,
        device: &str,
        channel: Channel,
        percent: u8,
        dialect: Dialect,
    ) -> Result<()>;
}

/// Await `fut` for at most `limit`, mapping expiry to [`ControlError::Timeout`].
///
/// The future is dropped on expiry, so any late result is discarded.
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ControlError::Timeout {
            operation: operation.to_string(),
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}
