//! [`DeviceAdapter`] backed by the `liquidctl` command-line driver.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::DaemonSettings;
use crate::device::{DeviceAdapter, StatusFormat};
use crate::error::Result;
use crate::protocol::{Channel, Dialect};
use crate::utils::command::run_capture;

/// Runs `liquidctl` as a child process for every operation.
///
/// Device selection uses `-m <description>`; an empty description lets
/// liquidctl pick the only connected device.
#[derive(Debug, Clone)]
pub struct LiquidctlCli {
    program: String,
    timeout: Duration,
}

impl LiquidctlCli {
    /// # Arguments
    /// * `program` - liquidctl executable name or path
    /// * `timeout` - Upper bound on each invocation
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &DaemonSettings) -> Self {
        Self::new(settings.liquidctl_path.clone(), settings.command_timeout())
    }

    /// Full argument list for `args` addressed at `device`.
    fn device_args(device: &str, args: &[String]) -> Vec<String> {
        let mut full = Vec::with_capacity(args.len() + 2);
        if !device.is_empty() {
            full.push("-m".to_string());
            full.push(device.to_string());
        }
        full.extend(args.iter().cloned());
        full
    }

    async fn run(&self, device: &str, args: &[String]) -> Result<String> {
        let full = Self::device_args(device, args);
        let borrowed: Vec<&str> = full.iter().map(String::as_str).collect();
        run_capture(&self.program, &borrowed, self.timeout).await
    }
}

#[async_trait]
impl DeviceAdapter for LiquidctlCli {
    async fn initialize(&self, device: &str) -> Result<()> {
        let output = self.run(device, &["initialize".to_string()]).await?;
        debug!(device, output = output.trim(), "Device initialized");
        Ok(())
    }

    async fn status(&self, device: &str, format: StatusFormat) -> Result<String> {
        let mut args = vec!["status".to_string()];
        if format == StatusFormat::Structured {
            args.push("--json".to_string());
        }
        self.run(device, &args).await
    }

    async fn set_speed(
        &self,
        device: &str,
        channel: Channel,
        percent: u8,
        dialect: Dialect,
    ) -> Result<()> {
        let args = dialect.set_args(channel, percent);
        self.run(device, &args).await.map(|_| ())
    }
}
