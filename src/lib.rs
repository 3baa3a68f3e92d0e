//! Liquid Cooling Control Library
//!
//! A closed-loop fan and pump speed controller for liquid coolers driven
//! through the `liquidctl` command-line driver.
//!
//! # Features
//!
//! - Per-device discovery of the speed command dialect the driver accepts
//! - Status polling with stale retention and offline detection
//! - Emergency boost with hysteresis on CPU and coolant temperatures
//! - Three-point temperature curves for CPU and coolant
//! - Named profiles with atomic persistence
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use liquid_cooling_control::config::DaemonSettings;
//! use liquid_cooling_control::cooling::ControlLoop;
//! use liquid_cooling_control::device::LiquidctlCli;
//! use liquid_cooling_control::protocol::Channel;
//! use liquid_cooling_control::storage::ProfileStore;
//! use liquid_cooling_control::utils::SystemSensorProvider;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(ProfileStore::open_default()?);
//!     let settings = store.document().daemon;
//!     let adapter = Arc::new(LiquidctlCli::from_settings(&settings));
//!     let sensors = Arc::new(SystemSensorProvider::new(settings.command_timeout()));
//!
//!     let (mut control, handle) = ControlLoop::new(adapter, sensors, store, settings);
//!     handle.set_manual_target(Channel::AllFans, 45)?;
//!
//!     let snapshot = control.tick().await;
//!     println!("{}", snapshot.status);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod cooling;
pub mod device;
pub mod error;
pub mod protocol;
pub mod storage;
pub mod utils;

// Re-exports for convenience
pub use cooling::{ControlHandle, ControlLoop, ControlSnapshot};
pub use error::{ControlError, Result};
pub use protocol::Channel;
