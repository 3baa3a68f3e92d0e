//! Cooling control module.
//!
//! Provides curve interpolation, the safety hysteresis monitor, and the
//! control loop that combines them with manual targets.

pub mod controller;
pub mod curve;
pub mod handle;
pub mod safety;

pub use controller::{ControlLoop, ManualTargets, TargetInputs, compute_targets};
pub use curve::{TempSource, evaluate, to_percent};
pub use handle::{ControlCommand, ControlHandle, ControlSnapshot, ControlState};
pub use safety::{SafetyMode, SafetyMonitor};
