//! Driver-facing protocol types for liquidctl-managed devices.
//!
//! This module contains the channel model, the command dialects the driver
//! may accept, and the status parsing that turns driver output into
//! immutable snapshots.

pub mod channel;
pub mod dialect;
pub mod status;

pub use channel::*;
pub use dialect::*;
pub use status::*;
