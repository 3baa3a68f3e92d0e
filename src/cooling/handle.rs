//! Control surface for UIs, the tray, and the CLI.
//!
//! A [`ControlHandle`] never touches control state directly. Target and
//! configuration changes are sent to the control loop as
//! [`ControlCommand`]s; the loop publishes a fresh [`ControlSnapshot`] every
//! tick, which handles read without blocking the loop.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::config::{CurveConfig, SafetyConfig};
use crate::cooling::controller::ManualTargets;
use crate::cooling::safety::SafetyMode;
use crate::device::SensorReading;
use crate::error::{ControlError, Result};
use crate::protocol::{Capabilities, Channel, ChannelTargets, Dialect, StatusSnapshot};
use crate::storage::ProfileStore;

// =============================================================================
// Commands
// =============================================================================

/// Requests handled by the control loop between ticks.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    SetManual { channel: Channel, percent: u8 },
    ClearManual,
    SetLinkFans(bool),
    /// Replace manual targets with a profile's targets.
    ApplyProfile { name: String, targets: ChannelTargets },
    UpdateSafety(SafetyConfig),
    UpdateCurves(CurveConfig),
    /// Forget the negotiated dialect and probe again.
    Renegotiate,
}

// =============================================================================
// Snapshots
// =============================================================================

/// Loop-owned control state, published read-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlState {
    /// Last percentage successfully sent per channel.
    pub last_commanded: ChannelTargets,
    pub safety: SafetyMode,
}

/// Everything a presentation layer needs, captured once per tick.
#[derive(Debug, Clone)]
pub struct ControlSnapshot {
    pub tick: u64,
    pub status: Arc<StatusSnapshot>,
    pub sensors: Arc<SensorReading>,
    pub control: ControlState,
    /// Targets computed this tick, before debouncing.
    pub targets: ChannelTargets,
    pub manual: ManualTargets,
    pub link_fans: bool,
    pub capabilities: Capabilities,
    pub dialect: Option<Dialect>,
    pub dialect_unresolved: bool,
    pub active_profile: Option<String>,
    /// CPU at or above its threshold with the alarm enabled.
    pub alarm: bool,
}

impl ControlSnapshot {
    /// Snapshot published before the first tick.
    pub fn initial(manual: ManualTargets, link_fans: bool, active_profile: Option<String>) -> Self {
        Self {
            tick: 0,
            status: Arc::new(StatusSnapshot::empty()),
            sensors: Arc::new(SensorReading::empty()),
            control: ControlState::default(),
            targets: ChannelTargets::new(),
            manual,
            link_fans,
            capabilities: Capabilities::default(),
            dialect: None,
            dialect_unresolved: false,
            active_profile,
            alarm: false,
        }
    }

    pub fn is_boosted(&self) -> bool {
        self.control.safety == SafetyMode::Boosted
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable handle to a running control loop.
#[derive(Clone)]
pub struct ControlHandle {
    commands: mpsc::UnboundedSender<ControlCommand>,
    snapshots: watch::Receiver<Arc<ControlSnapshot>>,
    store: Arc<ProfileStore>,
}

impl ControlHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<ControlCommand>,
        snapshots: watch::Receiver<Arc<ControlSnapshot>>,
        store: Arc<ProfileStore>,
    ) -> Self {
        Self {
            commands,
            snapshots,
            store,
        }
    }

    fn send(&self, command: ControlCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ControlError::LoopStopped)
    }

    // -------------------------------------------------------------------------
    // Live control
    // -------------------------------------------------------------------------

    /// Set a manual slider value; applied on the next tick.
    pub fn set_manual_target(&self, channel: Channel, percent: u8) -> Result<()> {
        channel.validate_percent(percent)?;
        self.send(ControlCommand::SetManual { channel, percent })
    }

    /// Drop every manual target so curves (or idle) take over.
    pub fn clear_manual_targets(&self) -> Result<()> {
        self.send(ControlCommand::ClearManual)
    }

    pub fn set_link_fans(&self, linked: bool) -> Result<()> {
        self.send(ControlCommand::SetLinkFans(linked))
    }

    /// Force dialect negotiation on the next command.
    pub fn renegotiate(&self) -> Result<()> {
        self.send(ControlCommand::Renegotiate)
    }

    /// Latest published snapshot.
    pub fn get_snapshot(&self) -> Arc<ControlSnapshot> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Receiver notified on every new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ControlSnapshot>> {
        self.snapshots.clone()
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    /// Validate, persist, and apply new safety settings.
    pub fn update_safety(&self, safety: SafetyConfig) -> Result<()> {
        self.store.update_safety(&safety)?;
        self.send(ControlCommand::UpdateSafety(safety))
    }

    /// Validate, persist, and apply new curve settings.
    pub fn update_curves(&self, curves: CurveConfig) -> Result<()> {
        self.store.update_curves(&curves)?;
        self.send(ControlCommand::UpdateCurves(curves))
    }

    // -------------------------------------------------------------------------
    // Profiles
    // -------------------------------------------------------------------------

    /// Make `name` the active profile and apply its targets.
    pub fn select_profile(&self, name: &str) -> Result<()> {
        let targets = self.store.load(name)?;
        self.store.set_active(Some(name))?;
        self.send(ControlCommand::ApplyProfile {
            name: name.trim().to_string(),
            targets,
        })
    }

    pub fn save_profile(&self, name: &str, targets: &ChannelTargets) -> Result<()> {
        self.store.save(name, targets)
    }

    /// Save the manual targets currently in effect under `name`.
    pub fn save_current_profile(&self, name: &str) -> Result<ChannelTargets> {
        let snapshot = self.get_snapshot();
        let targets = snapshot
            .manual
            .effective(&snapshot.capabilities, snapshot.link_fans);
        self.store.save(name, &targets)?;
        Ok(targets)
    }

    pub fn load_profile(&self, name: &str) -> Result<ChannelTargets> {
        self.store.load(name)
    }

    pub fn delete_profile(&self, name: &str) -> Result<()> {
        self.store.delete(name)
    }

    pub fn list_profiles(&self) -> Vec<String> {
        self.store.list_names()
    }

    pub fn active_profile(&self) -> Option<String> {
        self.store.active_name()
    }
}
