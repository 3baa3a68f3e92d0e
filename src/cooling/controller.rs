//! Closed-loop fan and pump control.
//!
//! [`ControlLoop`] is the only writer of control state and the only sender
//! of device commands. Each tick it polls status and sensors, runs the
//! safety monitor, resolves one target per channel by precedence
//! (safety > manual > curve > idle), and dispatches changed targets through
//! the command negotiator.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{CurveConfig, DaemonSettings, SafetyConfig};
use crate::cooling::handle::{ControlCommand, ControlHandle, ControlSnapshot, ControlState};
use crate::cooling::safety::{SafetyMode, SafetyMonitor, alarm_active};
use crate::device::{CommandNegotiator, DeviceAdapter, PollOutcome, StatusPoller, with_timeout};
use crate::error::ControlError;
use crate::protocol::{Capabilities, Channel, ChannelTargets, MAX_PERCENT};
use crate::storage::ProfileStore;
use crate::utils::sensors::SensorProvider;

/// Speed applied to a channel when nothing else asks for one.
pub const IDLE_PERCENT: u8 = 0;

// =============================================================================
// Manual Targets
// =============================================================================

/// User slider values.
///
/// `fans` (the aggregate) is the shared value while fans are linked and the
/// fallback for fans without their own value otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManualTargets {
    targets: ChannelTargets,
}

impl ManualTargets {
    pub fn from_targets(targets: ChannelTargets) -> Self {
        Self { targets }
    }

    pub fn as_targets(&self) -> &ChannelTargets {
        &self.targets
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Record one slider move.
    ///
    /// Setting the aggregate overrides every individual fan. Moving a single
    /// fan while linked moves the aggregate.
    pub fn set(&mut self, channel: Channel, percent: u8, linked: bool) {
        match channel {
            Channel::AllFans => {
                self.targets.retain(|c, _| !matches!(c, Channel::Fan(_)));
                self.targets.insert(Channel::AllFans, percent);
            }
            Channel::Fan(_) if linked => self.set(Channel::AllFans, percent, linked),
            _ => {
                self.targets.insert(channel, percent);
            }
        }
    }

    pub fn clear(&mut self) {
        self.targets.clear();
    }

    /// Manual value for fan `index`, if any.
    pub fn fan(&self, index: u8, linked: bool) -> Option<u8> {
        let own = self.targets.get(&Channel::Fan(index)).copied();
        let shared = self.targets.get(&Channel::AllFans).copied();
        if linked { shared.or(own) } else { own.or(shared) }
    }

    pub fn pump(&self) -> Option<u8> {
        self.targets.get(&Channel::Pump).copied()
    }

    /// Concrete per-channel manual values for the given device.
    pub fn effective(&self, capabilities: &Capabilities, linked: bool) -> ChannelTargets {
        let mut effective: ChannelTargets = capabilities
            .fans
            .iter()
            .filter_map(|&index| self.fan(index, linked).map(|p| (Channel::Fan(index), p)))
            .collect();
        if capabilities.pump_usable()
            && let Some(pump) = self.pump()
        {
            effective.insert(Channel::Pump, pump);
        }
        effective
    }
}

// =============================================================================
// Target Resolution
// =============================================================================

/// Inputs to one tick's target resolution.
#[derive(Debug, Clone, Copy)]
pub struct TargetInputs<'a> {
    pub capabilities: &'a Capabilities,
    pub safety: SafetyMode,
    pub manual: &'a ManualTargets,
    pub link_fans: bool,
    pub curves: &'a CurveConfig,
    pub cpu_temp: Option<f32>,
    pub water_temp: Option<f32>,
}

/// Resolve one target per supported channel.
///
/// Precedence, highest first: safety boost, manual value, curve target
/// (pump only with `apply_to_pump`), idle.
pub fn compute_targets(inputs: &TargetInputs<'_>) -> ChannelTargets {
    let boosted = inputs.safety == SafetyMode::Boosted;
    let curve = if inputs.curves.enabled {
        inputs.curves.target(inputs.cpu_temp, inputs.water_temp)
    } else {
        None
    };

    let mut targets = ChannelTargets::new();
    for &index in &inputs.capabilities.fans {
        let target = if boosted {
            MAX_PERCENT
        } else {
            inputs
                .manual
                .fan(index, inputs.link_fans)
                .or(curve)
                .unwrap_or(IDLE_PERCENT)
        };
        targets.insert(Channel::Fan(index), target);
    }

    if inputs.capabilities.pump_usable() {
        let pump_curve = curve.filter(|_| inputs.curves.apply_to_pump);
        let target = if boosted {
            MAX_PERCENT
        } else {
            inputs.manual.pump().or(pump_curve).unwrap_or(IDLE_PERCENT)
        };
        targets.insert(Channel::Pump, target);
    }

    targets
}

// =============================================================================
// Control Loop
// =============================================================================

pub struct ControlLoop {
    device: String,
    settings: DaemonSettings,
    adapter: Arc<dyn DeviceAdapter>,
    negotiator: CommandNegotiator,
    poller: StatusPoller,
    store: Arc<ProfileStore>,

    safety_config: SafetyConfig,
    curves: CurveConfig,
    monitor: SafetyMonitor,
    manual: ManualTargets,
    link_fans: bool,
    state: ControlState,
    observed: Capabilities,
    pump_unsupported: bool,
    /// The pump has taken at least one command since the last reset.
    pump_accepted: bool,
    /// Manual targets or the link flag changed since the last write.
    persist_pending: bool,
    tick_count: u64,

    commands: mpsc::UnboundedReceiver<ControlCommand>,
    publisher: watch::Sender<Arc<ControlSnapshot>>,
}

impl ControlLoop {
    /// Build a loop from the persisted document and return its handle.
    ///
    /// # Arguments
    /// * `adapter` - Driver boundary for status and speed commands
    /// * `sensors` - Host temperature provider
    /// * `store` - Settings document; supplies safety, curves, and manual state
    /// * `settings` - Device identity, timing, and debounce settings
    pub fn new(
        adapter: Arc<dyn DeviceAdapter>,
        sensors: Arc<dyn SensorProvider>,
        store: Arc<ProfileStore>,
        settings: DaemonSettings,
    ) -> (Self, ControlHandle) {
        let doc = store.document();
        let device = settings.device.clone().unwrap_or_default();
        let manual = ManualTargets::from_targets(doc.manual);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (publisher, snapshots) = watch::channel(Arc::new(ControlSnapshot::initial(
            manual.clone(),
            doc.link_fans,
            doc.active_profile,
        )));

        let control = Self {
            negotiator: CommandNegotiator::new(Arc::clone(&adapter), settings.command_timeout()),
            poller: StatusPoller::new(
                Arc::clone(&adapter),
                sensors,
                device.clone(),
                settings.command_timeout(),
                settings.offline_after,
            ),
            device,
            settings,
            adapter,
            store: Arc::clone(&store),
            safety_config: doc.safety,
            curves: doc.curves,
            monitor: SafetyMonitor::new(),
            manual,
            link_fans: doc.link_fans,
            state: ControlState::default(),
            observed: Capabilities::default(),
            pump_unsupported: false,
            pump_accepted: false,
            persist_pending: false,
            tick_count: 0,
            commands: command_rx,
            publisher,
        };
        let handle = ControlHandle::new(command_tx, snapshots, store);
        (control, handle)
    }

    /// Run the driver's initialization sequence. Failure is logged only.
    pub async fn initialize(&self) {
        let result = with_timeout(
            self.settings.command_timeout(),
            "device initialization",
            self.adapter.initialize(&self.device),
        )
        .await;
        match result {
            Ok(()) => info!(device = %self.device, "Device initialized"),
            Err(e) => warn!(device = %self.device, error = %e, "Device initialization failed"),
        }
    }

    /// Tick until `shutdown` turns true or its sender is dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.settings.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            device = %self.device,
            interval_ms = self.settings.tick_interval_ms,
            "Control loop started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                Some(command) = self.commands.recv() => {
                    self.apply(command);
                    self.persist().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(ticks = self.tick_count, "Control loop stopped");
    }

    /// Run one control cycle and publish its snapshot.
    pub async fn tick(&mut self) -> Arc<ControlSnapshot> {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }

        let outcome = self.poller.poll().await;
        if let Some(capabilities) = &outcome.capabilities {
            if capabilities.fans != self.observed.fans {
                info!(fans = ?capabilities.fans, pump = capabilities.pump_present, "Device channels detected");
            }
            self.observed = capabilities.clone();
        }
        if outcome.reconnected {
            self.reset_session();
        }

        let cpu_temp = outcome.sensors.cpu_temp;
        let water_temp = outcome.status.water_temp;
        self.state.safety = self
            .monitor
            .update(&self.safety_config, cpu_temp, water_temp);
        self.monitor.check_alarm(&self.safety_config, cpu_temp);

        let capabilities = self.capabilities();
        let targets = compute_targets(&TargetInputs {
            capabilities: &capabilities,
            safety: self.state.safety,
            manual: &self.manual,
            link_fans: self.link_fans,
            curves: &self.curves,
            cpu_temp,
            water_temp,
        });
        self.dispatch(&targets).await;

        self.tick_count += 1;
        let snapshot = Arc::new(self.snapshot(outcome, targets, capabilities));
        self.publisher.send_replace(Arc::clone(&snapshot));
        self.persist().await;
        snapshot
    }

    /// Forget the dialect and everything learned from earlier commands.
    fn reset_session(&mut self) {
        self.negotiator.renegotiate(&self.device);
        self.state.last_commanded.clear();
        self.pump_unsupported = false;
        self.pump_accepted = false;
    }

    /// Observed channels minus a pump that rejected commands.
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            pump_supported: self.observed.pump_supported && !self.pump_unsupported,
            ..self.observed.clone()
        }
    }

    fn snapshot(
        &self,
        outcome: PollOutcome,
        targets: ChannelTargets,
        capabilities: Capabilities,
    ) -> ControlSnapshot {
        ControlSnapshot {
            tick: self.tick_count,
            alarm: alarm_active(&self.safety_config, outcome.sensors.cpu_temp),
            status: outcome.status,
            sensors: outcome.sensors,
            control: self.state.clone(),
            targets,
            manual: self.manual.clone(),
            link_fans: self.link_fans,
            capabilities,
            dialect: self.negotiator.dialect(&self.device),
            dialect_unresolved: self.negotiator.is_unresolved(&self.device),
            active_profile: self.store.active_name(),
        }
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    fn needs_dispatch(&self, channel: Channel, target: u8) -> bool {
        self.state
            .last_commanded
            .get(&channel)
            .is_none_or(|&last| last.abs_diff(target) > self.settings.debounce_epsilon)
    }

    /// Send every changed target: fans first, then the pump.
    ///
    /// A failed channel is logged and skipped; the rest still dispatch.
    async fn dispatch(&mut self, targets: &ChannelTargets) {
        let fans: Vec<(u8, u8)> = targets
            .iter()
            .filter_map(|(channel, &target)| match channel {
                Channel::Fan(index) => Some((*index, target)),
                _ => None,
            })
            .collect();

        if self.global_addressing() {
            self.dispatch_all_fans(&fans).await;
        } else {
            for &(index, target) in &fans {
                let channel = Channel::Fan(index);
                if !self.needs_dispatch(channel, target) {
                    continue;
                }
                match self.negotiator.dispatch(&self.device, channel, target).await {
                    Ok(dialect) if dialect.addressing.is_global() => {
                        // The device only takes fans together; this command
                        // already set every fan to `target`.
                        self.state.last_commanded.insert(Channel::AllFans, target);
                        self.dispatch_all_fans(&fans).await;
                        break;
                    }
                    Ok(_) => {
                        self.state.last_commanded.insert(channel, target);
                    }
                    Err(e) => self.log_dispatch_failure(channel, target, &e),
                }
            }
        }

        if let Some(&target) = targets.get(&Channel::Pump) {
            self.dispatch_pump(target).await;
        }
    }

    fn global_addressing(&self) -> bool {
        self.negotiator
            .dialect(&self.device)
            .is_some_and(|d| d.addressing.is_global())
    }

    /// One aggregate command carrying the highest fan target.
    async fn dispatch_all_fans(&mut self, fans: &[(u8, u8)]) {
        let Some(target) = fans.iter().map(|&(_, t)| t).max() else {
            return;
        };
        if !self.needs_dispatch(Channel::AllFans, target) {
            return;
        }
        match self
            .negotiator
            .dispatch(&self.device, Channel::AllFans, target)
            .await
        {
            Ok(_) => {
                self.state.last_commanded.insert(Channel::AllFans, target);
            }
            Err(e) => self.log_dispatch_failure(Channel::AllFans, target, &e),
        }
    }

    async fn dispatch_pump(&mut self, target: u8) {
        if !self.needs_dispatch(Channel::Pump, target) {
            return;
        }
        let resolved_before = self.negotiator.dialect(&self.device).is_some();

        match self
            .negotiator
            .dispatch(&self.device, Channel::Pump, target)
            .await
        {
            Ok(_) => {
                self.state.last_commanded.insert(Channel::Pump, target);
                self.pump_accepted = true;
            }
            // A pump that has taken commands before only failed this once;
            // the unchanged last value makes the next tick retry.
            Err(e) if resolved_before && !self.pump_accepted && !e.is_transient() => {
                warn!(
                    device = %self.device,
                    error = %e,
                    "Pump rejected speed command; pump control disabled until reconnect"
                );
                self.pump_unsupported = true;
            }
            Err(e) => self.log_dispatch_failure(Channel::Pump, target, &e),
        }
    }

    fn log_dispatch_failure(&self, channel: Channel, percent: u8, error: &ControlError) {
        if matches!(error, ControlError::DialectUnresolved { .. }) {
            debug!(device = %self.device, %channel, percent, "Skipping command, dialect unresolved");
        } else {
            warn!(device = %self.device, %channel, percent, error = %error, "Speed command failed");
        }
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    fn apply(&mut self, command: ControlCommand) {
        debug!(?command, "Control command");
        match command {
            ControlCommand::SetManual { channel, percent } => {
                self.manual.set(channel, percent, self.link_fans);
                self.persist_pending = true;
            }
            ControlCommand::ClearManual => {
                self.manual.clear();
                self.persist_pending = true;
            }
            ControlCommand::SetLinkFans(linked) => {
                self.link_fans = linked;
                self.persist_pending = true;
            }
            ControlCommand::ApplyProfile { name, targets } => self.apply_profile(&name, targets),
            ControlCommand::UpdateSafety(safety) => {
                info!(enabled = safety.enabled, "Safety settings updated");
                self.safety_config = safety;
            }
            ControlCommand::UpdateCurves(curves) => {
                for (source, curve) in [("cpu", &curves.cpu), ("water", &curves.water)] {
                    if !curve.is_monotonic() {
                        warn!(source, "Curve percentages decrease as temperature rises");
                    }
                }
                info!(enabled = curves.enabled, "Curve settings updated");
                self.curves = curves;
            }
            ControlCommand::Renegotiate => self.reset_session(),
        }
    }

    /// Replace manual targets with the channels of `targets` the device has.
    fn apply_profile(&mut self, name: &str, targets: ChannelTargets) {
        let capabilities = self.capabilities();
        let known = !capabilities.fans.is_empty() || capabilities.pump_present;

        let (kept, ignored): (ChannelTargets, ChannelTargets) = targets
            .into_iter()
            .partition(|&(channel, _)| !known || capabilities.supports(channel));
        if !ignored.is_empty() {
            info!(
                profile = name,
                ignored = ?ignored.keys().map(Channel::to_string).collect::<Vec<_>>(),
                "Profile channels not present on this device were ignored"
            );
        }

        self.manual = ManualTargets::from_targets(kept);
        info!(profile = name, "Profile applied");
        self.persist_pending = true;
    }

    /// Write pending manual state on the blocking pool.
    async fn persist(&mut self) {
        if !std::mem::take(&mut self.persist_pending) {
            return;
        }
        let store = Arc::clone(&self.store);
        let manual = self.manual.as_targets().clone();
        let linked = self.link_fans;

        match tokio::task::spawn_blocking(move || store.set_control_state(&manual, linked)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to persist manual targets"),
            Err(e) => warn!(error = %e, "Manual target write did not complete"),
        }
    }
}
