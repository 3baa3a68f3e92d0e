//! Per-device command dialect discovery.
//!
//! The first speed command sent to a device walks the candidate dialects in
//! order; the first accepted candidate is cached and reused for every later
//! command. A device that rejects every candidate is marked unresolved and
//! fails fast until [`CommandNegotiator::renegotiate`] is called.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::device::{DeviceAdapter, with_timeout};
use crate::error::{ControlError, Result};
use crate::protocol::{Channel, Dialect};

/// Negotiation outcome for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DialectState {
    Resolved(Dialect),
    /// Every candidate was rejected.
    Unresolved,
}

/// Discovers and caches the dialect each device accepts.
pub struct CommandNegotiator {
    adapter: Arc<dyn DeviceAdapter>,
    timeout: Duration,
    states: HashMap<String, DialectState>,
    probe_cycles: HashMap<String, u32>,
}

impl CommandNegotiator {
    /// # Arguments
    /// * `adapter` - Driver boundary used for every attempt
    /// * `timeout` - Upper bound on each individual attempt
    pub fn new(adapter: Arc<dyn DeviceAdapter>, timeout: Duration) -> Self {
        Self {
            adapter,
            timeout,
            states: HashMap::new(),
            probe_cycles: HashMap::new(),
        }
    }

    /// Cached dialect for `device`, if negotiation succeeded.
    pub fn dialect(&self, device: &str) -> Option<Dialect> {
        match self.states.get(device) {
            Some(DialectState::Resolved(dialect)) => Some(*dialect),
            _ => None,
        }
    }

    /// Whether every candidate was rejected for `device`.
    pub fn is_unresolved(&self, device: &str) -> bool {
        self.states.get(device) == Some(&DialectState::Unresolved)
    }

    /// Number of full probe cycles started for `device` this session.
    pub fn probe_cycles(&self, device: &str) -> u32 {
        self.probe_cycles.get(device).copied().unwrap_or(0)
    }

    /// Forget the cached dialect and unresolved mark for `device`.
    ///
    /// The next dispatch probes again.
    pub fn renegotiate(&mut self, device: &str) {
        if self.states.remove(device).is_some() {
            info!(device, "Dialect cleared, renegotiating on next command");
        }
    }

    /// Send a speed command, negotiating the dialect first if needed.
    ///
    /// Returns the dialect the command was sent with.
    ///
    /// # Errors
    /// `DialectUnresolved` when the device rejected every candidate (now or
    /// earlier this session); otherwise the adapter's error for a command
    /// sent with an already resolved dialect.
    pub async fn dispatch(&mut self, device: &str, channel: Channel, percent: u8) -> Result<Dialect> {
        channel.validate_percent(percent)?;

        match self.states.get(device).copied() {
            Some(DialectState::Resolved(dialect)) => {
                self.send(device, channel, percent, dialect).await?;
                Ok(dialect)
            }
            Some(DialectState::Unresolved) => Err(ControlError::DialectUnresolved {
                device: device.to_string(),
            }),
            None => self.probe(device, channel, percent).await,
        }
    }

    /// Try each candidate in order; the accepted attempt doubles as the
    /// real command.
    async fn probe(&mut self, device: &str, channel: Channel, percent: u8) -> Result<Dialect> {
        *self.probe_cycles.entry(device.to_string()).or_insert(0) += 1;
        info!(device, %channel, "Probing command dialect");

        let mut last_error = None;
        for dialect in Dialect::candidates_for(channel) {
            match self.send(device, channel, percent, dialect).await {
                Ok(()) => {
                    info!(device, %dialect, "Command dialect resolved");
                    self.states
                        .insert(device.to_string(), DialectState::Resolved(dialect));
                    return Ok(dialect);
                }
                Err(e) => {
                    debug!(device, %dialect, error = %e, "Dialect candidate rejected");
                    last_error = Some(e);
                }
            }
        }

        warn!(
            device,
            last_error = ?last_error.map(|e| e.to_string()),
            "Every command dialect was rejected; device marked unresolved"
        );
        self.states
            .insert(device.to_string(), DialectState::Unresolved);
        Err(ControlError::DialectUnresolved {
            device: device.to_string(),
        })
    }

    async fn send(&self, device: &str, channel: Channel, percent: u8, dialect: Dialect) -> Result<()> {
        let operation = format!("set {} {}% on '{}'", channel, percent, device);
        with_timeout(
            self.timeout,
            &operation,
            self.adapter.set_speed(device, channel, percent, dialect),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StatusFormat;
    use crate::protocol::{Addressing, Verb};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Accepts only dialects matching `accepts`, recording every attempt.
    struct ScriptedAdapter {
        accepts: fn(Dialect) -> bool,
        attempts: Mutex<Vec<(Channel, Dialect)>>,
    }

    impl ScriptedAdapter {
        fn new(accepts: fn(Dialect) -> bool) -> Arc<Self> {
            Arc::new(Self {
                accepts,
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempt_count(&self) -> usize {
            self.attempts.lock().len()
        }
    }

    #[async_trait]
    impl DeviceAdapter for ScriptedAdapter {
        async fn initialize(&self, _device: &str) -> Result<()> {
            Ok(())
        }

        async fn status(&self, _device: &str, _format: StatusFormat) -> Result<String> {
            Ok(String::new())
        }

        async fn set_speed(&self, _device: &str, channel: Channel, _percent: u8, dialect: Dialect) -> Result<()> {
            self.attempts.lock().push((channel, dialect));
            if (self.accepts)(dialect) {
                Ok(())
            } else {
                Err(ControlError::CommandFailed {
                    command: dialect.to_string(),
                    status: "exit status: 1".into(),
                    stderr: "invalid channel".into(),
                })
            }
        }
    }

    fn negotiator(adapter: Arc<ScriptedAdapter>) -> CommandNegotiator {
        CommandNegotiator::new(adapter, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_resolves_first_accepted_candidate() {
        let adapter = ScriptedAdapter::new(|d| d.addressing == Addressing::IndexedSpaced && d.verb == Verb::Duty);
        let mut neg = negotiator(adapter.clone());

        let dialect = neg.dispatch("kraken", Channel::Fan(1), 40).await.unwrap();
        assert_eq!(dialect, Dialect::new(Verb::Duty, Addressing::IndexedSpaced));
        // compact speed, compact duty, spaced speed, spaced duty
        assert_eq!(adapter.attempt_count(), 4);
        assert_eq!(neg.dialect("kraken"), Some(dialect));
    }

    #[tokio::test]
    async fn test_single_probe_cycle_per_session() {
        let adapter = ScriptedAdapter::new(|d| d.addressing == Addressing::Global);
        let mut neg = negotiator(adapter.clone());

        neg.dispatch("dev", Channel::Fan(1), 30).await.unwrap();
        let after_probe = adapter.attempt_count();
        for percent in [35, 40, 45] {
            neg.dispatch("dev", Channel::Fan(1), percent).await.unwrap();
        }

        assert_eq!(neg.probe_cycles("dev"), 1);
        assert_eq!(adapter.attempt_count(), after_probe + 3);
    }

    #[tokio::test]
    async fn test_unresolved_fails_fast() {
        let adapter = ScriptedAdapter::new(|_| false);
        let mut neg = negotiator(adapter.clone());

        let err = neg.dispatch("dev", Channel::Fan(1), 50).await.unwrap_err();
        assert!(matches!(err, ControlError::DialectUnresolved { .. }));
        assert!(neg.is_unresolved("dev"));
        let probed = adapter.attempt_count();
        assert_eq!(probed, 8);

        let err = neg.dispatch("dev", Channel::Fan(1), 60).await.unwrap_err();
        assert!(matches!(err, ControlError::DialectUnresolved { .. }));
        assert_eq!(adapter.attempt_count(), probed);
    }

    #[tokio::test]
    async fn test_renegotiate_allows_new_probe() {
        let adapter = ScriptedAdapter::new(|_| false);
        let mut neg = negotiator(adapter.clone());

        let _ = neg.dispatch("dev", Channel::Pump, 70).await;
        assert_eq!(adapter.attempt_count(), 2);

        neg.renegotiate("dev");
        assert!(!neg.is_unresolved("dev"));
        let _ = neg.dispatch("dev", Channel::Pump, 70).await;
        assert_eq!(adapter.attempt_count(), 4);
        assert_eq!(neg.probe_cycles("dev"), 2);
    }

    #[tokio::test]
    async fn test_devices_negotiate_independently() {
        let adapter = ScriptedAdapter::new(|d| d.verb == Verb::Speed);
        let mut neg = negotiator(adapter.clone());

        neg.dispatch("a", Channel::Fan(1), 20).await.unwrap();
        neg.dispatch("b", Channel::Fan(1), 20).await.unwrap();
        assert_eq!(neg.probe_cycles("a"), 1);
        assert_eq!(neg.probe_cycles("b"), 1);
    }

    #[tokio::test]
    async fn test_invalid_percent_never_reaches_adapter() {
        let adapter = ScriptedAdapter::new(|_| true);
        let mut neg = negotiator(adapter.clone());

        assert!(neg.dispatch("dev", Channel::Fan(1), 101).await.is_err());
        assert_eq!(adapter.attempt_count(), 0);
        assert_eq!(neg.probe_cycles("dev"), 0);
    }
}
