use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::{CurveConfig, DaemonSettings, SafetyConfig};
use crate::protocol::ChannelTargets;

/// The single persisted settings document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredDocument {
    /// Named profiles: channel name to target percentage.
    pub profiles: BTreeMap<String, ChannelTargets>,
    /// Profile applied most recently, if it still exists.
    pub active_profile: Option<String>,
    pub safety: SafetyConfig,
    pub curves: CurveConfig,
    /// All fan channels share the `fans` manual value.
    pub link_fans: bool,
    /// Last manual targets, restored at startup.
    pub manual: ChannelTargets,
    pub daemon: DaemonSettings,
}
