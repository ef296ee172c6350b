use crate::TrafficDirection;
use serde::{Deserialize, Serialize};

/// Process-wide feature flags for listener synthesis.
///
/// A `Config` is fixed for the lifetime of a builder and passed to every computation, so
/// different flag combinations can be exercised side by side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Detect the protocol of inbound connections on ports with no declared protocol.
    pub sniff_inbound: bool,

    /// Detect the protocol of outbound connections on ports with no declared protocol.
    pub sniff_outbound: bool,

    /// Reject connections that re-enter the virtual outbound port.
    pub loop_blocker: bool,

    pub mongo_filter: bool,
    pub mysql_filter: bool,
    pub redis_filter: bool,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            sniff_inbound: true,
            sniff_outbound: true,
            loop_blocker: true,
            mongo_filter: true,
            mysql_filter: false,
            redis_filter: false,
        }
    }
}

impl Config {
    pub fn sniffs(&self, direction: TrafficDirection) -> bool {
        match direction {
            TrafficDirection::Inbound => self.sniff_inbound,
            TrafficDirection::Outbound => self.sniff_outbound,
        }
    }
}
