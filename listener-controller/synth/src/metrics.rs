use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

/// Counters describing degraded synthesis results.
///
/// Metrics are shared by every concurrent computation; they are written as a side effect and
/// never influence the listeners a computation produces.
#[derive(Clone, Debug, Default)]
pub struct SynthMetrics {
    conflicts: Family<ConflictLabels, Counter>,
    dropped: Family<DropLabels, Counter>,
    plugin_errors: Family<PluginLabels, Counter>,
    auto_skipped: Counter,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum ConflictKind {
    /// Two service instances with different hostnames claimed the same inbound port.
    InboundListener,
    TcpOverTcp,
    ThriftOverThrift,
    AutoOverAuto,

    /// A protocol that can't share a listener was requested on an occupied port.
    ExclusiveProtocol,
    DuplicateFilterChain,
    DuplicateCatchAll,
    GatewayFilterChain,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum DropReason {
    NoFilterChains,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ConflictLabels {
    kind: ConflictKind,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct DropLabels {
    reason: DropReason,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PluginLabels {
    plugin: String,
}

// === impl SynthMetrics ===

impl SynthMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let conflicts = Family::<ConflictLabels, Counter>::default();
        reg.register(
            "listener_conflicts",
            "Count of conflicting listener or filter chain requests that were discarded",
            conflicts.clone(),
        );

        let dropped = Family::<DropLabels, Counter>::default();
        reg.register(
            "listeners_dropped",
            "Count of listeners discarded after synthesis",
            dropped.clone(),
        );

        let plugin_errors = Family::<PluginLabels, Counter>::default();
        reg.register(
            "plugin_errors",
            "Count of plugin callbacks that failed",
            plugin_errors.clone(),
        );

        let auto_skipped = Counter::default();
        reg.register(
            "auto_filter_chains_skipped",
            "Count of protocol detection filter chains skipped because a candidate contradicted a match option",
            auto_skipped.clone(),
        );

        Self {
            conflicts,
            dropped,
            plugin_errors,
            auto_skipped,
        }
    }

    pub(crate) fn conflict(&self, kind: ConflictKind) {
        self.conflicts.get_or_create(&ConflictLabels { kind }).inc();
    }

    pub(crate) fn dropped(&self, reason: DropReason) {
        self.dropped.get_or_create(&DropLabels { reason }).inc();
    }

    pub(crate) fn plugin_error(&self, plugin: &str) {
        self.plugin_errors
            .get_or_create(&PluginLabels {
                plugin: plugin.to_string(),
            })
            .inc();
    }

    pub(crate) fn auto_skipped(&self) {
        self.auto_skipped.inc();
    }

    // Reads never create a series, so an unrecorded label set isn't exported as zero.

    pub fn conflicts(&self, kind: ConflictKind) -> u64 {
        self.conflicts
            .get(&ConflictLabels { kind })
            .map_or(0, |c| c.get())
    }

    pub fn listeners_dropped(&self, reason: DropReason) -> u64 {
        self.dropped
            .get(&DropLabels { reason })
            .map_or(0, |c| c.get())
    }

    pub fn plugin_errors(&self, plugin: &str) -> u64 {
        self.plugin_errors
            .get(&PluginLabels {
                plugin: plugin.to_string(),
            })
            .map_or(0, |c| c.get())
    }

    pub fn auto_filter_chains_skipped(&self) -> u64 {
        self.auto_skipped.get()
    }
}
