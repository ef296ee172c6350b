use crate::{FilterChainMatch, TrafficDirection};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, net::IpAddr, time::Duration};

/// A bind address (or pipe) at which a proxy accepts connections.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    /// `<bind>_<port>` for listeners derived from services; pipes use their path as the bind.
    pub name: String,
    pub address: ListenerAddress,
    pub direction: TrafficDirection,

    #[serde(default)]
    pub filter_chains: Vec<FilterChain>,

    /// Handles every connection no explicit chain matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_filter_chain: Option<FilterChain>,

    #[serde(default)]
    pub listener_filters: Vec<ListenerFilter>,

    /// How long listener filters may inspect a connection before a chain is chosen.
    #[serde(with = "crate::duration")]
    pub listener_filters_timeout: Duration,

    #[serde(default)]
    pub continue_on_listener_filters_timeout: bool,

    /// When false, the listener only receives connections handed off by a capture listener.
    pub bind_to_port: bool,

    #[serde(default)]
    pub use_original_dst: bool,

    #[serde(default)]
    pub transparent: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ListenerAddress {
    Socket { address: IpAddr, port: u16 },
    Pipe { path: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterChain {
    pub name: String,

    #[serde(default)]
    pub filter_chain_match: FilterChainMatch,

    /// Downstream TLS settings used when the chain terminates TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_socket: Option<DownstreamTls>,

    pub filters: Vec<NetworkFilter>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamTls {
    pub require_client_certificate: bool,

    #[serde(default)]
    pub alpn_protocols: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_name: Option<String>,
}

/// Listener filters run before a filter chain is selected.
///
/// The declaration order is the order in which a listener runs them: original destination
/// recovery first, then TLS inspection, then HTTP inspection (which would misread encrypted
/// bytes if it ran before the TLS inspector).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerFilter {
    OriginalDst,
    OriginalSrc,
    TlsInspector,
    HttpInspector,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NetworkFilter {
    HttpConnectionManager(HttpConnectionManager),
    TcpProxy(TcpProxy),
    ThriftProxy(ThriftProxy),
    MongoProxy { stat_prefix: String },
    MysqlProxy { stat_prefix: String },
    RedisProxy { stat_prefix: String, cluster: String },
    Extension(FilterConfig),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConnectionManager {
    pub stat_prefix: String,

    /// The route configuration served by the route generator for this chain.
    pub route_config_name: String,

    #[serde(default)]
    pub codec: CodecType,

    #[serde(default)]
    pub http_filters: Vec<FilterConfig>,

    #[serde(default)]
    pub allow_absolute_url: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecType {
    #[default]
    Auto,
    Http1,
    Http2,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpProxy {
    pub stat_prefix: String,
    pub cluster: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThriftProxy {
    pub stat_prefix: String,
    pub route_config_name: String,
}

/// An opaque filter contributed by a plugin.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterConfig {
    pub name: String,

    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

// === impl Listener ===

impl Listener {
    /// Builds a listener with no chains and no listener filters.
    pub fn new(
        name: impl ToString,
        address: ListenerAddress,
        direction: TrafficDirection,
        listener_filters_timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            address,
            direction,
            filter_chains: Vec::new(),
            default_filter_chain: None,
            listener_filters: Vec::new(),
            listener_filters_timeout,
            continue_on_listener_filters_timeout: false,
            bind_to_port: true,
            use_original_dst: false,
            transparent: false,
        }
    }

    /// Iterates over the explicit chains followed by the default chain, if any.
    pub fn all_filter_chains(&self) -> impl Iterator<Item = &FilterChain> {
        self.filter_chains
            .iter()
            .chain(self.default_filter_chain.as_ref())
    }

    /// Adds a listener filter, keeping the list free of duplicates and in execution order.
    pub fn add_listener_filter(&mut self, filter: ListenerFilter) {
        if !self.listener_filters.contains(&filter) {
            self.listener_filters.push(filter);
            self.listener_filters.sort();
        }
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }
}

// === impl ListenerAddress ===

impl ListenerAddress {
    pub fn port(&self) -> u16 {
        match self {
            Self::Socket { port, .. } => *port,
            Self::Pipe { .. } => 0,
        }
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self {
            Self::Socket { address, .. } => Some(*address),
            Self::Pipe { .. } => None,
        }
    }
}

impl fmt::Display for ListenerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Socket { address, port } => write!(f, "{}_{}", address, port),
            Self::Pipe { path } => write!(f, "{}_0", path),
        }
    }
}

// === impl FilterChain ===

impl FilterChain {
    pub fn requires_tls_inspector(&self) -> bool {
        self.filter_chain_match.requires_tls_inspector()
    }

    pub fn is_http(&self) -> bool {
        self.filters
            .iter()
            .any(|f| matches!(f, NetworkFilter::HttpConnectionManager(_)))
    }
}
