use crate::{IpNet, PLAINTEXT_HTTP_ALPNS};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Selects the filter chain that handles a connection.
///
/// Every populated field must match; an empty field matches anything. Set-valued fields are
/// compared without regard to order (see [`FilterChainMatch::is_equivalent`]).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterChainMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<u16>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub prefix_ranges: Vec<IpNet>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub server_names: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_protocol: Option<TransportProtocol>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub application_protocols: Vec<String>,

    #[serde(skip_serializing_if = "SourceType::is_any")]
    pub source_type: SourceType,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_prefix_ranges: Vec<IpNet>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_ports: Vec<u16>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportProtocol {
    RawBuffer,
    Tls,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    Any,
    SameIpOrLoopback,
    External,
}

// === impl FilterChainMatch ===

impl FilterChainMatch {
    /// Returns a copy with every set-valued field sorted and deduplicated.
    pub fn normalized(&self) -> Self {
        fn canonical<T: Ord + Clone>(v: &[T]) -> Vec<T> {
            let mut v = v.to_vec();
            v.sort();
            v.dedup();
            v
        }

        Self {
            destination_port: self.destination_port,
            prefix_ranges: canonical(&self.prefix_ranges),
            server_names: canonical(&self.server_names),
            transport_protocol: self.transport_protocol,
            application_protocols: canonical(&self.application_protocols),
            source_type: self.source_type,
            source_prefix_ranges: canonical(&self.source_prefix_ranges),
            source_ports: canonical(&self.source_ports),
        }
    }

    /// Two matches are equivalent when every field compares equal, ignoring the order of
    /// set-valued fields. Equivalent matches can't coexist in one listener.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }

    /// Indicates whether this match accepts every connection.
    pub fn is_catch_all(&self) -> bool {
        self.destination_port.is_none()
            && self.prefix_ranges.is_empty()
            && self.server_names.is_empty()
            && self.transport_protocol.is_none()
            && self.application_protocols.is_empty()
            && self.source_type.is_any()
            && self.source_prefix_ranges.is_empty()
            && self.source_ports.is_empty()
    }

    /// Indicates whether the listener must inspect TLS handshakes for this match to be
    /// evaluated.
    pub fn requires_tls_inspector(&self) -> bool {
        !self.server_names.is_empty()
            || self.transport_protocol == Some(TransportProtocol::Tls)
            || self
                .application_protocols
                .iter()
                .any(|alpn| !PLAINTEXT_HTTP_ALPNS.contains(&alpn.as_str()))
    }

    /// Indicates whether the listener must sniff plaintext HTTP for this match to be
    /// evaluated.
    pub fn requires_http_inspector(&self) -> bool {
        self.application_protocols
            .iter()
            .any(|alpn| PLAINTEXT_HTTP_ALPNS.contains(&alpn.as_str()))
    }
}

impl From<IpNet> for FilterChainMatch {
    fn from(net: IpNet) -> Self {
        Self {
            prefix_ranges: vec![net],
            ..Default::default()
        }
    }
}

impl From<IpAddr> for FilterChainMatch {
    fn from(addr: IpAddr) -> Self {
        IpNet::from(addr).into()
    }
}

// === impl SourceType ===

impl SourceType {
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}
