use crate::service::Port;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, net::IpAddr};

/// A gateway resource describing the ports a gateway proxy exposes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub name: String,
    pub namespace: String,

    /// Labels a gateway proxy must carry for this gateway to apply to it.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    pub servers: Vec<GatewayServer>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayServer {
    pub port: Port,
    pub hosts: Vec<String>,

    #[serde(default)]
    pub bind: Option<IpAddr>,

    #[serde(default)]
    pub tls: Option<ServerTls>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTls {
    pub mode: TlsMode,

    #[serde(default)]
    pub credential_name: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TlsMode {
    /// Forward the TLS stream untouched, routing on SNI.
    Passthrough,
    Simple,
    Mutual,
    IstioMutual,
}

// === impl GatewayServer ===

impl GatewayServer {
    /// Hosts usable as SNI match values; a bare `*` matches every name and is omitted.
    pub fn sni_hosts(&self) -> Vec<String> {
        let mut hosts = self
            .hosts
            .iter()
            .map(|h| h.split_once('/').map(|(_, h)| h).unwrap_or(h))
            .filter(|h| *h != "*")
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    /// Indicates whether this server terminates TLS at the gateway.
    pub fn terminates_tls(&self) -> bool {
        matches!(
            self.tls.as_ref().map(|tls| tls.mode),
            Some(TlsMode::Simple | TlsMode::Mutual | TlsMode::IstioMutual)
        )
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(
            self.tls.as_ref().map(|tls| tls.mode),
            Some(TlsMode::Passthrough)
        )
    }
}
