use crate::{IpNet, Protocol};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, net::IpAddr, sync::Arc};

/// A port declared by a service (or a sidecar scope).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Port {
    #[serde(default)]
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
}

/// A registry service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub hostname: String,
    pub namespace: String,

    /// The service's virtual address: a single VIP, a CIDR, or unset for services that have no
    /// address of their own (headless and most external services).
    #[serde(default)]
    pub address: Option<IpNet>,

    #[serde(default)]
    pub ports: Vec<Port>,
}

/// How a service's address constrains the listeners built for it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServiceAddress {
    Wildcard,
    Vip(IpAddr),
    Cidr(IpNet),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: IpAddr,
    pub port: u16,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Binds a service port to a concrete endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInstance {
    pub service: Arc<Service>,
    pub service_port: Port,
    pub endpoint: Endpoint,
}

// === impl Port ===

impl Port {
    pub fn new(name: impl ToString, port: u16, protocol: Protocol) -> Self {
        Self {
            name: name.to_string(),
            port,
            protocol,
        }
    }

    /// Builds a port whose protocol is inferred from its name.
    pub fn inferred(name: impl ToString, port: u16) -> Self {
        let name = name.to_string();
        let protocol = Protocol::from_port_name(&name);
        Self {
            name,
            port,
            protocol,
        }
    }
}

// === impl Service ===

impl Service {
    pub fn port(&self, number: u16) -> Option<&Port> {
        self.ports.iter().find(|p| p.port == number)
    }

    pub fn resolved_address(&self) -> ServiceAddress {
        match self.address {
            None => ServiceAddress::Wildcard,
            Some(net) if net.addr().is_unspecified() => ServiceAddress::Wildcard,
            Some(net) if net.prefix_len() == net.max_prefix_len() => ServiceAddress::Vip(net.addr()),
            Some(net) => ServiceAddress::Cidr(net.trunc()),
        }
    }
}
