use crate::{
    push::OutboundTrafficPolicy,
    service::{Port, Service, ServiceInstance},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

/// The workload whose listeners are being computed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proxy {
    pub id: String,
    pub namespace: String,

    #[serde(default)]
    pub kind: ProxyKind,

    pub ip_addresses: Vec<IpAddr>,

    #[serde(default)]
    pub interception_mode: InterceptionMode,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub sidecar_scope: SidecarScope,

    #[serde(default)]
    pub service_instances: Vec<ServiceInstance>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    #[default]
    Sidecar,
    Gateway,
}

/// How traffic reaches the proxy.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InterceptionMode {
    /// Traffic is redirected with iptables `REDIRECT`.
    #[default]
    Redirect,

    /// Traffic is redirected with iptables `TPROXY`, preserving the source address.
    Tproxy,

    /// Nothing is intercepted; applications address the proxy directly.
    None,
}

/// The capture mode of a single sidecar ingress or egress declaration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaptureMode {
    /// Inherit the proxy's interception mode.
    #[default]
    Default,
    Iptables,
    None,
}

/// The address a listener binds to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Bind {
    Addr(IpAddr),

    /// A unix domain socket, written as `unix://<path>`.
    Pipe(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BindError {
    #[error("invalid bind address {0:?}: expected an IP address or a unix:// path")]
    Invalid(String),

    #[error("unix socket bind {0:?} has an empty path")]
    EmptyPath(String),
}

/// The resolved sidecar configuration that applies to a proxy.
///
/// When `ingress` is non-empty it fully replaces the default of one inbound listener per
/// service instance; likewise for `egress` and outbound listeners.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarScope {
    #[serde(default)]
    pub ingress: Vec<IngressListener>,

    #[serde(default)]
    pub egress: Vec<EgressListener>,

    #[serde(default)]
    pub outbound_traffic_policy: Option<OutboundTrafficPolicy>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressListener {
    pub port: Port,

    #[serde(default)]
    pub bind: Option<Bind>,

    #[serde(default)]
    pub capture_mode: CaptureMode,

    /// Where accepted traffic is forwarded, e.g. `127.0.0.1:8080` or `unix:///var/run/app.sock`.
    pub default_endpoint: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressListener {
    /// The port this declaration applies to. `None` declares the catch-all egress scope.
    #[serde(default)]
    pub port: Option<Port>,

    #[serde(default)]
    pub bind: Option<Bind>,

    #[serde(default)]
    pub capture_mode: CaptureMode,

    /// Host selectors in `namespace/host` form.
    pub hosts: Vec<String>,
}

// === impl Proxy ===

impl Proxy {
    pub fn is_ipv6_only(&self) -> bool {
        !self.ip_addresses.is_empty() && self.ip_addresses.iter().all(IpAddr::is_ipv6)
    }

    pub fn has_ipv4(&self) -> bool {
        self.ip_addresses.is_empty() || self.ip_addresses.iter().any(IpAddr::is_ipv4)
    }

    pub fn has_ipv6(&self) -> bool {
        self.ip_addresses.iter().any(IpAddr::is_ipv6)
    }

    /// The unspecified address of the proxy's preferred address family.
    pub fn wildcard(&self) -> IpAddr {
        if self.is_ipv6_only() {
            Ipv6Addr::UNSPECIFIED.into()
        } else {
            Ipv4Addr::UNSPECIFIED.into()
        }
    }

    /// The loopback address of the proxy's preferred address family.
    pub fn localhost(&self) -> IpAddr {
        if self.is_ipv6_only() {
            Ipv6Addr::LOCALHOST.into()
        } else {
            Ipv4Addr::LOCALHOST.into()
        }
    }

    pub fn intercepts(&self) -> bool {
        self.interception_mode != InterceptionMode::None
    }

    /// Resolves a declaration's capture mode against the proxy's interception mode.
    pub fn captures(&self, mode: CaptureMode) -> bool {
        match mode {
            CaptureMode::Default => self.intercepts(),
            CaptureMode::Iptables => true,
            CaptureMode::None => false,
        }
    }
}

// === impl Bind ===

impl Bind {
    pub fn is_pipe(&self) -> bool {
        matches!(self, Self::Pipe(_))
    }
}

impl From<IpAddr> for Bind {
    fn from(addr: IpAddr) -> Self {
        Self::Addr(addr)
    }
}

impl FromStr for Bind {
    type Err = BindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix://") {
            if path.is_empty() {
                return Err(BindError::EmptyPath(s.to_string()));
            }
            return Ok(Self::Pipe(s.to_string()));
        }
        s.parse()
            .map(Self::Addr)
            .map_err(|_| BindError::Invalid(s.to_string()))
    }
}

impl TryFrom<String> for Bind {
    type Error = BindError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Bind> for String {
    fn from(bind: Bind) -> Self {
        bind.to_string()
    }
}

impl fmt::Display for Bind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Addr(addr) => addr.fmt(f),
            Self::Pipe(path) => f.write_str(path),
        }
    }
}

// === impl EgressListener ===

impl EgressListener {
    /// Indicates whether any of this declaration's host selectors selects `service` for a
    /// proxy in `proxy_namespace`.
    pub fn selects(&self, service: &Service, proxy_namespace: &str) -> bool {
        self.hosts.iter().any(|host| {
            let (ns, host) = host.split_once('/').unwrap_or(("*", host.as_str()));
            let ns_matches = match ns {
                "*" => true,
                "~" => false,
                "." => service.namespace == proxy_namespace,
                ns => service.namespace == ns,
            };
            ns_matches && host_matches(host, &service.hostname)
        })
    }
}

fn host_matches(pattern: &str, hostname: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_prefix("*.") {
        Some(suffix) => hostname
            .strip_suffix(suffix)
            .map(|prefix| prefix.ends_with('.') && prefix.len() > 1)
            .unwrap_or(false),
        None => pattern.eq_ignore_ascii_case(hostname),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(ns: &str, hostname: &str) -> Service {
        Service {
            hostname: hostname.to_string(),
            namespace: ns.to_string(),
            address: None,
            ports: vec![],
        }
    }

    fn egress(hosts: &[&str]) -> EgressListener {
        EgressListener {
            port: None,
            bind: None,
            capture_mode: CaptureMode::Default,
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
        }
    }

    #[test]
    fn parses_binds() {
        assert_eq!(
            "10.0.0.1".parse::<Bind>(),
            Ok(Bind::Addr("10.0.0.1".parse().unwrap()))
        );
        assert_eq!(
            "unix:///var/run/app.sock".parse::<Bind>(),
            Ok(Bind::Pipe("unix:///var/run/app.sock".to_string()))
        );
        assert!(matches!("unix://".parse::<Bind>(), Err(BindError::EmptyPath(_))));
        assert!(matches!("nope".parse::<Bind>(), Err(BindError::Invalid(_))));
    }

    #[test]
    fn egress_host_selectors() {
        let a = svc("ns-a", "a.ns-a.svc.cluster.local");
        let b = svc("ns-b", "b.ns-b.svc.cluster.local");

        assert!(egress(&["*/*"]).selects(&a, "ns-a"));
        assert!(egress(&["./*"]).selects(&a, "ns-a"));
        assert!(!egress(&["./*"]).selects(&b, "ns-a"));
        assert!(egress(&["ns-b/*"]).selects(&b, "ns-a"));
        assert!(!egress(&["~/*"]).selects(&a, "ns-a"));
        assert!(egress(&["*/*.svc.cluster.local"]).selects(&b, "ns-a"));
        assert!(!egress(&["*/*.cluster.local"]).selects(&svc("x", "cluster.local"), "x"));
        assert!(egress(&["a.ns-a.svc.cluster.local"]).selects(&a, "ns-b"));
        assert!(!egress(&[]).selects(&a, "ns-a"));
    }

    #[test]
    fn wildcard_follows_address_family() {
        let mut proxy = Proxy {
            id: "p".to_string(),
            namespace: "ns".to_string(),
            kind: ProxyKind::Sidecar,
            ip_addresses: vec!["fd00::1".parse().unwrap()],
            interception_mode: InterceptionMode::Redirect,
            labels: Default::default(),
            sidecar_scope: Default::default(),
            service_instances: vec![],
        };
        assert_eq!(proxy.wildcard(), IpAddr::from(Ipv6Addr::UNSPECIFIED));
        assert_eq!(proxy.localhost(), IpAddr::from(Ipv6Addr::LOCALHOST));

        proxy.ip_addresses.push("10.0.0.1".parse().unwrap());
        assert_eq!(proxy.wildcard(), IpAddr::from(Ipv4Addr::UNSPECIFIED));
        assert!(proxy.has_ipv4() && proxy.has_ipv6());
    }
}
