use crate::{
    gateway::Gateway,
    proxy::{EgressListener, Proxy},
    service::Service,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

/// A frozen snapshot of mesh state shared by every proxy computation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushContext {
    #[serde(default)]
    pub mesh: MeshConfig,

    #[serde(default)]
    pub services: Vec<Arc<Service>>,

    #[serde(default)]
    pub gateways: Vec<Gateway>,

    #[serde(default)]
    pub peer_authentications: Vec<PeerAuthentication>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeshConfig {
    pub outbound_traffic_policy: OutboundTrafficPolicy,

    /// When set, sidecars expose an HTTP forward-proxy listener on this port.
    pub proxy_http_port: Option<u16>,

    /// The port iptables redirects outbound traffic to.
    pub virtual_outbound_port: u16,

    /// The port iptables redirects inbound traffic to.
    pub virtual_inbound_port: u16,

    #[serde(with = "crate::duration")]
    pub protocol_detection_timeout: Duration,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundTrafficPolicy {
    /// Traffic to destinations outside the registry is passed through.
    #[default]
    AllowAny,

    /// Traffic to destinations outside the registry is dropped.
    RegistryOnly,
}

/// Mutual TLS requirements for traffic arriving at a workload.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MtlsMode {
    Disable,
    #[default]
    Permissive,
    Strict,
}

/// A peer authentication policy.
///
/// A policy without a namespace applies mesh-wide; a policy with a namespace and an empty
/// selector applies to the namespace; a policy with a selector applies to matching workloads in
/// its namespace and may override the mode per port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerAuthentication {
    #[serde(default)]
    pub namespace: Option<String>,

    #[serde(default)]
    pub selector: BTreeMap<String, String>,

    pub mode: MtlsMode,

    #[serde(default)]
    pub port_modes: BTreeMap<u16, MtlsMode>,
}

// === impl MeshConfig ===

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            outbound_traffic_policy: OutboundTrafficPolicy::AllowAny,
            proxy_http_port: None,
            virtual_outbound_port: 15001,
            virtual_inbound_port: 15006,
            protocol_detection_timeout: Duration::from_millis(100),
        }
    }
}

// === impl PushContext ===

impl PushContext {
    /// Returns the services selected by an egress declaration, ordered by hostname and
    /// namespace.
    pub fn egress_services(&self, egress: &EgressListener, proxy: &Proxy) -> Vec<Arc<Service>> {
        let mut services = self
            .services
            .iter()
            .filter(|svc| egress.selects(svc, &proxy.namespace))
            .cloned()
            .collect::<Vec<_>>();
        services.sort_by(|a, b| {
            a.hostname
                .cmp(&b.hostname)
                .then_with(|| a.namespace.cmp(&b.namespace))
        });
        services
    }

    /// Returns the gateways whose selector matches the proxy's labels, ordered by namespace
    /// and name.
    pub fn gateways_for(&self, proxy: &Proxy) -> Vec<&Gateway> {
        let mut gateways = self
            .gateways
            .iter()
            .filter(|gw| {
                gw.selector
                    .iter()
                    .all(|(k, v)| proxy.labels.get(k) == Some(v))
            })
            .collect::<Vec<_>>();
        gateways.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
        gateways
    }

    /// Resolves the mutual TLS mode for traffic to `port` on the proxy.
    pub fn mtls_mode(&self, proxy: &Proxy, port: u16) -> MtlsMode {
        let in_ns = |pa: &&PeerAuthentication| pa.namespace.as_deref() == Some(&*proxy.namespace);

        let workload = self.peer_authentications.iter().filter(in_ns).find(|pa| {
            !pa.selector.is_empty()
                && pa
                    .selector
                    .iter()
                    .all(|(k, v)| proxy.labels.get(k) == Some(v))
        });
        if let Some(pa) = workload {
            return pa.port_modes.get(&port).copied().unwrap_or(pa.mode);
        }

        let namespace = self
            .peer_authentications
            .iter()
            .filter(in_ns)
            .find(|pa| pa.selector.is_empty());
        if let Some(pa) = namespace {
            return pa.mode;
        }

        self.peer_authentications
            .iter()
            .find(|pa| pa.namespace.is_none())
            .map(|pa| pa.mode)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{InterceptionMode, ProxyKind};

    fn proxy() -> Proxy {
        Proxy {
            id: "pod-0.ns".to_string(),
            namespace: "ns".to_string(),
            kind: ProxyKind::Sidecar,
            ip_addresses: vec!["10.0.0.1".parse().unwrap()],
            interception_mode: InterceptionMode::Redirect,
            labels: Some(("app".to_string(), "web".to_string()))
                .into_iter()
                .collect(),
            sidecar_scope: Default::default(),
            service_instances: vec![],
        }
    }

    fn pa(ns: Option<&str>, selector: Option<(&str, &str)>, mode: MtlsMode) -> PeerAuthentication {
        PeerAuthentication {
            namespace: ns.map(ToString::to_string),
            selector: selector
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            mode,
            port_modes: Default::default(),
        }
    }

    #[test]
    fn mtls_defaults_to_permissive() {
        assert_eq!(PushContext::default().mtls_mode(&proxy(), 80), MtlsMode::Permissive);
    }

    #[test]
    fn mtls_most_specific_policy_wins() {
        let mut push = PushContext {
            peer_authentications: vec![
                pa(None, None, MtlsMode::Strict),
                pa(Some("other"), None, MtlsMode::Disable),
            ],
            ..Default::default()
        };
        assert_eq!(push.mtls_mode(&proxy(), 80), MtlsMode::Strict);

        push.peer_authentications
            .push(pa(Some("ns"), None, MtlsMode::Permissive));
        assert_eq!(push.mtls_mode(&proxy(), 80), MtlsMode::Permissive);

        let mut workload = pa(Some("ns"), Some(("app", "web")), MtlsMode::Strict);
        workload.port_modes.insert(8080, MtlsMode::Disable);
        push.peer_authentications.push(workload);
        assert_eq!(push.mtls_mode(&proxy(), 80), MtlsMode::Strict);
        assert_eq!(push.mtls_mode(&proxy(), 8080), MtlsMode::Disable);

        push.peer_authentications
            .push(pa(Some("ns"), Some(("app", "db")), MtlsMode::Disable));
        assert_eq!(push.mtls_mode(&proxy(), 80), MtlsMode::Strict);
    }

    #[test]
    fn mesh_config_defaults() {
        let mesh: MeshConfig = serde_json::from_str(r#"{"protocolDetectionTimeout":"1s"}"#).unwrap();
        assert_eq!(mesh.virtual_outbound_port, 15001);
        assert_eq!(mesh.virtual_inbound_port, 15006);
        assert_eq!(mesh.protocol_detection_timeout, Duration::from_secs(1));
    }
}
