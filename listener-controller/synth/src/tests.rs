mod inbound;
mod plugins;

use crate::{context::BuildContext, inbound::InboundListeners, outbound::OutboundEntries};
use crate::{ListenerBuilder, SynthMetrics};
use maplit::*;
use mesh_listener_controller_core::{
    listener::{FilterChain, Listener, NetworkFilter},
    plugin::{Plugin, PluginChain},
    proxy::{InterceptionMode, Proxy, ProxyKind},
    push::PushContext,
    service::{Endpoint, Port, Service, ServiceInstance},
    Config,
};
use std::sync::Arc;

#[test]
fn builds_nothing_for_an_idle_proxy() {
    let test = TestConfig::default();
    let mut proxy = mk_proxy("10.0.0.1");
    proxy.interception_mode = InterceptionMode::None;
    assert!(test.build(&proxy).is_empty());
}

struct TestConfig {
    config: Config,
    push: PushContext,
    metrics: SynthMetrics,
    plugins: Vec<Arc<dyn Plugin>>,
    _tracing: tracing::subscriber::DefaultGuard,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::from_config(Config::default())
    }
}

impl TestConfig {
    fn from_config(config: Config) -> Self {
        let _tracing = Self::init_tracing();
        Self {
            config,
            push: PushContext::default(),
            metrics: SynthMetrics::default(),
            plugins: vec![],
            _tracing,
        }
    }

    fn with_services(mut self, services: impl IntoIterator<Item = Arc<Service>>) -> Self {
        self.push.services.extend(services);
        self
    }

    fn with_plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    fn builder(&self) -> ListenerBuilder {
        self.plugins.iter().cloned().fold(
            ListenerBuilder::new(self.config.clone(), self.metrics.clone()),
            ListenerBuilder::with_plugin,
        )
    }

    fn build(&self, proxy: &Proxy) -> Vec<Listener> {
        self.builder().build(proxy, &self.push)
    }

    fn outbound(&self, proxy: &Proxy) -> OutboundEntries {
        let plugins = PluginChain::new(self.plugins.iter().cloned());
        let ctx = BuildContext::new(&self.config, &plugins, &self.metrics, proxy, &self.push);
        crate::outbound::build(&ctx)
    }

    fn inbound(&self, proxy: &Proxy) -> InboundListeners {
        let plugins = PluginChain::new(self.plugins.iter().cloned());
        let ctx = BuildContext::new(&self.config, &plugins, &self.metrics, proxy, &self.push);
        crate::inbound::build(&ctx)
    }

    fn init_tracing() -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::TRACE)
                .finish(),
        )
    }
}

fn mk_proxy(ip: &str) -> Proxy {
    Proxy {
        id: "pod-0.ns".to_string(),
        namespace: "ns".to_string(),
        kind: ProxyKind::Sidecar,
        ip_addresses: vec![ip.parse().unwrap()],
        interception_mode: InterceptionMode::Redirect,
        labels: convert_args!(btreemap!("app" => "web")),
        sidecar_scope: Default::default(),
        service_instances: vec![],
    }
}

fn mk_service(
    name: &str,
    address: Option<&str>,
    ports: impl IntoIterator<Item = Port>,
) -> Arc<Service> {
    Arc::new(Service {
        hostname: format!("{name}.ns.svc.cluster.local"),
        namespace: "ns".to_string(),
        address: address.map(|a| a.parse().unwrap()),
        ports: ports.into_iter().collect(),
    })
}

fn mk_instance(service: &Arc<Service>, port: u16, endpoint: &str) -> ServiceInstance {
    let service_port = service
        .port(port)
        .cloned()
        .expect("service must declare the port");
    ServiceInstance {
        service: service.clone(),
        endpoint: Endpoint {
            address: endpoint.parse().unwrap(),
            port,
            labels: Default::default(),
        },
        service_port,
    }
}

fn names(listeners: &[Listener]) -> Vec<&str> {
    listeners.iter().map(|l| &*l.name).collect()
}

#[track_caller]
fn find<'l>(listeners: &'l [Listener], name: &str) -> &'l Listener {
    listeners
        .iter()
        .find(|l| l.name == name)
        .unwrap_or_else(|| panic!("listener {name} must exist in {:?}", names(listeners)))
}

/// The cluster a chain's terminal filter sends traffic to, if it names one.
fn cluster(chain: &FilterChain) -> Option<&str> {
    chain.filters.iter().rev().find_map(|f| match f {
        NetworkFilter::TcpProxy(tcp) => Some(&*tcp.cluster),
        NetworkFilter::RedisProxy { cluster, .. } => Some(&**cluster),
        _ => None,
    })
}

/// The route configuration a chain's HTTP connection manager serves, if it has one.
fn route(chain: &FilterChain) -> Option<&str> {
    chain.filters.iter().find_map(|f| match f {
        NetworkFilter::HttpConnectionManager(hcm) => Some(&*hcm.route_config_name),
        _ => None,
    })
}
