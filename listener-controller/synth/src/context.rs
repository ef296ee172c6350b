use crate::{classify, filters, metrics::SynthMetrics};
use mesh_listener_controller_core::{
    listener::{Listener, ListenerAddress},
    plugin::{MutableListener, PluginChain, PluginParams},
    proxy::{Bind, Proxy},
    push::PushContext,
    Config, ListenerProtocol, Protocol, TrafficDirection,
};
use std::net::IpAddr;

/// Everything a single proxy's computation reads.
///
/// The addresses derived from the proxy are computed once per computation and never written
/// back to the shared proxy.
pub(crate) struct BuildContext<'a> {
    pub(crate) config: &'a Config,
    pub(crate) plugins: &'a PluginChain,
    pub(crate) metrics: &'a SynthMetrics,
    pub(crate) proxy: &'a Proxy,
    pub(crate) push: &'a PushContext,
    pub(crate) wildcard: IpAddr,
    pub(crate) localhost: IpAddr,
}

// === impl BuildContext ===

impl<'a> BuildContext<'a> {
    pub(crate) fn new(
        config: &'a Config,
        plugins: &'a PluginChain,
        metrics: &'a SynthMetrics,
        proxy: &'a Proxy,
        push: &'a PushContext,
    ) -> Self {
        Self {
            config,
            plugins,
            metrics,
            proxy,
            push,
            wildcard: proxy.wildcard(),
            localhost: proxy.localhost(),
        }
    }

    pub(crate) fn listener_protocol(
        &self,
        protocol: Protocol,
        direction: TrafficDirection,
    ) -> ListenerProtocol {
        classify::listener_protocol(protocol, direction, self.config)
    }

    pub(crate) fn new_listener(
        &self,
        bind: &Bind,
        port: u16,
        direction: TrafficDirection,
    ) -> Listener {
        let address = match bind {
            Bind::Addr(address) => ListenerAddress::Socket {
                address: *address,
                port,
            },
            Bind::Pipe(path) => ListenerAddress::Pipe { path: path.clone() },
        };
        Listener::new(
            address.to_string(),
            address,
            direction,
            self.push.mesh.protocol_detection_timeout,
        )
    }

    /// Runs every plugin's listener callback for the params' direction.
    ///
    /// A failing plugin is logged and counted; whatever it changed before failing is kept.
    pub(crate) fn run_plugins(&self, params: &PluginParams<'_>, listener: &mut MutableListener) {
        for plugin in self.plugins.iter() {
            let res = match params.direction {
                TrafficDirection::Inbound => plugin.on_inbound_listener(params, listener),
                TrafficDirection::Outbound => plugin.on_outbound_listener(params, listener),
            };
            if let Err(error) = res {
                tracing::warn!(
                    %error,
                    plugin = %plugin.name(),
                    listener = %listener.listener.name,
                    "Plugin failed to configure listener",
                );
                self.metrics.plugin_error(plugin.name());
            }
        }
    }

    /// Builds the network filters of every mutable chain and appends the chains to the
    /// listener.
    pub(crate) fn finish(&self, mutable: MutableListener, upstream: &filters::Upstream) -> Listener {
        let MutableListener {
            mut listener,
            filter_chains,
        } = mutable;
        listener
            .filter_chains
            .extend(filters::build(self.config, filter_chains, upstream));
        listener
    }
}
