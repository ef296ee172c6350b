//! Listener synthesis.
//!
//! Given a [`Proxy`] and a frozen [`PushContext`], a [`ListenerBuilder`] computes the complete,
//! ordered set of listeners the proxy should run:
//!
//! - Sidecars get inbound listeners for the ports their workload serves, outbound listeners for
//!   every (bind, port) a service in their egress scope is reachable on, an optional HTTP proxy
//!   listener, and the virtual listeners that intercepted traffic is redirected to.
//! - Gateways get one listener per (bind, port) declared by the gateway resources that select
//!   them.
//!
//! A computation is a pure function of its inputs: it never mutates the proxy or the push
//! context, so any number of proxies may be computed concurrently against the same snapshot.
//! Conflicts are resolved deterministically, logged and counted in [`SynthMetrics`]; they never
//! fail a computation.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod classify;
mod context;
mod filters;
mod finalize;
mod gateway;
mod http_proxy;
mod inbound;
mod match_options;
pub mod metrics;
mod outbound;
pub mod patch;
mod virtual_listener;

#[cfg(test)]
mod tests;

pub use self::{
    classify::listener_protocol,
    metrics::SynthMetrics,
    patch::PatchSet,
    virtual_listener::{VIRTUAL_INBOUND, VIRTUAL_OUTBOUND},
};
pub use mesh_listener_controller_core as core;

use self::context::BuildContext;
use mesh_listener_controller_core::{
    listener::Listener,
    patch::{ListenerPatcher, PatchContext},
    plugin::{Plugin, PluginChain},
    proxy::{Proxy, ProxyKind},
    push::PushContext,
    Config,
};
use std::sync::Arc;

/// Computes listeners for proxies.
///
/// A builder holds only immutable configuration and shared metrics handles, so it may be cloned
/// freely and shared across threads.
#[derive(Clone)]
pub struct ListenerBuilder {
    config: Config,
    plugins: PluginChain,
    patcher: Option<Arc<dyn ListenerPatcher>>,
    metrics: SynthMetrics,
}

// === impl ListenerBuilder ===

impl ListenerBuilder {
    pub fn new(config: Config, metrics: SynthMetrics) -> Self {
        Self {
            config,
            plugins: PluginChain::default(),
            patcher: None,
            metrics,
        }
    }

    /// Appends a plugin. Plugins run in the order they are added.
    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins = self.plugins.push(plugin);
        self
    }

    pub fn with_patcher(mut self, patcher: Arc<dyn ListenerPatcher>) -> Self {
        self.patcher = Some(patcher);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &SynthMetrics {
        &self.metrics
    }

    /// Computes the listeners for `proxy`.
    ///
    /// Sidecar listeners are ordered inbound first, then outbound (sorted by name, followed by
    /// the HTTP proxy and virtual outbound listeners), then the virtual inbound listener.
    pub fn build(&self, proxy: &Proxy, push: &PushContext) -> Vec<Listener> {
        let _span = tracing::debug_span!("build", proxy = %proxy.id).entered();
        let ctx = BuildContext::new(&self.config, &self.plugins, &self.metrics, proxy, push);

        let listeners = match proxy.kind {
            ProxyKind::Sidecar => self.build_sidecar(&ctx),
            ProxyKind::Gateway => {
                let listeners = gateway::build(&ctx);
                self.patch(PatchContext::Gateway, proxy, listeners)
            }
        };

        let listeners = listeners
            .into_iter()
            .filter_map(|l| finalize::finalize(l, &self.metrics))
            .collect::<Vec<_>>();
        tracing::debug!(listeners = listeners.len(), "Built listeners");
        listeners
    }

    fn build_sidecar(&self, ctx: &BuildContext<'_>) -> Vec<Listener> {
        let proxy = ctx.proxy;
        let inbound::InboundListeners { bound, captured } = inbound::build(ctx);

        let mut outbound = outbound::build(ctx)
            .into_values()
            .map(|entry| {
                tracing::trace!(
                    listener = %entry.listener.name,
                    protocol = %entry.protocol,
                    services = entry.services.len(),
                    "Outbound listener",
                );
                entry.listener
            })
            .collect::<Vec<_>>();
        outbound.extend(http_proxy::build(ctx));
        if proxy.intercepts() || outbound.iter().any(|l| !l.bind_to_port) {
            outbound.push(virtual_listener::outbound(ctx));
        }

        let mut inbound = bound;
        if proxy.intercepts() || !captured.is_empty() {
            inbound.push(virtual_listener::inbound(ctx, captured));
        }

        let inbound = self.patch(PatchContext::SidecarInbound, proxy, inbound);
        let outbound = self.patch(PatchContext::SidecarOutbound, proxy, outbound);

        // The virtual inbound listener goes last, after every outbound listener.
        let (virtual_inbound, bound): (Vec<_>, Vec<_>) = inbound
            .into_iter()
            .partition(|l| l.name == VIRTUAL_INBOUND);
        bound
            .into_iter()
            .chain(outbound)
            .chain(virtual_inbound)
            .collect()
    }

    fn patch(
        &self,
        context: PatchContext,
        proxy: &Proxy,
        listeners: Vec<Listener>,
    ) -> Vec<Listener> {
        match &self.patcher {
            Some(patcher) => patcher.patch(context, proxy, listeners),
            None => listeners,
        }
    }
}

impl std::fmt::Debug for ListenerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerBuilder")
            .field("config", &self.config)
            .field("plugins", &self.plugins)
            .field("patcher", &self.patcher.is_some())
            .finish_non_exhaustive()
    }
}
