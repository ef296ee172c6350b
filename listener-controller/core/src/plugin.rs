//! The capability interface through which extensions shape listeners.
//!
//! Plugins run in registration order. They may contribute candidate filter chains for inbound
//! listeners and may mutate any listener after its chains have been laid out (adding listener
//! filters, HTTP filters or network filters). Contributions are best-effort: a plugin that fails
//! leaves the listener as it was when the plugin returned.

use crate::{
    listener::{DownstreamTls, FilterConfig, Listener, ListenerFilter},
    proxy::{Bind, Proxy},
    push::PushContext,
    service::{Port, Service},
    FilterChainMatch, ListenerProtocol, TrafficDirection,
};
use anyhow::Result;
use std::sync::Arc;

/// Describes the listener a plugin is being asked about.
#[derive(Clone, Debug)]
pub struct PluginParams<'a> {
    pub direction: TrafficDirection,
    pub proxy: &'a Proxy,
    pub push: &'a PushContext,
    pub listener_protocol: ListenerProtocol,
    pub bind: &'a Bind,
    pub port: &'a Port,

    /// The service the listener is built for; absent for capture and passthrough listeners.
    pub service: Option<&'a Service>,
}

/// A candidate filter chain contributed by a plugin for an inbound listener.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterChainTemplate {
    pub filter_chain_match: FilterChainMatch,
    pub tls: Option<DownstreamTls>,
    pub required_listener_filters: Vec<ListenerFilter>,
}

/// A filter chain whose terminal filter has not been built yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutableFilterChain {
    /// The resolved protocol of this chain: never `Auto`.
    pub protocol: ListenerProtocol,
    pub filter_chain_match: FilterChainMatch,
    pub tls: Option<DownstreamTls>,

    /// Filters placed ahead of the router in the chain's HTTP connection manager.
    pub http_filters: Vec<FilterConfig>,

    /// Network filters placed ahead of the chain's terminal filter.
    pub network_filters: Vec<FilterConfig>,
}

/// A listener under construction, handed to plugins for mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MutableListener {
    pub listener: Listener,
    pub filter_chains: Vec<MutableFilterChain>,
}

pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Returns candidate chains for an inbound listener. Returning nothing is fine; the
    /// listener then gets a single plaintext candidate.
    fn on_inbound_filter_chains(&self, _params: &PluginParams<'_>) -> Vec<FilterChainTemplate> {
        Vec::new()
    }

    /// Returns candidate chains for the inbound passthrough chains of the capture listener.
    fn on_inbound_passthrough_filter_chains(
        &self,
        _params: &PluginParams<'_>,
    ) -> Vec<FilterChainTemplate> {
        Vec::new()
    }

    fn on_inbound_listener(
        &self,
        _params: &PluginParams<'_>,
        _listener: &mut MutableListener,
    ) -> Result<()> {
        Ok(())
    }

    fn on_outbound_listener(
        &self,
        _params: &PluginParams<'_>,
        _listener: &mut MutableListener,
    ) -> Result<()> {
        Ok(())
    }
}

/// Plugins in the order they were registered.
#[derive(Clone, Default)]
pub struct PluginChain(Vec<Arc<dyn Plugin>>);

// === impl FilterChainTemplate ===

impl FilterChainTemplate {
    pub fn requires_tls_inspector(&self) -> bool {
        self.required_listener_filters
            .contains(&ListenerFilter::TlsInspector)
            || self.filter_chain_match.requires_tls_inspector()
    }
}

// === impl MutableFilterChain ===

impl MutableFilterChain {
    pub fn new(protocol: ListenerProtocol, filter_chain_match: FilterChainMatch) -> Self {
        Self {
            protocol,
            filter_chain_match,
            tls: None,
            http_filters: Vec::new(),
            network_filters: Vec::new(),
        }
    }
}

// === impl PluginChain ===

impl PluginChain {
    pub fn new(plugins: impl IntoIterator<Item = Arc<dyn Plugin>>) -> Self {
        Self(plugins.into_iter().collect())
    }

    pub fn push(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.0.push(plugin);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Plugin> {
        self.0.iter().map(|p| &**p)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl std::fmt::Debug for PluginChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.iter().map(|p| p.name())).finish()
    }
}
