//! Outbound listeners: one per (bind, port) that a service in the proxy's egress scope is
//! reachable on.
//!
//! Several services routinely want the same (bind, port), most commonly the wildcard bind on a
//! well-known port. Each request is resolved against the entry already built for that key:
//!
//! | existing | incoming | result |
//! |----------|----------|--------|
//! | HTTP | HTTP | the service joins the entry; the route configuration is shared |
//! | TCP, THRIFT, AUTO | same | the service joins; chains whose match is taken are dropped |
//! | any | different | both sides are merged into a detecting (AUTO) listener |
//!
//! Ports of exclusive protocols (see [`Protocol::is_exclusive`]) never merge with a different
//! protocol: the later request is rejected.

use crate::{
    context::BuildContext,
    filters::Upstream,
    match_options,
    metrics::ConflictKind,
};
use mesh_listener_controller_core::{
    listener::{FilterChain, Listener, ListenerFilter},
    plugin::{FilterChainTemplate, MutableFilterChain, MutableListener, PluginParams},
    proxy::{Bind, EgressListener},
    service::{Port, Service, ServiceAddress},
    FilterChainMatch, IpNet, ListenerProtocol, Protocol, TrafficDirection, TransportProtocol,
    PLAINTEXT_HTTP_ALPNS,
};
use std::{collections::BTreeMap, sync::Arc};

/// The listener built for one (bind, port) and the services that share it.
#[derive(Clone, Debug)]
pub(crate) struct OutboundEntry {
    pub(crate) listener: Listener,
    pub(crate) protocol: ListenerProtocol,

    /// The declared protocol of the request that created the entry.
    pub(crate) declared: Protocol,
    pub(crate) services: Vec<Arc<Service>>,

    /// Set on entries built from explicit egress ports once catch-all egress is processed.
    pub(crate) locked: bool,
}

/// Entries keyed by listener name, so iteration yields listeners sorted by name.
pub(crate) type OutboundEntries = BTreeMap<String, OutboundEntry>;

struct Request<'a> {
    egress: &'a EgressListener,
    service: &'a Arc<Service>,
    port: &'a Port,
}

pub(crate) fn build(ctx: &BuildContext<'_>) -> OutboundEntries {
    let default_egress;
    let egress = if ctx.proxy.sidecar_scope.egress.is_empty() {
        default_egress = [EgressListener {
            port: None,
            bind: None,
            capture_mode: Default::default(),
            hosts: vec!["*/*".to_string()],
        }];
        &default_egress[..]
    } else {
        &ctx.proxy.sidecar_scope.egress[..]
    };

    let (explicit, catch_all): (Vec<_>, Vec<_>) = egress.iter().partition(|e| e.port.is_some());

    let mut entries = OutboundEntries::new();
    for egress in &explicit {
        let services = ctx.push.egress_services(egress, ctx.proxy);
        for service in &services {
            if let Some(port) = egress.port.as_ref() {
                add(
                    ctx,
                    &mut entries,
                    Request {
                        egress,
                        service,
                        port,
                    },
                );
            }
        }
    }

    if !explicit.is_empty() && !catch_all.is_empty() {
        for entry in entries.values_mut() {
            entry.locked = true;
        }
    }

    for egress in &catch_all {
        let services = ctx.push.egress_services(egress, ctx.proxy);
        for service in &services {
            for port in &service.ports {
                add(
                    ctx,
                    &mut entries,
                    Request {
                        egress,
                        service,
                        port,
                    },
                );
            }
        }
    }

    entries
}

fn add(ctx: &BuildContext<'_>, entries: &mut OutboundEntries, req: Request<'_>) {
    let Request {
        egress,
        service,
        port,
    } = req;
    let protocol = ctx.listener_protocol(port.protocol, TrafficDirection::Outbound);
    let captured = ctx.proxy.captures(egress.capture_mode);

    let bind = match (&egress.bind, captured) {
        (Some(bind), _) => bind.clone(),
        (None, false) => Bind::Addr(ctx.localhost),
        (None, true) if protocol == ListenerProtocol::Http => Bind::Addr(ctx.wildcard),
        (None, true) => match service.resolved_address() {
            ServiceAddress::Vip(vip) => Bind::Addr(vip),
            ServiceAddress::Cidr(_) | ServiceAddress::Wildcard => Bind::Addr(ctx.wildcard),
        },
    };

    // A CIDR service shares the wildcard listener with other CIDRs and is told apart by
    // destination.
    let prefix: Option<IpNet> = match service.resolved_address() {
        ServiceAddress::Cidr(net) if protocol != ListenerProtocol::Http && egress.bind.is_none() => {
            Some(net)
        }
        _ => None,
    };

    let mut listener = ctx.new_listener(&bind, port.port, TrafficDirection::Outbound);
    listener.bind_to_port = !captured || bind.is_pipe();

    if let Some(existing) = entries.get(&listener.name) {
        if existing.locked {
            tracing::debug!(
                listener = %listener.name,
                service = %service.hostname,
                "Port is reserved by an explicit egress declaration",
            );
            return;
        }
        if (existing.declared.is_exclusive() || port.protocol.is_exclusive())
            && existing.declared != port.protocol
        {
            tracing::warn!(
                listener = %listener.name,
                service = %service.hostname,
                protocol = %port.protocol,
                existing = %existing.declared,
                "Rejecting listener for a protocol that cannot share its port",
            );
            ctx.metrics.conflict(ConflictKind::ExclusiveProtocol);
            return;
        }
    }

    let candidate = prefix.map(FilterChainMatch::from).unwrap_or_default();
    let filter_chains = if protocol == ListenerProtocol::Auto {
        listener.add_listener_filter(ListenerFilter::HttpInspector);
        let candidate = FilterChainTemplate {
            filter_chain_match: candidate,
            ..Default::default()
        };
        match_options::expand(
            &[candidate],
            match_options::outbound(),
            &listener.name,
            ctx.metrics,
        )
    } else {
        vec![MutableFilterChain::new(protocol, candidate)]
    };

    let params = PluginParams {
        direction: TrafficDirection::Outbound,
        proxy: ctx.proxy,
        push: ctx.push,
        listener_protocol: protocol,
        bind: &bind,
        port,
        service: Some(&**service),
    };
    let mut mutable = MutableListener {
        listener,
        filter_chains,
    };
    ctx.run_plugins(&params, &mut mutable);

    let cluster = format!("outbound|{}||{}", port.port, service.hostname);
    let route_config_name = match &egress.bind {
        Some(bind) => format!("{}:{}", bind, port.port),
        None => port.port.to_string(),
    };
    let upstream = Upstream::new(
        cluster,
        route_config_name,
        port.protocol,
        TrafficDirection::Outbound,
    );
    let listener = ctx.finish(mutable, &upstream);

    match entries.get_mut(&listener.name) {
        None => {
            tracing::trace!(
                listener = %listener.name,
                service = %service.hostname,
                %protocol,
                "Built outbound listener",
            );
            entries.insert(
                listener.name.clone(),
                OutboundEntry {
                    listener,
                    protocol,
                    declared: port.protocol,
                    services: vec![service.clone()],
                    locked: false,
                },
            );
        }
        Some(entry) => merge(ctx, entry, listener, protocol, service),
    }
}

fn merge(
    ctx: &BuildContext<'_>,
    entry: &mut OutboundEntry,
    incoming: Listener,
    protocol: ListenerProtocol,
    service: &Arc<Service>,
) {
    entry.services.push(service.clone());
    for filter in &incoming.listener_filters {
        entry.listener.add_listener_filter(*filter);
    }

    let kind = if entry.protocol == protocol {
        match protocol {
            // Every HTTP service on the port is served by the same route configuration.
            ListenerProtocol::Http => return,
            ListenerProtocol::Tcp => ConflictKind::TcpOverTcp,
            ListenerProtocol::Thrift => ConflictKind::ThriftOverThrift,
            ListenerProtocol::Auto => ConflictKind::AutoOverAuto,
        }
    } else {
        tracing::debug!(
            listener = %entry.listener.name,
            service = %service.hostname,
            existing = %entry.protocol,
            incoming = %protocol,
            "Merging listeners of different protocols",
        );
        for chain in &mut entry.listener.filter_chains {
            detect_http(chain);
        }
        entry.protocol = ListenerProtocol::Auto;
        entry.listener.add_listener_filter(ListenerFilter::HttpInspector);
        ConflictKind::AutoOverAuto
    };

    for mut chain in incoming.filter_chains {
        if entry.protocol == ListenerProtocol::Auto {
            detect_http(&mut chain);
        }
        let existing = entry
            .listener
            .filter_chains
            .iter()
            .position(|c| c.filter_chain_match.is_equivalent(&chain.filter_chain_match));
        let Some(idx) = existing else {
            entry.listener.filter_chains.push(chain);
            continue;
        };

        // HTTP chains with the same match route through the same configuration.
        let existing = &entry.listener.filter_chains[idx];
        if existing.is_http() && chain.is_http() {
            continue;
        }
        tracing::warn!(
            listener = %entry.listener.name,
            service = %service.hostname,
            chain = %chain.name,
            existing = %existing.name,
            "Dropping filter chain that conflicts with an existing service",
        );
        ctx.metrics.conflict(kind);
    }
}

/// Restricts a plaintext HTTP chain to connections the HTTP inspector identified as HTTP, so
/// that it can share a listener with opaque chains.
fn detect_http(chain: &mut FilterChain) {
    let is_http = chain.is_http();
    let m = &mut chain.filter_chain_match;
    if is_http
        && m.application_protocols.is_empty()
        && m.transport_protocol != Some(TransportProtocol::Tls)
    {
        m.application_protocols = PLAINTEXT_HTTP_ALPNS.iter().map(|a| a.to_string()).collect();
    }
}
