//! Listeners for gateway proxies, built from the gateway resources that select the proxy.
//!
//! Gateways have no inbound/outbound split: every server port becomes a bind-to-port listener,
//! and servers that share a (bind, port) share the listener.

use crate::{context::BuildContext, filters::Upstream, metrics::ConflictKind};
use mesh_listener_controller_core::{
    gateway::{Gateway, GatewayServer, TlsMode},
    listener::{DownstreamTls, Listener},
    plugin::{MutableFilterChain, MutableListener, PluginParams},
    proxy::Bind,
    FilterChainMatch, ListenerProtocol, TrafficDirection, TransportProtocol,
};
use std::{collections::BTreeMap, net::IpAddr};

/// A group of chains that route to one place.
struct Unit {
    protocol: ListenerProtocol,
    chain: MutableFilterChain,
    upstream: Upstream,
}

pub(crate) fn build(ctx: &BuildContext<'_>) -> Vec<Listener> {
    let mut listeners = BTreeMap::<(IpAddr, u16), Listener>::new();
    for gateway in ctx.push.gateways_for(ctx.proxy) {
        for server in &gateway.servers {
            let addr = server.bind.unwrap_or(ctx.wildcard);
            let bind = Bind::Addr(addr);
            let listener = listeners.entry((addr, server.port.port)).or_insert_with(|| {
                let mut l = ctx.new_listener(&bind, server.port.port, TrafficDirection::Outbound);
                l.bind_to_port = true;
                l
            });

            for unit in units(gateway, server) {
                add_unit(ctx, listener, &bind, server, unit);
            }
        }
    }
    listeners.into_values().collect()
}

fn units(gateway: &Gateway, server: &GatewayServer) -> Vec<Unit> {
    let port = &server.port;
    let hosts = server.sni_hosts();

    if server.is_passthrough() {
        return hosts
            .into_iter()
            .map(|host| {
                let cluster = format!("outbound|{}||{}", port.port, host);
                Unit {
                    protocol: ListenerProtocol::Tcp,
                    chain: MutableFilterChain::new(
                        ListenerProtocol::Tcp,
                        FilterChainMatch {
                            server_names: vec![host],
                            transport_protocol: Some(TransportProtocol::Tls),
                            ..Default::default()
                        },
                    ),
                    upstream: Upstream::new(
                        &cluster,
                        &cluster,
                        port.protocol,
                        TrafficDirection::Outbound,
                    ),
                }
            })
            .collect();
    }

    if let Some(tls) = server.tls.as_ref().filter(|_| server.terminates_tls()) {
        let route = format!(
            "https.{}.{}.{}.{}",
            port.port, port.name, gateway.name, gateway.namespace
        );
        let mut chain = MutableFilterChain::new(
            ListenerProtocol::Http,
            FilterChainMatch {
                server_names: hosts,
                transport_protocol: Some(TransportProtocol::Tls),
                ..Default::default()
            },
        );
        chain.tls = Some(DownstreamTls {
            require_client_certificate: tls.mode != TlsMode::Simple,
            alpn_protocols: vec!["h2".to_string(), "http/1.1".to_string()],
            credential_name: tls.credential_name.clone(),
        });
        return vec![Unit {
            protocol: ListenerProtocol::Http,
            chain,
            upstream: Upstream::new(&route, &route, port.protocol, TrafficDirection::Outbound),
        }];
    }

    if port.protocol.is_http() {
        let route = format!("http.{}", port.port);
        return vec![Unit {
            protocol: ListenerProtocol::Http,
            chain: MutableFilterChain::new(ListenerProtocol::Http, FilterChainMatch::default()),
            upstream: Upstream::new(&route, &route, port.protocol, TrafficDirection::Outbound),
        }];
    }

    let cluster = hosts
        .first()
        .map(|host| format!("outbound|{}||{}", port.port, host))
        .unwrap_or_else(|| crate::virtual_listener::BLACKHOLE_CLUSTER.to_string());
    vec![Unit {
        protocol: ListenerProtocol::Tcp,
        chain: MutableFilterChain::new(ListenerProtocol::Tcp, FilterChainMatch::default()),
        upstream: Upstream::new(&cluster, &cluster, port.protocol, TrafficDirection::Outbound)
            .named(format!("tcp.{}", port.port)),
    }]
}

fn add_unit(
    ctx: &BuildContext<'_>,
    listener: &mut Listener,
    bind: &Bind,
    server: &GatewayServer,
    unit: Unit,
) {
    let Unit {
        protocol,
        chain,
        upstream,
    } = unit;

    let params = PluginParams {
        direction: TrafficDirection::Outbound,
        proxy: ctx.proxy,
        push: ctx.push,
        listener_protocol: protocol,
        bind,
        port: &server.port,
        service: None,
    };
    let mut mutable = MutableListener {
        listener: ctx.new_listener(bind, server.port.port, TrafficDirection::Outbound),
        filter_chains: vec![chain],
    };
    ctx.run_plugins(&params, &mut mutable);
    let built = ctx.finish(mutable, &upstream);

    for filter in built.listener_filters {
        listener.add_listener_filter(filter);
    }
    for chain in built.filter_chains {
        let existing = listener
            .filter_chains
            .iter()
            .position(|c| c.filter_chain_match.is_equivalent(&chain.filter_chain_match));
        let Some(idx) = existing else {
            listener.filter_chains.push(chain);
            continue;
        };

        // Plain HTTP servers on a port share one route configuration.
        let existing = &listener.filter_chains[idx];
        if existing.name == chain.name {
            continue;
        }
        tracing::warn!(
            listener = %listener.name,
            chain = %chain.name,
            existing = %existing.name,
            "Dropping gateway filter chain with a duplicate match",
        );
        ctx.metrics.conflict(ConflictKind::GatewayFilterChain);
    }
}
