//! The capture listeners that intercepted traffic is redirected to.

use crate::{context::BuildContext, filters::Upstream, inbound, match_options};
use mesh_listener_controller_core::{
    listener::{FilterChain, Listener, ListenerFilter, NetworkFilter, TcpProxy},
    plugin::{FilterChainTemplate, MutableFilterChain, MutableListener, PluginParams},
    proxy::{Bind, InterceptionMode},
    push::OutboundTrafficPolicy,
    service::Port,
    FilterChainMatch, IpNet, Ipv4Net, Ipv6Net, ListenerProtocol, Protocol, TrafficDirection,
};
use std::net::{Ipv4Addr, Ipv6Addr};

pub const VIRTUAL_OUTBOUND: &str = "virtualOutbound";
pub const VIRTUAL_INBOUND: &str = "virtualInbound";

pub(crate) const PASSTHROUGH_CLUSTER: &str = "PassthroughCluster";
pub(crate) const BLACKHOLE_CLUSTER: &str = "BlackHoleCluster";
pub(crate) const INBOUND_PASSTHROUGH_CLUSTER_IPV4: &str = "InboundPassthroughClusterIpv4";
pub(crate) const INBOUND_PASSTHROUGH_CLUSTER_IPV6: &str = "InboundPassthroughClusterIpv6";

/// Builds the listener that receives all redirected outbound traffic.
///
/// Connections whose original destination matches no outbound listener land here and are
/// either passed through or dropped according to the outbound traffic policy. When loop
/// blocking is enabled, connections addressed to this very listener on one of the proxy's own
/// addresses are dropped so they can't be redirected back in forever.
pub(crate) fn outbound(ctx: &BuildContext<'_>) -> Listener {
    let port = ctx.push.mesh.virtual_outbound_port;
    let bind = Bind::Addr(ctx.wildcard);
    let mut listener = ctx.new_listener(&bind, port, TrafficDirection::Outbound);
    listener.name = VIRTUAL_OUTBOUND.to_string();
    listener.use_original_dst = true;

    if ctx.config.loop_blocker {
        let filter_chain_match = FilterChainMatch {
            destination_port: Some(port),
            prefix_ranges: ctx.proxy.ip_addresses.iter().copied().map(IpNet::from).collect(),
            ..Default::default()
        };
        listener.filter_chains.push(FilterChain {
            name: format!("{VIRTUAL_OUTBOUND}-blackhole"),
            filter_chain_match,
            transport_socket: None,
            filters: vec![NetworkFilter::TcpProxy(TcpProxy {
                stat_prefix: BLACKHOLE_CLUSTER.to_string(),
                cluster: BLACKHOLE_CLUSTER.to_string(),
            })],
        });
    }

    let policy = ctx
        .proxy
        .sidecar_scope
        .outbound_traffic_policy
        .unwrap_or(ctx.push.mesh.outbound_traffic_policy);
    let cluster = match policy {
        OutboundTrafficPolicy::AllowAny => PASSTHROUGH_CLUSTER,
        OutboundTrafficPolicy::RegistryOnly => BLACKHOLE_CLUSTER,
    };

    let service_port = Port::new(VIRTUAL_OUTBOUND, port, Protocol::Tcp);
    let params = PluginParams {
        direction: TrafficDirection::Outbound,
        proxy: ctx.proxy,
        push: ctx.push,
        listener_protocol: ListenerProtocol::Tcp,
        bind: &bind,
        port: &service_port,
        service: None,
    };
    let mut mutable = MutableListener {
        listener,
        filter_chains: vec![MutableFilterChain::new(
            ListenerProtocol::Tcp,
            FilterChainMatch::default(),
        )],
    };
    ctx.run_plugins(&params, &mut mutable);

    let upstream = Upstream::new(cluster, cluster, Protocol::Tcp, TrafficDirection::Outbound)
        .named(format!("{VIRTUAL_OUTBOUND}-catchall-tcp"));
    ctx.finish(mutable, &upstream)
}

/// Folds every captured inbound listener into the listener that receives all redirected
/// inbound traffic.
///
/// Each folded chain is additionally constrained on the destination port (and non-wildcard
/// bind address) of the listener it came from. Traffic to ports no listener claims is handled
/// by passthrough chains, one per address family the proxy has.
pub(crate) fn inbound(ctx: &BuildContext<'_>, captured: Vec<Listener>) -> Listener {
    let port = ctx.push.mesh.virtual_inbound_port;
    let bind = Bind::Addr(ctx.wildcard);
    let mut listener = ctx.new_listener(&bind, port, TrafficDirection::Inbound);
    listener.name = VIRTUAL_INBOUND.to_string();
    listener.continue_on_listener_filters_timeout = true;
    listener.add_listener_filter(ListenerFilter::OriginalDst);
    if ctx.proxy.interception_mode == InterceptionMode::Tproxy {
        listener.add_listener_filter(ListenerFilter::OriginalSrc);
        listener.transparent = true;
    }

    let mut chains = Vec::new();
    for folded in captured {
        let (port, address) = inbound::destination(&folded);
        let Listener {
            filter_chains,
            default_filter_chain,
            listener_filters,
            ..
        } = folded;
        for filter in listener_filters {
            listener.add_listener_filter(filter);
        }
        for mut chain in filter_chains.into_iter().chain(default_filter_chain) {
            // The original listener's address replaces whatever the chain matched on, so
            // chains folded from different listeners stay distinct.
            let m = &mut chain.filter_chain_match;
            m.destination_port = Some(port);
            if let Some(address) = address {
                m.prefix_ranges = vec![address.into()];
            }
            chains.push(chain);
        }
    }

    if ctx.proxy.has_ipv4() {
        let all = Ipv4Net::new(Ipv4Addr::UNSPECIFIED, 0).ok().map(IpNet::V4);
        chains.extend(passthrough_chains(
            ctx,
            &mut listener,
            all,
            INBOUND_PASSTHROUGH_CLUSTER_IPV4,
        ));
    }
    if ctx.proxy.has_ipv6() {
        let all = Ipv6Net::new(Ipv6Addr::UNSPECIFIED, 0).ok().map(IpNet::V6);
        chains.extend(passthrough_chains(
            ctx,
            &mut listener,
            all,
            INBOUND_PASSTHROUGH_CLUSTER_IPV6,
        ));
    }

    // Stable, so chains of one folded listener keep their relative order.
    chains.sort_by(|a, b| a.name.cmp(&b.name));
    listener.filter_chains = chains;

    if listener.filter_chains.iter().any(FilterChain::requires_tls_inspector) {
        listener.add_listener_filter(ListenerFilter::TlsInspector);
    }
    if ctx.config.sniff_inbound {
        listener.add_listener_filter(ListenerFilter::HttpInspector);
    }
    listener
}

/// Builds the chains for inbound traffic to undeclared ports of one address family.
fn passthrough_chains(
    ctx: &BuildContext<'_>,
    listener: &mut Listener,
    all: Option<IpNet>,
    cluster: &str,
) -> Vec<FilterChain> {
    let port = ctx.push.mesh.virtual_inbound_port;
    let service_port = Port::new(VIRTUAL_INBOUND, port, Protocol::Unsupported);
    let protocol = ctx.listener_protocol(Protocol::Unsupported, TrafficDirection::Inbound);
    let bind = Bind::Addr(ctx.wildcard);
    let params = PluginParams {
        direction: TrafficDirection::Inbound,
        proxy: ctx.proxy,
        push: ctx.push,
        listener_protocol: protocol,
        bind: &bind,
        port: &service_port,
        service: None,
    };

    let mut candidates = ctx
        .plugins
        .iter()
        .flat_map(|p| p.on_inbound_passthrough_filter_chains(&params))
        .collect::<Vec<_>>();
    if candidates.is_empty() {
        candidates.push(FilterChainTemplate::default());
    }
    for candidate in &mut candidates {
        candidate.filter_chain_match.prefix_ranges.extend(all);
        for filter in &candidate.required_listener_filters {
            listener.add_listener_filter(*filter);
        }
    }

    let filter_chains = if protocol == ListenerProtocol::Auto {
        let tls_inspector = candidates
            .iter()
            .any(FilterChainTemplate::requires_tls_inspector);
        // Undeclared ports have no port-level policy.
        let mode = ctx.push.mtls_mode(ctx.proxy, 0);
        match_options::expand(
            &candidates,
            match_options::inbound(mode, tls_inspector),
            cluster,
            ctx.metrics,
        )
    } else {
        candidates
            .into_iter()
            .map(|c| MutableFilterChain {
                tls: c.tls,
                ..MutableFilterChain::new(protocol, c.filter_chain_match)
            })
            .collect()
    };

    let mut mutable = MutableListener {
        listener: ctx.new_listener(&bind, port, TrafficDirection::Inbound),
        filter_chains,
    };
    ctx.run_plugins(&params, &mut mutable);
    for filter in &mutable.listener.listener_filters {
        listener.add_listener_filter(*filter);
    }

    let upstream = Upstream::new(
        cluster,
        cluster,
        Protocol::Unsupported,
        TrafficDirection::Inbound,
    )
    .named(cluster);
    ctx.finish(mutable, &upstream).filter_chains
}
