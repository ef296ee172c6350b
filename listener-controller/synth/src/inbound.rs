use crate::{context::BuildContext, filters::Upstream, match_options, metrics::ConflictKind};
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use mesh_listener_controller_core::{
    listener::{Listener, ListenerFilter},
    plugin::{FilterChainTemplate, MutableFilterChain, MutableListener, PluginParams},
    proxy::{Bind, IngressListener},
    service::{Port, Service, ServiceInstance},
    ListenerProtocol, TrafficDirection,
};

/// Inbound listeners split by whether they bind their own port.
#[derive(Debug, Default)]
pub(crate) struct InboundListeners {
    pub(crate) bound: Vec<Listener>,

    /// Listeners that only exist to be folded into the virtual inbound listener.
    pub(crate) captured: Vec<Listener>,
}

/// One (bind, port) that receives traffic for the workload.
struct Source<'a> {
    bind: Bind,
    port: u16,
    service_port: &'a Port,
    service: Option<&'a Service>,
    hostname: String,
    bind_to_port: bool,
}

pub(crate) fn build(ctx: &BuildContext<'_>) -> InboundListeners {
    let ingress = &ctx.proxy.sidecar_scope.ingress;
    if ingress.is_empty() && !ctx.proxy.intercepts() {
        tracing::debug!("Proxy does not intercept inbound traffic");
        return InboundListeners::default();
    }

    let sources = if ingress.is_empty() {
        instance_sources(ctx)
    } else {
        ingress_sources(ctx, ingress)
    };

    let mut listeners = InboundListeners::default();
    for source in sources {
        let listener = build_listener(ctx, source);
        if listener.bind_to_port {
            listeners.bound.push(listener);
        } else {
            listeners.captured.push(listener);
        }
    }
    listeners
}

/// One source per service instance, keyed by the instance's endpoint.
///
/// Instances of different services may share an endpoint. Only the first one gets a listener;
/// the route configuration serves the rest by hostname.
fn instance_sources<'a>(ctx: &BuildContext<'a>) -> Vec<Source<'a>> {
    let mut claimed = HashMap::<(Bind, u16), &'a str>::new();
    let mut sources = Vec::new();
    for instance in &ctx.proxy.service_instances {
        let bind = Bind::Addr(instance.endpoint.address);
        let port = instance.endpoint.port;
        if let Some(hostname) = claimed.get(&(bind.clone(), port)) {
            if *hostname != instance.service.hostname {
                tracing::debug!(
                    %bind,
                    port,
                    service = %instance.service.hostname,
                    existing = %hostname,
                    "Inbound port already claimed by another service",
                );
                ctx.metrics.conflict(ConflictKind::InboundListener);
            }
            continue;
        }
        claimed.insert((bind.clone(), port), &instance.service.hostname);

        sources.push(Source {
            bind,
            port,
            service_port: &instance.service_port,
            service: Some(&*instance.service),
            hostname: instance.service.hostname.clone(),
            bind_to_port: false,
        });
    }
    sources
}

fn ingress_sources<'a>(ctx: &BuildContext<'a>, ingress: &'a [IngressListener]) -> Vec<Source<'a>> {
    let mut claimed = HashSet::<(Bind, u16)>::new();
    let mut sources = Vec::new();
    for declared in ingress {
        let bind = declared
            .bind
            .clone()
            .unwrap_or_else(|| Bind::Addr(ctx.wildcard));
        let port = declared.port.port;
        if !claimed.insert((bind.clone(), port)) {
            tracing::debug!(%bind, port, "Skipping duplicate ingress declaration");
            continue;
        }

        let instance = instance_on_port(&ctx.proxy.service_instances, port);
        let hostname = instance
            .map(|i| i.service.hostname.clone())
            .unwrap_or_else(|| format!("sidecar.{}", ctx.proxy.namespace));
        tracing::trace!(%bind, port, endpoint = %declared.default_endpoint, "Ingress declaration");

        sources.push(Source {
            bind_to_port: !ctx.proxy.captures(declared.capture_mode) || bind.is_pipe(),
            bind,
            port,
            service_port: &declared.port,
            service: instance.map(|i| &*i.service),
            hostname,
        });
    }
    sources
}

fn instance_on_port(instances: &[ServiceInstance], port: u16) -> Option<&ServiceInstance> {
    instances.iter().find(|i| i.endpoint.port == port)
}

fn build_listener(ctx: &BuildContext<'_>, source: Source<'_>) -> Listener {
    let protocol = ctx.listener_protocol(source.service_port.protocol, TrafficDirection::Inbound);
    let mut listener = ctx.new_listener(&source.bind, source.port, TrafficDirection::Inbound);
    listener.bind_to_port = source.bind_to_port;

    let params = PluginParams {
        direction: TrafficDirection::Inbound,
        proxy: ctx.proxy,
        push: ctx.push,
        listener_protocol: protocol,
        bind: &source.bind,
        port: source.service_port,
        service: source.service,
    };

    let mut candidates = ctx
        .plugins
        .iter()
        .flat_map(|p| p.on_inbound_filter_chains(&params))
        .collect::<Vec<_>>();
    if candidates.is_empty() {
        candidates.push(FilterChainTemplate::default());
    }
    for filter in candidates.iter().flat_map(|c| &c.required_listener_filters) {
        listener.add_listener_filter(*filter);
    }

    let filter_chains = if protocol == ListenerProtocol::Auto {
        let tls_inspector = candidates.iter().any(FilterChainTemplate::requires_tls_inspector);
        let mode = ctx.push.mtls_mode(ctx.proxy, source.port);
        listener.add_listener_filter(ListenerFilter::HttpInspector);
        match_options::expand(
            &candidates,
            match_options::inbound(mode, tls_inspector),
            &listener.name,
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
        listener,
        filter_chains,
    };
    ctx.run_plugins(&params, &mut mutable);

    let cluster = format!(
        "inbound|{}|{}|{}",
        source.port, source.service_port.name, source.hostname
    );
    let name = mutable.listener.name.clone();
    let upstream = Upstream::new(
        &cluster,
        &cluster,
        source.service_port.protocol,
        TrafficDirection::Inbound,
    )
    .named(name);
    let listener = ctx.finish(mutable, &upstream);

    tracing::trace!(
        listener = %listener.name,
        %protocol,
        chains = listener.filter_chains.len(),
        bind_to_port = listener.bind_to_port,
        "Built inbound listener",
    );
    listener
}

/// The port a folded inbound listener was built for, and its bind address when the listener
/// wasn't bound to the wildcard.
pub(crate) fn destination(listener: &Listener) -> (u16, Option<std::net::IpAddr>) {
    let address = listener.address.ip().filter(|a| !a.is_unspecified());
    (listener.port(), address)
}
