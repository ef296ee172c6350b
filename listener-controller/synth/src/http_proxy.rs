use crate::{context::BuildContext, filters::Upstream};
use mesh_listener_controller_core::{
    listener::Listener,
    plugin::{MutableFilterChain, MutableListener, PluginParams},
    proxy::Bind,
    service::Port,
    FilterChainMatch, ListenerProtocol, Protocol, TrafficDirection,
};

pub(crate) const HTTP_PROXY_ROUTE: &str = "http_proxy";

/// Builds the HTTP forward-proxy listener when the mesh configures one.
///
/// Applications address this listener explicitly on localhost, so it binds its own port and
/// accepts absolute request URLs.
pub(crate) fn build(ctx: &BuildContext<'_>) -> Option<Listener> {
    let port = ctx.push.mesh.proxy_http_port?;
    let bind = Bind::Addr(ctx.localhost);
    let mut listener = ctx.new_listener(&bind, port, TrafficDirection::Outbound);
    listener.bind_to_port = true;

    let service_port = Port::new(HTTP_PROXY_ROUTE, port, Protocol::Http);
    let params = PluginParams {
        direction: TrafficDirection::Outbound,
        proxy: ctx.proxy,
        push: ctx.push,
        listener_protocol: ListenerProtocol::Http,
        bind: &bind,
        port: &service_port,
        service: None,
    };
    let mut mutable = MutableListener {
        listener,
        filter_chains: vec![MutableFilterChain::new(
            ListenerProtocol::Http,
            FilterChainMatch::default(),
        )],
    };
    ctx.run_plugins(&params, &mut mutable);

    let upstream = Upstream {
        allow_absolute_url: true,
        ..Upstream::new(
            HTTP_PROXY_ROUTE,
            HTTP_PROXY_ROUTE,
            Protocol::Http,
            TrafficDirection::Outbound,
        )
    };
    Some(ctx.finish(mutable, &upstream))
}
