use mesh_listener_controller_core::{
    listener::{CodecType, FilterChain, HttpConnectionManager, NetworkFilter, TcpProxy, ThriftProxy},
    plugin::MutableFilterChain,
    Config, ListenerProtocol, Protocol, TrafficDirection,
};

/// Where the chains of one listener request send their traffic.
#[derive(Clone, Debug)]
pub(crate) struct Upstream {
    /// Overrides the chain name. By default HTTP chains are named after their route
    /// configuration and other chains after their cluster.
    pub(crate) name: Option<String>,
    pub(crate) stat_prefix: String,
    pub(crate) route_config_name: String,
    pub(crate) cluster: String,

    /// The declared protocol of the port, which selects protocol-specific TCP filters.
    pub(crate) protocol: Protocol,
    pub(crate) direction: TrafficDirection,
    pub(crate) allow_absolute_url: bool,
}

// === impl Upstream ===

impl Upstream {
    pub(crate) fn new(
        cluster: impl ToString,
        route_config_name: impl ToString,
        protocol: Protocol,
        direction: TrafficDirection,
    ) -> Self {
        let cluster = cluster.to_string();
        Self {
            name: None,
            stat_prefix: cluster.clone(),
            route_config_name: route_config_name.to_string(),
            cluster,
            protocol,
            direction,
            allow_absolute_url: false,
        }
    }

    pub(crate) fn named(mut self, name: impl ToString) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// Builds the terminal filters of each chain according to the chain's resolved protocol.
pub(crate) fn build(
    config: &Config,
    chains: Vec<MutableFilterChain>,
    upstream: &Upstream,
) -> Vec<FilterChain> {
    chains
        .into_iter()
        .map(|chain| build_chain(config, chain, upstream))
        .collect()
}

fn build_chain(config: &Config, chain: MutableFilterChain, upstream: &Upstream) -> FilterChain {
    let MutableFilterChain {
        protocol,
        filter_chain_match,
        tls,
        http_filters,
        network_filters,
    } = chain;

    let mut filters = network_filters
        .into_iter()
        .map(NetworkFilter::Extension)
        .collect::<Vec<_>>();

    let name = match protocol {
        ListenerProtocol::Http => {
            filters.push(NetworkFilter::HttpConnectionManager(HttpConnectionManager {
                stat_prefix: upstream.stat_prefix.clone(),
                route_config_name: upstream.route_config_name.clone(),
                codec: if upstream.protocol.is_http2() {
                    CodecType::Http2
                } else {
                    CodecType::Auto
                },
                http_filters,
                allow_absolute_url: upstream.allow_absolute_url,
            }));
            &upstream.route_config_name
        }
        ListenerProtocol::Thrift => {
            filters.push(NetworkFilter::ThriftProxy(ThriftProxy {
                stat_prefix: upstream.stat_prefix.clone(),
                route_config_name: upstream.route_config_name.clone(),
            }));
            &upstream.cluster
        }
        // A chain whose protocol was left undetermined is proxied as opaque TCP.
        ListenerProtocol::Tcp | ListenerProtocol::Auto => {
            filters.extend(tcp_filters(config, upstream));
            &upstream.cluster
        }
    };

    FilterChain {
        name: upstream.name.clone().unwrap_or_else(|| name.clone()),
        filter_chain_match,
        transport_socket: tls,
        filters,
    }
}

fn tcp_filters(config: &Config, upstream: &Upstream) -> Vec<NetworkFilter> {
    let stat_prefix = upstream.stat_prefix.clone();
    let tcp_proxy = NetworkFilter::TcpProxy(TcpProxy {
        stat_prefix: stat_prefix.clone(),
        cluster: upstream.cluster.clone(),
    });
    match upstream.protocol {
        Protocol::Mongo if config.mongo_filter => {
            vec![NetworkFilter::MongoProxy { stat_prefix }, tcp_proxy]
        }
        Protocol::Mysql if config.mysql_filter => {
            vec![NetworkFilter::MysqlProxy { stat_prefix }, tcp_proxy]
        }
        // The redis proxy terminates the chain in place of the TCP proxy.
        Protocol::Redis
            if config.redis_filter && upstream.direction == TrafficDirection::Outbound =>
        {
            vec![NetworkFilter::RedisProxy {
                stat_prefix,
                cluster: upstream.cluster.clone(),
            }]
        }
        _ => vec![tcp_proxy],
    }
}
