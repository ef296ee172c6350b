use super::*;
use crate::{metrics::ConflictKind, VIRTUAL_INBOUND};
use mesh_listener_controller_core::{
    listener::{ListenerAddress, ListenerFilter},
    plugin::{FilterChainTemplate, PluginParams},
    proxy::{CaptureMode, IngressListener},
    FilterChainMatch, IpNet, ListenerProtocol, Protocol, TrafficDirection,
};

/// Tests that a captured workload's ports are folded into the virtual inbound listener, each
/// constrained on the port (and address) it was built for.
#[test]
fn captured_instances_fold_into_virtual_inbound() {
    let test = TestConfig::default();
    let a = mk_service("a", Some("10.96.0.1/32"), [Port::inferred("http", 1111)]);
    let b = mk_service(
        "b",
        Some("10.96.0.2/32"),
        [Port::new("tcp", 2222, Protocol::Tcp)],
    );
    let mut proxy = mk_proxy("172.16.0.1");
    proxy.service_instances = vec![
        mk_instance(&a, 1111, "172.16.0.1"),
        mk_instance(&b, 2222, "172.16.0.1"),
    ];

    let inbound = test.inbound(&proxy);
    assert!(inbound.bound.is_empty());
    assert_eq!(
        names(&inbound.captured),
        vec!["172.16.0.1_1111", "172.16.0.1_2222"]
    );
    assert!(inbound.captured.iter().all(|l| !l.bind_to_port));

    let listeners = test.build(&proxy);
    assert_eq!(names(&listeners), vec!["virtualOutbound", VIRTUAL_INBOUND]);

    let vi = find(&listeners, VIRTUAL_INBOUND);
    let folded = vi
        .filter_chains
        .iter()
        .filter(|c| c.filter_chain_match.destination_port.is_some())
        .collect::<Vec<_>>();
    assert_eq!(folded.len(), 2);

    let http = folded[0];
    assert_eq!(http.filter_chain_match.destination_port, Some(1111));
    assert_eq!(
        http.filter_chain_match.prefix_ranges,
        vec!["172.16.0.1/32".parse::<IpNet>().unwrap()]
    );
    assert_eq!(route(http), Some("inbound|1111|http|a.ns.svc.cluster.local"));

    let tcp = folded[1];
    assert_eq!(tcp.filter_chain_match.destination_port, Some(2222));
    assert_eq!(cluster(tcp), Some("inbound|2222|tcp|b.ns.svc.cluster.local"));

    assert_eq!(
        vi.listener_filters,
        vec![ListenerFilter::OriginalDst, ListenerFilter::HttpInspector]
    );
    assert!(vi.continue_on_listener_filters_timeout);
    assert!(!vi.transparent);
}

#[test]
fn shared_endpoints_keep_the_first_service() {
    let test = TestConfig::default();
    let a = mk_service("a", None, [Port::inferred("http", 1111)]);
    let c = mk_service("c", None, [Port::inferred("http-alt", 1111)]);
    let mut proxy = mk_proxy("172.16.0.1");
    proxy.service_instances = vec![
        mk_instance(&a, 1111, "172.16.0.1"),
        mk_instance(&c, 1111, "172.16.0.1"),
    ];

    let inbound = test.inbound(&proxy);
    assert_eq!(inbound.captured.len(), 1);
    assert_eq!(
        route(&inbound.captured[0].filter_chains[0]),
        Some("inbound|1111|http|a.ns.svc.cluster.local")
    );
    assert_eq!(test.metrics.conflicts(ConflictKind::InboundListener), 1);
}

/// Tests that ingress declarations replace the workload's instances, and that pipes and
/// uncaptured ports get listeners of their own.
#[test]
fn ingress_declarations() {
    let test = TestConfig::default();
    let mut proxy = mk_proxy("10.0.0.1");
    proxy.sidecar_scope.ingress = vec![
        IngressListener {
            port: Port::inferred("http", 8080),
            bind: Some("unix:///var/run/app.sock".parse().unwrap()),
            capture_mode: CaptureMode::Default,
            default_endpoint: "unix:///var/run/app.sock".to_string(),
        },
        IngressListener {
            port: Port::new("tcp", 9080, Protocol::Tcp),
            bind: None,
            capture_mode: CaptureMode::None,
            default_endpoint: "127.0.0.1:9080".to_string(),
        },
        IngressListener {
            port: Port::inferred("http-admin", 7070),
            bind: None,
            capture_mode: CaptureMode::Default,
            default_endpoint: "127.0.0.1:7070".to_string(),
        },
    ];

    let listeners = test.build(&proxy);
    assert_eq!(
        names(&listeners),
        vec![
            "unix:///var/run/app.sock_0",
            "0.0.0.0_9080",
            "virtualOutbound",
            VIRTUAL_INBOUND,
        ]
    );

    let pipe = find(&listeners, "unix:///var/run/app.sock_0");
    assert!(pipe.bind_to_port);
    assert_eq!(
        pipe.address,
        ListenerAddress::Pipe {
            path: "unix:///var/run/app.sock".to_string()
        }
    );
    let default = pipe.default_filter_chain.as_ref().expect("must have a chain");
    assert_eq!(route(default), Some("inbound|8080|http|sidecar.ns"));

    let tcp = find(&listeners, "0.0.0.0_9080");
    assert!(tcp.bind_to_port);
    let default = tcp.default_filter_chain.as_ref().expect("must have a chain");
    assert_eq!(cluster(default), Some("inbound|9080|tcp|sidecar.ns"));

    // Captured wildcard ports are matched on the port alone.
    let vi = find(&listeners, VIRTUAL_INBOUND);
    let admin = vi
        .filter_chains
        .iter()
        .find(|c| c.filter_chain_match.destination_port == Some(7070))
        .expect("admin port must be folded");
    assert!(admin.filter_chain_match.prefix_ranges.is_empty());
    assert_eq!(route(admin), Some("inbound|7070|http-admin|sidecar.ns"));
}

#[test]
fn tproxy_preserves_the_source_address() {
    let test = TestConfig::default();
    let mut proxy = mk_proxy("10.0.0.1");
    proxy.interception_mode = InterceptionMode::Tproxy;

    let listeners = test.build(&proxy);
    let vi = find(&listeners, VIRTUAL_INBOUND);
    assert!(vi.transparent);
    assert_eq!(
        vi.listener_filters,
        vec![
            ListenerFilter::OriginalDst,
            ListenerFilter::OriginalSrc,
            ListenerFilter::HttpInspector,
        ]
    );
}

/// Contributes a candidate pinned to a network range and a port of its own.
struct PrivateNetworks;

impl Plugin for PrivateNetworks {
    fn name(&self) -> &str {
        "private-networks"
    }

    fn on_inbound_filter_chains(&self, _: &PluginParams<'_>) -> Vec<FilterChainTemplate> {
        vec![FilterChainTemplate {
            filter_chain_match: FilterChainMatch {
                destination_port: Some(9999),
                prefix_ranges: vec!["10.0.0.0/8".parse().unwrap()],
                ..Default::default()
            },
            ..Default::default()
        }]
    }
}

/// Tests that folding constrains every chain on the listener it came from, even when a plugin's
/// candidate already matched on a port or a range.
#[test]
fn folded_chains_match_their_own_listener() {
    let test = TestConfig::default().with_plugin(PrivateNetworks);
    let a = mk_service("a", None, [Port::new("tcp", 8080, Protocol::Tcp)]);
    let mut proxy = mk_proxy("10.0.0.1");
    proxy.ip_addresses.push("10.0.0.2".parse().unwrap());
    proxy.service_instances = vec![
        mk_instance(&a, 8080, "10.0.0.1"),
        mk_instance(&a, 8080, "10.0.0.2"),
    ];

    let inbound = test.inbound(&proxy);
    assert_eq!(
        names(&inbound.captured),
        vec!["10.0.0.1_8080", "10.0.0.2_8080"]
    );

    let listeners = test.build(&proxy);
    let vi = find(&listeners, VIRTUAL_INBOUND);
    let folded = vi
        .filter_chains
        .iter()
        .filter(|c| c.filter_chain_match.destination_port.is_some())
        .map(|c| {
            (
                &*c.name,
                c.filter_chain_match.destination_port,
                c.filter_chain_match.prefix_ranges.clone(),
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(
        folded,
        vec![
            (
                "10.0.0.1_8080",
                Some(8080),
                vec!["10.0.0.1/32".parse::<IpNet>().unwrap()]
            ),
            (
                "10.0.0.2_8080",
                Some(8080),
                vec!["10.0.0.2/32".parse::<IpNet>().unwrap()]
            ),
        ]
    );
    assert_eq!(test.metrics.conflicts(ConflictKind::DuplicateFilterChain), 0);
}

/// Tests that a Thrift port is served by a Thrift proxy.
#[test]
fn thrift_instances_get_a_thrift_proxy() {
    let test = TestConfig::default();
    let svc = mk_service(
        "rpc",
        Some("10.96.0.9/32"),
        [Port::inferred("thrift", 9090)],
    );
    let mut proxy = mk_proxy("172.16.0.1");
    proxy.service_instances = vec![mk_instance(&svc, 9090, "172.16.0.1")];

    assert_eq!(
        crate::listener_protocol(Protocol::Thrift, TrafficDirection::Inbound, &test.config),
        ListenerProtocol::Thrift
    );

    let listeners = test.build(&proxy);
    let vi = find(&listeners, VIRTUAL_INBOUND);
    let chain = vi
        .filter_chains
        .iter()
        .find(|c| c.filter_chain_match.destination_port == Some(9090))
        .expect("thrift port must be folded");
    match &chain.filters[..] {
        [NetworkFilter::ThriftProxy(thrift)] => {
            assert_eq!(
                thrift.route_config_name,
                "inbound|9090|thrift|rpc.ns.svc.cluster.local"
            );
        }
        filters => panic!("unexpected filters: {filters:?}"),
    }
}
