use super::*;
use crate::{VIRTUAL_INBOUND, VIRTUAL_OUTBOUND};
use mesh_listener_controller_core::{
    listener::FilterConfig,
    plugin::{MutableListener, PluginParams},
    ListenerProtocol,
};

fn filter(name: &str) -> FilterConfig {
    FilterConfig {
        name: name.to_string(),
        config: Default::default(),
    }
}

/// Prepends a network filter to every chain of every listener.
struct Tag(&'static str);

impl Plugin for Tag {
    fn name(&self) -> &str {
        self.0
    }

    fn on_inbound_listener(
        &self,
        _: &PluginParams<'_>,
        listener: &mut MutableListener,
    ) -> anyhow::Result<()> {
        for chain in &mut listener.filter_chains {
            chain.network_filters.push(filter(self.0));
        }
        Ok(())
    }

    fn on_outbound_listener(
        &self,
        params: &PluginParams<'_>,
        listener: &mut MutableListener,
    ) -> anyhow::Result<()> {
        self.on_inbound_listener(params, listener)
    }
}

/// Adds an HTTP filter to inbound HTTP chains.
struct Authn;

impl Plugin for Authn {
    fn name(&self) -> &str {
        "authn"
    }

    fn on_inbound_listener(
        &self,
        _: &PluginParams<'_>,
        listener: &mut MutableListener,
    ) -> anyhow::Result<()> {
        for chain in &mut listener.filter_chains {
            if chain.protocol == ListenerProtocol::Http {
                chain.http_filters.push(filter("authn"));
            }
        }
        Ok(())
    }
}

/// Fails every outbound listener after modifying it.
struct Audit;

impl Plugin for Audit {
    fn name(&self) -> &str {
        "audit"
    }

    fn on_outbound_listener(
        &self,
        _: &PluginParams<'_>,
        listener: &mut MutableListener,
    ) -> anyhow::Result<()> {
        for chain in &mut listener.filter_chains {
            chain.network_filters.push(filter("audit"));
        }
        anyhow::bail!("audit sink unavailable")
    }
}

fn extensions(chain: &FilterChain) -> Vec<&str> {
    chain
        .filters
        .iter()
        .filter_map(|f| match f {
            NetworkFilter::Extension(ext) => Some(&*ext.name),
            _ => None,
        })
        .collect()
}

#[test]
fn plugins_run_in_registration_order() {
    let test = TestConfig::default()
        .with_plugin(Tag("first"))
        .with_plugin(Tag("second"))
        .with_services([mk_service(
            "a",
            Some("10.96.0.1/32"),
            [Port::inferred("http", 80)],
        )]);
    let proxy = mk_proxy("10.0.0.1");

    let listeners = test.build(&proxy);
    for l in &listeners {
        for chain in l.all_filter_chains() {
            if chain.name == "virtualOutbound-blackhole" {
                continue;
            }
            assert_eq!(extensions(chain), vec!["first", "second"], "{}", chain.name);
        }
    }

    let http = find(&listeners, "0.0.0.0_80");
    let default = http.default_filter_chain.as_ref().expect("must have a chain");
    assert!(matches!(
        default.filters[..],
        [
            NetworkFilter::Extension(_),
            NetworkFilter::Extension(_),
            NetworkFilter::HttpConnectionManager(_),
        ]
    ));
}

#[test]
fn plugins_add_http_filters() {
    let test = TestConfig::default().with_plugin(Authn);
    let svc = mk_service("a", None, [Port::inferred("http", 1111)]);
    let mut proxy = mk_proxy("10.0.0.1");
    proxy.service_instances = vec![mk_instance(&svc, 1111, "10.0.0.1")];

    let listeners = test.build(&proxy);
    let vi = find(&listeners, VIRTUAL_INBOUND);
    let chain = vi
        .filter_chains
        .iter()
        .find(|c| c.filter_chain_match.destination_port == Some(1111))
        .expect("port must be folded");
    match &chain.filters[..] {
        [NetworkFilter::HttpConnectionManager(hcm)] => {
            assert_eq!(hcm.http_filters, vec![filter("authn")]);
        }
        filters => panic!("unexpected filters: {filters:?}"),
    }
}

/// Tests that a failing plugin is counted and doesn't cost the listener.
#[test]
fn plugin_failures_keep_the_listener() {
    let test = TestConfig::default()
        .with_plugin(Audit)
        .with_services([mk_service(
            "a",
            Some("10.96.0.1/32"),
            [Port::inferred("http", 80)],
        )]);
    let proxy = mk_proxy("10.0.0.1");

    let listeners = test.build(&proxy);
    assert_eq!(
        names(&listeners),
        vec!["0.0.0.0_80", VIRTUAL_OUTBOUND, VIRTUAL_INBOUND]
    );
    let http = find(&listeners, "0.0.0.0_80");
    let default = http.default_filter_chain.as_ref().expect("must have a chain");
    assert_eq!(extensions(default), vec!["audit"]);
    assert_eq!(test.metrics.plugin_errors("audit"), 2);
}
