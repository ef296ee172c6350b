//! Filter chain expansion for listeners whose protocol is detected at connection time.
//!
//! A detecting listener can't pick a chain from the declared protocol, so every candidate chain
//! is crossed with a table of match options. Each option pins a transport protocol and/or an
//! ALPN set (as reported by the TLS and HTTP inspectors) and says which protocol the resulting
//! chain serves.

use crate::metrics::SynthMetrics;
use mesh_listener_controller_core::{
    plugin::{FilterChainTemplate, MutableFilterChain},
    push::MtlsMode,
    FilterChainMatch, ListenerProtocol, TransportProtocol, MTLS_HTTP_ALPNS, MTLS_TCP_ALPNS,
    PLAINTEXT_HTTP_ALPNS,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct MatchOption {
    pub(crate) application_protocols: &'static [&'static str],
    pub(crate) transport_protocol: Option<TransportProtocol>,
    pub(crate) protocol: ListenerProtocol,
}

/// Permissive mTLS with a TLS inspector: mesh clients may speak mTLS (HTTP or TCP) and
/// everybody else may speak plaintext.
pub(crate) const PERMISSIVE: [MatchOption; 4] = [
    MatchOption {
        application_protocols: &MTLS_HTTP_ALPNS,
        transport_protocol: Some(TransportProtocol::Tls),
        protocol: ListenerProtocol::Http,
    },
    MatchOption {
        application_protocols: &PLAINTEXT_HTTP_ALPNS,
        transport_protocol: Some(TransportProtocol::RawBuffer),
        protocol: ListenerProtocol::Http,
    },
    MatchOption {
        application_protocols: &MTLS_TCP_ALPNS,
        transport_protocol: Some(TransportProtocol::Tls),
        protocol: ListenerProtocol::Tcp,
    },
    // One-way TLS with no ALPN we recognize, or anything else.
    MatchOption {
        application_protocols: &[],
        transport_protocol: None,
        protocol: ListenerProtocol::Tcp,
    },
];

pub(crate) const STRICT: [MatchOption; 2] = [
    MatchOption {
        application_protocols: &MTLS_HTTP_ALPNS,
        transport_protocol: Some(TransportProtocol::Tls),
        protocol: ListenerProtocol::Http,
    },
    MatchOption {
        application_protocols: &[],
        transport_protocol: Some(TransportProtocol::Tls),
        protocol: ListenerProtocol::Tcp,
    },
];

pub(crate) const PLAINTEXT: [MatchOption; 2] = [
    MatchOption {
        application_protocols: &PLAINTEXT_HTTP_ALPNS,
        transport_protocol: None,
        protocol: ListenerProtocol::Http,
    },
    MatchOption {
        application_protocols: &[],
        transport_protocol: None,
        protocol: ListenerProtocol::Tcp,
    },
];

/// Selects the option table for an inbound detecting listener.
pub(crate) fn inbound(mode: MtlsMode, tls_inspector: bool) -> &'static [MatchOption] {
    match mode {
        MtlsMode::Strict => &STRICT,
        MtlsMode::Permissive if tls_inspector => &PERMISSIVE,
        MtlsMode::Permissive | MtlsMode::Disable => &PLAINTEXT,
    }
}

pub(crate) fn outbound() -> &'static [MatchOption] {
    &PLAINTEXT
}

/// Crosses every candidate with every option, in candidate-major order.
///
/// The option's transport protocol and ALPN set are layered onto the candidate's match. A
/// combination the candidate contradicts (a different transport protocol, or an ALPN set of its
/// own) can never be selected by the inspectors, so it is skipped and counted. A candidate's
/// TLS settings are kept only on chains that match TLS.
pub(crate) fn expand(
    candidates: &[FilterChainTemplate],
    options: &[MatchOption],
    listener: &str,
    metrics: &SynthMetrics,
) -> Vec<MutableFilterChain> {
    let mut chains = Vec::with_capacity(candidates.len() * options.len());
    for (idx, candidate) in candidates.iter().enumerate() {
        for option in options {
            let Some(filter_chain_match) = apply(&candidate.filter_chain_match, option) else {
                tracing::debug!(
                    %listener,
                    candidate = idx,
                    protocol = %option.protocol,
                    "Skipping protocol detection chain that contradicts its candidate",
                );
                metrics.auto_skipped();
                continue;
            };

            let mut chain = MutableFilterChain::new(option.protocol, filter_chain_match);
            if chain.filter_chain_match.transport_protocol == Some(TransportProtocol::Tls) {
                chain.tls = candidate.tls.clone();
            }
            chains.push(chain);
        }
    }
    chains
}

fn apply(candidate: &FilterChainMatch, option: &MatchOption) -> Option<FilterChainMatch> {
    let transport_protocol = match (candidate.transport_protocol, option.transport_protocol) {
        (Some(c), Some(o)) if c != o => return None,
        (c, o) => o.or(c),
    };

    let application_protocols = match (
        candidate.application_protocols.is_empty(),
        option.application_protocols.is_empty(),
    ) {
        (false, false) => return None,
        (true, false) => option
            .application_protocols
            .iter()
            .map(|alpn| alpn.to_string())
            .collect(),
        (_, true) => candidate.application_protocols.clone(),
    };

    Some(FilterChainMatch {
        transport_protocol,
        application_protocols,
        ..candidate.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_listener_controller_core::{
        listener::{DownstreamTls, ListenerFilter},
        IpNet,
    };

    fn mtls_candidate() -> FilterChainTemplate {
        FilterChainTemplate {
            filter_chain_match: FilterChainMatch::default(),
            tls: Some(DownstreamTls {
                require_client_certificate: true,
                alpn_protocols: vec!["h2".into(), "http/1.1".into()],
                credential_name: None,
            }),
            required_listener_filters: vec![ListenerFilter::TlsInspector],
        }
    }

    #[test]
    fn selects_tables() {
        assert_eq!(inbound(MtlsMode::Strict, false), &STRICT);
        assert_eq!(inbound(MtlsMode::Permissive, true), &PERMISSIVE);
        assert_eq!(inbound(MtlsMode::Permissive, false), &PLAINTEXT);
        assert_eq!(inbound(MtlsMode::Disable, true), &PLAINTEXT);
        assert_eq!(outbound(), &PLAINTEXT);
    }

    #[test]
    fn permissive_expansion_multiplies_candidates() {
        let metrics = SynthMetrics::default();
        let candidates = vec![mtls_candidate(), mtls_candidate()];
        let chains = expand(&candidates, &PERMISSIVE, "10.0.0.1_8080", &metrics);
        assert_eq!(chains.len(), 8);
        assert_eq!(metrics.auto_filter_chains_skipped(), 0);

        let protocols = chains[..4].iter().map(|c| c.protocol).collect::<Vec<_>>();
        assert_eq!(
            protocols,
            vec![
                ListenerProtocol::Http,
                ListenerProtocol::Http,
                ListenerProtocol::Tcp,
                ListenerProtocol::Tcp,
            ]
        );

        // TLS settings only ride along on chains that match TLS.
        assert!(chains[0].tls.is_some());
        assert!(chains[1].tls.is_none());
        assert!(chains[2].tls.is_some());
        assert!(chains[3].tls.is_none());
        assert_eq!(
            chains[1].filter_chain_match.application_protocols,
            vec!["http/1.0", "http/1.1", "h2c"]
        );
    }

    #[test]
    fn contradicting_combinations_are_skipped_and_counted() {
        let metrics = SynthMetrics::default();
        let candidate = FilterChainTemplate {
            filter_chain_match: FilterChainMatch {
                transport_protocol: Some(TransportProtocol::Tls),
                application_protocols: vec!["istio-peer-exchange".into()],
                ..Default::default()
            },
            ..mtls_candidate()
        };
        let chains = expand(&[candidate], &PERMISSIVE, "10.0.0.1_8080", &metrics);

        // Every option but the last pins an ALPN set or a plaintext transport.
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].protocol, ListenerProtocol::Tcp);
        assert_eq!(
            chains[0].filter_chain_match.transport_protocol,
            Some(TransportProtocol::Tls)
        );
        assert!(chains[0].tls.is_some());
        assert_eq!(metrics.auto_filter_chains_skipped(), 3);
    }

    #[test]
    fn candidate_fields_are_preserved() {
        let metrics = SynthMetrics::default();
        let candidate = FilterChainTemplate {
            filter_chain_match: FilterChainMatch {
                destination_port: Some(9090),
                prefix_ranges: vec!["10.1.0.0/16".parse::<IpNet>().unwrap()],
                ..Default::default()
            },
            ..Default::default()
        };
        let chains = expand(&[candidate], outbound(), "0.0.0.0_9090", &metrics);
        assert_eq!(chains.len(), 2);
        for chain in &chains {
            assert_eq!(chain.filter_chain_match.destination_port, Some(9090));
            assert_eq!(
                chain.filter_chain_match.prefix_ranges,
                vec!["10.1.0.0/16".parse::<IpNet>().unwrap()]
            );
        }
        assert!(!chains[1].filter_chain_match.is_catch_all());
    }
}
