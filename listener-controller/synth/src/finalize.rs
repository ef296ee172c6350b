use crate::metrics::{ConflictKind, DropReason, SynthMetrics};
use mesh_listener_controller_core::listener::{FilterChain, Listener, ListenerFilter};

/// Brings a listener into its emitted form, or discards it.
///
/// Matches are normalized so that output doesn't depend on the order in which set-valued fields
/// were populated. The first catch-all chain becomes the default chain and later chains that
/// duplicate a kept chain are dropped. A listener left without any chain is discarded.
pub(crate) fn finalize(mut listener: Listener, metrics: &SynthMetrics) -> Option<Listener> {
    let mut default = listener.default_filter_chain.take().map(normalize);
    let mut kept = Vec::<FilterChain>::with_capacity(listener.filter_chains.len());

    for chain in listener.filter_chains.drain(..).map(normalize) {
        if chain.filter_chain_match.is_catch_all() {
            if let Some(existing) = default.as_ref() {
                tracing::warn!(
                    listener = %listener.name,
                    chain = %chain.name,
                    default = %existing.name,
                    "Dropping duplicate catch-all filter chain",
                );
                metrics.conflict(ConflictKind::DuplicateCatchAll);
            } else {
                default = Some(chain);
            }
            continue;
        }

        if let Some(existing) = kept
            .iter()
            .find(|c| c.filter_chain_match == chain.filter_chain_match)
        {
            tracing::warn!(
                listener = %listener.name,
                chain = %chain.name,
                existing = %existing.name,
                "Dropping filter chain with a duplicate match",
            );
            metrics.conflict(ConflictKind::DuplicateFilterChain);
            continue;
        }

        kept.push(chain);
    }

    if kept.is_empty() && default.is_none() {
        tracing::warn!(listener = %listener.name, "Discarding listener with no filter chains");
        metrics.dropped(DropReason::NoFilterChains);
        return None;
    }

    listener.filter_chains = kept;
    listener.default_filter_chain = default;

    if listener.all_filter_chains().any(|c| c.requires_tls_inspector()) {
        listener.add_listener_filter(ListenerFilter::TlsInspector);
    }
    if listener
        .all_filter_chains()
        .any(|c| c.filter_chain_match.requires_http_inspector())
    {
        listener.add_listener_filter(ListenerFilter::HttpInspector);
    }

    tracing::trace!(
        listener = %listener.name,
        chains = listener.filter_chains.len(),
        default = listener.default_filter_chain.is_some(),
        "Finalized listener",
    );
    Some(listener)
}

fn normalize(mut chain: FilterChain) -> FilterChain {
    chain.filter_chain_match = chain.filter_chain_match.normalized();
    chain
}
