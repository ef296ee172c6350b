#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use mesh_listener_controller_core as core;
pub use mesh_listener_controller_synth as synth;

mod args;
mod logging;
mod snapshot;

pub use self::{
    args::Args,
    logging::{LogFormat, LogInitError},
    snapshot::Snapshot,
};

use self::{
    core::{listener::Listener, proxy::Proxy, push::PushContext},
    synth::ListenerBuilder,
};
use anyhow::Result;
use std::{collections::BTreeMap, sync::Arc};

/// Computes the listeners of every proxy on the blocking pool, keyed by proxy id.
pub async fn build_listeners(
    builder: Arc<ListenerBuilder>,
    push: Arc<PushContext>,
    proxies: Vec<Proxy>,
) -> Result<BTreeMap<String, Vec<Listener>>> {
    let tasks = proxies
        .into_iter()
        .map(|proxy| {
            let builder = builder.clone();
            let push = push.clone();
            tokio::task::spawn_blocking(move || {
                let listeners = builder.build(&proxy, &push);
                (proxy.id, listeners)
            })
        })
        .collect::<Vec<_>>();

    let mut listeners = BTreeMap::new();
    for task in tasks {
        let (id, built) = task.await?;
        if listeners.insert(id.clone(), built).is_some() {
            tracing::warn!(proxy = %id, "Duplicate proxy id; keeping the last computation");
        }
    }
    Ok(listeners)
}
