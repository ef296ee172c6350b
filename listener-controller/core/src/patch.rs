use crate::{listener::Listener, proxy::Proxy};
use serde::{Deserialize, Serialize};

/// The group of listeners a patch is applied to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchContext {
    SidecarInbound,
    SidecarOutbound,
    Gateway,
}

/// Applies user-supplied overlays to synthesized listeners.
///
/// Patches run after a group of listeners has been assembled and before the listeners are
/// finalized, so a patch may add chains that are later promoted, deduplicated or dropped.
pub trait ListenerPatcher: Send + Sync {
    fn patch(&self, context: PatchContext, proxy: &Proxy, listeners: Vec<Listener>)
        -> Vec<Listener>;
}
