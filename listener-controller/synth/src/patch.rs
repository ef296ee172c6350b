use mesh_listener_controller_core::{
    listener::Listener,
    patch::{ListenerPatcher, PatchContext},
    proxy::Proxy,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An ordered list of listener patches, loadable from configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatchSet(Vec<ListenerPatch>);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerPatch {
    /// Restricts the patch to one group of listeners. Unset patches apply to every group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PatchContext>,

    /// Restricts the patch to proxies carrying all of these labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub proxy_labels: BTreeMap<String, String>,

    #[serde(flatten)]
    pub operation: PatchOperation,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchOperation {
    /// Appends a listener unless one with the same name exists.
    Add { listener: Box<Listener> },

    /// Removes the listener with the given name.
    Remove { name: String },
}

// === impl PatchSet ===

impl PatchSet {
    pub fn new(patches: impl IntoIterator<Item = ListenerPatch>) -> Self {
        Self(patches.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl ListenerPatcher for PatchSet {
    fn patch(
        &self,
        context: PatchContext,
        proxy: &Proxy,
        mut listeners: Vec<Listener>,
    ) -> Vec<Listener> {
        for patch in self.0.iter().filter(|p| p.applies(context, proxy)) {
            match &patch.operation {
                PatchOperation::Add { listener } => {
                    if listeners.iter().any(|l| l.name == listener.name) {
                        tracing::warn!(
                            listener = %listener.name,
                            ?context,
                            "Listener already exists; skipping patch",
                        );
                        continue;
                    }
                    tracing::debug!(listener = %listener.name, ?context, "Adding listener");
                    listeners.push((**listener).clone());
                }
                PatchOperation::Remove { name } => {
                    tracing::debug!(listener = %name, ?context, "Removing listener");
                    listeners.retain(|l| l.name != *name);
                }
            }
        }
        listeners
    }
}

// === impl ListenerPatch ===

impl ListenerPatch {
    fn applies(&self, context: PatchContext, proxy: &Proxy) -> bool {
        self.context.map(|c| c == context).unwrap_or(true)
            && self
                .proxy_labels
                .iter()
                .all(|(k, v)| proxy.labels.get(k) == Some(v))
    }
}
