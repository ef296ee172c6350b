use crate::{
    core::{proxy::Proxy, push::PushContext},
    synth::PatchSet,
};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// The mesh state listeners are computed from.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub push: PushContext,

    /// The proxies whose listeners are computed.
    pub proxies: Vec<Proxy>,

    #[serde(default)]
    pub patches: PatchSet,
}

// === impl Snapshot ===

impl Snapshot {
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read snapshot {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn loads_snapshots() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            br#"{
                "push": {
                    "mesh": { "proxyHttpPort": 15080, "protocolDetectionTimeout": "1s" },
                    "services": [{
                        "hostname": "a.ns.svc.cluster.local",
                        "namespace": "ns",
                        "address": "10.96.0.1/32",
                        "ports": [{ "name": "http", "port": 80, "protocol": "http" }]
                    }]
                },
                "proxies": [{ "id": "pod-0.ns", "namespace": "ns", "ipAddresses": ["10.0.0.1"] }],
                "patches": [{ "operation": "REMOVE", "name": "0.0.0.0_80" }]
            }"#,
        )
        .unwrap();

        let snapshot = Snapshot::load(file.path()).await.expect("snapshot must load");
        assert_eq!(snapshot.push.mesh.proxy_http_port, Some(15080));
        assert_eq!(snapshot.push.mesh.virtual_outbound_port, 15001);
        assert_eq!(snapshot.push.services.len(), 1);
        assert_eq!(snapshot.proxies[0].id, "pod-0.ns");
        assert_eq!(snapshot.patches.len(), 1);
    }

    #[tokio::test]
    async fn reports_invalid_snapshots() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{ "push": {} }"#).unwrap();
        let error = Snapshot::load(file.path())
            .await
            .expect_err("proxies are required");
        assert!(error.to_string().starts_with("failed to parse snapshot"));
    }
}
