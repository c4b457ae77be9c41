use async_trait::async_trait;
use kube::{
    api::{Api, ApiResource, DynamicObject},
    core::GroupVersionKind,
    Client,
};
use tracing::debug;

use super::SinkResolver;
use crate::crd::SinkReference;
use crate::error::{Error, Result};

/// Resolves sinks against the cluster: core services by DNS name, anything
/// else through the `status.address` it publishes.
pub struct KubeSinkResolver {
    client: Client,
}

impl KubeSinkResolver {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SinkResolver for KubeSinkResolver {
    async fn resolve(&self, sink: Option<&SinkReference>, namespace: &str) -> Result<String> {
        let sink = sink.ok_or_else(|| Error::MissingField("spec.sink".to_string()))?;
        let ns = sink.namespace.as_deref().unwrap_or(namespace);

        if sink.api_version == "v1" && sink.kind == "Service" {
            return Ok(service_uri(&sink.name, ns));
        }

        let (group, version) = split_api_version(&sink.api_version);
        let gvk = GroupVersionKind::gvk(group, version, &sink.kind);
        let resource = ApiResource::from_gvk(&gvk);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), ns, &resource);

        let object = api.get_opt(&sink.name).await?.ok_or_else(|| {
            Error::SinkNotFound(format!("{} {}/{} not found", sink.kind, ns, sink.name))
        })?;

        debug!(kind = %sink.kind, name = %sink.name, namespace = %ns, "Resolving sink address");

        sink_uri_from_status(&object.data).ok_or_else(|| {
            Error::SinkNotAddressable(format!(
                "{} {}/{} does not contain an address",
                sink.kind, ns, sink.name
            ))
        })
    }
}

fn service_uri(name: &str, namespace: &str) -> String {
    format!("http://{}.{}.svc.cluster.local/", name, namespace)
}

fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

/// Reads `status.address.url`, falling back to `status.address.hostname`.
pub fn sink_uri_from_status(data: &serde_json::Value) -> Option<String> {
    let address = data.pointer("/status/address")?;

    if let Some(url) = address.get("url").and_then(|u| u.as_str()).filter(|u| !u.is_empty()) {
        return Some(url.to_string());
    }

    address
        .get("hostname")
        .and_then(|h| h.as_str())
        .filter(|h| !h.is_empty())
        .map(|h| format!("http://{}/", h))
}
