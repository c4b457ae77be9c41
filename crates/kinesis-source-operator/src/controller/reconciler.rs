use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tracing::{debug, error, info};

use super::{DeploymentClient, SinkResolver};
use crate::crd::{KinesisSource, KinesisSourceStatus};
use crate::error::Result;
use crate::resources::{
    is_controlled_by, label_selector, labels, make_receive_adapter, owner_reference,
    pod_template_changed, ReceiveAdapterArgs,
};

/// Drives one `KinesisSource` towards a running receive adapter.
///
/// `reconcile` works on an in-memory copy of the source: status is changed on
/// that copy and the caller writes it back. Deployments are the only objects
/// touched through the API. Finalizers and deletion are handled by the caller.
pub struct Reconciler {
    deployments: Arc<dyn DeploymentClient>,
    sinks: Arc<dyn SinkResolver>,
    receive_adapter_image: String,
}

impl Reconciler {
    pub fn new(
        deployments: Arc<dyn DeploymentClient>,
        sinks: Arc<dyn SinkResolver>,
        receive_adapter_image: String,
    ) -> Self {
        Self {
            deployments,
            sinks,
            receive_adapter_image,
        }
    }

    pub async fn reconcile(&self, source: &mut KinesisSource) -> Result<()> {
        let generation = source.metadata.generation;
        let status = status_mut(source);
        status.observed_generation = generation;
        status.initialize_conditions();

        let ns = source.namespace().unwrap_or_else(|| "default".to_string());

        let sink_uri = match self.sinks.resolve(source.spec.sink.as_ref(), &ns).await {
            Ok(uri) => uri,
            Err(e) => {
                status_mut(source).mark_no_sink("NotFound", "");
                return Err(e);
            }
        };
        status_mut(source).mark_sink(&sink_uri);

        if let Err(e) = self.reconcile_receive_adapter(source, &ns, &sink_uri).await {
            error!(error = %e, "Unable to create the receive adapter");
            return Err(e);
        }
        status_mut(source).mark_deployed();

        Ok(())
    }

    async fn reconcile_receive_adapter(
        &self,
        source: &KinesisSource,
        ns: &str,
        sink_uri: &str,
    ) -> Result<Deployment> {
        let credentials = source.spec.credentials()?;
        let labels = labels(&source.name_any());

        let mut desired = make_receive_adapter(&ReceiveAdapterArgs {
            image: &self.receive_adapter_image,
            source,
            credentials: &credentials,
            labels: labels.clone(),
            sink_uri,
        });

        if let Some(mut existing) = self.find_receive_adapter(source, ns, &labels).await? {
            let desired_template = desired.spec.take().map(|s| s.template).unwrap_or_default();
            let changed = match existing.spec.as_ref() {
                Some(spec) => pod_template_changed(&spec.template, &desired_template),
                None => true,
            };

            if !changed {
                debug!(deployment = %existing.name_any(), "Reusing existing receive adapter");
                return Ok(existing);
            }

            existing.spec.get_or_insert_with(Default::default).template = desired_template;
            let updated = self.deployments.update(ns, &existing).await?;
            info!(deployment = %updated.name_any(), "Receive adapter updated");
            return Ok(updated);
        }

        desired.metadata.owner_references = Some(vec![owner_reference(source)]);
        let created = self.deployments.create(ns, &desired).await?;
        info!(deployment = %created.name_any(), "Receive adapter created");
        Ok(created)
    }

    /// First listed deployment controlled by `source`. Listing order is not
    /// stable, so if orphans with the same owner exist the pick is arbitrary.
    async fn find_receive_adapter(
        &self,
        source: &KinesisSource,
        ns: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Option<Deployment>> {
        let candidates = self
            .deployments
            .list(ns, &label_selector(labels))
            .await
            .inspect_err(|e| error!(error = %e, "Unable to list deployments"))?;

        Ok(candidates
            .into_iter()
            .find(|d| is_controlled_by(d, source)))
    }
}

fn status_mut(source: &mut KinesisSource) -> &mut KinesisSourceStatus {
    source.status.get_or_insert_with(Default::default)
}
