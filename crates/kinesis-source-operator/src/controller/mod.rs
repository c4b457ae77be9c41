pub mod kinesis_source_controller;
mod kube_client;
mod reconciler;
mod sink;


use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::Client;

use crate::crd::SinkReference;
use crate::error::Result;
use crate::settings::Settings;

pub use kube_client::KubeDeployments;
pub use reconciler::Reconciler;
pub use sink::{sink_uri_from_status, KubeSinkResolver};

pub const FINALIZER_NAME: &str = crate::resources::CONTROLLER_AGENT_NAME;

/// Resolves a sink reference to the URI events are delivered to.
#[async_trait]
pub trait SinkResolver: Send + Sync {
    async fn resolve(&self, sink: Option<&SinkReference>, namespace: &str) -> Result<String>;
}

/// The deployment operations the reconciler needs from the API server.
#[async_trait]
pub trait DeploymentClient: Send + Sync {
    async fn list(&self, namespace: &str, label_selector: &str) -> Result<Vec<Deployment>>;

    async fn create(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment>;

    async fn update(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment>;
}

pub struct Context {
    pub client: Client,
    pub reconciler: Reconciler,
    pub settings: Settings,
}

impl Context {
    pub fn new(client: Client, settings: Settings) -> Arc<Self> {
        let reconciler = Reconciler::new(
            Arc::new(KubeDeployments::new(client.clone())),
            Arc::new(KubeSinkResolver::new(client.clone())),
            settings.receive_adapter_image.clone(),
        );
        Arc::new(Self {
            client,
            reconciler,
            settings,
        })
    }
}
