use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::{Api, ListParams, PostParams},
    Client,
};

use super::DeploymentClient;
use crate::error::{Error, Result};

pub struct KubeDeployments {
    client: Client,
}

impl KubeDeployments {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl DeploymentClient for KubeDeployments {
    async fn list(&self, namespace: &str, label_selector: &str) -> Result<Vec<Deployment>> {
        let list = self
            .api(namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn create(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment> {
        Ok(self
            .api(namespace)
            .create(&PostParams::default(), deployment)
            .await?)
    }

    async fn update(&self, namespace: &str, deployment: &Deployment) -> Result<Deployment> {
        let name = deployment
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::MissingField("metadata.name".to_string()))?;
        Ok(self
            .api(namespace)
            .replace(&name, &PostParams::default(), deployment)
            .await?)
    }
}
