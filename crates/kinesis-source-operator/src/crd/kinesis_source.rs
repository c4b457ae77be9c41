use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;
use crate::error::{Error, Result};

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "sources.eventing.kinesis.io",
    version = "v1alpha1",
    kind = "KinesisSource",
    plural = "kinesissources",
    namespaced,
    status = "KinesisSourceStatus",
    derive = "PartialEq",
    category = "all",
    category = "eventing",
    category = "sources",
    printcolumn = r#"{"name":"Stream", "type":"string", "jsonPath":".spec.streamName"}"#,
    printcolumn = r#"{"name":"Sink", "type":"string", "jsonPath":".status.sinkUri"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KinesisSourceSpec {
    pub stream_name: String,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_creds_secret: Option<SecretKeySelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kiam_options: Option<KiamOptions>,
    #[serde(default)]
    pub sink: Option<SinkReference>,
    #[serde(default)]
    pub service_account_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KiamOptions {
    /// Role assigned to the receive adapter pod. Either a role ARN or a role
    /// name in the cluster's account.
    #[serde(default)]
    pub assigned_iam_role: String,
    /// Role the consumer assumes; must trust `assignedIamRole`.
    #[serde(default)]
    pub kcl_iam_role_arn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SinkReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KinesisSourceStatus {
    #[serde(default)]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub sink_uri: Option<String>,
}

/// How the receive adapter authenticates against Kinesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Shared credentials file stored under `key` in secret `name`.
    Secret { name: String, key: String },
    /// Role assumed from the pod's assigned role.
    AssumeRole { assigned_role: String, role_arn: String },
}

impl KinesisSourceSpec {
    /// Exactly one credential mode must be fully populated.
    pub fn credentials(&self) -> Result<CredentialSource> {
        let secret = self
            .aws_creds_secret
            .as_ref()
            .filter(|s| !s.name.is_empty() || !s.key.is_empty());
        let kiam = self
            .kiam_options
            .as_ref()
            .filter(|k| !k.assigned_iam_role.is_empty() || !k.kcl_iam_role_arn.is_empty());

        match (secret, kiam) {
            (Some(_), Some(_)) => Err(Error::InvalidConfig(
                "awsCredsSecret and kiamOptions are mutually exclusive".to_string(),
            )),
            (None, None) => Err(Error::InvalidConfig(
                "neither awsCredsSecret nor kiamOptions has a valid configuration".to_string(),
            )),
            (Some(s), None) => {
                if s.name.is_empty() || s.key.is_empty() {
                    return Err(Error::InvalidConfig(
                        "awsCredsSecret requires both name and key".to_string(),
                    ));
                }
                Ok(CredentialSource::Secret {
                    name: s.name.clone(),
                    key: s.key.clone(),
                })
            }
            (None, Some(k)) => {
                if k.assigned_iam_role.is_empty() || k.kcl_iam_role_arn.is_empty() {
                    return Err(Error::InvalidConfig(
                        "kiamOptions requires both assignedIamRole and kclIamRoleArn".to_string(),
                    ));
                }
                Ok(CredentialSource::AssumeRole {
                    assigned_role: k.assigned_iam_role.clone(),
                    role_arn: k.kcl_iam_role_arn.clone(),
                })
            }
        }
    }
}
