use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::{CredentialSource, KinesisSource};

pub const CONTROLLER_AGENT_NAME: &str = "aws-kinesis-source-controller";

pub const CONTAINER_NAME: &str = "receive-adapter";
pub const CREDENTIALS_VOLUME: &str = "aws-credentials";
pub const CREDENTIALS_MOUNT_PATH: &str = "/var/secrets/aws";

pub const ISTIO_INJECT_ANNOTATION: &str = "sidecar.istio.io/inject";
pub const IAM_ROLE_ANNOTATION: &str = "iam.amazonaws.com/role";

const MANAGED_ANNOTATIONS: [&str; 2] = [ISTIO_INJECT_ANNOTATION, IAM_ROLE_ANNOTATION];

pub const ENV_CREDS_FILE: &str = "AWS_APPLICATION_CREDENTIALS";
pub const ENV_KCL_IAM_ROLE_ARN: &str = "KCL_IAM_ROLE_ARN";
pub const ENV_STREAM_NAME: &str = "STREAM_NAME";
pub const ENV_REGION: &str = "REGION";
pub const ENV_SINK_URI: &str = "SINK_URI";
pub const ENV_CONSUMER_NAME: &str = "CONSUMER_NAME";

/// Inputs for building the receive adapter deployment of one source.
pub struct ReceiveAdapterArgs<'a> {
    pub image: &'a str,
    pub source: &'a KinesisSource,
    pub credentials: &'a CredentialSource,
    pub labels: BTreeMap<String, String>,
    pub sink_uri: &'a str,
}

pub fn labels(source_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(
        "knative-eventing-source".to_string(),
        CONTROLLER_AGENT_NAME.to_string(),
    );
    labels.insert(
        "knative-eventing-source-name".to_string(),
        source_name.to_string(),
    );
    labels
}

pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Builds the desired deployment. Nothing is sent to the API server.
pub fn make_receive_adapter(args: &ReceiveAdapterArgs<'_>) -> Deployment {
    let source = args.source;
    let name = source.name_any();

    let mut annotations = BTreeMap::new();
    annotations.insert(ISTIO_INJECT_ANNOTATION.to_string(), "true".to_string());

    let mut env = Vec::with_capacity(5);
    let mut volume_mounts = None;
    let mut volumes = None;

    match args.credentials {
        CredentialSource::Secret { name: secret_name, key } => {
            env.push(env_var(
                ENV_CREDS_FILE,
                &format!("{}/{}", CREDENTIALS_MOUNT_PATH, key),
            ));
            env.push(env_var(ENV_STREAM_NAME, &source.spec.stream_name));
            volume_mounts = Some(vec![VolumeMount {
                name: CREDENTIALS_VOLUME.to_string(),
                mount_path: CREDENTIALS_MOUNT_PATH.to_string(),
                ..Default::default()
            }]);
            volumes = Some(vec![Volume {
                name: CREDENTIALS_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(secret_name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            }]);
        }
        CredentialSource::AssumeRole { assigned_role, role_arn } => {
            annotations.insert(IAM_ROLE_ANNOTATION.to_string(), assigned_role.clone());
            env.push(env_var(ENV_STREAM_NAME, &source.spec.stream_name));
            env.push(env_var(ENV_KCL_IAM_ROLE_ARN, role_arn));
        }
    }

    env.push(env_var(ENV_REGION, &source.spec.region));
    env.push(env_var(ENV_SINK_URI, args.sink_uri));
    env.push(env_var(ENV_CONSUMER_NAME, &name));

    Deployment {
        metadata: ObjectMeta {
            namespace: source.namespace(),
            generate_name: Some(format!("kinesis-{}-", name)),
            labels: Some(args.labels.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(args.labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    annotations: Some(annotations),
                    labels: Some(args.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: source.spec.service_account_name.clone(),
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(args.image.to_string()),
                        env: Some(env),
                        volume_mounts,
                        ..Default::default()
                    }],
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

pub fn owner_reference(source: &KinesisSource) -> OwnerReference {
    OwnerReference {
        api_version: KinesisSource::api_version(&()).to_string(),
        kind: KinesisSource::kind(&()).to_string(),
        name: source.name_any(),
        uid: source.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

pub fn is_controlled_by(deployment: &Deployment, source: &KinesisSource) -> bool {
    let Some(uid) = source.uid() else {
        return false;
    };
    deployment
        .owner_references()
        .iter()
        .any(|r| r.controller == Some(true) && r.uid == uid)
}

/// Compares only the pod template fields this controller sets. Fields the API
/// server defaults (secret volume modes, termination paths, ...) are ignored.
pub fn pod_template_changed(existing: &PodTemplateSpec, desired: &PodTemplateSpec) -> bool {
    let (existing_meta, desired_meta) = (existing.metadata.as_ref(), desired.metadata.as_ref());
    for key in MANAGED_ANNOTATIONS {
        if annotation(existing_meta, key) != annotation(desired_meta, key) {
            return true;
        }
    }

    if let Some(desired_labels) = desired_meta.and_then(|m| m.labels.as_ref()) {
        let existing_labels = existing_meta.and_then(|m| m.labels.as_ref());
        for (k, v) in desired_labels {
            if existing_labels.and_then(|l| l.get(k)) != Some(v) {
                return true;
            }
        }
    }

    let empty = PodSpec::default();
    let existing_spec = existing.spec.as_ref().unwrap_or(&empty);
    let desired_spec = desired.spec.as_ref().unwrap_or(&empty);

    if existing_spec.service_account_name != desired_spec.service_account_name {
        return true;
    }

    if secret_volumes(existing_spec) != secret_volumes(desired_spec) {
        return true;
    }

    if existing_spec.containers.len() != desired_spec.containers.len() {
        return true;
    }

    existing_spec
        .containers
        .iter()
        .zip(desired_spec.containers.iter())
        .any(|(old, new)| container_changed(old, new))
}

fn container_changed(existing: &Container, desired: &Container) -> bool {
    existing.name != desired.name
        || existing.image != desired.image
        || env_list(existing) != env_list(desired)
        || mounts(existing) != mounts(desired)
}

fn annotation<'a>(meta: Option<&'a ObjectMeta>, key: &str) -> Option<&'a String> {
    meta.and_then(|m| m.annotations.as_ref())
        .and_then(|a| a.get(key))
}

fn env_list(container: &Container) -> &[EnvVar] {
    container.env.as_deref().unwrap_or_default()
}

fn mounts(container: &Container) -> Vec<(&str, &str)> {
    container
        .volume_mounts
        .iter()
        .flatten()
        .map(|m| (m.name.as_str(), m.mount_path.as_str()))
        .collect()
}

fn secret_volumes(spec: &PodSpec) -> Vec<(&str, Option<&str>)> {
    spec.volumes
        .iter()
        .flatten()
        .map(|v| {
            (
                v.name.as_str(),
                v.secret.as_ref().and_then(|s| s.secret_name.as_deref()),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{KinesisSourceSpec, SinkReference};

    const IMAGE: &str = "test-ra-image";
    const SINK_URI: &str = "http://addressable.sink.svc.cluster.local/";

    fn source() -> KinesisSource {
        let mut src = KinesisSource::new(
            "test-kinesis-source",
            KinesisSourceSpec {
                stream_name: "kinesis-name".to_string(),
                region: "us-west-2".to_string(),
                aws_creds_secret: None,
                kiam_options: None,
                sink: Some(SinkReference {
                    api_version: "duck.knative.dev/v1alpha1".to_string(),
                    kind: "Sink".to_string(),
                    name: "testsink".to_string(),
                    namespace: None,
                }),
                service_account_name: Some("source-svc-acct".to_string()),
            },
        );
        src.metadata.namespace = Some("testnamespace".to_string());
        src.metadata.uid = Some("1234-5678-90".to_string());
        src
    }

    fn secret_creds() -> CredentialSource {
        CredentialSource::Secret {
            name: "kinesis-secret-name".to_string(),
            key: "aws-secret-key".to_string(),
        }
    }

    fn role_creds() -> CredentialSource {
        CredentialSource::AssumeRole {
            assigned_role: "ASSIGNED-IAM-ROLE".to_string(),
            role_arn: "ROLE-ARN".to_string(),
        }
    }

    fn build(src: &KinesisSource, creds: &CredentialSource) -> Deployment {
        make_receive_adapter(&ReceiveAdapterArgs {
            image: IMAGE,
            source: src,
            credentials: creds,
            labels: labels(&src.name_any()),
            sink_uri: SINK_URI,
        })
    }

    fn template(d: &Deployment) -> &PodTemplateSpec {
        &d.spec.as_ref().unwrap().template
    }

    fn env_pairs(d: &Deployment) -> Vec<(String, String)> {
        template(d).spec.as_ref().unwrap().containers[0]
            .env
            .as_ref()
            .unwrap()
            .iter()
            .map(|e| (e.name.clone(), e.value.clone().unwrap_or_default()))
            .collect()
    }

    #[test]
    fn test_secret_credentials_mount_volume() {
        let src = source();
        let d = build(&src, &secret_creds());

        assert_eq!(d.metadata.generate_name.as_deref(), Some("kinesis-test-kinesis-source-"));
        assert_eq!(d.metadata.namespace.as_deref(), Some("testnamespace"));
        assert_eq!(d.spec.as_ref().unwrap().replicas, Some(1));

        assert_eq!(
            env_pairs(&d),
            vec![
                (
                    "AWS_APPLICATION_CREDENTIALS".to_string(),
                    "/var/secrets/aws/aws-secret-key".to_string()
                ),
                ("STREAM_NAME".to_string(), "kinesis-name".to_string()),
                ("REGION".to_string(), "us-west-2".to_string()),
                ("SINK_URI".to_string(), SINK_URI.to_string()),
                ("CONSUMER_NAME".to_string(), "test-kinesis-source".to_string()),
            ]
        );

        let pod = template(&d).spec.as_ref().unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some("source-svc-acct"));
        let volumes = pod.volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, CREDENTIALS_VOLUME);
        assert_eq!(
            volumes[0].secret.as_ref().unwrap().secret_name.as_deref(),
            Some("kinesis-secret-name")
        );
        let mount = &pod.containers[0].volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.mount_path, CREDENTIALS_MOUNT_PATH);

        let annotations = template(&d).metadata.as_ref().unwrap().annotations.as_ref().unwrap();
        assert_eq!(annotations.get(ISTIO_INJECT_ANNOTATION).map(String::as_str), Some("true"));
        assert!(!annotations.contains_key(IAM_ROLE_ANNOTATION));
    }

    #[test]
    fn test_role_credentials_annotate_pod() {
        let src = source();
        let d = build(&src, &role_creds());

        assert_eq!(
            env_pairs(&d),
            vec![
                ("STREAM_NAME".to_string(), "kinesis-name".to_string()),
                ("KCL_IAM_ROLE_ARN".to_string(), "ROLE-ARN".to_string()),
                ("REGION".to_string(), "us-west-2".to_string()),
                ("SINK_URI".to_string(), SINK_URI.to_string()),
                ("CONSUMER_NAME".to_string(), "test-kinesis-source".to_string()),
            ]
        );

        let pod = template(&d).spec.as_ref().unwrap();
        assert!(pod.volumes.is_none());
        assert!(pod.containers[0].volume_mounts.is_none());

        let annotations = template(&d).metadata.as_ref().unwrap().annotations.as_ref().unwrap();
        assert_eq!(
            annotations.get(IAM_ROLE_ANNOTATION).map(String::as_str),
            Some("ASSIGNED-IAM-ROLE")
        );
    }

    #[test]
    fn test_labels_select_the_deployment() {
        let src = source();
        let d = build(&src, &role_creds());
        let expected = labels("test-kinesis-source");

        assert_eq!(d.metadata.labels.as_ref(), Some(&expected));
        assert_eq!(d.spec.as_ref().unwrap().selector.match_labels.as_ref(), Some(&expected));
        assert_eq!(
            label_selector(&expected),
            "knative-eventing-source=aws-kinesis-source-controller,knative-eventing-source-name=test-kinesis-source"
        );
    }

    #[test]
    fn test_owner_reference_marks_controller() {
        let src = source();
        let mut d = build(&src, &role_creds());
        assert!(!is_controlled_by(&d, &src));

        d.metadata.owner_references = Some(vec![owner_reference(&src)]);
        assert!(is_controlled_by(&d, &src));

        let reference = owner_reference(&src);
        assert_eq!(reference.kind, "KinesisSource");
        assert_eq!(reference.api_version, "sources.eventing.kinesis.io/v1alpha1");
        assert_eq!(reference.uid, "1234-5678-90");
    }

    #[test]
    fn test_identical_template_is_unchanged() {
        let src = source();
        let d = build(&src, &secret_creds());
        assert!(!pod_template_changed(template(&d), template(&d)));
    }

    #[test]
    fn test_server_defaults_do_not_count_as_drift() {
        let src = source();
        let desired = build(&src, &secret_creds());
        let mut existing = desired.clone();

        let tpl = &mut existing.spec.as_mut().unwrap().template;
        let pod = tpl.spec.as_mut().unwrap();
        pod.restart_policy = Some("Always".to_string());
        pod.volumes.as_mut().unwrap()[0].secret.as_mut().unwrap().default_mode = Some(420);
        pod.containers[0].termination_message_path = Some("/dev/termination-log".to_string());
        tpl.metadata
            .as_mut()
            .unwrap()
            .annotations
            .as_mut()
            .unwrap()
            .insert("kubectl.kubernetes.io/restartedAt".to_string(), "now".to_string());

        assert!(!pod_template_changed(template(&existing), template(&desired)));
    }

    #[test]
    fn test_env_change_is_drift() {
        let src = source();
        let existing = build(&src, &secret_creds());
        let desired = make_receive_adapter(&ReceiveAdapterArgs {
            image: IMAGE,
            source: &src,
            credentials: &secret_creds(),
            labels: labels(&src.name_any()),
            sink_uri: "http://other.sink/",
        });
        assert!(pod_template_changed(template(&existing), template(&desired)));
    }

    #[test]
    fn test_image_change_is_drift() {
        let src = source();
        let existing = build(&src, &role_creds());
        let desired = make_receive_adapter(&ReceiveAdapterArgs {
            image: "new-image",
            source: &src,
            credentials: &role_creds(),
            labels: labels(&src.name_any()),
            sink_uri: SINK_URI,
        });
        assert!(pod_template_changed(template(&existing), template(&desired)));
    }

    #[test]
    fn test_credential_mode_switch_is_drift() {
        let src = source();
        let secret = build(&src, &secret_creds());
        let role = build(&src, &role_creds());
        assert!(pod_template_changed(template(&secret), template(&role)));
        assert!(pod_template_changed(template(&role), template(&secret)));
    }
}
