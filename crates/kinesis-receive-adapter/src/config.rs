use std::path::PathBuf;

use crate::error::{Error, Result};

pub const ENV_CREDS_FILE: &str = "AWS_APPLICATION_CREDENTIALS";
pub const ENV_KCL_IAM_ROLE_ARN: &str = "KCL_IAM_ROLE_ARN";
pub const ENV_STREAM_NAME: &str = "STREAM_NAME";
pub const ENV_REGION: &str = "REGION";
pub const ENV_SINK_URI: &str = "SINK_URI";
pub const ENV_CONSUMER_NAME: &str = "CONSUMER_NAME";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialMode {
    /// Shared credentials file mounted from a secret.
    SharedCredentialsFile(PathBuf),
    /// Role assumed through STS with the ambient identity.
    AssumeRole { role_arn: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub stream_name: String,
    pub region: String,
    pub sink_uri: String,
    pub consumer_name: String,
    pub credentials: CredentialMode,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| lookup(key).ok_or(Error::MissingEnv(key));
        let optional = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let stream_name = required(ENV_STREAM_NAME)?;
        let region = required(ENV_REGION)?;
        let sink_uri = required(ENV_SINK_URI)?;
        let consumer_name = required(ENV_CONSUMER_NAME)?;

        let credentials = match (optional(ENV_CREDS_FILE), optional(ENV_KCL_IAM_ROLE_ARN)) {
            (Some(path), None) => CredentialMode::SharedCredentialsFile(PathBuf::from(path)),
            (None, Some(role_arn)) => CredentialMode::AssumeRole { role_arn },
            (Some(_), Some(_)) => {
                return Err(Error::InvalidConfig(format!(
                    "only one of {} and {} may be set",
                    ENV_CREDS_FILE, ENV_KCL_IAM_ROLE_ARN
                )))
            }
            (None, None) => {
                return Err(Error::InvalidConfig(format!(
                    "neither {} nor {} is set",
                    ENV_CREDS_FILE, ENV_KCL_IAM_ROLE_ARN
                )))
            }
        };

        Ok(Self {
            stream_name,
            region,
            sink_uri,
            consumer_name,
            credentials,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        let mut vars: HashMap<String, String> = [
            (ENV_STREAM_NAME, "orders"),
            (ENV_REGION, "us-west-2"),
            (ENV_SINK_URI, "http://event-display.default.svc.cluster.local/"),
            (ENV_CONSUMER_NAME, "orders-source"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in pairs {
            vars.insert(k.to_string(), v.to_string());
        }
        vars
    }

    fn load(vars: &HashMap<String, String>) -> Result<AdapterConfig> {
        AdapterConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_secret_mode() {
        let config = load(&env(&[(ENV_CREDS_FILE, "/var/secrets/aws/credentials")])).unwrap();
        assert_eq!(config.stream_name, "orders");
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.consumer_name, "orders-source");
        assert_eq!(
            config.credentials,
            CredentialMode::SharedCredentialsFile(PathBuf::from("/var/secrets/aws/credentials"))
        );
    }

    #[test]
    fn test_role_mode() {
        let config = load(&env(&[(ENV_KCL_IAM_ROLE_ARN, "arn:aws:iam::123:role/kcl")])).unwrap();
        assert_eq!(
            config.credentials,
            CredentialMode::AssumeRole {
                role_arn: "arn:aws:iam::123:role/kcl".to_string()
            }
        );
    }

    #[test]
    fn test_empty_value_counts_as_unset() {
        let config = load(&env(&[
            (ENV_CREDS_FILE, ""),
            (ENV_KCL_IAM_ROLE_ARN, "arn:aws:iam::123:role/kcl"),
        ]))
        .unwrap();
        assert!(matches!(config.credentials, CredentialMode::AssumeRole { .. }));
    }

    #[test]
    fn test_no_credentials() {
        let err = load(&env(&[])).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_both_credentials() {
        let err = load(&env(&[
            (ENV_CREDS_FILE, "/var/secrets/aws/credentials"),
            (ENV_KCL_IAM_ROLE_ARN, "arn:aws:iam::123:role/kcl"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_missing_required() {
        let mut vars = env(&[(ENV_CREDS_FILE, "/var/secrets/aws/credentials")]);
        vars.remove(ENV_SINK_URI);
        let err = load(&vars).unwrap_err();
        assert!(matches!(err, Error::MissingEnv(ENV_SINK_URI)));
    }
}
