use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub receive_adapter_image: String,
    #[serde(default)]
    pub requeue: RequeueSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RequeueSettings {
    #[serde(default = "default_resync_secs")]
    pub resync_secs: u64,
    #[serde(default = "default_retryable_secs")]
    pub retryable_secs: u64,
    #[serde(default = "default_fatal_secs")]
    pub fatal_secs: u64,
}

fn default_resync_secs() -> u64 {
    60
}

fn default_retryable_secs() -> u64 {
    30
}

fn default_fatal_secs() -> u64 {
    300
}

impl Default for RequeueSettings {
    fn default() -> Self {
        Self {
            resync_secs: default_resync_secs(),
            retryable_secs: default_retryable_secs(),
            fatal_secs: default_fatal_secs(),
        }
    }
}

impl RequeueSettings {
    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn retryable(&self) -> Duration {
        Duration::from_secs(self.retryable_secs)
    }

    pub fn fatal(&self) -> Duration {
        Duration::from_secs(self.fatal_secs)
    }
}

impl Settings {
    pub fn new(receive_adapter_image: impl Into<String>) -> Self {
        Self {
            receive_adapter_image: receive_adapter_image.into(),
            requeue: RequeueSettings::default(),
        }
    }

    /// Reads an optional config file, then `KINESIS_SOURCE__*` variables on top.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.as_ref()).required(false));
        }
        builder
            .add_source(config::Environment::with_prefix("KINESIS_SOURCE").separator("__"))
            .build()?
            .try_deserialize()
    }
}
