mod conditions;
mod kinesis_source;

pub use conditions::{aggregate, Condition, ConditionStatus, ConditionType, ReadyState};
pub use kinesis_source::{
    CredentialSource, KiamOptions, KinesisSource, KinesisSourceSpec, KinesisSourceStatus,
    SecretKeySelector, SinkReference,
};

use kube::CustomResourceExt;

pub fn crd_yaml() -> Result<String, serde_yaml::Error> {
    serde_yaml::to_string(&KinesisSource::crd())
}

pub fn print_crds() -> Result<(), serde_yaml::Error> {
    println!("---");
    println!("{}", crd_yaml()?);
    Ok(())
}
