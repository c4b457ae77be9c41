pub mod adapter;
pub mod config;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod sink;

pub use adapter::Adapter;
pub use config::{AdapterConfig, CredentialMode};
pub use error::{Error, Result};
