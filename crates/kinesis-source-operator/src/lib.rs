pub mod controller;
pub mod crd;
pub mod error;
pub mod resources;
pub mod settings;

pub use crd::{KinesisSource, KinesisSourceSpec, KinesisSourceStatus};
pub use error::{Error, Result};
pub use settings::Settings;
