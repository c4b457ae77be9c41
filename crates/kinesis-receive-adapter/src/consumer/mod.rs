//! Stream consumer runtime.
//!
//! A [`Worker`] discovers the shards of a stream and runs one consumption
//! session per shard. Each session gets its own [`RecordProcessor`] from a
//! [`RecordProcessorFactory`] and hands it batches together with a
//! [`Checkpointer`]. A batch whose last sequence number is not checkpointed
//! is delivered again.

mod checkpoint;
mod dynamodb;
mod reader;
mod worker;


#[cfg(test)]
pub use checkpoint::InMemoryCheckpointStore;
pub use checkpoint::{CheckpointStore, ShardCheckpointer, SHARD_END};
pub use dynamodb::DynamoCheckpointStore;
pub use reader::{FetchedRecords, KinesisStreamReader, StartingPosition, StreamReader};
pub use worker::{Worker, WorkerConfig};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Result;

/// One stream record as handed to processors and forwarded to sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KinesisRecord {
    pub approximate_arrival_timestamp: Option<DateTime<Utc>>,
    #[serde(serialize_with = "encode_data", deserialize_with = "decode_data")]
    pub data: Vec<u8>,
    pub encryption_type: Option<String>,
    pub partition_key: String,
    pub sequence_number: String,
}

fn encode_data<S: Serializer>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(data))
}

fn decode_data<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    STANDARD.decode(encoded).map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The worker is stopping; the shard is still open.
    Requested,
    /// The shard has been fully consumed.
    Terminate,
    /// Ownership of the shard was lost.
    Zombie,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Requested => write!(f, "REQUESTED"),
            ShutdownReason::Terminate => write!(f, "TERMINATE"),
            ShutdownReason::Zombie => write!(f, "ZOMBIE"),
        }
    }
}

#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Records progress up to and including `sequence_number`. `None` records
    /// whatever position the runtime holds as latest for the shard.
    async fn checkpoint(&self, sequence_number: Option<&str>) -> Result<()>;
}

pub struct InitializationInput {
    pub shard_id: String,
    pub checkpoint: Option<String>,
}

pub struct ProcessRecordsInput {
    pub cache_entry_time: Option<DateTime<Utc>>,
    pub cache_exit_time: Option<DateTime<Utc>>,
    pub records: Vec<KinesisRecord>,
    pub millis_behind_latest: i64,
    pub checkpointer: Arc<dyn Checkpointer>,
}

pub struct ShutdownInput {
    pub reason: ShutdownReason,
    pub checkpointer: Arc<dyn Checkpointer>,
}

/// Callbacks for a single shard session.
#[async_trait]
pub trait RecordProcessor: Send + Sync {
    async fn initialize(&self, input: &InitializationInput);

    async fn process_records(&self, input: &ProcessRecordsInput) -> Result<()>;

    async fn shutdown(&self, input: &ShutdownInput);
}

pub trait RecordProcessorFactory: Send + Sync {
    fn create_processor(&self) -> Box<dyn RecordProcessor>;
}
