use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use super::Checkpointer;
use crate::error::{Error, Result};

/// Stored position of a shard that has been read to its end.
pub const SHARD_END: &str = "SHARD_END";

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, shard_id: &str) -> Result<Option<String>>;

    async fn put(&self, shard_id: &str, sequence_number: &str) -> Result<()>;
}

#[cfg(test)]
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    positions: dashmap::DashMap<String, String>,
}

#[cfg(test)]
impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, shard_id: &str) -> Result<Option<String>> {
        Ok(self.positions.get(shard_id).map(|p| p.value().clone()))
    }

    async fn put(&self, shard_id: &str, sequence_number: &str) -> Result<()> {
        self.positions
            .insert(shard_id.to_string(), sequence_number.to_string());
        Ok(())
    }
}

/// Checkpointer handed to the processor of one shard session.
pub struct ShardCheckpointer {
    shard_id: String,
    store: Arc<dyn CheckpointStore>,
    latest: Mutex<Option<String>>,
}

impl ShardCheckpointer {
    pub fn new(shard_id: impl Into<String>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            shard_id: shard_id.into(),
            store,
            latest: Mutex::new(None),
        }
    }

    /// Position used by `checkpoint(None)`.
    pub fn set_latest(&self, sequence_number: impl Into<String>) {
        if let Ok(mut latest) = self.latest.lock() {
            *latest = Some(sequence_number.into());
        }
    }

    fn latest(&self) -> Result<Option<String>> {
        self.latest
            .lock()
            .map(|l| l.clone())
            .map_err(|e| Error::Checkpoint(e.to_string()))
    }
}

#[async_trait]
impl Checkpointer for ShardCheckpointer {
    async fn checkpoint(&self, sequence_number: Option<&str>) -> Result<()> {
        let position = match sequence_number {
            Some(seq) => seq.to_string(),
            None => match self.latest()? {
                Some(latest) => latest,
                None => {
                    debug!(shard_id = %self.shard_id, "Nothing to checkpoint");
                    return Ok(());
                }
            },
        };

        debug!(shard_id = %self.shard_id, position = %position, "Checkpoint");
        self.store.put(&self.shard_id, &position).await
    }
}
