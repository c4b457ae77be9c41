use async_trait::async_trait;
use aws_sdk_kinesis::types::{Record, ShardIteratorType};
use aws_sdk_kinesis::Client;
use chrono::DateTime;

use super::KinesisRecord;
use crate::error::{Error, Result};

/// Where a shard iterator starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartingPosition {
    Latest,
    TrimHorizon,
    AtSequence(String),
    AfterSequence(String),
}

pub struct FetchedRecords {
    pub records: Vec<KinesisRecord>,
    /// `None` once the shard is closed and fully read.
    pub next_iterator: Option<String>,
    pub millis_behind_latest: i64,
}

#[async_trait]
pub trait StreamReader: Send + Sync {
    async fn list_shards(&self) -> Result<Vec<String>>;

    async fn shard_iterator(
        &self,
        shard_id: &str,
        position: &StartingPosition,
    ) -> Result<Option<String>>;

    async fn get_records(&self, iterator: &str, limit: i32) -> Result<FetchedRecords>;
}

pub struct KinesisStreamReader {
    client: Client,
    stream_name: String,
}

impl KinesisStreamReader {
    pub fn new(client: Client, stream_name: impl Into<String>) -> Self {
        Self {
            client,
            stream_name: stream_name.into(),
        }
    }
}

#[async_trait]
impl StreamReader for KinesisStreamReader {
    async fn list_shards(&self) -> Result<Vec<String>> {
        let mut shard_ids = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let request = match next_token.take() {
                Some(token) => self.client.list_shards().next_token(token),
                None => self.client.list_shards().stream_name(&self.stream_name),
            };
            let output = request.send().await.map_err(Error::kinesis)?;

            shard_ids.extend(output.shards().iter().map(|s| s.shard_id().to_string()));

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(shard_ids)
    }

    async fn shard_iterator(
        &self,
        shard_id: &str,
        position: &StartingPosition,
    ) -> Result<Option<String>> {
        let request = self
            .client
            .get_shard_iterator()
            .stream_name(&self.stream_name)
            .shard_id(shard_id);

        let request = match position {
            StartingPosition::Latest => request.shard_iterator_type(ShardIteratorType::Latest),
            StartingPosition::TrimHorizon => {
                request.shard_iterator_type(ShardIteratorType::TrimHorizon)
            }
            StartingPosition::AtSequence(seq) => request
                .shard_iterator_type(ShardIteratorType::AtSequenceNumber)
                .starting_sequence_number(seq),
            StartingPosition::AfterSequence(seq) => request
                .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
                .starting_sequence_number(seq),
        };

        let output = request.send().await.map_err(Error::kinesis)?;
        Ok(output.shard_iterator().map(str::to_string))
    }

    async fn get_records(&self, iterator: &str, limit: i32) -> Result<FetchedRecords> {
        let output = self
            .client
            .get_records()
            .shard_iterator(iterator)
            .limit(limit)
            .send()
            .await
            .map_err(Error::kinesis)?;

        Ok(FetchedRecords {
            records: output.records().iter().map(to_record).collect(),
            next_iterator: output.next_shard_iterator().map(str::to_string),
            millis_behind_latest: output.millis_behind_latest().unwrap_or_default(),
        })
    }
}

pub(crate) fn to_record(record: &Record) -> KinesisRecord {
    KinesisRecord {
        approximate_arrival_timestamp: record
            .approximate_arrival_timestamp()
            .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
        data: record.data().as_ref().to_vec(),
        encryption_type: record.encryption_type().map(|e| e.as_str().to_string()),
        partition_key: record.partition_key().unwrap_or_default().to_string(),
        sequence_number: record.sequence_number().to_string(),
    }
}
