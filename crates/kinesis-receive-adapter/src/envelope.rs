use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::consumer::{KinesisRecord, ProcessRecordsInput};
use crate::error::Result;

pub const EVENT_TYPE: &str = "aws.kinesis.event";
pub const CLOUDEVENTS_VERSION: &str = "0.2";
pub const KINESIS_SCHEMA_VERSION: &str = "1.0";
pub const EVENT_SOURCE: &str = "aws:kinesis";
pub const EVENT_NAME: &str = "aws:kinesis:record";

pub const EXT_SCHEMA_VERSION: &str = "kinesisschemaversion";
pub const EXT_EVENT_SOURCE: &str = "eventsource";
pub const EXT_EVENT_NAME: &str = "eventname";
pub const EXT_EVENT_SOURCE_ARN: &str = "eventsourcearn";
pub const EXT_REGION: &str = "region";

/// Batch as it appears in the event body. The checkpoint handle is opaque
/// and always written as `null`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct BatchPayload<'a> {
    pub cache_entry_time: Option<DateTime<Utc>>,
    pub cache_exit_time: Option<DateTime<Utc>>,
    pub records: &'a [KinesisRecord],
    pub checkpointer: OpaqueCheckpointer,
    pub millis_behind_latest: i64,
}

#[derive(Debug, Serialize)]
pub struct OpaqueCheckpointer;

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: String,
    pub event_type: String,
    pub source: String,
    pub time: DateTime<Utc>,
    pub extensions: BTreeMap<&'static str, String>,
    pub data: Vec<u8>,
}

impl Envelope {
    /// Builds the event for a non-empty batch. Returns `None` for an empty one.
    ///
    /// The id is `<first sequence number>:<record count>`, so a redelivered
    /// batch keeps its id when the records match.
    pub fn from_batch(
        input: &ProcessRecordsInput,
        stream_arn: &str,
        region: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>> {
        let first = match input.records.first() {
            Some(first) => first,
            None => return Ok(None),
        };

        let payload = BatchPayload {
            cache_entry_time: input.cache_entry_time,
            cache_exit_time: input.cache_exit_time,
            records: &input.records,
            checkpointer: OpaqueCheckpointer,
            millis_behind_latest: input.millis_behind_latest,
        };

        let mut extensions = BTreeMap::new();
        extensions.insert(EXT_SCHEMA_VERSION, KINESIS_SCHEMA_VERSION.to_string());
        extensions.insert(EXT_EVENT_SOURCE, EVENT_SOURCE.to_string());
        extensions.insert(EXT_EVENT_NAME, EVENT_NAME.to_string());
        extensions.insert(EXT_EVENT_SOURCE_ARN, stream_arn.to_string());
        extensions.insert(EXT_REGION, region.to_string());

        Ok(Some(Self {
            id: format!("{}:{}", first.sequence_number, input.records.len()),
            event_type: EVENT_TYPE.to_string(),
            source: format!("/{}", stream_arn),
            time: now - Duration::milliseconds(input.millis_behind_latest),
            extensions,
            data: serde_json::to_vec(&payload)?,
        }))
    }
}
