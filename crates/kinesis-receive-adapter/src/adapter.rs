use std::sync::Arc;

use async_trait::async_trait;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_runtime::env_config::file::{EnvConfigFileKind, EnvConfigFiles};
use aws_sdk_kinesis::Client;
use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::{AdapterConfig, CredentialMode};
use crate::consumer::{
    DynamoCheckpointStore, InitializationInput, KinesisStreamReader, ProcessRecordsInput,
    RecordProcessor, RecordProcessorFactory, ShutdownInput, ShutdownReason, Worker, WorkerConfig,
};
use crate::envelope::Envelope;
use crate::error::{Error, Result};
use crate::sink::{EventSink, HttpSink};

/// Forwards a Kinesis stream to a sink, one event per batch.
pub struct Adapter {
    config: AdapterConfig,
}

impl Adapter {
    pub fn new(config: AdapterConfig) -> Self {
        Self { config }
    }

    /// Runs until `stop` turns true. Fails only if startup fails.
    pub async fn start(self, stop: watch::Receiver<bool>) -> Result<()> {
        let sink: Arc<dyn EventSink> = Arc::new(
            HttpSink::new(&self.config.sink_uri)
                .inspect_err(|e| error!(error = %e, "Failed to create sink client"))?,
        );

        let sdk_config = load_sdk_config(&self.config).await;
        let client = Client::new(&sdk_config);

        let stream_arn = describe_stream_arn(&client, &self.config.stream_name)
            .await
            .inspect_err(|e| {
                error!(stream = %self.config.stream_name, error = %e, "Failed to describe stream")
            })?;

        // One table per consumer, named after it.
        let checkpoints = DynamoCheckpointStore::new(
            aws_sdk_dynamodb::Client::new(&sdk_config),
            &self.config.consumer_name,
            &self.config.consumer_name,
        );
        checkpoints
            .ensure_table()
            .await
            .inspect_err(|e| error!(error = %e, "Failed to prepare checkpoint table"))?;

        info!(stream_arn = %stream_arn, consumer = %self.config.consumer_name, "Starting worker");

        let factory = Arc::new(SourceRecordProcessorFactory::new(
            sink,
            stream_arn,
            self.config.region.clone(),
        ));
        let worker = Worker::new(
            WorkerConfig::new(&self.config.consumer_name, &self.config.stream_name),
            Arc::new(KinesisStreamReader::new(client, &self.config.stream_name)),
            factory,
            Arc::new(checkpoints),
        );

        worker.run(stop).await;
        Ok(())
    }
}

async fn load_sdk_config(config: &AdapterConfig) -> SdkConfig {
    let region = Region::new(config.region.clone());

    match &config.credentials {
        CredentialMode::SharedCredentialsFile(path) => {
            let files = EnvConfigFiles::builder()
                .with_file(EnvConfigFileKind::Credentials, path.clone())
                .build();
            aws_config::defaults(BehaviorVersion::latest())
                .region(region)
                .profile_files(files)
                .load()
                .await
        }
        CredentialMode::AssumeRole { role_arn } => {
            let base = aws_config::defaults(BehaviorVersion::latest())
                .region(region.clone())
                .load()
                .await;
            let provider = AssumeRoleProvider::builder(role_arn)
                .session_name(&config.consumer_name)
                .configure(&base)
                .build()
                .await;
            aws_config::defaults(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(provider)
                .load()
                .await
        }
    }
}

async fn describe_stream_arn(client: &Client, stream_name: &str) -> Result<String> {
    let output = client
        .describe_stream_summary()
        .stream_name(stream_name)
        .send()
        .await
        .map_err(Error::kinesis)?;

    output
        .stream_description_summary()
        .map(|summary| summary.stream_arn().to_string())
        .ok_or_else(|| Error::Kinesis(format!("stream {} has no description", stream_name)))
}

pub struct SourceRecordProcessorFactory {
    sink: Arc<dyn EventSink>,
    stream_arn: String,
    region: String,
}

impl SourceRecordProcessorFactory {
    pub fn new(sink: Arc<dyn EventSink>, stream_arn: String, region: String) -> Self {
        Self {
            sink,
            stream_arn,
            region,
        }
    }
}

impl RecordProcessorFactory for SourceRecordProcessorFactory {
    fn create_processor(&self) -> Box<dyn RecordProcessor> {
        Box::new(SourceRecordProcessor {
            sink: self.sink.clone(),
            stream_arn: self.stream_arn.clone(),
            region: self.region.clone(),
        })
    }
}

/// Posts each batch and checkpoints its last record once the sink accepts it.
pub struct SourceRecordProcessor {
    sink: Arc<dyn EventSink>,
    stream_arn: String,
    region: String,
}

#[async_trait]
impl RecordProcessor for SourceRecordProcessor {
    async fn initialize(&self, input: &InitializationInput) {
        info!(shard_id = %input.shard_id, checkpoint = ?input.checkpoint, "Processing shard");
    }

    async fn process_records(&self, input: &ProcessRecordsInput) -> Result<()> {
        let envelope =
            match Envelope::from_batch(input, &self.stream_arn, &self.region, Utc::now())? {
                Some(envelope) => envelope,
                None => return Ok(()),
            };

        info!(event_id = %envelope.id, record_count = input.records.len(), "Posting batch");

        if let Err(e) = self.sink.send(&envelope).await {
            error!(event_id = %envelope.id, error = %e, "Failed to post message");
            return Err(e);
        }

        if let Some(last) = input.records.last() {
            info!(
                sequence_number = %last.sequence_number,
                millis_behind_latest = input.millis_behind_latest,
                "Checkpoint progress"
            );
            input.checkpointer.checkpoint(Some(&last.sequence_number)).await?;
        }

        Ok(())
    }

    async fn shutdown(&self, input: &ShutdownInput) {
        info!(reason = %input.reason, "Shutdown");

        if input.reason == ShutdownReason::Terminate {
            if let Err(e) = input.checkpointer.checkpoint(None).await {
                error!(error = %e, "Failed to checkpoint shard end");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{Checkpointer, KinesisRecord};
    use std::sync::Mutex;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const STREAM_ARN: &str = "arn:aws:kinesis:us-west-2:123456789012:stream/orders";
    const EXPECTED_BODY: &str = r#"{"CacheEntryTime":null,"CacheExitTime":null,"Records":[{"ApproximateArrivalTimestamp":null,"Data":"eyJrZXkiOiJ2YWx1ZSJ9","EncryptionType":null,"PartitionKey":"1","SequenceNumber":"1234567"}],"Checkpointer":null,"MillisBehindLatest":1000}"#;

    #[derive(Default)]
    struct RecordingCheckpointer {
        calls: Mutex<Vec<Option<String>>>,
    }

    impl RecordingCheckpointer {
        fn calls(&self) -> Vec<Option<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Checkpointer for RecordingCheckpointer {
        async fn checkpoint(&self, sequence_number: Option<&str>) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(sequence_number.map(str::to_string));
            Ok(())
        }
    }

    fn processor(sink_uri: String) -> Box<dyn RecordProcessor> {
        let sink = Arc::new(HttpSink::new(sink_uri).unwrap());
        SourceRecordProcessorFactory::new(sink, STREAM_ARN.to_string(), "us-west-2".to_string())
            .create_processor()
    }

    fn batch(
        records: Vec<KinesisRecord>,
        checkpointer: Arc<RecordingCheckpointer>,
    ) -> ProcessRecordsInput {
        ProcessRecordsInput {
            cache_entry_time: None,
            cache_exit_time: None,
            records,
            millis_behind_latest: 1000,
            checkpointer,
        }
    }

    fn record() -> KinesisRecord {
        KinesisRecord {
            approximate_arrival_timestamp: None,
            data: br#"{"key":"value"}"#.to_vec(),
            encryption_type: None,
            partition_key: "1".to_string(),
            sequence_number: "1234567".to_string(),
        }
    }

    async fn sink_responding(status: u16) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("ce-type", "aws.kinesis.event"))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_accepted_batch_is_checkpointed() {
        let server = sink_responding(200).await;
        let checkpointer = Arc::new(RecordingCheckpointer::default());

        processor(server.uri())
            .process_records(&batch(vec![record()], checkpointer.clone()))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(String::from_utf8_lossy(&requests[0].body), EXPECTED_BODY);
        assert_eq!(requests[0].headers["ce-id"], "1234567:1");
        assert_eq!(requests[0].headers["ce-source"], format!("/{}", STREAM_ARN).as_str());
        assert_eq!(checkpointer.calls(), vec![Some("1234567".to_string())]);
    }

    #[tokio::test]
    async fn test_rejected_batch_is_not_checkpointed() {
        let server = sink_responding(408).await;
        let checkpointer = Arc::new(RecordingCheckpointer::default());

        let err = processor(server.uri())
            .process_records(&batch(vec![record()], checkpointer.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SinkRejected { status: 408 }));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
        assert!(checkpointer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;
        let checkpointer = Arc::new(RecordingCheckpointer::default());

        processor(server.uri())
            .process_records(&batch(Vec::new(), checkpointer.clone()))
            .await
            .unwrap();

        assert!(checkpointer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_checkpoints_latest() {
        let checkpointer = Arc::new(RecordingCheckpointer::default());
        let processor = processor("http://127.0.0.1:9/".to_string());

        processor
            .shutdown(&ShutdownInput {
                reason: ShutdownReason::Requested,
                checkpointer: checkpointer.clone(),
            })
            .await;
        assert!(checkpointer.calls().is_empty());

        processor
            .shutdown(&ShutdownInput {
                reason: ShutdownReason::Terminate,
                checkpointer: checkpointer.clone(),
            })
            .await;
        assert_eq!(checkpointer.calls(), vec![None]);
    }
}
