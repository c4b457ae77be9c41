use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    CheckpointStore, InitializationInput, ProcessRecordsInput, RecordProcessor,
    RecordProcessorFactory, ShardCheckpointer, ShutdownInput, ShutdownReason, StartingPosition,
    StreamReader, SHARD_END,
};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub application_name: String,
    pub stream_name: String,
    pub worker_id: String,
    pub initial_position: StartingPosition,
    pub max_records: i32,
    pub idle_time_between_reads: Duration,
    pub shard_sync_interval: Duration,
}

impl WorkerConfig {
    /// The consumer name doubles as application name and worker id.
    pub fn new(consumer_name: impl Into<String>, stream_name: impl Into<String>) -> Self {
        let consumer_name = consumer_name.into();
        Self {
            application_name: consumer_name.clone(),
            stream_name: stream_name.into(),
            worker_id: consumer_name,
            initial_position: StartingPosition::Latest,
            max_records: 10,
            idle_time_between_reads: Duration::from_secs(1),
            shard_sync_interval: Duration::from_secs(5),
        }
    }
}

pub struct Worker {
    config: WorkerConfig,
    reader: Arc<dyn StreamReader>,
    factory: Arc<dyn RecordProcessorFactory>,
    store: Arc<dyn CheckpointStore>,
}

impl Worker {
    pub fn new(
        config: WorkerConfig,
        reader: Arc<dyn StreamReader>,
        factory: Arc<dyn RecordProcessorFactory>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        Self {
            config,
            reader,
            factory,
            store,
        }
    }

    /// Consumes every shard of the stream until `stop` turns true or its
    /// sender goes away. Open sessions are shut down before returning.
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let worker = Arc::new(self);
        let mut sessions: HashMap<String, JoinHandle<()>> = HashMap::new();
        let mut sync = tokio::time::interval(worker.config.shard_sync_interval);

        info!(
            application = %worker.config.application_name,
            worker_id = %worker.config.worker_id,
            stream = %worker.config.stream_name,
            "Worker started"
        );

        loop {
            tokio::select! {
                _ = sync.tick() => {}
                res = stop.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
            if *stop.borrow() {
                break;
            }

            worker.sync_shards(&mut sessions, &stop).await;
        }

        info!(worker_id = %worker.config.worker_id, "Shutting down.");
        for (shard_id, handle) in sessions {
            if let Err(e) = handle.await {
                warn!(shard_id = %shard_id, error = %e, "Shard session panicked");
            }
        }
    }

    async fn sync_shards(
        self: &Arc<Self>,
        sessions: &mut HashMap<String, JoinHandle<()>>,
        stop: &watch::Receiver<bool>,
    ) {
        sessions.retain(|_, handle| !handle.is_finished());

        let shard_ids = match self.reader.list_shards().await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Failed to list shards");
                return;
            }
        };

        for shard_id in shard_ids {
            if sessions.contains_key(&shard_id) {
                continue;
            }
            match self.store.get(&shard_id).await {
                Ok(Some(position)) if position == SHARD_END => continue,
                Ok(_) => {}
                Err(e) => {
                    warn!(shard_id = %shard_id, error = %e, "Failed to read checkpoint");
                    continue;
                }
            }

            debug!(shard_id = %shard_id, "Starting shard session");
            let session = tokio::spawn(self.clone().consume_shard(shard_id.clone(), stop.clone()));
            sessions.insert(shard_id, session);
        }
    }

    async fn consume_shard(self: Arc<Self>, shard_id: String, mut stop: watch::Receiver<bool>) {
        let processor = self.factory.create_processor();
        let checkpointer = Arc::new(ShardCheckpointer::new(shard_id.clone(), self.store.clone()));

        let checkpoint = match self.store.get(&shard_id).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(shard_id = %shard_id, error = %e, "Failed to read checkpoint");
                return;
            }
        };

        processor
            .initialize(&InitializationInput {
                shard_id: shard_id.clone(),
                checkpoint: checkpoint.clone(),
            })
            .await;

        let mut position = match checkpoint {
            Some(seq) => StartingPosition::AfterSequence(seq),
            None => self.config.initial_position.clone(),
        };
        let mut iterator: Option<String> = None;

        loop {
            if stopping(&stop) {
                shutdown(processor.as_ref(), ShutdownReason::Requested, &checkpointer).await;
                return;
            }

            let current = match iterator.take() {
                Some(it) => it,
                None => match self.reader.shard_iterator(&shard_id, &position).await {
                    Ok(Some(it)) => it,
                    Ok(None) => {
                        checkpointer.set_latest(SHARD_END);
                        shutdown(processor.as_ref(), ShutdownReason::Terminate, &checkpointer)
                            .await;
                        return;
                    }
                    Err(e) => {
                        warn!(shard_id = %shard_id, error = %e, "Failed to get shard iterator");
                        self.idle(&mut stop).await;
                        continue;
                    }
                },
            };

            let cache_entry_time = Utc::now();
            let fetched = match self.reader.get_records(&current, self.config.max_records).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(shard_id = %shard_id, error = %e, "Failed to get records");
                    self.idle(&mut stop).await;
                    continue;
                }
            };

            let fetched_any = !fetched.records.is_empty();
            let bounds = fetched
                .records
                .first()
                .zip(fetched.records.last())
                .map(|(f, l)| (f.sequence_number.clone(), l.sequence_number.clone()));

            if let Some((first, last)) = bounds {
                checkpointer.set_latest(last.clone());

                let input = ProcessRecordsInput {
                    cache_entry_time: Some(cache_entry_time),
                    cache_exit_time: Some(Utc::now()),
                    records: fetched.records,
                    millis_behind_latest: fetched.millis_behind_latest,
                    checkpointer: checkpointer.clone(),
                };
                if let Err(e) = processor.process_records(&input).await {
                    debug!(shard_id = %shard_id, error = %e, "Batch processing failed");
                }

                let acknowledged = matches!(
                    self.store.get(&shard_id).await,
                    Ok(Some(ref stored)) if *stored == last
                );
                if !acknowledged {
                    warn!(
                        shard_id = %shard_id,
                        sequence_number = %first,
                        "Batch not checkpointed, redelivering"
                    );
                    position = StartingPosition::AtSequence(first);
                    self.idle(&mut stop).await;
                    continue;
                }
                position = StartingPosition::AfterSequence(last);
            }

            match fetched.next_iterator {
                Some(next) => iterator = Some(next),
                None => {
                    info!(shard_id = %shard_id, "Shard closed");
                    checkpointer.set_latest(SHARD_END);
                    shutdown(processor.as_ref(), ShutdownReason::Terminate, &checkpointer).await;
                    return;
                }
            }

            if !fetched_any {
                self.idle(&mut stop).await;
            }
        }
    }

    /// Sleeps for the idle interval, returning early when a stop arrives.
    async fn idle(&self, stop: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.idle_time_between_reads) => {}
            _ = stop.changed() => {}
        }
    }
}

fn stopping(stop: &watch::Receiver<bool>) -> bool {
    *stop.borrow() || stop.has_changed().is_err()
}

async fn shutdown(
    processor: &dyn RecordProcessor,
    reason: ShutdownReason,
    checkpointer: &Arc<ShardCheckpointer>,
) {
    processor
        .shutdown(&ShutdownInput {
            reason,
            checkpointer: checkpointer.clone(),
        })
        .await;
}
