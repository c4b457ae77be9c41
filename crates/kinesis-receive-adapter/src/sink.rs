use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::envelope::{Envelope, CLOUDEVENTS_VERSION};
use crate::error::{Error, Result};

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, envelope: &Envelope) -> Result<()>;
}

/// Posts events in binary content mode: attributes travel as `ce-*` headers
/// and the body is the JSON batch.
pub struct HttpSink {
    client: reqwest::Client,
    uri: String,
}

impl HttpSink {
    pub fn new(uri: impl Into<String>) -> Result<Self> {
        // TODO: bound delivery with a request timeout; a hung sink stalls the shard.
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            uri: uri.into(),
        })
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn send(&self, envelope: &Envelope) -> Result<()> {
        let mut request = self
            .client
            .post(&self.uri)
            .header("ce-specversion", CLOUDEVENTS_VERSION)
            .header("ce-id", &envelope.id)
            .header("ce-type", &envelope.event_type)
            .header("ce-source", &envelope.source)
            .header("ce-time", envelope.time.to_rfc3339_opts(SecondsFormat::Nanos, true))
            .header(CONTENT_TYPE, "application/json");

        for (name, value) in &envelope.extensions {
            request = request.header(format!("ce-{}", name), value);
        }

        let response = request.body(envelope.data.clone()).send().await?;
        let status = response.status();

        debug!(event_id = %envelope.id, status = %status, "Sink responded");

        if !status.is_success() {
            return Err(Error::SinkRejected {
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}
