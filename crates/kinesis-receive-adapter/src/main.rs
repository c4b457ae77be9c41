use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kinesis_receive_adapter::{Adapter, AdapterConfig, CredentialMode};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "kinesis_receive_adapter=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Kinesis Receive Adapter...");

    let config = AdapterConfig::from_env()
        .inspect_err(|e| error!(error = %e, "Failed to process env var"))
        .context("Failed to load configuration from environment")?;

    let credentials = match &config.credentials {
        CredentialMode::SharedCredentialsFile(path) => format!("file {}", path.display()),
        CredentialMode::AssumeRole { role_arn } => format!("role {}", role_arn),
    };
    info!(
        stream = %config.stream_name,
        region = %config.region,
        sink = %config.sink_uri,
        consumer = %config.consumer_name,
        credentials = %credentials,
        "Configuration loaded"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        if stop_tx.send(true).is_err() {
            warn!("Adapter already stopped");
        }
    });

    Adapter::new(config)
        .start(stop_rx)
        .await
        .inspect_err(|e| error!(error = %e, "Adapter stopped with error"))
        .context("Failed to start adapter")?;

    info!("Kinesis Receive Adapter stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
