use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use kube::Client;
use tracing::{error, info};

use kinesis_source_operator::{controller::kinesis_source_controller, crd, Settings};

#[derive(Parser, Debug)]
#[command(name = "kinesis-source-operator")]
#[command(about = "Kubernetes operator for AWS Kinesis event sources")]
struct Args {
    #[arg(long, help = "Print CRD definitions and exit")]
    crd: bool,

    #[arg(long, default_value = "info", help = "Log level (trace, debug, info, warn, error)")]
    log_level: String,

    #[arg(long, help = "Optional settings file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        env = "KINESIS_RA_IMAGE",
        help = "Container image of the receive adapter",
        required_unless_present = "crd"
    )]
    receive_adapter_image: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.crd {
        crd::print_crds()?;
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let mut settings = Settings::load(args.config.as_ref())
        .inspect_err(|e| error!(error = %e, "Failed to load settings"))
        .context("Failed to load settings")?;
    if let Some(image) = args.receive_adapter_image {
        settings.receive_adapter_image = image;
    }

    info!(image = %settings.receive_adapter_image, "Starting AWS Kinesis Source controller");

    let client = Client::try_default()
        .await
        .inspect_err(|e| error!(error = %e, "Failed to connect to Kubernetes API"))?;

    info!("Connected to Kubernetes API");

    kinesis_source_controller::run(client, settings).await;

    info!("Controller stopped");
    Ok(())
}
