use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::{
    api::{Api, Patch, PatchParams},
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher::Config,
    },
    Client, ResourceExt,
};
use tracing::{error, info, instrument, warn};

use super::{Context, FINALIZER_NAME};
use crate::crd::KinesisSource;
use crate::error::{Error, Result};
use crate::resources::CONTROLLER_AGENT_NAME;
use crate::settings::Settings;

pub async fn run(client: Client, settings: Settings) {
    let sources: Api<KinesisSource> = Api::all(client.clone());
    let deployments: Api<Deployment> = Api::all(client.clone());

    let ctx = Context::new(client.clone(), settings);

    Controller::new(sources, Config::default())
        .owns(deployments, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok(o) => info!("Reconciled KinesisSource {:?}", o),
                Err(e) => error!("Reconcile failed: {:?}", e),
            }
        })
        .await;
}

#[instrument(skip(ctx, source), fields(name = %source.name_any(), namespace = ?source.namespace()))]
async fn reconcile(source: Arc<KinesisSource>, ctx: Arc<Context>) -> Result<Action> {
    let ns = source.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<KinesisSource> = Api::namespaced(ctx.client.clone(), &ns);

    finalizer(&api, FINALIZER_NAME, source, |event| async {
        match event {
            FinalizerEvent::Apply(source) => apply(source, &api, ctx.clone()).await,
            FinalizerEvent::Cleanup(source) => cleanup(source).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

async fn apply(
    source: Arc<KinesisSource>,
    api: &Api<KinesisSource>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let mut updated = (*source).clone();
    let result = ctx.reconciler.reconcile(&mut updated).await;

    // Written back even when the pass failed.
    if let Some(patch) = status_patch(&source, &updated) {
        let params = PatchParams::apply(CONTROLLER_AGENT_NAME);
        if let Err(e) = api
            .patch_status(&source.name_any(), &params, &Patch::Merge(&patch))
            .await
        {
            warn!("Failed to update KinesisSource status: {:?}", e);
            result?;
            return Err(e.into());
        }
    }

    result?;
    Ok(Action::requeue(ctx.settings.requeue.resync()))
}

/// The adapter deployment is garbage collected through its owner reference.
async fn cleanup(source: Arc<KinesisSource>) -> Result<Action> {
    info!("Cleaning up KinesisSource {}", source.name_any());
    Ok(Action::await_change())
}

/// Merge patch for the status subresource, or `None` when nothing changed or
/// the source is being deleted.
pub(crate) fn status_patch(
    original: &KinesisSource,
    updated: &KinesisSource,
) -> Option<serde_json::Value> {
    if updated.metadata.deletion_timestamp.is_some() || original.status == updated.status {
        return None;
    }
    Some(serde_json::json!({
        "status": updated.status
    }))
}

fn error_policy(source: Arc<KinesisSource>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!("KinesisSource {} reconciliation error: {:?}", source.name_any(), error);

    if error.is_retryable() {
        Action::requeue(ctx.settings.requeue.retryable())
    } else {
        Action::requeue(ctx.settings.requeue.fatal())
    }
}
