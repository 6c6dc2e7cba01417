//! # Watch Loop
//!
//! Watches `PersistentVolumeClaim` resources and runs reconciliation passes for the
//! claims the admission filter lets through.
//!
//! `kube_runtime::Controller` schedules on every change it sees, so the pipeline is
//! assembled by hand: watcher -> reflector -> [`EventTracker`] (typed events with
//! old/new snapshots) -> admitted keys -> `applier`. The applier keeps what
//! `Controller` gives us for free: one pass per claim at a time, deduplicated
//! queueing, bounded concurrency and requeue scheduling.

use crate::controller::reconciler::{
    admitted_keys, reconcile, ClaimKey, EventTracker, ReconcileOutcome, Reconciler,
    ReconcilerError,
};
use crate::controller::server::ServerState;
use crate::observability;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::Api;
use kube::Client;
use kube_runtime::controller::{self, applier, Action};
use kube_runtime::reflector::{self, ObjectRef};
use kube_runtime::{watcher, WatchStreamExt};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Instrument};

/// Claims API scoped by `--watch-namespace`
#[must_use]
pub fn claims_api(client: Client, watch_namespace: Option<&str>) -> Api<PersistentVolumeClaim> {
    match watch_namespace {
        Some(namespace) => Api::namespaced(client, namespace),
        None => Api::all(client),
    }
}

/// Run the controller watch loop until shutdown is signalled
///
/// A stream that ends on its own is restarted after `--watch-restart-delay-secs`.
///
/// # Errors
///
/// Currently always returns `Ok`; stream errors are logged and retried.
pub async fn run_watch_loop(
    client: Client,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), anyhow::Error> {
    let claims = claims_api(client, reconciler.config.watch_namespace.as_deref());
    let scope = reconciler
        .config
        .watch_namespace
        .clone()
        .unwrap_or_else(|| "<all>".to_string());

    loop {
        if *shutdown.borrow() {
            break;
        }

        let watch_span = tracing::info_span!(
            "controller.watch",
            operation = "watch_loop",
            namespace = scope.as_str()
        );
        info!(parent: &watch_span, "Starting claim watch...");

        let mut stopping = shutdown.clone();
        let stop_signal = async move {
            // A dropped sender means nobody can ask us to stop any more
            if stopping.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        claim_events(claims.clone(), Arc::clone(&reconciler))
            .take_until(stop_signal)
            .for_each(|result| {
                let reconciler = Arc::clone(&reconciler);
                async move {
                    match result {
                        Ok((claim_ref, action)) => {
                            debug!(claim = %claim_ref, action = ?action, "watch.event.reconciled");
                        }
                        Err(controller::Error::ObjectNotFound(claim_ref)) => {
                            debug!(claim = %claim_ref, "Claim left the cache before its pass ran");
                            if let Some(namespace) = claim_ref.namespace.as_deref() {
                                reconciler.reset_backoff(&ClaimKey::new(namespace, &claim_ref.name));
                            }
                        }
                        Err(controller::Error::ReconcilerFailed(e, claim_ref)) => {
                            // Already handled by the error policy; keep the stream quiet
                            debug!(claim = %claim_ref, error = %e, "watch.event.reconciliation_failed");
                        }
                        Err(controller::Error::QueueError(e)) => {
                            handle_watch_stream_error(&format!("{e:?}"));
                        }
                        Err(e) => {
                            error!("Controller runner error: {:?}", e);
                        }
                    }
                }
            })
            .instrument(watch_span)
            .await;

        if *shutdown.borrow() {
            break;
        }

        let delay = reconciler.config.watch_restart_delay_duration();
        warn!(
            "Claim watch stream ended, restarting in {} seconds...",
            delay.as_secs()
        );
        let mut stopping = shutdown.clone();
        tokio::select! {
            _ = stopping.wait_for(|stop| *stop) => break,
            () = tokio::time::sleep(delay) => {}
        }
    }

    server_state.set_ready(false);
    info!("Controller stopped gracefully");
    Ok(())
}

/// The applier output for one watch session
fn claim_events(
    claims: Api<PersistentVolumeClaim>,
    reconciler: Arc<Reconciler>,
) -> impl futures::Stream<
    Item = Result<
        (ObjectRef<PersistentVolumeClaim>, Action),
        controller::Error<ReconcilerError, watcher::Error>,
    >,
> {
    let (reader, writer) = reflector::store();
    let mut tracker = EventTracker::new();

    let ctx = Arc::clone(&reconciler);

    let queue = watcher(claims, watcher::Config::default().any_semantic())
        .default_backoff()
        .reflect(writer)
        .map_ok(move |event| {
            let admission = admitted_keys(&mut tracker, event);
            for key in &admission.deleted {
                ctx.reset_backoff(key);
            }
            let refs: Vec<Result<ObjectRef<PersistentVolumeClaim>, watcher::Error>> = admission
                .admitted
                .into_iter()
                .map(|key| Ok(ObjectRef::new(&key.name).within(&key.namespace)))
                .collect();
            stream::iter(refs)
        })
        .try_flatten()
        .boxed();

    let concurrency = reconciler.config.max_concurrent_reconciliations;
    applier(
        reconcile_claim,
        handle_reconciliation_error,
        reconciler,
        reader,
        queue,
        controller::Config::default().concurrency(concurrency),
    )
}

/// Run one pass for a claim and map its outcome to a scheduling action
pub fn reconcile_claim(
    claim: Arc<PersistentVolumeClaim>,
    ctx: Arc<Reconciler>,
) -> BoxFuture<'static, Result<Action, ReconcilerError>> {
    let key = ClaimKey::from_claim(&claim);
    let reconcile_span = tracing::info_span!(
        "controller.watch.reconcile",
        claim.name = key.name.as_str(),
        claim.namespace = key.namespace.as_str(),
        claim.version = claim.metadata.resource_version.as_deref().unwrap_or("unknown"),
    );

    async move {
        let outcome = reconcile(&key, &ctx).await?;
        ctx.reset_backoff(&key);
        Ok(action_for(outcome, &ctx))
    }
    .instrument(reconcile_span)
    .boxed()
}

/// Scheduling action for a successful pass
#[must_use]
pub fn action_for(outcome: ReconcileOutcome, ctx: &Reconciler) -> Action {
    match outcome {
        ReconcileOutcome::NoAction => Action::await_change(),
        ReconcileOutcome::RequeueSoon => {
            observability::metrics::increment_requeues_total("stale-binding-released");
            Action::requeue(ctx.config.requeue_soon_duration())
        }
    }
}
