//! kube runtime [`Controller`] wiring for one namespaced kind.
//!
//! Virtual objects are the primary watch. Managed host objects (label
//! `vsync.dev/managed-by=<suffix>` in the target namespace) map back to their
//! virtual owner through the marker annotations. Virtual objects carry the
//! `vsync.dev/cleanup` finalizer so a delete still reaches the state machine
//! while the object is terminating. Each pass is dispatched by kind through
//! the [`SyncManager`]; its error policy turns the error class into an
//! [`Action`].

use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::finalizer::{finalizer, Error as FinalizerError};
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher;
use kube::{Api, Client, Resource};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};
use vsync_core::{markers, ObjectKey, ReconcileOutcome, ReconcileRequest, SyncError};
use vsync_syncer::{Disposition, SyncManager};
use vsync_translate::virtual_key_of;

struct Ctx {
    client: Client,
    manager: Arc<SyncManager>,
    kind: String,
}

/// Run the controller for `K` until a termination signal arrives.
pub async fn run_controller<K>(virtual_client: Client, host_client: Client, manager: Arc<SyncManager>)
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    let options = manager.options();
    let kind = K::kind(&()).into_owned();
    let selector = format!("{}={}", markers::MANAGED_BY_LABEL, options.suffix);
    let host_api: Api<K> = Api::namespaced(host_client, &options.target_namespace);
    let concurrency = u16::try_from(options.workers.max(1)).unwrap_or(u16::MAX);
    let ctx = Arc::new(Ctx { client: virtual_client.clone(), manager: Arc::clone(&manager), kind: kind.clone() });

    info!(kind = %kind, concurrency, host_selector = %selector, "controller started");
    Controller::new(Api::<K>::all(virtual_client), watcher::Config::default())
        .with_config(controller::Config::default().concurrency(concurrency))
        .watches(host_api, watcher::Config::default().labels(&selector), |p: K| virtual_ref::<K>(p.meta()))
        .shutdown_on_signal()
        .run(reconcile::<K>, error_policy::<K>, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!(object = %obj, ?action, "reconciled"),
                Err(controller::Error::ObjectNotFound(obj)) => debug!(object = %obj, "object gone before reconcile"),
                Err(e) => warn!(error = %e, "controller error"),
            }
        })
        .await;
    info!(kind = %kind, "controller stopped");
}

async fn reconcile<K>(obj: Arc<K>, ctx: Arc<Ctx>) -> Result<Action, SyncError>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + Clone + Debug + Serialize + DeserializeOwned,
{
    let req = request_of(&ctx.kind, obj.as_ref())
        .ok_or_else(|| SyncError::Validation(format!("{} without a name", ctx.kind)))?;
    let api: Api<K> = Api::namespaced(ctx.client.clone(), &req.key.namespace);
    let manager = &ctx.manager;
    // apply and cleanup are the same pass: a terminating virtual object counts as absent
    finalizer(&api, markers::CLEANUP_FINALIZER, obj, |_event| async move {
        manager.reconcile(&req).await.map(action_for)
    })
    .await
    .map_err(sync_error_of)
}

fn error_policy<K: Resource>(obj: Arc<K>, err: &SyncError, ctx: Arc<Ctx>) -> Action {
    match request_of(&ctx.kind, obj.as_ref()) {
        Some(req) => disposition_action(&ctx.manager.on_error(&req, err)),
        None => Action::await_change(),
    }
}

fn request_of<K: Resource>(kind: &str, obj: &K) -> Option<ReconcileRequest> {
    ObjectKey::from_meta(obj.meta()).map(|key| ReconcileRequest::new(kind, key))
}

/// Virtual owner of a managed host object.
fn virtual_ref<K>(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    let key = virtual_key_of(meta)?;
    let r = ObjectRef::new(&key.name);
    Some(match key.namespace() {
        Some(ns) => r.within(ns),
        None => r,
    })
}

fn action_for(outcome: ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::Done => Action::await_change(),
        ReconcileOutcome::RequeueAfter(d) => Action::requeue(d),
    }
}

fn disposition_action(d: &Disposition) -> Action {
    match d {
        Disposition::Done => Action::await_change(),
        Disposition::RequeueAfter(delay) | Disposition::Backoff { delay, .. } => Action::requeue(*delay),
    }
}

fn sync_error_of(err: FinalizerError<SyncError>) -> SyncError {
    match err {
        FinalizerError::ApplyFailed(e) | FinalizerError::CleanupFailed(e) => e,
        FinalizerError::AddFinalizer(e) | FinalizerError::RemoveFinalizer(e) => SyncError::from(e),
        other => SyncError::Validation(other.to_string()),
    }
}
