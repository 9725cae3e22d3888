//! vsync kubehub: Kubernetes-backed object stores, the runtime controller and event recording.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use kube::config::{Config, KubeConfigOptions};
use kube::Client;
use tracing::info;

pub mod controller;
pub mod events;
pub mod store;

pub use controller::run_controller;
pub use events::KubeEventSink;
pub use store::KubeStore;

/// Client for a kubeconfig context; `None` uses the in-cluster or default config.
pub async fn client_for(context: Option<&str>) -> Result<Client> {
    let config = match context {
        Some(ctx) => {
            let opts = KubeConfigOptions { context: Some(ctx.to_string()), ..Default::default() };
            Config::from_kubeconfig(&opts).await.with_context(|| format!("loading kubeconfig context {}", ctx))?
        }
        None => Config::infer().await.context("inferring kube config")?,
    };
    info!(context = ?context, cluster_url = %config.cluster_url, "kube client configured");
    Client::try_from(config).context("building kube client")
}
