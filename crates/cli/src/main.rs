use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use tracing::{info, warn};
use vsync_core::{ObjectKey, SyncOptions};
use vsync_kubehub::{KubeEventSink, KubeStore};
use vsync_resources::PvcSyncer;
use vsync_syncer::{SyncContext, SyncController, SyncManager, SyncRegistry};
use vsync_translate::TranslateContext;

#[derive(Parser, Debug)]
#[command(name = "vsyncctl", version, about = "Virtual/host object sync engine")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(flatten)]
    options: OptionFlags,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

/// Overrides on top of `VSYNC_*` defaults.
#[derive(Args, Debug, Default)]
struct OptionFlags {
    /// Per-virtual-cluster suffix embedded in host names
    #[arg(long, global = true, env = "VSYNC_SUFFIX")]
    suffix: Option<String>,
    /// Host namespace that receives synced objects
    #[arg(long = "target-namespace", global = true, env = "VSYNC_TARGET_NAMESPACE")]
    target_namespace: Option<String>,
    /// The virtual cluster manages its own storage classes
    #[arg(long = "storage-classes-enabled", global = true)]
    storage_classes_enabled: Option<bool>,
    /// Skip selector and volume name translation
    #[arg(long = "fake-persistent-volumes", global = true)]
    use_fake_persistent_volumes: Option<bool>,
    /// Maximum concurrent reconciles
    #[arg(long, global = true, env = "VSYNC_WORKERS")]
    workers: Option<usize>,
}

impl OptionFlags {
    fn resolve(&self) -> SyncOptions {
        let mut o = SyncOptions::from_env();
        if let Some(v) = &self.suffix { o.suffix = v.clone(); }
        if let Some(v) = &self.target_namespace { o.target_namespace = v.clone(); }
        if let Some(v) = self.storage_classes_enabled { o.storage_classes_enabled = v; }
        if let Some(v) = self.use_fake_persistent_volumes { o.use_fake_persistent_volumes = v; }
        if let Some(v) = self.workers { o.workers = v; }
        o
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync PersistentVolumeClaims from a virtual cluster into a host namespace until Ctrl-C or SIGTERM
    Run {
        /// kubeconfig context of the virtual cluster
        #[arg(long = "virtual-context", env = "VSYNC_VIRTUAL_CONTEXT")]
        virtual_context: Option<String>,
        /// kubeconfig context of the host cluster
        #[arg(long = "host-context", env = "VSYNC_HOST_CONTEXT")]
        host_context: Option<String>,
    },
    /// Print the host name of a namespaced virtual object
    Name {
        namespace: String,
        name: String,
    },
    /// Print the host name of a cluster-scoped virtual object
    ClusterName {
        name: String,
    },
    /// Print the effective options
    Options,
}

fn init_tracing() {
    let env = std::env::var("VSYNC_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VSYNC_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid VSYNC_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let options = cli.options.resolve();

    match cli.command {
        Commands::Run { virtual_context, host_context } => {
            run(options, virtual_context.as_deref(), host_context.as_deref()).await?;
        }
        Commands::Name { namespace, name } => {
            let ctx = TranslateContext::from_options(&options);
            let physical = ctx.physical_key(&ObjectKey::new(namespace.clone(), name.clone()));
            match cli.output {
                Output::Human => println!("{}", physical),
                Output::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "virtual": { "namespace": namespace, "name": name },
                        "physical": physical,
                    }))?
                ),
            }
        }
        Commands::ClusterName { name } => {
            let physical = TranslateContext::from_options(&options).physical_name_cluster_scoped(&name);
            match cli.output {
                Output::Human => println!("{}", physical),
                Output::Json => println!("{}", serde_json::to_string_pretty(&serde_json::json!({ "virtual": name, "physical": physical }))?),
            }
        }
        Commands::Options => match cli.output {
            Output::Human => {
                println!("suffix                    {}", options.suffix);
                println!("target namespace          {}", options.target_namespace);
                println!("storage classes enabled   {}", options.storage_classes_enabled);
                println!("fake persistent volumes   {}", options.use_fake_persistent_volumes);
                println!("skip translation key      {}", options.skip_translation_annotation);
                println!("cluster scoped label keys {}", options.cluster_scoped_label_keys.join(","));
                println!("workers                   {}", options.workers);
                println!("reconcile timeout         {:?}", options.reconcile_timeout());
                println!("validation requeue        {:?}", options.validation_requeue());
                println!("max backoff               {:?}", options.max_backoff());
                println!("degraded after failures   {}", options.degraded_after_failures);
            }
            Output::Json => println!("{}", serde_json::to_string_pretty(&options)?),
        },
    }
    Ok(())
}

async fn run(options: SyncOptions, virtual_context: Option<&str>, host_context: Option<&str>) -> Result<()> {
    let options = Arc::new(options);
    let vclient = vsync_kubehub::client_for(virtual_context).await.context("virtual cluster client")?;
    let hclient = vsync_kubehub::client_for(host_context).await.context("host cluster client")?;

    let syncer = PvcSyncer::new(Arc::new(KubeStore::<StorageClass>::new(hclient.clone())));
    let controller = SyncController::<PersistentVolumeClaim>::new(
        Arc::new(syncer),
        SyncContext::new(Arc::clone(&options)),
        Arc::new(KubeStore::<PersistentVolumeClaim>::new(vclient.clone())),
        Arc::new(KubeStore::<PersistentVolumeClaim>::new(hclient.clone())),
        Arc::new(KubeEventSink::new(vclient.clone(), "vsync-syncer")),
    );
    let mut registry = SyncRegistry::new();
    registry.register(controller, &options);
    if registry.is_empty() {
        warn!("no syncers enabled; nothing to do");
        return Ok(());
    }

    let manager = Arc::new(SyncManager::new(registry, Arc::clone(&options)));
    let swept = manager.registry().sweep_orphans().await;
    info!(swept, "orphan sweep finished");

    let health_log = tokio::spawn({
        let mut rx = manager.health().subscribe();
        let health = manager.health();
        async move {
            while rx.changed().await.is_ok() {
                let snap = health.current();
                if snap.degraded {
                    warn!(failures = snap.consecutive_failures, last_error = ?snap.last_error, "sync degraded");
                } else {
                    info!("sync healthy");
                }
            }
        }
    });

    info!(target_namespace = %options.target_namespace, suffix = %options.suffix, "sync running; Ctrl-C to stop");
    vsync_kubehub::run_controller::<PersistentVolumeClaim>(vclient, hclient, Arc::clone(&manager)).await;
    health_log.abort();
    Ok(())
}
