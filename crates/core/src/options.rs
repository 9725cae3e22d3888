//! Engine and plugin configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::markers;

/// Options recognised by the engine and the resource syncers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// The virtual cluster manages its own StorageClass objects.
    pub storage_classes_enabled: bool,
    /// Disables selector/volume name translation and the fake PV machinery.
    pub use_fake_persistent_volumes: bool,
    /// Host namespace every physical object lives in.
    pub target_namespace: String,
    /// Per-virtual-cluster disambiguator embedded in physical names.
    pub suffix: String,
    /// Annotation key that freezes translation for one object.
    pub skip_translation_annotation: String,
    /// Label keys whose values name cluster-scoped objects.
    pub cluster_scoped_label_keys: Vec<String>,
    pub workers: usize,
    pub reconcile_timeout_secs: u64,
    pub validation_requeue_secs: u64,
    pub max_backoff_secs: u64,
    /// Consecutive transport failures before health reports degraded.
    pub degraded_after_failures: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            storage_classes_enabled: false,
            use_fake_persistent_volumes: false,
            target_namespace: "vcluster".to_string(),
            suffix: "vcluster".to_string(),
            skip_translation_annotation: markers::DEFAULT_SKIP_TRANSLATION_ANNOTATION.to_string(),
            cluster_scoped_label_keys: vec!["kubernetes.io/metadata.name".to_string()],
            workers: 4,
            reconcile_timeout_secs: 30,
            validation_requeue_secs: 300,
            max_backoff_secs: 300,
            degraded_after_failures: 5,
        }
    }
}

impl SyncOptions {
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs.max(1))
    }

    pub fn validation_requeue(&self) -> Duration {
        Duration::from_secs(self.validation_requeue_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs.max(1))
    }

    /// Defaults overridden by `VSYNC_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Same as [`SyncOptions::from_env`] with an injectable lookup (used by tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut o = Self::default();
        if let Some(v) = lookup("VSYNC_STORAGE_CLASSES_ENABLED") { o.storage_classes_enabled = parse_bool("VSYNC_STORAGE_CLASSES_ENABLED", &v, o.storage_classes_enabled); }
        if let Some(v) = lookup("VSYNC_USE_FAKE_PERSISTENT_VOLUMES") { o.use_fake_persistent_volumes = parse_bool("VSYNC_USE_FAKE_PERSISTENT_VOLUMES", &v, o.use_fake_persistent_volumes); }
        if let Some(v) = lookup("VSYNC_TARGET_NAMESPACE") { o.target_namespace = v; }
        if let Some(v) = lookup("VSYNC_SUFFIX") { o.suffix = v; }
        if let Some(v) = lookup("VSYNC_SKIP_TRANSLATION_ANNOTATION") { o.skip_translation_annotation = v; }
        if let Some(v) = lookup("VSYNC_CLUSTER_SCOPED_LABEL_KEYS") {
            o.cluster_scoped_label_keys = v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect();
        }
        if let Some(v) = lookup("VSYNC_WORKERS") { o.workers = parse_num("VSYNC_WORKERS", &v, o.workers); }
        if let Some(v) = lookup("VSYNC_RECONCILE_TIMEOUT_SECS") { o.reconcile_timeout_secs = parse_num("VSYNC_RECONCILE_TIMEOUT_SECS", &v, o.reconcile_timeout_secs); }
        if let Some(v) = lookup("VSYNC_VALIDATION_REQUEUE_SECS") { o.validation_requeue_secs = parse_num("VSYNC_VALIDATION_REQUEUE_SECS", &v, o.validation_requeue_secs); }
        if let Some(v) = lookup("VSYNC_MAX_BACKOFF_SECS") { o.max_backoff_secs = parse_num("VSYNC_MAX_BACKOFF_SECS", &v, o.max_backoff_secs); }
        if let Some(v) = lookup("VSYNC_DEGRADED_AFTER_FAILURES") { o.degraded_after_failures = parse_num("VSYNC_DEGRADED_AFTER_FAILURES", &v, o.degraded_after_failures); }
        o
    }
}

fn parse_bool(key: &str, v: &str, fallback: bool) -> bool {
    match v.trim() {
        "1" => true,
        "0" => false,
        s if s.eq_ignore_ascii_case("true") => true,
        s if s.eq_ignore_ascii_case("false") => false,
        _ => {
            warn!(key, value = %v, "invalid boolean; keeping default");
            fallback
        }
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, v: &str, fallback: T) -> T {
    v.trim().parse::<T>().unwrap_or_else(|_| {
        warn!(key, value = %v, "invalid number; keeping default");
        fallback
    })
}
