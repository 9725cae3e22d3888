//! vsync translate: virtual ↔ physical names, selectors and metadata.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use vsync_core::{ObjectKey, SyncOptions};

pub mod metadata;
pub mod names;
pub mod selector;

pub use metadata::{is_managed_by, translate_metadata, translate_metadata_update, virtual_key_of, MetadataUpdate};
pub use names::NameTranslator;
pub use selector::{match_topology_selector_terms, translate_label_selector_cluster, SelectorError};

/// Per-object translation switch read from the skip-translation annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationMode {
    Translate,
    Skip,
}

impl TranslationMode {
    pub fn of(annotations: Option<&BTreeMap<String, String>>, skip_key: &str) -> Self {
        match annotations.and_then(|a| a.get(skip_key)).map(String::as_str) {
            Some("true") => TranslationMode::Skip,
            _ => TranslationMode::Translate,
        }
    }
}

/// Everything a translation step needs to know about the virtual cluster.
#[derive(Debug, Clone)]
pub struct TranslateContext {
    pub names: NameTranslator,
    pub target_namespace: String,
    pub skip_translation_annotation: String,
    pub cluster_scoped_label_keys: Vec<String>,
}

impl TranslateContext {
    pub fn from_options(o: &SyncOptions) -> Self {
        Self {
            names: NameTranslator::new(o.suffix.clone()),
            target_namespace: o.target_namespace.clone(),
            skip_translation_annotation: o.skip_translation_annotation.clone(),
            cluster_scoped_label_keys: o.cluster_scoped_label_keys.clone(),
        }
    }

    pub fn physical_name(&self, name: &str, virtual_namespace: &str) -> String {
        self.names.physical_name(name, virtual_namespace)
    }

    pub fn physical_name_cluster_scoped(&self, name: &str) -> String {
        self.names.physical_name_cluster_scoped(name, &self.target_namespace)
    }

    pub fn physical_key(&self, virtual_key: &ObjectKey) -> ObjectKey {
        self.names.physical_key(virtual_key, &self.target_namespace)
    }

    pub fn translation_mode(&self, annotations: Option<&BTreeMap<String, String>>) -> TranslationMode {
        TranslationMode::of(annotations, &self.skip_translation_annotation)
    }

    pub fn translate_label_selector_cluster(&self, selector: &LabelSelector) -> LabelSelector {
        translate_label_selector_cluster(&self.names, &self.cluster_scoped_label_keys, &self.target_namespace, selector)
    }
}
