//! PersistentVolumeClaim syncer.
//!
//! Storage class, selector, volume name and data source references are
//! rewritten into host names on create. Afterwards only the storage request
//! (grow only) and metadata flow down, while bind annotations, status and,
//! once the claim is bound, the storage class flow back up.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::storage::v1::StorageClass;
use tracing::{debug, warn};
use vsync_core::{Authority, FieldRule, ObjectKey, ObjectStore, OwnershipTable, SyncError, SyncResult};
use vsync_syncer::{ResourceSyncer, SyncContext};
use vsync_translate::{translate_metadata, translate_metadata_update, TranslationMode};

use crate::quantity;

pub const BIND_COMPLETED_ANNOTATION: &str = "pv.kubernetes.io/bind-completed";
pub const BOUND_BY_CONTROLLER_ANNOTATION: &str = "pv.kubernetes.io/bound-by-controller";
pub const STORAGE_PROVISIONER_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-provisioner";
pub const DEPRECATED_STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";

const BIND_ANNOTATIONS: [&str; 3] =
    [BIND_COMPLETED_ANNOTATION, BOUND_BY_CONTROLLER_ANNOTATION, STORAGE_PROVISIONER_ANNOTATION];
const STORAGE: &str = "storage";
const BOUND: &str = "Bound";
const TRANSLATED_SOURCE_KINDS: [&str; 2] = ["PersistentVolumeClaim", "VolumeSnapshot"];

pub fn ownership_table() -> OwnershipTable {
    OwnershipTable::new(vec![
        FieldRule::new("metadata.labels", Authority::Virtual),
        FieldRule::new("metadata.annotations", Authority::Virtual),
        FieldRule::new("metadata.annotations[pv.kubernetes.io/bind-completed]", Authority::Physical),
        FieldRule::new("metadata.annotations[pv.kubernetes.io/bound-by-controller]", Authority::Physical),
        FieldRule::new("metadata.annotations[volume.beta.kubernetes.io/storage-provisioner]", Authority::Physical),
        FieldRule::new("spec.accessModes", Authority::Virtual),
        FieldRule::new("spec.selector", Authority::Virtual),
        FieldRule::new("spec.volumeName", Authority::Virtual),
        FieldRule::new("spec.dataSource", Authority::Virtual),
        FieldRule::new("spec.resources.requests.storage", Authority::VirtualIncreaseOnly),
        FieldRule::new("spec.storageClassName", Authority::PhysicalOnce(BOUND)),
        FieldRule::new("status", Authority::Physical),
    ])
}

pub struct PvcSyncer {
    ownership: OwnershipTable,
    physical_owned: Vec<&'static str>,
    host_storage_classes: Arc<dyn ObjectStore<StorageClass>>,
}

impl PvcSyncer {
    /// `host_storage_classes` is consulted to decide whether a dynamically
    /// provisioned claim can keep its class name as-is.
    pub fn new(host_storage_classes: Arc<dyn ObjectStore<StorageClass>>) -> Self {
        let ownership = ownership_table();
        let physical_owned = ownership.physical_annotation_keys();
        Self { ownership, physical_owned, host_storage_classes }
    }

    /// Host storage class for `class`, or `None` to keep the name the user gave.
    async fn host_class(&self, ctx: &SyncContext, v: &PersistentVolumeClaim, class: &str) -> SyncResult<Option<String>> {
        let o = &ctx.options;
        if o.storage_classes_enabled {
            return Ok(Some(ctx.translate.physical_name_cluster_scoped(class)));
        }
        if o.use_fake_persistent_volumes || ctx.translate.translation_mode(v.metadata.annotations.as_ref()) == TranslationMode::Skip {
            return Ok(None);
        }
        let spec = v.spec.as_ref();
        let dynamic = spec.map(|s| s.selector.is_none() && s.volume_name.as_deref().unwrap_or_default().is_empty()).unwrap_or(true);
        if !dynamic {
            return Ok(Some(ctx.translate.physical_name_cluster_scoped(class)));
        }
        match self.host_storage_classes.get(&ObjectKey::cluster(class)).await? {
            Some(_) => Ok(None),
            None => {
                debug!(class, "storage class unknown on host; translating");
                Ok(Some(ctx.translate.physical_name_cluster_scoped(class)))
            }
        }
    }
}

/// Class named by the claim, from the spec or the deprecated annotation.
fn storage_class_of(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.spec
        .as_ref()
        .and_then(|s| s.storage_class_name.as_deref())
        .filter(|s| !s.is_empty())
        .or_else(|| annotation(pvc, DEPRECATED_STORAGE_CLASS_ANNOTATION).filter(|s| !s.is_empty()))
}

fn annotation<'a>(pvc: &'a PersistentVolumeClaim, key: &str) -> Option<&'a str> {
    pvc.metadata.annotations.as_ref().and_then(|a| a.get(key)).map(String::as_str)
}

fn storage_request(pvc: &PersistentVolumeClaim) -> Option<&k8s_openapi::apimachinery::pkg::api::resource::Quantity> {
    pvc.spec.as_ref()?.resources.as_ref()?.requests.as_ref()?.get(STORAGE)
}

fn phase(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.status.as_ref()?.phase.as_deref()
}

/// The physical class was rewritten away from what the claim names, so the
/// deprecated class annotation must not travel down.
fn class_annotation_replaced(p: &PersistentVolumeClaim, v: &PersistentVolumeClaim) -> bool {
    annotation(v, DEPRECATED_STORAGE_CLASS_ANNOTATION).is_some()
        && match p.spec.as_ref().and_then(|s| s.storage_class_name.as_deref()) {
            Some(class) => storage_class_of(v) != Some(class),
            None => false,
        }
}

fn bind_annotations_differ(p: &PersistentVolumeClaim, v: &PersistentVolumeClaim) -> bool {
    BIND_ANNOTATIONS.iter().any(|k| annotation(p, k) != annotation(v, k))
}

#[async_trait]
impl ResourceSyncer<PersistentVolumeClaim> for PvcSyncer {
    fn name(&self) -> &str {
        "persistentvolumeclaims"
    }

    fn ownership(&self) -> &OwnershipTable {
        &self.ownership
    }

    async fn translate(&self, ctx: &SyncContext, v: &PersistentVolumeClaim) -> SyncResult<PersistentVolumeClaim> {
        let vkey = ObjectKey::from_meta(&v.metadata).unwrap_or_else(|| ObjectKey::cluster(""));
        let vns = vkey.namespace.clone();
        let mode = ctx.translate.translation_mode(v.metadata.annotations.as_ref());
        let class = storage_class_of(v);
        let vspec = v.spec.clone().unwrap_or_default();

        if ctx.options.storage_classes_enabled
            && class.is_none()
            && vspec.selector.is_none()
            && vspec.volume_name.as_deref().unwrap_or_default().is_empty()
        {
            return Err(SyncError::Validation(format!("no storage class defined for pvc {}", vkey)));
        }
        let host_class = match class {
            Some(c) => self.host_class(ctx, v, c).await?,
            None => None,
        };

        let mut skip = self.physical_owned.clone();
        if host_class.is_some() {
            skip.push(DEPRECATED_STORAGE_CLASS_ANNOTATION);
        }
        let mut p = translate_metadata(&ctx.translate, v, &skip);
        p.status = None;
        let spec = p.spec.get_or_insert_with(Default::default);
        if let Some(hc) = host_class {
            spec.storage_class_name = Some(hc);
        }

        if !ctx.options.use_fake_persistent_volumes && mode == TranslationMode::Translate {
            if let Some(sel) = spec.selector.take() {
                spec.selector = Some(ctx.translate.translate_label_selector_cluster(&sel));
            }
            if let Some(vn) = spec.volume_name.take() {
                spec.volume_name = Some(if vn.is_empty() { vn } else { ctx.translate.physical_name_cluster_scoped(&vn) });
            }
        }

        if mode == TranslationMode::Translate {
            if let Some(ds) = spec.data_source.as_mut().filter(|d| TRANSLATED_SOURCE_KINDS.contains(&d.kind.as_str())) {
                ds.name = ctx.translate.physical_name(&ds.name, &vns);
            }
            if let Some(dsr) = spec
                .data_source_ref
                .as_mut()
                .filter(|d| d.namespace.is_none() && TRANSLATED_SOURCE_KINDS.contains(&d.kind.as_str()))
            {
                dsr.name = ctx.translate.physical_name(&dsr.name, &vns);
            }
        }
        Ok(p)
    }

    async fn translate_update(
        &self,
        ctx: &SyncContext,
        p: &PersistentVolumeClaim,
        v: &PersistentVolumeClaim,
    ) -> SyncResult<Option<PersistentVolumeClaim>> {
        let mut updated: Option<PersistentVolumeClaim> = None;

        if let Some(want) = storage_request(v) {
            let grow = match storage_request(p) {
                None => true,
                Some(have) if have == want => false,
                Some(have) => match quantity::compare(want, have) {
                    Ok(ord) => ord == Ordering::Greater,
                    Err(e) => {
                        warn!(error = %e, "cannot compare storage requests; leaving physical size");
                        false
                    }
                },
            };
            if grow {
                let u = updated.get_or_insert_with(|| p.clone());
                u.spec
                    .get_or_insert_with(Default::default)
                    .resources
                    .get_or_insert_with(Default::default)
                    .requests
                    .get_or_insert_with(BTreeMap::new)
                    .insert(STORAGE.to_string(), want.clone());
            }
        }

        let mut skip = self.physical_owned.clone();
        if class_annotation_replaced(p, v) {
            skip.push(DEPRECATED_STORAGE_CLASS_ANNOTATION);
        }
        let meta = translate_metadata_update(&ctx.translate, v, p, &skip);
        if meta.changed {
            let u = updated.get_or_insert_with(|| p.clone());
            u.metadata.annotations = Some(meta.annotations);
            u.metadata.labels = Some(meta.labels);
        }
        Ok(updated)
    }

    fn translate_update_backwards(
        &self,
        ctx: &SyncContext,
        p: &PersistentVolumeClaim,
        v: &PersistentVolumeClaim,
    ) -> Option<PersistentVolumeClaim> {
        let p_class = p.spec.as_ref().and_then(|s| s.storage_class_name.as_deref());
        let v_class = storage_class_of(v);
        let class_flip = match (phase(p), p_class) {
            (Some(BOUND), Some(pc)) => {
                v_class != Some(pc) && v_class.map(|vc| ctx.translate.physical_name_cluster_scoped(vc)).as_deref() != Some(pc)
            }
            _ => false,
        };
        let annos_differ = bind_annotations_differ(p, v);
        if !class_flip && !annos_differ {
            return None;
        }

        let mut updated = v.clone();
        if annos_differ {
            let annos = updated.metadata.annotations.get_or_insert_with(BTreeMap::new);
            for key in BIND_ANNOTATIONS {
                match annotation(p, key) {
                    Some(val) => annos.insert(key.to_string(), val.to_string()),
                    None => annos.remove(key),
                };
            }
        }
        if class_flip {
            debug!(class = ?p_class, "claim bound; taking host storage class");
            updated.spec.get_or_insert_with(Default::default).storage_class_name = p_class.map(str::to_string);
        }
        Some(updated)
    }

    fn translate_status_backwards(&self, p: &PersistentVolumeClaim, v: &PersistentVolumeClaim) -> Option<PersistentVolumeClaim> {
        if p.status == v.status {
            return None;
        }
        Some(PersistentVolumeClaim { status: p.status.clone(), ..v.clone() })
    }
}
