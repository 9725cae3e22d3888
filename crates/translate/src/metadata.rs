//! Metadata translation and the forward label/annotation overlay.
//!
//! Every function here returns fresh maps and leaves its inputs untouched.
//! The physical object records which keys it received from the virtual side
//! (`managed-annotations` / `managed-labels`), so keys removed on the virtual
//! side can be dropped without ever touching keys injected by the host.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use vsync_core::{markers, ObjectKey};

use crate::TranslateContext;

/// Result of [`translate_metadata_update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub changed: bool,
    pub annotations: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

/// Skeleton of the physical object for first creation.
///
/// `physical_owned` lists annotation keys the host is authoritative for; they
/// are never copied down.
pub fn translate_metadata<K>(ctx: &TranslateContext, v_obj: &K, physical_owned: &[&str]) -> K
where
    K: Resource + Clone,
{
    let vmeta = v_obj.meta();
    let vname = vmeta.name.clone().unwrap_or_default();
    let vns = vmeta.namespace.clone().filter(|ns| !ns.is_empty());

    let mut p_obj = v_obj.clone();
    let meta = p_obj.meta_mut();
    *meta = ObjectMeta {
        name: Some(match vns.as_deref() {
            Some(ns) => ctx.physical_name(&vname, ns),
            None => ctx.physical_name_cluster_scoped(&vname),
        }),
        namespace: vns.as_ref().map(|_| ctx.target_namespace.clone()),
        labels: None,
        annotations: None,
        ..ObjectMeta::default()
    };

    let annos = copied_annotations(ctx, vmeta, physical_owned);
    let labels = copied_labels(vmeta);
    let mut out_annos = annos.clone();
    add_annotation_markers(&mut out_annos, &vname, vns.as_deref(), &annos, &labels);
    let mut out_labels = labels;
    add_label_markers(&mut out_labels, ctx, vns.as_deref());

    meta.annotations = Some(out_annos);
    meta.labels = Some(out_labels);
    p_obj
}

/// Desired physical labels/annotations given the current virtual object.
pub fn translate_metadata_update<K>(ctx: &TranslateContext, v_obj: &K, p_obj: &K, physical_owned: &[&str]) -> MetadataUpdate
where
    K: Resource,
{
    let vmeta = v_obj.meta();
    let pmeta = p_obj.meta();
    let vname = vmeta.name.clone().unwrap_or_default();
    let vns = vmeta.namespace.as_deref().filter(|ns| !ns.is_empty());

    let current_annos = pmeta.annotations.clone().unwrap_or_default();
    let current_labels = pmeta.labels.clone().unwrap_or_default();

    let want_annos = copied_annotations(ctx, vmeta, physical_owned);
    let want_labels = copied_labels(vmeta);

    let mut annotations = current_annos.clone();
    for stale in managed_keys(&current_annos, markers::MANAGED_ANNOTATIONS_ANNOTATION) {
        if !want_annos.contains_key(&stale) && !physical_owned.contains(&stale.as_str()) {
            annotations.remove(&stale);
        }
    }
    annotations.extend(want_annos.iter().map(|(k, v)| (k.clone(), v.clone())));
    add_annotation_markers(&mut annotations, &vname, vns, &want_annos, &want_labels);

    let mut labels = current_labels.clone();
    for stale in managed_keys(&current_annos, markers::MANAGED_LABELS_ANNOTATION) {
        if !want_labels.contains_key(&stale) {
            labels.remove(&stale);
        }
    }
    labels.extend(want_labels);
    add_label_markers(&mut labels, ctx, vns);

    MetadataUpdate {
        changed: annotations != current_annos || labels != current_labels,
        annotations,
        labels,
    }
}

/// Virtual key recorded on a physical object, if it was created by the engine.
pub fn virtual_key_of(meta: &ObjectMeta) -> Option<ObjectKey> {
    let annos = meta.annotations.as_ref()?;
    let name = annos.get(markers::OBJECT_NAME_ANNOTATION)?;
    let ns = annos.get(markers::OBJECT_NAMESPACE_ANNOTATION).cloned().unwrap_or_default();
    Some(ObjectKey::new(ns, name.clone()))
}

/// The physical object was created by this virtual cluster for `virtual_key`.
pub fn is_managed_by(meta: &ObjectMeta, ctx: &TranslateContext, virtual_key: &ObjectKey) -> bool {
    let owned_by_us = meta
        .labels
        .as_ref()
        .and_then(|l| l.get(markers::MANAGED_BY_LABEL))
        .map(|s| s == ctx.names.suffix())
        .unwrap_or(false);
    owned_by_us && virtual_key_of(meta).as_ref() == Some(virtual_key)
}

fn copied_annotations(ctx: &TranslateContext, vmeta: &ObjectMeta, physical_owned: &[&str]) -> BTreeMap<String, String> {
    vmeta
        .annotations
        .iter()
        .flatten()
        .filter(|(k, _)| !markers::STRIPPED_ANNOTATIONS.contains(&k.as_str()))
        .filter(|(k, _)| !physical_owned.contains(&k.as_str()))
        .filter(|(k, _)| !k.starts_with(markers::PREFIX) || **k == ctx.skip_translation_annotation)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn copied_labels(vmeta: &ObjectMeta) -> BTreeMap<String, String> {
    vmeta
        .labels
        .iter()
        .flatten()
        .filter(|(k, _)| !k.starts_with(markers::PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn add_annotation_markers(
    annos: &mut BTreeMap<String, String>,
    vname: &str,
    vns: Option<&str>,
    copied_annos: &BTreeMap<String, String>,
    copied_labels: &BTreeMap<String, String>,
) {
    annos.insert(markers::OBJECT_NAME_ANNOTATION.to_string(), vname.to_string());
    match vns {
        Some(ns) => annos.insert(markers::OBJECT_NAMESPACE_ANNOTATION.to_string(), ns.to_string()),
        None => annos.remove(markers::OBJECT_NAMESPACE_ANNOTATION),
    };
    set_key_list(annos, markers::MANAGED_ANNOTATIONS_ANNOTATION, copied_annos.keys());
    set_key_list(annos, markers::MANAGED_LABELS_ANNOTATION, copied_labels.keys());
}

fn add_label_markers(labels: &mut BTreeMap<String, String>, ctx: &TranslateContext, vns: Option<&str>) {
    labels.insert(markers::MANAGED_BY_LABEL.to_string(), ctx.names.suffix().to_string());
    match vns {
        Some(ns) => labels.insert(markers::NAMESPACE_LABEL.to_string(), ns.to_string()),
        None => labels.remove(markers::NAMESPACE_LABEL),
    };
}

fn set_key_list<'a>(annos: &mut BTreeMap<String, String>, marker: &str, keys: impl Iterator<Item = &'a String>) {
    let list = keys.map(String::as_str).collect::<Vec<_>>().join(",");
    if list.is_empty() {
        annos.remove(marker);
    } else {
        annos.insert(marker.to_string(), list);
    }
}

fn managed_keys(annos: &BTreeMap<String, String>, marker: &str) -> BTreeSet<String> {
    annos
        .get(marker)
        .map(|s| s.split(',').filter(|k| !k.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}
