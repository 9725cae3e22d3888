#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimStatus, TypedLocalObjectReference,
    TypedObjectReference, VolumeResourceRequirements,
};
use k8s_openapi::api::storage::v1::StorageClass;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use vsync_core::{ErrorClass, ObjectKey, ObjectStore, SyncOptions};
use vsync_resources::pvc::{BIND_COMPLETED_ANNOTATION, DEPRECATED_STORAGE_CLASS_ANNOTATION};
use vsync_resources::PvcSyncer;
use vsync_store::{MemStore, MemoryEventSink};
use vsync_syncer::{ResourceSyncer, SyncContext, SyncController};

const SUFFIX: &str = "vc";
const TARGET: &str = "host";

fn options(storage_classes_enabled: bool) -> SyncOptions {
    SyncOptions {
        storage_classes_enabled,
        target_namespace: TARGET.into(),
        suffix: SUFFIX.into(),
        ..SyncOptions::default()
    }
}

fn ctx(storage_classes_enabled: bool) -> SyncContext {
    SyncContext::new(Arc::new(options(storage_classes_enabled)))
}

fn fake_pv_ctx() -> SyncContext {
    SyncContext::new(Arc::new(SyncOptions { use_fake_persistent_volumes: true, ..options(false) }))
}

fn skip(mut p: PersistentVolumeClaim) -> PersistentVolumeClaim {
    p.metadata.annotations = Some(BTreeMap::from([("vsync.dev/skip-translate".to_string(), "true".to_string())]));
    p
}

fn snapshot_source(name: &str) -> TypedLocalObjectReference {
    TypedLocalObjectReference { api_group: Some("snapshot.storage.k8s.io".into()), kind: "VolumeSnapshot".into(), name: name.into() }
}

fn host_classes(names: &[&str]) -> Arc<MemStore<StorageClass>> {
    let s = Arc::new(MemStore::new());
    for n in names {
        s.insert(StorageClass {
            metadata: ObjectMeta { name: Some(n.to_string()), ..Default::default() },
            provisioner: "example.com/csi".into(),
            ..Default::default()
        });
    }
    s
}

fn syncer(host: &[&str]) -> PvcSyncer {
    PvcSyncer::new(host_classes(host))
}

fn pvc(size: &str, class: Option<&str>) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta { name: Some("test".into()), namespace: Some("ns1".into()), ..Default::default() },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".into()]),
            storage_class_name: class.map(str::to_string),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), Quantity(size.to_string()))])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn with_phase(mut p: PersistentVolumeClaim, phase: &str) -> PersistentVolumeClaim {
    p.status = Some(PersistentVolumeClaimStatus { phase: Some(phase.into()), ..Default::default() });
    p
}

fn request(p: &PersistentVolumeClaim) -> String {
    p.spec.as_ref().unwrap().resources.as_ref().unwrap().requests.as_ref().unwrap()["storage"].0.clone()
}

fn class(p: &PersistentVolumeClaim) -> Option<&str> {
    p.spec.as_ref().unwrap().storage_class_name.as_deref()
}

#[tokio::test]
async fn storage_request_only_grows() {
    let s = syncer(&[]);
    let c = ctx(false);
    let p = s.translate(&c, &pvc("3Gi", None)).await.unwrap();

    let patch = s.translate_update(&c, &p, &pvc("5Gi", None)).await.unwrap().expect("grow");
    assert_eq!(request(&patch), "5Gi");

    let p5 = s.translate(&c, &pvc("5Gi", None)).await.unwrap();
    assert!(s.translate_update(&c, &p5, &pvc("2Gi", None)).await.unwrap().is_none());
    assert!(s.translate_update(&c, &p5, &pvc("5120Mi", None)).await.unwrap().is_none());
}

#[tokio::test]
async fn storage_class_flips_to_host_once_bound() {
    let s = syncer(&["fast", "standard"]);
    let c = ctx(false);
    let v = pvc("1Gi", Some("fast"));
    let mut p = s.translate(&c, &v).await.unwrap();
    p.spec.as_mut().unwrap().storage_class_name = Some("standard".into());

    assert!(s.translate_update_backwards(&c, &with_phase(p.clone(), "Pending"), &v).is_none());

    let bound = with_phase(p, "Bound");
    let patch = s.translate_update_backwards(&c, &bound, &v).expect("flip");
    assert_eq!(class(&patch), Some("standard"));
    assert!(s.translate_update_backwards(&c, &bound, &patch).is_none(), "second pass is a no-op");
}

#[tokio::test]
async fn managed_class_names_do_not_flip_back() {
    let s = syncer(&[]);
    let c = ctx(true);
    let v = pvc("1Gi", Some("fast"));
    let p = with_phase(s.translate(&c, &v).await.unwrap(), "Bound");
    assert_eq!(class(&p), Some("vsync-fast-x-host-x-vc"));
    assert!(s.translate_update_backwards(&c, &p, &v).is_none());
}

#[tokio::test]
async fn bind_annotations_are_copied_up_and_kept_on_host() {
    let s = syncer(&[]);
    let c = ctx(false);
    let v = pvc("1Gi", None);
    let mut p = s.translate(&c, &v).await.unwrap();
    p.metadata.annotations.as_mut().unwrap().insert(BIND_COMPLETED_ANNOTATION.into(), "yes".into());

    let up = s.translate_update_backwards(&c, &p, &v).expect("copy up");
    assert_eq!(up.metadata.annotations.as_ref().unwrap()[BIND_COMPLETED_ANNOTATION], "yes");
    assert!(s.translate_update_backwards(&c, &p, &up).is_none());
    // the forward merge with the updated virtual claim leaves the host alone
    assert!(s.translate_update(&c, &p, &up).await.unwrap().is_none());
}

#[tokio::test]
async fn missing_class_is_a_validation_error_when_classes_are_managed() {
    let s = syncer(&[]);
    let err = s.translate(&ctx(true), &pvc("1Gi", None)).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::Validation);
    assert!(err.to_string().contains("ns1/test"));

    let mut with_volume = pvc("1Gi", None);
    with_volume.spec.as_mut().unwrap().volume_name = Some("pv-1".into());
    assert!(s.translate(&ctx(true), &with_volume).await.is_ok());
}

#[tokio::test]
async fn deprecated_class_annotation_is_translated_and_dropped() {
    let s = syncer(&[]);
    let c = ctx(true);
    let mut v = pvc("1Gi", None);
    v.metadata.annotations = Some(BTreeMap::from([(DEPRECATED_STORAGE_CLASS_ANNOTATION.to_string(), "fast".to_string())]));
    let p = s.translate(&c, &v).await.unwrap();
    assert_eq!(class(&p), Some("vsync-fast-x-host-x-vc"));
    assert!(!p.metadata.annotations.as_ref().unwrap().contains_key(DEPRECATED_STORAGE_CLASS_ANNOTATION));
    assert!(s.translate_update(&c, &p, &v).await.unwrap().is_none());
}

#[tokio::test]
async fn dynamic_claims_keep_host_classes() {
    let s = syncer(&["standard"]);
    let c = ctx(false);
    let p = s.translate(&c, &pvc("1Gi", Some("standard"))).await.unwrap();
    assert_eq!(class(&p), Some("standard"));
    let p = s.translate(&c, &pvc("1Gi", Some("virtual-only"))).await.unwrap();
    assert_eq!(class(&p), Some("vsync-virtual-only-x-host-x-vc"));
}

#[tokio::test]
async fn selector_and_volume_name_follow_skip_annotation() {
    let s = syncer(&["standard"]);
    let c = ctx(false);
    let mut v = pvc("1Gi", Some("standard"));
    {
        let spec = v.spec.as_mut().unwrap();
        spec.volume_name = Some("pv-1".into());
        spec.selector = Some(LabelSelector {
            match_labels: Some(BTreeMap::from([("kubernetes.io/metadata.name".to_string(), "pv-1".to_string())])),
            ..Default::default()
        });
    }
    let p = s.translate(&c, &v).await.unwrap();
    let spec = p.spec.as_ref().unwrap();
    assert_eq!(spec.volume_name.as_deref(), Some("vsync-pv-1-x-host-x-vc"));
    assert_eq!(spec.storage_class_name.as_deref(), Some("vsync-standard-x-host-x-vc"), "static claims always translate");
    assert_ne!(spec.selector, v.spec.as_ref().unwrap().selector);

    let v = skip(v);
    let p = s.translate(&c, &v).await.unwrap();
    let spec = p.spec.as_ref().unwrap();
    assert_eq!(spec.volume_name.as_deref(), Some("pv-1"));
    assert_eq!(spec.selector, v.spec.as_ref().unwrap().selector);
}

#[tokio::test]
async fn snapshot_data_sources_are_renamed() {
    let s = syncer(&[]);
    let mut v = pvc("1Gi", None);
    v.spec.as_mut().unwrap().data_source = Some(snapshot_source("snap"));
    let p = s.translate(&ctx(false), &v).await.unwrap();
    assert_eq!(p.spec.unwrap().data_source.unwrap().name, "snap-x-ns1-x-vc");
}

#[tokio::test]
async fn class_from_deprecated_annotation_is_not_flipped_into_the_virtual_claim() {
    let s = syncer(&[]);
    let c = ctx(true);
    let mut v = pvc("1Gi", None);
    v.metadata.annotations = Some(BTreeMap::from([(DEPRECATED_STORAGE_CLASS_ANNOTATION.to_string(), "fast".to_string())]));
    let p = with_phase(s.translate(&c, &v).await.unwrap(), "Bound");
    assert_eq!(class(&p), Some("vsync-fast-x-host-x-vc"));

    assert!(s.translate_update_backwards(&c, &p, &v).is_none(), "host class name must stay on the host");
    assert!(s.translate_update(&c, &p, &v).await.unwrap().is_none());
    assert!(!p.metadata.annotations.as_ref().unwrap().contains_key(DEPRECATED_STORAGE_CLASS_ANNOTATION));
}

#[tokio::test]
async fn fake_persistent_volumes_keep_names_and_skip_class_lookup() {
    // no host classes at all: a lookup would translate "virtual-only"
    let s = syncer(&[]);
    let c = fake_pv_ctx();
    let p = s.translate(&c, &pvc("1Gi", Some("virtual-only"))).await.unwrap();
    assert_eq!(class(&p), Some("virtual-only"));

    let mut v = pvc("1Gi", Some("standard"));
    {
        let spec = v.spec.as_mut().unwrap();
        spec.volume_name = Some("pv-1".into());
        spec.selector = Some(LabelSelector {
            match_labels: Some(BTreeMap::from([("kubernetes.io/metadata.name".to_string(), "pv-1".to_string())])),
            ..Default::default()
        });
    }
    let p = s.translate(&c, &v).await.unwrap();
    let spec = p.spec.as_ref().unwrap();
    assert_eq!(spec.volume_name.as_deref(), Some("pv-1"));
    assert_eq!(spec.selector, v.spec.as_ref().unwrap().selector);
    assert_eq!(spec.storage_class_name.as_deref(), Some("standard"));
}

#[tokio::test]
async fn data_source_ref_is_renamed_only_without_explicit_namespace() {
    let s = syncer(&[]);
    let mut v = pvc("1Gi", None);
    v.spec.as_mut().unwrap().data_source_ref = Some(TypedObjectReference {
        api_group: Some("snapshot.storage.k8s.io".into()),
        kind: "VolumeSnapshot".into(),
        name: "snap".into(),
        namespace: None,
    });
    let p = s.translate(&ctx(false), &v).await.unwrap();
    assert_eq!(p.spec.unwrap().data_source_ref.unwrap().name, "snap-x-ns1-x-vc");

    v.spec.as_mut().unwrap().data_source_ref.as_mut().unwrap().namespace = Some("other".into());
    let p = s.translate(&ctx(false), &v).await.unwrap();
    let dsr = p.spec.unwrap().data_source_ref.unwrap();
    assert_eq!(dsr.name, "snap");
    assert_eq!(dsr.namespace.as_deref(), Some("other"));
}

#[tokio::test]
async fn skip_annotation_freezes_data_source_names() {
    let s = syncer(&[]);
    let mut v = skip(pvc("1Gi", None));
    v.spec.as_mut().unwrap().data_source = Some(snapshot_source("snap"));
    let p = s.translate(&ctx(false), &v).await.unwrap();
    assert_eq!(p.spec.unwrap().data_source.unwrap().name, "snap");
}

#[tokio::test]
async fn claim_is_created_on_host_and_status_copied_back() {
    let virt = Arc::new(MemStore::<PersistentVolumeClaim>::new());
    let phys = Arc::new(MemStore::<PersistentVolumeClaim>::new());
    let controller = SyncController::new(
        Arc::new(syncer(&[])),
        ctx(false),
        virt.clone(),
        phys.clone(),
        Arc::new(MemoryEventSink::new()),
    );
    let vkey = ObjectKey::new("ns1", "test");
    let pkey = ObjectKey::new(TARGET, format!("test-x-ns1-x-{}", SUFFIX));

    virt.insert(pvc("3Gi", None));
    controller.reconcile(&vkey).await.unwrap();
    let created = phys.get_now(&pkey).expect("physical claim");
    let spec = created.spec.as_ref().unwrap();
    assert_eq!(spec.access_modes, Some(vec!["ReadWriteOnce".to_string()]));
    assert_eq!(request(&created), "3Gi");

    // host provisioner binds the claim
    let mut bound = created.clone();
    bound.metadata.annotations.as_mut().unwrap().insert(BIND_COMPLETED_ANNOTATION.into(), "yes".into());
    let bound = phys.update(&bound).await.unwrap();
    let status = PersistentVolumeClaimStatus {
        phase: Some("Bound".into()),
        access_modes: Some(vec!["ReadWriteOnce".into()]),
        capacity: Some(BTreeMap::from([("storage".to_string(), Quantity("3Gi".into()))])),
        ..Default::default()
    };
    phys.update_status(&PersistentVolumeClaim { status: Some(status.clone()), ..bound }).await.unwrap();

    controller.reconcile(&vkey).await.unwrap();
    let v = virt.get_now(&vkey).unwrap();
    assert_eq!(v.status, Some(status));
    assert_eq!(v.metadata.annotations.unwrap()[BIND_COMPLETED_ANNOTATION], "yes");

    let writes = virt.writes() + phys.writes();
    controller.reconcile(&vkey).await.unwrap();
    assert_eq!(virt.writes() + phys.writes(), writes);
}
