//! Integration tests for [`ChronicleContext`] over a [`MemoryStore`]
//! holding the `instances/context` and `instances/seriesInstances` views
//! for two patients.

use std::sync::Arc;

use chronicle_couch::context::{series_uid_of, CT_IMAGE_STORAGE, MR_IMAGE_STORAGE, OBJECT_ATTACHMENT};
use chronicle_couch::{ChronicleContext, DocumentStore, MemoryStore, ViewRow};
use serde_json::{json, Value};

const SR_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.88.11";

/// (context key, series UID, SOP class, instance UID) per instance.
fn instances() -> Vec<(Value, &'static str, &'static str, &'static str)> {
    let head_t1 = json!([["General", "MRN-1"], ["Head", "1.1"], ["MR", "T1 axial", "1.1.1"]]);
    let head_t2 = json!([["General", "MRN-1"], ["Head", "1.1"], ["MR", "T2 axial", "1.1.2"]]);
    let chest = json!([["General", "MRN-1"], ["Chest", "1.2"], ["CT", "Lung", "1.2.1"]]);
    let other = json!([["Clinic", "MRN-9"], ["Knee", "9.1"], ["MR", "Sagittal", "9.1.1"]]);

    vec![
        (head_t1.clone(), "1.1.1", MR_IMAGE_STORAGE, "1.1.1.1"),
        (head_t1.clone(), "1.1.1", MR_IMAGE_STORAGE, "1.1.1.2"),
        (head_t1, "1.1.1", SR_STORAGE, "1.1.1.3"),
        (head_t2, "1.1.2", MR_IMAGE_STORAGE, "1.1.2.1"),
        (chest, "1.2.1", CT_IMAGE_STORAGE, "1.2.1.1"),
        (other, "9.1.1", MR_IMAGE_STORAGE, "9.1.1.1"),
    ]
}

async fn seeded_context() -> (Arc<MemoryStore>, ChronicleContext) {
    let store = Arc::new(MemoryStore::new("chronicle"));

    let mut context_rows = Vec::new();
    let mut series_rows = Vec::new();
    for (key, series_uid, class_uid, instance_uid) in instances() {
        context_rows.push(ViewRow {
            id: Some(instance_uid.to_string()),
            key,
            value: json!(null),
        });
        series_rows.push(ViewRow {
            id: Some(instance_uid.to_string()),
            key: json!(series_uid),
            value: json!([class_uid, instance_uid]),
        });
    }
    store.register_view("instances", "context", context_rows).await;
    store
        .register_view("instances", "seriesInstances", series_rows)
        .await;

    let context = ChronicleContext::new(store.clone());
    (store, context)
}

fn keys(rows: &[ViewRow]) -> Vec<Value> {
    rows.iter().map(|row| row.key.clone()).collect()
}

// ---------------------------------------------------------------------------
// Test: patient -> study -> series -> instance walk
// ---------------------------------------------------------------------------

#[tokio::test]
async fn walks_patient_study_series_instances() {
    let (_store, context) = seeded_context().await;

    let patients = context.patients().await.unwrap();
    assert_eq!(
        keys(&patients),
        vec![json!([["Clinic", "MRN-9"]]), json!([["General", "MRN-1"]])]
    );
    assert_eq!(patients[1].value, json!(5));

    let patient = &patients[1].key;
    let studies = context.studies_for_patient(patient).await.unwrap();
    assert_eq!(
        keys(&studies),
        vec![
            json!([["General", "MRN-1"], ["Chest", "1.2"]]),
            json!([["General", "MRN-1"], ["Head", "1.1"]]),
        ]
    );

    let head = &studies[1].key;
    let series = context.series_for_study(head).await.unwrap();
    assert_eq!(series.len(), 2);
    let series_uids: Vec<&str> = series.iter().filter_map(|row| series_uid_of(&row.key)).collect();
    assert_eq!(series_uids, vec!["1.1.1", "1.1.2"]);
    assert_eq!(series[0].value, json!(3));

    let instances = context.instances_for_series(series_uids[0]).await.unwrap();
    let instance_uids: Vec<&str> = instances
        .iter()
        .map(|i| i.sop_instance_uid.as_str())
        .collect();
    assert_eq!(instance_uids, vec!["1.1.1.1", "1.1.1.2", "1.1.1.3"]);

    let images = context.image_instances_for_series("1.1.1").await.unwrap();
    assert_eq!(images.len(), 2);
    assert!(images.iter().all(|i| i.is_image()));
}

// ---------------------------------------------------------------------------
// Test: a study prefix never leaks another patient's rows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prefix_range_stays_within_patient() {
    let (_store, context) = seeded_context().await;

    let studies = context
        .studies_for_patient(&json!([["Clinic", "MRN-9"]]))
        .await
        .unwrap();
    assert_eq!(keys(&studies), vec![json!([["Clinic", "MRN-9"], ["Knee", "9.1"]])]);

    let none = context
        .studies_for_patient(&json!([["Nowhere", "MRN-0"]]))
        .await
        .unwrap();
    assert!(none.is_empty());
}

// ---------------------------------------------------------------------------
// Test: instance objects come from the object.dcm attachment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn instance_object_reads_attachment() {
    let (store, context) = seeded_context().await;
    let written = store.put_document("1.2.1.1", &json!({})).await.unwrap();
    store
        .put_attachment(&written, OBJECT_ATTACHMENT, "application/dicom", b"DICM".to_vec())
        .await
        .unwrap();

    assert_eq!(context.instance_object("1.2.1.1").await.unwrap(), b"DICM");
    assert!(context.instance_object("1.1.1.1").await.is_err());
}
