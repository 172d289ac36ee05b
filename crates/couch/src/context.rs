//! Patient / study / series / instance navigation over Chronicle views.
//!
//! The `instances/context` view is keyed by
//! `[[institution, mrn], [studyDescription, studyUID], [modality, seriesDescription, seriesUID], instanceUID]`
//! and reduces to a count, so each hierarchy level is a `group_level`
//! query restricted to the parent's key prefix. Instances of a series
//! come from `instances/seriesInstances`, keyed by series UID with
//! `[sopClassUID, sopInstanceUID]` values.

use std::sync::Arc;

use serde_json::Value;

use crate::error::StoreError;
use crate::store::{DocumentStore, ViewQuery, ViewRow};

/// Design document holding the Chronicle views.
pub const INSTANCES_DESIGN: &str = "instances";

/// Attachment name of the stored DICOM object.
pub const OBJECT_ATTACHMENT: &str = "object.dcm";

/// CT Image Storage.
pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";

/// MR Image Storage.
pub const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";

/// SOP classes the watcher fetches as images.
pub const IMAGE_SOP_CLASSES: [&str; 2] = [CT_IMAGE_STORAGE, MR_IMAGE_STORAGE];

/// An instance row from `seriesInstances`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef {
    pub sop_class_uid: String,
    pub sop_instance_uid: String,
}

impl InstanceRef {
    /// Decode a `[classUID, instanceUID]` row value.
    pub fn from_row(row: &ViewRow) -> Option<Self> {
        let pair = row.value.as_array()?;
        match pair.as_slice() {
            [class, instance] => Some(Self {
                sop_class_uid: class.as_str()?.to_string(),
                sop_instance_uid: instance.as_str()?.to_string(),
            }),
            _ => None,
        }
    }

    pub fn is_image(&self) -> bool {
        IMAGE_SOP_CLASSES.contains(&self.sop_class_uid.as_str())
    }
}

/// Series UID inside a series-level context key (`key[2][2]`).
pub fn series_uid_of(series_key: &Value) -> Option<&str> {
    series_key.get(2)?.get(2)?.as_str()
}

/// Hierarchical queries against one Chronicle database.
#[derive(Clone)]
pub struct ChronicleContext {
    store: Arc<dyn DocumentStore>,
}

impl ChronicleContext {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// One row per patient; keys are `[[institution, mrn]]`.
    pub async fn patients(&self) -> Result<Vec<ViewRow>, StoreError> {
        self.store.query_view(&context_query(1)).await
    }

    pub async fn studies_for_patient(&self, patient_key: &Value) -> Result<Vec<ViewRow>, StoreError> {
        self.store
            .query_view(&context_query(2).prefix(patient_key))
            .await
    }

    pub async fn series_for_study(&self, study_key: &Value) -> Result<Vec<ViewRow>, StoreError> {
        self.store
            .query_view(&context_query(3).prefix(study_key))
            .await
    }

    /// Every instance of a series. Rows whose value is not a
    /// `[classUID, instanceUID]` pair are skipped.
    pub async fn instances_for_series(&self, series_uid: &str) -> Result<Vec<InstanceRef>, StoreError> {
        let query = ViewQuery::new(INSTANCES_DESIGN, "seriesInstances")
            .reduce(false)
            .key(Value::String(series_uid.to_string()));
        let rows = self.store.query_view(&query).await?;

        let instances: Vec<InstanceRef> = rows.iter().filter_map(InstanceRef::from_row).collect();
        if instances.len() != rows.len() {
            tracing::warn!(
                series_uid,
                skipped = rows.len() - instances.len(),
                "Ignoring malformed seriesInstances rows",
            );
        }
        Ok(instances)
    }

    /// Only the instances whose SOP class is in [`IMAGE_SOP_CLASSES`].
    pub async fn image_instances_for_series(
        &self,
        series_uid: &str,
    ) -> Result<Vec<InstanceRef>, StoreError> {
        let mut instances = self.instances_for_series(series_uid).await?;
        instances.retain(InstanceRef::is_image);
        Ok(instances)
    }

    /// Raw bytes of an instance's DICOM object.
    pub async fn instance_object(&self, instance_uid: &str) -> Result<Vec<u8>, StoreError> {
        self.store.get_attachment(instance_uid, OBJECT_ATTACHMENT).await
    }
}

fn context_query(group_level: u32) -> ViewQuery {
    ViewQuery::new(INSTANCES_DESIGN, "context")
        .reduce(true)
        .group_level(group_level)
        .stale("update_after")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn instance_ref_from_pair() {
        let row = ViewRow {
            id: Some("1.2.3.4".into()),
            key: json!("1.2.3"),
            value: json!([CT_IMAGE_STORAGE, "1.2.3.4"]),
        };
        let instance = InstanceRef::from_row(&row).unwrap();
        assert_eq!(instance.sop_instance_uid, "1.2.3.4");
        assert!(instance.is_image());
    }

    #[test]
    fn instance_ref_rejects_other_shapes() {
        let row = ViewRow {
            id: None,
            key: json!("1.2.3"),
            value: json!(["only-one"]),
        };
        assert!(InstanceRef::from_row(&row).is_none());
    }

    #[test]
    fn structured_report_is_not_an_image() {
        let instance = InstanceRef {
            sop_class_uid: "1.2.840.10008.5.1.4.1.1.88.11".into(),
            sop_instance_uid: "9".into(),
        };
        assert!(!instance.is_image());
    }

    #[test]
    fn series_uid_from_context_key() {
        let key = json!([["Inst", "MRN"], ["Head", "1.2"], ["MR", "T1 axial", "1.2.3"]]);
        assert_eq!(series_uid_of(&key), Some("1.2.3"));
        assert_eq!(series_uid_of(&json!([["Inst", "MRN"]])), None);
    }

    #[test]
    fn study_query_is_prefix_range_at_level_two() {
        let query = context_query(2).prefix(&json!([["Inst", "MRN"]]));
        assert_eq!(query.group_level, Some(2));
        assert_eq!(query.endkey, Some(json!([["Inst", "MRN"], {}])));
        assert_eq!(query.stale.as_deref(), Some("update_after"));
    }
}
