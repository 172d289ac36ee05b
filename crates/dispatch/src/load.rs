//! The built-in `Load` operation: fetch one series' image objects to disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chronicle_core::StepDocument;
use chronicle_couch::ChronicleContext;
use serde_json::Value;

use crate::error::HandlerError;
use crate::handler::{StepContext, StepHandler};

/// Provenance / step field naming the series to load.
const SERIES_UID_FIELD: &str = "seriesUID";

/// Downloads every CT/MR instance of a series into
/// `<work_dir>/<seriesUID>/<instanceUID>`.
#[derive(Debug, Clone)]
pub struct LoadSeriesHandler {
    work_dir: PathBuf,
}

impl LoadSeriesHandler {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    async fn fetch_series(
        &self,
        series_uid: &str,
        ctx: &StepContext,
    ) -> Result<Vec<PathBuf>, HandlerError> {
        let context = ChronicleContext::new(ctx.store.clone());
        let instances = context.image_instances_for_series(series_uid).await?;
        if instances.is_empty() {
            return Err(HandlerError::Failed(format!(
                "Series {series_uid} has no image instances"
            )));
        }

        if let Some(bad) = instances.iter().find(|i| !is_dicom_uid(&i.sop_instance_uid)) {
            return Err(HandlerError::Failed(format!(
                "Series {series_uid} lists an invalid instance UID {:?}",
                bad.sop_instance_uid
            )));
        }

        let series_dir = self.work_dir.join(series_uid);
        tokio::fs::create_dir_all(&series_dir).await?;

        let total = instances.len();
        let mut fetched = Vec::with_capacity(total);
        for (index, instance) in instances.iter().enumerate() {
            let data = context.instance_object(&instance.sop_instance_uid).await?;
            let dest = series_dir.join(&instance.sop_instance_uid);
            tokio::fs::write(&dest, &data).await?;

            tracing::debug!(
                request_id = %ctx.request_id,
                instance_uid = %instance.sop_instance_uid,
                bytes = data.len(),
                "Fetched instance",
            );
            ctx.progress(format!(
                "Fetched instance {} of {total} ({})",
                index + 1,
                instance.sop_instance_uid
            ))
            .await;
            fetched.push(dest);
        }

        Ok(fetched)
    }
}

#[async_trait]
impl StepHandler for LoadSeriesHandler {
    async fn execute(&self, step: StepDocument, ctx: StepContext) -> Result<(), HandlerError> {
        let Some(series_uid) = series_uid_of(&step) else {
            let reason = format!("Step {} does not name a series to load", step.id);
            ctx.result(format!("Load failed: {reason}")).await;
            return Err(HandlerError::MalformedStep(reason));
        };

        if !is_dicom_uid(&series_uid) {
            let reason = format!("Step {} names an invalid series UID {series_uid:?}", step.id);
            ctx.result(format!("Load failed: {reason}")).await;
            return Err(HandlerError::MalformedStep(reason));
        }

        tracing::info!(request_id = %ctx.request_id, series_uid = %series_uid, "Loading series");
        ctx.progress(format!("Loading series {series_uid}")).await;

        match self.fetch_series(&series_uid, &ctx).await {
            Ok(files) => {
                let listing: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
                ctx.result(format!(
                    "Loaded {} instances of series {series_uid}: {}",
                    files.len(),
                    listing.join(", ")
                ))
                .await;
                Ok(())
            }
            Err(e) => {
                ctx.result(format!("Load of series {series_uid} failed: {e}"))
                    .await;
                Err(e)
            }
        }
    }
}

/// Provenance `seriesUID`, then the step's own `seriesUID`, then a
/// string first input.
fn series_uid_of(step: &StepDocument) -> Option<String> {
    step.desired_provenance
        .extra_str(SERIES_UID_FIELD)
        .or_else(|| step.extra.get(SERIES_UID_FIELD).and_then(Value::as_str))
        .or_else(|| step.inputs.first().and_then(Value::as_str))
        .filter(|uid| !uid.is_empty())
        .map(str::to_string)
}

/// A DICOM UID: dot-separated runs of digits. Anything else (path
/// separators, `.`, `..`) is refused before it becomes a path component.
fn is_dicom_uid(uid: &str) -> bool {
    uid.len() <= 64
        && uid
            .split('.')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}
