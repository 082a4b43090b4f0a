use tracing::{debug, info};

use crate::domain::{AnalysisId, Category, Study};
use crate::error::ArchiverError;
use crate::manifest::ManifestEntry;
use crate::store::{BlobUrl, Layout, ObjectStore};

/// Starts store-side copies and checks that each one was accepted.
pub struct Stager<'a, S: ?Sized> {
    store: &'a S,
    layout: &'a Layout,
    policy: &'a str,
}

impl<'a, S> Stager<'a, S>
where
    S: ObjectStore + ?Sized,
{
    pub fn new(store: &'a S, layout: &'a Layout, policy: &'a str) -> Self {
        Self {
            store,
            layout,
            policy,
        }
    }

    /// Copies `source` to `{group}/{category}/{file}` in the staging container.
    /// Unknown categories are skipped without touching the store.
    pub fn stage(
        &self,
        source: &BlobUrl,
        group: AnalysisId,
        category: &str,
    ) -> Result<Option<ManifestEntry>, ArchiverError> {
        let Some(category) = Category::from_name(category) else {
            debug!(source = %source, category, "category not archived, skipping");
            return Ok(None);
        };
        let destination = self
            .layout
            .staging_url(group, category, source.file_name());
        let entry = self.copy(source, destination)?;
        info!(
            group = %group,
            category = %category,
            file = source.file_name(),
            "staging"
        );
        Ok(Some(entry))
    }

    /// Copies a result into the study's output storage under `{patient}/{library}/`.
    pub fn deliver_to_outputs(
        &self,
        source: &BlobUrl,
        study: Study,
        patient_id: &str,
        library_id: &str,
    ) -> Result<ManifestEntry, ArchiverError> {
        let destination =
            self.layout
                .output_storage_url(study, patient_id, library_id, source.file_name());
        let entry = self.copy(source, destination)?;
        info!(study = %study, patient = patient_id, file = source.file_name(), "copying to output storage");
        Ok(entry)
    }

    /// Copies a file into the cluster inputs container under `{library}/`.
    pub fn copy_to_inputs(
        &self,
        source: &BlobUrl,
        library_id: &str,
    ) -> Result<ManifestEntry, ArchiverError> {
        let destination = self.layout.library_input_url(library_id, source.file_name());
        let entry = self.copy(source, destination)?;
        info!(library = library_id, file = source.file_name(), "copying to inputs");
        Ok(entry)
    }

    /// Archive copy in a dated folder of the same container.
    pub fn archive(&self, source: &BlobUrl, folder: &str) -> Result<ManifestEntry, ArchiverError> {
        let destination = self.layout.dated_copy(source, folder);
        self.copy(source, destination)
    }

    /// A copy counts as started only when the destination reports
    /// pending or success right after the request.
    pub fn copy(&self, source: &BlobUrl, destination: BlobUrl) -> Result<ManifestEntry, ArchiverError> {
        let grant = self
            .store
            .grant(source.account(), source.container(), self.policy)?;
        self.store.begin_copy(&grant.apply(source), &destination)?;

        let failed = |reason: String| ArchiverError::CopyFailed {
            source_url: source.to_string(),
            destination: destination.to_string(),
            reason,
        };
        let state = self
            .store
            .copy_state(&destination)?
            .ok_or_else(|| failed("destination does not exist".to_string()))?;
        if !(200..300).contains(&state.http_status) {
            return Err(failed(format!("status {}", state.http_status)));
        }
        match state.status {
            Some(status) if status.is_accepted() => Ok(ManifestEntry {
                destination,
                initial_status: status,
            }),
            Some(status) => Err(failed(format!("copy {status}"))),
            None => Err(failed("no copy status".to_string())),
        }
    }
}
