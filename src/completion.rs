use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::domain::CopyStatus;
use crate::error::ArchiverError;
use crate::manifest::Manifest;
use crate::staging::Stager;
use crate::store::{BlobUrl, DeleteOptions, Layout, ObjectStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Completion {
    /// Dropbox copies are verified and every transient file was removed.
    Delivered { deleted: usize },
    /// Dropbox copies are still running; nothing was deleted.
    Pending,
}

/// Moves a verified manifest's staged files to the dropbox and, once those
/// copies succeed, removes the originals.
pub fn complete<S>(
    store: &S,
    layout: &Layout,
    stager: &Stager<'_, S>,
    manifest: &Manifest,
    sources: &BTreeSet<BlobUrl>,
) -> Result<Completion, ArchiverError>
where
    S: ObjectStore + ?Sized,
{
    let staged: Vec<&BlobUrl> = manifest
        .entries()
        .iter()
        .filter(|entry| layout.is_staged(entry))
        .collect();

    let mut delivered = true;
    for entry in &staged {
        let destination = layout.dropbox_url(entry);
        let existing = store.copy_state(&destination)?;
        let started = existing.as_ref().is_some_and(|state| {
            state.status.is_some_and(CopyStatus::is_accepted)
                && state.source().as_ref() == Some(*entry)
        });
        let status = if started {
            existing.and_then(|state| state.status)
        } else {
            info!(file = %entry.path(), "copying to dropbox");
            Some(stager.copy(entry, destination)?.initial_status)
        };
        if status != Some(CopyStatus::Success) {
            delivered = false;
        }
    }

    if !delivered {
        debug!(execution = %manifest.execution_id, "dropbox copies pending");
        return Ok(Completion::Pending);
    }

    let mut deleted = 0usize;
    for source in sources {
        if source.extension() == Some("wdl") {
            continue;
        }
        if store.delete(source, DeleteOptions::default())? {
            deleted += 1;
        }
        info!(source = %source, "deleted source");
    }

    let prefix = layout.executions_prefix(manifest.pipeline, &manifest.execution_id);
    let executions = store.list(layout.cluster_account(), layout.executions_container(), &prefix)?;
    for blob in &executions {
        if store.delete(blob, DeleteOptions::default())? {
            deleted += 1;
        }
    }
    info!(prefix = %prefix, files = executions.len(), "executions directory deleted");

    for entry in staged {
        if store.delete(entry, DeleteOptions::default())? {
            deleted += 1;
        }
    }
    manifest.delete(store, layout)?;
    info!(
        pipeline = %manifest.pipeline,
        execution = %manifest.execution_id,
        deleted,
        "execution archived"
    );
    Ok(Completion::Delivered { deleted })
}
