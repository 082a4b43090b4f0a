use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::domain::CopyStatus;
use crate::error::ArchiverError;
use crate::manifest::Manifest;
use crate::store::{BlobUrl, Layout, ObjectStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyPoll {
    /// Every copy succeeded; holds the distinct copy sources.
    Complete(BTreeSet<BlobUrl>),
    Pending,
}

/// Checks every manifest entry. A single unfinished copy makes the whole
/// manifest pending.
///
/// A staged entry that is gone but whose dropbox copy succeeded was removed
/// by an earlier completion pass; its original source was deleted before it.
pub fn check_status<S>(
    store: &S,
    layout: &Layout,
    manifest: &Manifest,
) -> Result<CopyPoll, ArchiverError>
where
    S: ObjectStore + ?Sized,
{
    let mut sources = BTreeSet::new();
    let mut pending = 0usize;

    for entry in manifest.entries() {
        let Some(state) = store.copy_state(entry)? else {
            if layout.is_staged(entry) && delivered(store, layout, entry)? {
                debug!(entry = %entry, "staged copy already delivered");
                continue;
            }
            return Err(ArchiverError::NotFound(format!("staged copy {entry}")));
        };
        match state.status {
            Some(CopyStatus::Success) => {
                let source = state.source().ok_or_else(|| {
                    ArchiverError::NotFound(format!("copy source of {entry}"))
                })?;
                sources.insert(source);
            }
            Some(status @ (CopyStatus::Failed | CopyStatus::Aborted)) => {
                warn!(entry = %entry, status = %status, "copy did not complete");
                pending += 1;
            }
            _ => {
                debug!(entry = %entry, "still copying");
                pending += 1;
            }
        }
    }

    if pending > 0 {
        debug!(
            execution = %manifest.execution_id,
            pending,
            total = manifest.len(),
            "manifest pending"
        );
        return Ok(CopyPoll::Pending);
    }
    Ok(CopyPoll::Complete(sources))
}

fn delivered<S>(store: &S, layout: &Layout, staged: &BlobUrl) -> Result<bool, ArchiverError>
where
    S: ObjectStore + ?Sized,
{
    let dropbox = store.copy_state(&layout.dropbox_url(staged))?;
    Ok(dropbox.is_some_and(|state| state.is_success()))
}
