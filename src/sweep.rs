//! Startup orphan sweep (§5, §9).
//!
//! A crash between writing bytes and committing metadata (or vice versa
//! for a deleted row) leaves orphans on disk: `.tmp/<upload_id>`
//! directories with no backing `multipart_uploads` row, and committed
//! object files under `STORAGE_ROOT/<bucket>/**` that no `Object` row
//! points at. Run once at startup, before the server accepts requests.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::db::Repo;
use crate::storage::ObjectStore;

/// Counts of what the sweep removed, surfaced in the startup log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub orphan_tmp_dirs: usize,
    pub orphan_object_files: usize,
}

/// Reconcile the filesystem against the metadata store, removing
/// anything the store no longer references.
pub async fn run(repo: &Repo, store: &ObjectStore) -> Result<SweepReport, crate::storage::StorageError> {
    let mut report = SweepReport::default();

    let live_uploads = repo
        .all_multipart_upload_ids()
        .map_err(|e| crate::storage::StorageError::Other(e.to_string()))?;
    for upload_id in store.list_tmp_upload_ids().await? {
        if !live_uploads.contains(&upload_id) {
            warn!(upload_id, "removing orphaned multipart tmp directory");
            store.remove_tmp_upload_dir(&upload_id).await?;
            report.orphan_tmp_dirs += 1;
        }
    }

    let live_objects = repo
        .all_object_filepaths()
        .map_err(|e| crate::storage::StorageError::Other(e.to_string()))?;
    for path in store.walk_all_object_files().await? {
        if !is_referenced(&path, &live_objects) {
            warn!(path = %path.display(), "removing orphaned object file");
            store.delete_object(&path).await?;
            report.orphan_object_files += 1;
        }
    }

    if report.orphan_tmp_dirs > 0 || report.orphan_object_files > 0 {
        info!(
            orphan_tmp_dirs = report.orphan_tmp_dirs,
            orphan_object_files = report.orphan_object_files,
            "startup sweep removed orphans"
        );
    }

    Ok(report)
}

fn is_referenced(path: &PathBuf, live_objects: &std::collections::HashSet<String>) -> bool {
    let path_str = path.display().to_string();
    live_objects.contains(&path_str)
}
