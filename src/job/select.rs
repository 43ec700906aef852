//! Snapshot selection for replication jobs.

use crate::job::job_config::{IncludeSpecConfig, Repository};
use crate::job::result_error::error::Error;
use crate::job::result_error::result::Result;
use crate::job::store::Snapshot;
use tracing::{debug, warn};

/// Tag prefix every backup job stamps onto the snapshots it creates.
pub const TAG_PREFIX: &str = "restless/";

/// The tag addressing all snapshots created by the named backup job.
pub fn backup_tag(job: &str) -> String {
    format!("{TAG_PREFIX}{job}")
}

/// Anything that can enumerate tagged snapshots in store order.
pub trait SnapshotSource {
    fn snapshots_with_tag(&self, tag: &str) -> Result<Vec<Snapshot>>;
}

impl SnapshotSource for Repository {
    fn snapshots_with_tag(&self, tag: &str) -> Result<Vec<Snapshot>> {
        self.snapshots(tag)
    }
}

/// Computes the ordered snapshot ids a replication run should copy.
///
/// Walks the include specs in config order, takes at most the `sync_last`
/// most recent snapshots of each spec's tag and keeps the store's
/// chronological order within it. Overlapping specs may yield duplicate
/// ids; the list is handed to the copy operation as-is.
pub fn select_snapshots<S: SnapshotSource>(
    source: &S,
    include: &[IncludeSpecConfig],
) -> Result<Vec<String>> {
    let mut selected = Vec::new();
    for spec in include {
        let tag = backup_tag(spec.backup());
        let snapshots = source
            .snapshots_with_tag(&tag)
            .map_err(|e| Error::SnapshotQueryFailed {
                tag: tag.clone(),
                source: Box::new(e),
            })?;
        if snapshots.len() < *spec.sync_last() {
            warn!(
                "{} snapshots carry tag {tag}, wanted the last {}",
                snapshots.len(),
                spec.sync_last()
            );
        }
        let skip = snapshots.len().saturating_sub(*spec.sync_last());
        debug!(
            "tag {tag}: selected {} of {} snapshots",
            snapshots.len() - skip,
            snapshots.len()
        );
        selected.extend(snapshots[skip..].iter().map(|s| s.short_id.clone()));
    }
    Ok(selected)
}
