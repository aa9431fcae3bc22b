//! Transitive dependency resolution.
//!
//! A breadth-first walk over the dependency graph: each dequeued entry is
//! resolved to a concrete version, fetched, and its framework-matching
//! dependency edges enqueued. Dequeue order is materialization order.
//!
//! Repeated package ids reached via different edges are fetched again on
//! purpose: the walk performs no deduplication and no cycle suppression,
//! so diamond graphs materialize a package once per inbound edge. Callers
//! relying on distinct output paths get that from the id/version prefix.

use std::collections::VecDeque;

use nupull_schema::{FrameworkToken, PackageName, VersionRange};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::compat;
use crate::error::DownloadError;
use crate::feed::PackageFeed;
use crate::package::PackageArchive;

/// Resolve the root coordinate and its transitive closure into the ordered
/// list of packages to materialize.
///
/// Cancellation is checked once per dequeued entry, before any network
/// activity for it starts.
///
/// # Errors
///
/// Fatal conditions abort the whole walk: no version satisfying a range,
/// a package absent from the feed, an unreadable archive, or cancellation.
pub async fn resolve_all(
    feed: &dyn PackageFeed,
    root: &PackageName,
    root_range: &VersionRange,
    desired: &FrameworkToken,
    cancel: &CancellationToken,
) -> Result<Vec<PackageArchive>, DownloadError> {
    let mut queue: VecDeque<(PackageName, VersionRange)> = VecDeque::new();
    queue.push_back((root.clone(), root_range.clone()));

    let mut resolved = Vec::new();

    while let Some((name, range)) = queue.pop_front() {
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let versions = feed.list_versions(&name).await?;
        let version = range
            .find_best_match(&versions)
            .ok_or_else(|| DownloadError::NoMatchingVersion {
                name: name.clone(),
                range: range.clone(),
            })?
            .clone();

        info!(package = %name, %version, "resolved");
        let bytes = feed.fetch(&name, &version).await?;
        let package = PackageArchive::open(bytes)?;

        for group in package.dependency_groups() {
            let applies = group.framework.is_any()
                || compat::is_equivalent(&group.framework, desired);
            if !applies {
                continue;
            }
            for dep in &group.dependencies {
                debug!(package = %name, dependency = %dep.id, range = %dep.range, "enqueue");
                queue.push_back((dep.id.clone(), dep.range.clone()));
            }
        }

        resolved.push(package);
    }

    Ok(resolved)
}
