//! Framework asset selection and reference classification.
//!
//! Per resolved package, picks the nearest-matching group out of each of
//! the three asset collections and classifies library binaries: presence
//! of the redirect sentinel in the selected library group upgrades every
//! binary to a redirect-bearing reference.

use nupull_schema::{FrameworkToken, ReferenceKind};

use crate::compat;
use crate::package::{AssetGroup, PackageArchive};

/// Marker file whose presence in a library group flips its binaries to
/// [`ReferenceKind::ReferenceWithRedirect`]. Matched case-insensitively,
/// never materialized.
pub const REDIRECT_SENTINEL: &str = "ensure.redirects";

/// Extension identifying managed binary modules.
pub const BINARY_EXTENSION: &str = ".dll";

/// Select the nearest-matching group of `groups` for `desired`.
fn nearest_group<'a>(
    groups: &'a [AssetGroup],
    desired: &FrameworkToken,
) -> Option<&'a AssetGroup> {
    let picked = compat::nearest(desired, groups.iter().map(|g| &g.framework))?;
    groups.iter().find(|g| &g.framework == picked)
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_sentinel(path: &str) -> bool {
    file_name(path).eq_ignore_ascii_case(REDIRECT_SENTINEL)
}

fn is_binary(path: &str) -> bool {
    path.to_lowercase().ends_with(BINARY_EXTENSION)
}

/// Whether any asset collection of `package` has a group usable under
/// `desired`. False means the package supports none of its collections
/// for this framework; for the root package that is fatal.
pub fn supports(package: &PackageArchive, desired: &FrameworkToken) -> bool {
    nearest_group(package.lib_groups(), desired).is_some()
        || nearest_group(package.build_groups(), desired).is_some()
        || nearest_group(package.tool_groups(), desired).is_some()
}

/// Extract the ordered items to materialize for `desired`:
/// library ⊕ build ⊕ tools, group-internal order preserved.
///
/// Library binaries are classified `Reference`, or
/// `ReferenceWithRedirect` when the sentinel file is present in the
/// selected group; everything else is `None`. The sentinel itself is
/// dropped. Pure and idempotent: the same package and framework always
/// yield the same sequence.
pub fn select_items(
    package: &PackageArchive,
    desired: &FrameworkToken,
) -> Vec<(String, ReferenceKind)> {
    let mut items = Vec::new();

    if let Some(group) = nearest_group(package.lib_groups(), desired) {
        let wants_redirects = group.paths.iter().any(|p| is_sentinel(p));
        let binary_kind = if wants_redirects {
            ReferenceKind::ReferenceWithRedirect
        } else {
            ReferenceKind::Reference
        };
        for path in &group.paths {
            if is_sentinel(path) {
                continue;
            }
            let kind = if is_binary(path) {
                binary_kind
            } else {
                ReferenceKind::None
            };
            items.push((path.clone(), kind));
        }
    }

    for groups in [package.build_groups(), package.tool_groups()] {
        if let Some(group) = nearest_group(groups, desired) {
            for path in &group.paths {
                items.push((path.clone(), ReferenceKind::None));
            }
        }
    }

    items
}
