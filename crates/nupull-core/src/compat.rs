//! Framework compatibility oracle.
//!
//! Pure functions deciding which framework-scoped asset groups are usable
//! under a desired target framework, and which single group is the nearest
//! match when several qualify. Compatibility is asymmetric: a `net48`
//! consumer can use a `net45` group, never the reverse.

use nupull_schema::{FrameworkFamily, FrameworkToken, FrameworkVersion};

/// Canonical structural equivalence. Parsing already normalizes aliases,
/// so equivalence is plain equality of the normalized tokens.
pub fn is_equivalent(a: &FrameworkToken, b: &FrameworkToken) -> bool {
    a == b
}

/// Whether an asset group tagged `group` is usable under `desired`.
///
/// The `any` token is usable everywhere. A specific group is usable when it
/// is equivalent to the desired token, when it is an older release of the
/// same family (matching profile), or when it is a `netstandard` contract
/// the desired runtime implements.
pub fn is_usable(group: &FrameworkToken, desired: &FrameworkToken) -> bool {
    if group.is_any() {
        return true;
    }
    let (Some(gf), Some(gv)) = (group.family(), group.version()) else {
        return false;
    };
    let (Some(df), Some(dv)) = (desired.family(), desired.version()) else {
        // A neutral desired token only accepts neutral groups.
        return false;
    };

    if gf == df {
        let profile_ok = match group.profile() {
            None => true,
            Some(p) => desired.profile() == Some(p),
        };
        return profile_ok && gv <= dv;
    }

    // Cross-family: only netstandard contracts are consumable elsewhere.
    if gf == FrameworkFamily::NetStandard && group.profile().is_none() {
        return max_netstandard(df, dv).is_some_and(|max| gv <= max);
    }

    false
}

/// Highest `netstandard` version implemented by a runtime.
fn max_netstandard(family: FrameworkFamily, version: FrameworkVersion) -> Option<FrameworkVersion> {
    match family {
        FrameworkFamily::NetFramework => {
            if version >= FrameworkVersion(4, 6, 1) {
                Some(FrameworkVersion(2, 0, 0))
            } else if version >= FrameworkVersion(4, 6, 0) {
                Some(FrameworkVersion(1, 3, 0))
            } else if version >= FrameworkVersion(4, 5, 1) {
                Some(FrameworkVersion(1, 2, 0))
            } else if version >= FrameworkVersion(4, 5, 0) {
                Some(FrameworkVersion(1, 1, 0))
            } else {
                None
            }
        }
        FrameworkFamily::NetCoreApp => {
            if version >= FrameworkVersion(3, 0, 0) {
                Some(FrameworkVersion(2, 1, 0))
            } else if version >= FrameworkVersion(2, 0, 0) {
                Some(FrameworkVersion(2, 0, 0))
            } else {
                Some(FrameworkVersion(1, 6, 0))
            }
        }
        FrameworkFamily::NetStandard => Some(version),
    }
}

/// Pick the single nearest usable framework out of `candidates`.
///
/// Precedence: exact equivalent, then the same family (higher version
/// first), then `netstandard` (higher version first), then `any`.
/// Returns `None` when nothing qualifies; the caller then contributes zero
/// assets for that collection, which is not an error.
pub fn nearest<'a>(
    desired: &FrameworkToken,
    candidates: impl IntoIterator<Item = &'a FrameworkToken>,
) -> Option<&'a FrameworkToken> {
    candidates
        .into_iter()
        .filter(|c| is_usable(c, desired))
        .min_by_key(|c| rank(c, desired))
}

/// Lower ranks sorted first; version descends within a tier.
fn rank(candidate: &FrameworkToken, desired: &FrameworkToken) -> (u8, std::cmp::Reverse<FrameworkVersion>) {
    let version = std::cmp::Reverse(candidate.version().unwrap_or(FrameworkVersion(0, 0, 0)));
    let tier = if is_equivalent(candidate, desired) {
        0
    } else if candidate.is_any() {
        3
    } else if candidate.family() == desired.family() {
        1
    } else {
        2
    };
    (tier, version)
}
