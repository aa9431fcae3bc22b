use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Errors that can occur when parsing versions or version ranges.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The version string is empty or has more than four numeric parts.
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// A numeric part of the version could not be parsed.
    #[error("Invalid version component in '{0}'")]
    InvalidComponent(String),

    /// The range string is not bare-version, exact, or interval notation.
    #[error("Invalid version range: {0}")]
    InvalidRange(String),
}

/// A normalized, case-insensitive package name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageName(String);

impl PackageName {
    /// Create a new package name, normalizing the input to lowercase.
    pub fn new(name: &str) -> Self {
        Self(name.to_lowercase())
    }

    /// Return the normalized name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PackageName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl PartialEq<&str> for PackageName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.to_lowercase()
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PackageName {
    fn from(s: String) -> Self {
        Self::new(&s)
    }
}

/// A package version: `major.minor.patch[.revision][-prerelease]`.
///
/// Two- and three-part versions parse with the missing parts as zero.
/// Ordering compares the numeric tuple first, then treats a release as
/// newer than any prerelease of the same tuple, then compares prerelease
/// identifiers with semver rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageVersion {
    /// Major version number.
    pub major: u64,
    /// Minor version number.
    pub minor: u64,
    /// Patch (third) version number.
    pub patch: u64,
    /// Optional fourth version number, zero when absent.
    pub revision: u64,
    /// Prerelease label after `-`, empty for release versions.
    pub pre: semver::Prerelease,
}

impl PackageVersion {
    /// Construct a release version from its numeric parts.
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self::with_revision(major, minor, patch, 0)
    }

    /// Construct a four-part release version.
    pub fn with_revision(major: u64, minor: u64, patch: u64, revision: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            revision,
            pre: semver::Prerelease::EMPTY,
        }
    }

    /// Render the four-part `major.minor.patch.revision` form used by
    /// assembly version numbers and binding redirects.
    pub fn to_four_part(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.major, self.minor, self.patch, self.revision
        )
    }
}

impl FromStr for PackageVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::InvalidVersion(s.to_string()));
        }

        let (numbers, pre) = match s.split_once('-') {
            Some((n, p)) => {
                let pre = semver::Prerelease::new(p)
                    .map_err(|_| VersionError::InvalidVersion(s.to_string()))?;
                (n, pre)
            }
            None => (s, semver::Prerelease::EMPTY),
        };

        let mut parts = [0u64; 4];
        let mut count = 0;
        for piece in numbers.split('.') {
            if count == 4 {
                return Err(VersionError::InvalidVersion(s.to_string()));
            }
            parts[count] = piece
                .parse()
                .map_err(|_| VersionError::InvalidComponent(s.to_string()))?;
            count += 1;
        }
        if count < 2 {
            return Err(VersionError::InvalidVersion(s.to_string()));
        }

        Ok(Self {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
            revision: parts[3],
            pre,
        })
    }
}

impl TryFrom<String> for PackageVersion {
    type Error = VersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PackageVersion> for String {
    fn from(v: PackageVersion) -> Self {
        v.to_string()
    }
}

impl fmt::Display for PackageVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if self.revision != 0 {
            write!(f, ".{}", self.revision)?;
        }
        if !self.pre.is_empty() {
            write!(f, "-{}", self.pre)?;
        }
        Ok(())
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch, self.revision)
            .cmp(&(other.major, other.minor, other.patch, other.revision))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One end of a version range.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Bound {
    Open,
    Inclusive(PackageVersion),
    Exclusive(PackageVersion),
}

/// A dependency version range.
///
/// Supports the feed's interval notation as well as a bare version:
///
/// - `1.0.0` -- minimum version, inclusive (`>= 1.0.0`)
/// - `[1.0.0]` -- exactly `1.0.0`
/// - `[1.0.0, 2.0.0)` -- `>= 1.0.0` and `< 2.0.0`
/// - `(, 2.0.0]` -- `<= 2.0.0`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    lower: Bound,
    upper: Bound,
}

impl VersionRange {
    /// Range accepting any version at or above `v`.
    pub fn at_least(v: PackageVersion) -> Self {
        Self {
            lower: Bound::Inclusive(v),
            upper: Bound::Open,
        }
    }

    /// Range accepting exactly `v`.
    pub fn exact(v: PackageVersion) -> Self {
        Self {
            lower: Bound::Inclusive(v.clone()),
            upper: Bound::Inclusive(v),
        }
    }

    /// Check whether `v` falls inside this range.
    pub fn contains(&self, v: &PackageVersion) -> bool {
        let lower_ok = match &self.lower {
            Bound::Open => true,
            Bound::Inclusive(l) => v >= l,
            Bound::Exclusive(l) => v > l,
        };
        let upper_ok = match &self.upper {
            Bound::Open => true,
            Bound::Inclusive(u) => v <= u,
            Bound::Exclusive(u) => v < u,
        };
        lower_ok && upper_ok
    }

    /// Pick the best matching version out of `available`: the lowest
    /// version satisfying the range. Deterministic for a fixed input set.
    pub fn find_best_match<'a>(
        &self,
        available: impl IntoIterator<Item = &'a PackageVersion>,
    ) -> Option<&'a PackageVersion> {
        available.into_iter().filter(|v| self.contains(v)).min()
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VersionError::InvalidRange(s.to_string()));
        }

        let open_incl = s.starts_with('[');
        let open_excl = s.starts_with('(');
        if !open_incl && !open_excl {
            // Bare version: minimum inclusive.
            return Ok(Self::at_least(s.parse()?));
        }

        let close_incl = s.ends_with(']');
        let close_excl = s.ends_with(')');
        if !close_incl && !close_excl {
            return Err(VersionError::InvalidRange(s.to_string()));
        }

        let inner = &s[1..s.len() - 1];
        let (lo, hi) = match inner.split_once(',') {
            Some((lo, hi)) => (lo.trim(), hi.trim()),
            None => {
                // `[1.0.0]` pins an exact version; `(1.0.0)` is meaningless.
                if open_incl && close_incl {
                    return Ok(Self::exact(inner.trim().parse()?));
                }
                return Err(VersionError::InvalidRange(s.to_string()));
            }
        };

        let lower = if lo.is_empty() {
            Bound::Open
        } else if open_incl {
            Bound::Inclusive(lo.parse()?)
        } else {
            Bound::Exclusive(lo.parse()?)
        };
        let upper = if hi.is_empty() {
            Bound::Open
        } else if close_incl {
            Bound::Inclusive(hi.parse()?)
        } else {
            Bound::Exclusive(hi.parse()?)
        };

        Ok(Self { lower, upper })
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.lower, &self.upper) {
            (Bound::Inclusive(l), Bound::Open) => write!(f, "{l}"),
            (Bound::Inclusive(l), Bound::Inclusive(u)) if l == u => write!(f, "[{l}]"),
            (lower, upper) => {
                match lower {
                    Bound::Open => write!(f, "(,")?,
                    Bound::Inclusive(l) => write!(f, "[{l},")?,
                    Bound::Exclusive(l) => write!(f, "({l},")?,
                }
                match upper {
                    Bound::Open => write!(f, ")"),
                    Bound::Inclusive(u) => write!(f, " {u}]"),
                    Bound::Exclusive(u) => write!(f, " {u})"),
                }
            }
        }
    }
}

/// How a materialized item participates in the consuming build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceKind {
    /// Copied only; never referenced by the build.
    None,
    /// Adds a managed reference entry.
    Reference,
    /// Adds a managed reference entry and an assembly version redirect.
    ReferenceWithRedirect,
}

impl ReferenceKind {
    /// True for the two reference-bearing kinds.
    pub fn is_reference(self) -> bool {
        matches!(self, Self::Reference | Self::ReferenceWithRedirect)
    }
}
