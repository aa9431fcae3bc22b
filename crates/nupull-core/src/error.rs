//! Error taxonomy for a download run.
//!
//! Every variant here is an expected, user-facing condition: it is reported
//! with the triggering package/framework context and without an internal
//! fault trace. Unexpected faults travel as `anyhow::Error` in the CLI and
//! are printed in full as a separate category.

use nupull_schema::{FrameworkToken, PackageName, VersionRange};
use thiserror::Error;

use crate::feed::FeedError;
use crate::package::ArchiveError;

/// Fatal conditions that abort a run.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// No available version of a dependency satisfies its range.
    #[error("No version of '{name}' satisfies {range}")]
    NoMatchingVersion {
        /// Package whose versions were searched.
        name: PackageName,
        /// The unsatisfied range.
        range: VersionRange,
    },

    /// The root package has no asset group usable under the desired framework.
    #[error(
        "Required package '{name}' does not support framework {desired}. Supported frameworks: {}",
        supported.join(",")
    )]
    UnsupportedFramework {
        /// The offending package.
        name: PackageName,
        /// The framework the run was asked to target.
        desired: FrameworkToken,
        /// Frameworks the package does declare.
        supported: Vec<String>,
    },

    /// A destination path is already occupied. Never overwritten.
    #[error("File {0} already exists")]
    OutputConflict(String),

    /// The run was cancelled between queue iterations.
    #[error("Download cancelled")]
    Cancelled,

    /// Feed lookup or transfer failure, including package-not-found.
    #[error(transparent)]
    Feed(#[from] FeedError),

    /// A fetched package archive could not be read.
    #[error("Invalid package archive: {0}")]
    Archive(#[from] ArchiveError),

    /// Filesystem failure in a sink.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
