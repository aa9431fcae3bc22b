pub mod compat;
pub mod downloader;
pub mod emit;
pub mod error;
pub mod feed;
pub mod identity;
pub mod package;
pub mod resolver;
pub mod select;
pub mod sink;

pub use downloader::{DownloadOptions, OfflineDownloader};
pub use error::DownloadError;
pub use sink::OutputSink;

/// User Agent string for feed requests
pub const USER_AGENT: &str = concat!("nupull/", env!("CARGO_PKG_VERSION"));
