//! Output sinks: where materialized items land.
//!
//! Two interchangeable implementations: loose files under a root
//! directory, and a single compressed archive written at finalize. Both
//! refuse to overwrite: an occupied destination is a fatal
//! `OutputConflict`, detected at `add` time before any bytes are written.

use std::collections::HashSet;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use nupull_schema::ReferenceKind;
use tracing::debug;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::DownloadError;

/// Receives `(path, bytes, kind)` triples and a single finalize signal.
#[async_trait]
pub trait OutputSink: Send {
    /// Add one item. `path` is output-root-relative with `/` separators.
    async fn add(
        &mut self,
        path: &str,
        bytes: &[u8],
        kind: ReferenceKind,
    ) -> Result<(), DownloadError>;

    /// Complete the output. Called exactly once, after all adds.
    async fn finalize(&mut self) -> Result<(), DownloadError>;
}

/// Writes items as loose files, creating intermediate directories.
#[derive(Debug)]
pub struct FileSystemSink {
    root: PathBuf,
}

impl FileSystemSink {
    /// Sink rooted at `root`; the directory is created on first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl OutputSink for FileSystemSink {
    async fn add(
        &mut self,
        path: &str,
        bytes: &[u8],
        _kind: ReferenceKind,
    ) -> Result<(), DownloadError> {
        let dest = self.root.join(Path::new(path));
        if dest.exists() {
            return Err(DownloadError::OutputConflict(path.to_string()));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        debug!(path, len = bytes.len(), "writing file");
        tokio::fs::write(&dest, bytes).await?;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), DownloadError> {
        Ok(())
    }
}

/// Buffers items into one deflate-compressed archive, written to its
/// destination file at finalize. Entries keep first-add order; the
/// archive on disk is unusable until finalize completes.
pub struct ZipSink {
    dest: PathBuf,
    writer: Option<ZipWriter<Cursor<Vec<u8>>>>,
    seen: HashSet<String>,
}

impl std::fmt::Debug for ZipSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipSink")
            .field("dest", &self.dest)
            .field("entries", &self.seen.len())
            .finish_non_exhaustive()
    }
}

impl ZipSink {
    /// Sink producing a single archive file at `dest`.
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self {
            dest: dest.into(),
            writer: Some(ZipWriter::new(Cursor::new(Vec::new()))),
            seen: HashSet::new(),
        }
    }
}

#[async_trait]
impl OutputSink for ZipSink {
    async fn add(
        &mut self,
        path: &str,
        bytes: &[u8],
        _kind: ReferenceKind,
    ) -> Result<(), DownloadError> {
        if !self.seen.insert(path.to_string()) {
            return Err(DownloadError::OutputConflict(path.to_string()));
        }
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| std::io::Error::other("archive already finalized"))?;

        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
        writer
            .start_file(path, options)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        writer.write_all(bytes)?;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), DownloadError> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| std::io::Error::other("archive already finalized"))?;
        let buffer = writer
            .finish()
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .into_inner();
        if self.dest.exists() {
            return Err(DownloadError::OutputConflict(
                self.dest.display().to_string(),
            ));
        }
        tokio::fs::write(&self.dest, buffer).await?;
        Ok(())
    }
}
