//! Run orchestration: resolve, select, materialize, finalize.

use std::path::PathBuf;

use nupull_schema::{FrameworkToken, PackageName, PackageVersion, VersionRange};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::DownloadError;
use crate::feed::PackageFeed;
use crate::resolver;
use crate::select;
use crate::sink::OutputSink;

/// Options for one download run.
#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Root package id.
    pub name: PackageName,
    /// Concrete root version.
    pub version: PackageVersion,
    /// Target framework the whole run selects assets for.
    pub framework: FrameworkToken,
    /// Service index URL of the feed.
    pub feed: String,
    /// Output directory (or archive path with `zip`).
    pub output: PathBuf,
    /// Produce a single compressed archive instead of loose files.
    pub zip: bool,
}

/// Drives a full run: breadth-first resolution, per-package asset
/// selection, and materialization through the provided sink.
#[derive(Debug)]
pub struct OfflineDownloader<'a, F: PackageFeed> {
    feed: &'a F,
}

impl<'a, F: PackageFeed> OfflineDownloader<'a, F> {
    /// Create a downloader over the given feed.
    pub fn new(feed: &'a F) -> Self {
        Self { feed }
    }

    /// Resolve the root coordinate and materialize every selected item of
    /// every resolved package through `sink`, then finalize it.
    ///
    /// Items are emitted in resolution (dequeue) order, each under
    /// `id/version/original-path`. Later packages never overwrite earlier
    /// ones; a duplicate destination surfaces as `OutputConflict`.
    ///
    /// # Errors
    ///
    /// Fatal: resolution failures (see [`resolver::resolve_all`]), an
    /// unsupported root framework, output conflicts, IO failures, or
    /// cancellation.
    pub async fn run(
        &self,
        options: &DownloadOptions,
        sink: &mut dyn OutputSink,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let desired = &options.framework;
        let root_range = VersionRange::exact(options.version.clone());

        let packages =
            resolver::resolve_all(self.feed, &options.name, &root_range, desired, cancel).await?;

        for (position, mut package) in packages.into_iter().enumerate() {
            // The root must be usable; dependencies may contribute nothing.
            if position == 0 && !select::supports(&package, desired) {
                return Err(DownloadError::UnsupportedFramework {
                    name: package.id().clone(),
                    desired: desired.clone(),
                    supported: package
                        .supported_frameworks()
                        .iter()
                        .map(ToString::to_string)
                        .collect(),
                });
            }

            info!(package = %package.id(), version = %package.version(), "adding");
            let prefix = format!("{}/{}", package.id(), package.version());
            for (path, kind) in select::select_items(&package, desired) {
                let bytes = package.read_entry(&path)?;
                sink.add(&format!("{prefix}/{path}"), &bytes, kind).await?;
            }
        }

        sink.finalize().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{ManifestBuilder, PROPS_FILE, REDIRECTS_FILE, TARGETS_FILE};
    use crate::feed::test_util::MapFeed;
    use crate::identity::test_util::build_module;
    use crate::sink::test_util::MemorySink;
    use nupull_schema::ReferenceKind;

    fn options(name: &str, version: &str, framework: &str) -> DownloadOptions {
        DownloadOptions {
            name: PackageName::new(name),
            version: version.parse().unwrap(),
            framework: framework.parse().unwrap(),
            feed: String::new(),
            output: PathBuf::from("out"),
            zip: false,
        }
    }

    fn doc(items: &[(String, Vec<u8>, ReferenceKind)], name: &str) -> String {
        let bytes = &items.iter().find(|(p, _, _)| p == name).unwrap().1;
        String::from_utf8(bytes.clone()).unwrap()
    }

    #[tokio::test]
    async fn two_package_graph_with_sentinel_end_to_end() {
        // Root A has one plain library binary and an edge to B; B carries
        // the redirect sentinel. Expect order [A, B], A's binary a plain
        // reference, B's redirect-bearing, and one redirect stanza for B.
        let a_dll = build_module("A", (1, 0, 0, 0), "", None);
        let b_dll = build_module("B", (1, 5, 0, 0), "", Some(&[1, 2, 3, 4]));

        let mut feed = MapFeed::new();
        feed.insert(
            "a",
            "1.0.0",
            r#"<dependencies>
                 <group targetFramework="net45">
                   <dependency id="B" version="[1.0.0, 2.0.0)" />
                 </group>
               </dependencies>"#,
            &[("lib/net45/A.dll", a_dll.as_slice())],
        );
        feed.insert(
            "b",
            "1.5.0",
            "",
            &[
                ("lib/net45/B.dll", b_dll.as_slice()),
                ("lib/net45/ensure.redirects", b"".as_ref()),
            ],
        );

        let (memory, items, finalized) = MemorySink::with_handles();
        let mut sink = ManifestBuilder::new(Box::new(memory));
        OfflineDownloader::new(&feed)
            .run(&options("A", "1.0.0", "net45"), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        let items = items.lock().unwrap();
        let paths: Vec<&str> = items.iter().map(|(p, _, _)| p.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "a/1.0.0/lib/net45/A.dll",
                "b/1.5.0/lib/net45/B.dll",
                PROPS_FILE,
                TARGETS_FILE,
                REDIRECTS_FILE,
            ]
        );
        assert_eq!(items[0].2, ReferenceKind::Reference);
        assert_eq!(items[1].2, ReferenceKind::ReferenceWithRedirect);
        assert!(*finalized.lock().unwrap());

        let targets = doc(&items, TARGETS_FILE);
        assert_eq!(targets.matches("<Reference Include=").count(), 2);
        assert!(targets.contains("A, Version=1.0.0.0"));
        assert!(targets.contains("B, Version=1.5.0.0"));

        let config = doc(&items, REDIRECTS_FILE);
        assert_eq!(config.matches("<dependentAssembly>").count(), 1);
        assert!(config.contains(r#"<assemblyIdentity name="B""#));
        assert!(config.contains(r#"oldVersion="0.0.0.0-1.5.0.0""#));
    }

    #[tokio::test]
    async fn unsupported_root_framework_is_fatal() {
        let mut feed = MapFeed::new();
        feed.insert("a", "1.0.0", "", &[("lib/net6.0/A.dll", b"x".as_ref())]);

        let (memory, items, _) = MemorySink::with_handles();
        let mut sink = ManifestBuilder::new(Box::new(memory));
        let err = OfflineDownloader::new(&feed)
            .run(&options("a", "1.0.0", "net45"), &mut sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DownloadError::UnsupportedFramework { .. }));
        assert!(err.to_string().contains("net6.0"));
        assert!(items.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dependency_without_matching_assets_contributes_nothing() {
        let mut feed = MapFeed::new();
        feed.insert(
            "a",
            "1.0.0",
            r#"<dependencies>
                 <group targetFramework="net45">
                   <dependency id="b" version="1.0.0" />
                 </group>
               </dependencies>"#,
            &[("lib/net45/A.dll", b"junk".as_ref())],
        );
        // b only ships assets for a framework the run does not target.
        feed.insert("b", "1.0.0", "", &[("build/net6.0/b.targets", b"x".as_ref())]);

        let (memory, items, _) = MemorySink::with_handles();
        let mut sink = ManifestBuilder::new(Box::new(memory));
        OfflineDownloader::new(&feed)
            .run(&options("a", "1.0.0", "net45"), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        let items = items.lock().unwrap();
        let paths: Vec<&str> = items.iter().map(|(p, _, _)| p.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "a/1.0.0/lib/net45/A.dll",
                PROPS_FILE,
                TARGETS_FILE,
                REDIRECTS_FILE,
            ]
        );
        // The junk binary was copied but downgraded: no reference entries.
        assert!(!doc(&items, TARGETS_FILE).contains("<Reference Include="));
    }

    #[tokio::test]
    async fn props_and_targets_survive_the_whole_pipeline() {
        let mut feed = MapFeed::new();
        feed.insert(
            "a",
            "1.0.0",
            "",
            &[
                ("build/net45/a.props", b"<Project />".as_ref()),
                ("build/net45/a.targets", b"<Project />".as_ref()),
            ],
        );

        let (memory, items, _) = MemorySink::with_handles();
        let mut sink = ManifestBuilder::new(Box::new(memory));
        OfflineDownloader::new(&feed)
            .run(&options("a", "1.0.0", "net45"), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        let items = items.lock().unwrap();
        let props = doc(&items, PROPS_FILE);
        assert!(props.contains(r"a\1.0.0\build\net45\a.props"));
        let targets = doc(&items, TARGETS_FILE);
        assert!(targets.contains(r"a\1.0.0\build\net45\a.targets"));
    }
}
