//! End-to-end download flow against a mock HTTP feed, through the real
//! sinks.

use std::io::{Read, Write};
use std::path::Path;

use tokio_util::sync::CancellationToken;

use nupull_core::emit::ManifestBuilder;
use nupull_core::feed::HttpFeed;
use nupull_core::sink::{FileSystemSink, ZipSink};
use nupull_core::{DownloadError, DownloadOptions, OfflineDownloader};
use nupull_schema::PackageName;

fn nupkg(id: &str, version: &str, dependencies: &str, entries: &[(&str, &[u8])]) -> Vec<u8> {
    let nuspec = format!(
        r#"<?xml version="1.0"?>
<package xmlns="http://schemas.microsoft.com/packaging/2013/05/nuspec.xsd">
  <metadata>
    <id>{id}</id>
    <version>{version}</version>
    <authors>test</authors>
    <description>test package</description>
    {dependencies}
  </metadata>
</package>"#
    );

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    writer.start_file(format!("{id}.nuspec"), options).unwrap();
    writer.write_all(nuspec.as_bytes()).unwrap();
    for (name, bytes) in entries {
        writer.start_file(name.to_string(), options).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A mock feed serving one root package (with a props file and a binary)
/// and one dependency.
async fn serve_feed(server: &mut mockito::ServerGuard) -> Vec<mockito::Mock> {
    let url = server.url();
    let mut mocks = Vec::new();

    mocks.push(
        server
            .mock("GET", "/v3/index.json")
            .with_body(format!(
                r#"{{"version":"3.0.0","resources":[
                    {{"@id":"{url}/flat/","@type":"PackageBaseAddress/3.0.0"}}
                ]}}"#
            ))
            .create_async()
            .await,
    );

    let root = nupkg(
        "alpha",
        "1.0.0",
        r#"<dependencies>
             <group targetFramework="net45">
               <dependency id="beta" version="[1.0.0, 2.0.0)" />
             </group>
           </dependencies>"#,
        &[
            ("lib/net45/Alpha.dll", b"not-a-real-module".as_ref()),
            ("build/net45/alpha.props", b"<Project />".as_ref()),
        ],
    );
    mocks.push(
        server
            .mock("GET", "/flat/alpha/index.json")
            .with_body(r#"{"versions":["1.0.0"]}"#)
            .create_async()
            .await,
    );
    mocks.push(
        server
            .mock("GET", "/flat/alpha/1.0.0/alpha.1.0.0.nupkg")
            .with_body(root)
            .create_async()
            .await,
    );

    let dep = nupkg(
        "beta",
        "1.2.0",
        "",
        &[("tools/run.ps1", b"Write-Host hi".as_ref())],
    );
    mocks.push(
        server
            .mock("GET", "/flat/beta/index.json")
            .with_body(r#"{"versions":["0.9.0","1.2.0","2.5.0"]}"#)
            .create_async()
            .await,
    );
    mocks.push(
        server
            .mock("GET", "/flat/beta/1.2.0/beta.1.2.0.nupkg")
            .with_body(dep)
            .create_async()
            .await,
    );

    mocks
}

fn options(feed_url: &str, output: &Path, zip: bool) -> DownloadOptions {
    DownloadOptions {
        name: PackageName::new("alpha"),
        version: "1.0.0".parse().unwrap(),
        framework: "net45".parse().unwrap(),
        feed: feed_url.to_string(),
        output: output.to_path_buf(),
        zip,
    }
}

#[tokio::test]
async fn materializes_graph_to_loose_files() {
    let mut server = mockito::Server::new_async().await;
    let _mocks = serve_feed(&mut server).await;
    let feed_url = format!("{}/v3/index.json", server.url());

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let options = options(&feed_url, &out, false);

    let feed = HttpFeed::new(&options.feed).unwrap();
    let mut sink = ManifestBuilder::new(Box::new(FileSystemSink::new(&out)));
    OfflineDownloader::new(&feed)
        .run(&options, &mut sink, &CancellationToken::new())
        .await
        .unwrap();

    // Payload files, in id/version/original-path layout.
    assert!(out.join("alpha/1.0.0/lib/net45/Alpha.dll").exists());
    assert!(out.join("alpha/1.0.0/build/net45/alpha.props").exists());
    assert!(out.join("beta/1.2.0/tools/run.ps1").exists());

    // Generated manifests at the output root.
    let props = std::fs::read_to_string(out.join("nupull.props")).unwrap();
    assert!(props.contains(r"alpha\1.0.0\build\net45\alpha.props"));
    assert!(out.join("nupull.targets").exists());
    assert!(out.join("app.config").exists());
}

#[tokio::test]
async fn materializes_graph_to_single_archive() {
    let mut server = mockito::Server::new_async().await;
    let _mocks = serve_feed(&mut server).await;
    let feed_url = format!("{}/v3/index.json", server.url());

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out.zip");
    let options = options(&feed_url, &out, true);

    let feed = HttpFeed::new(&options.feed).unwrap();
    let mut sink = ManifestBuilder::new(Box::new(ZipSink::new(&out)));
    OfflineDownloader::new(&feed)
        .run(&options, &mut sink, &CancellationToken::new())
        .await
        .unwrap();

    let mut archive = zip::ZipArchive::new(std::fs::File::open(&out).unwrap()).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.name_for_index(i).unwrap().to_string())
        .collect();
    assert!(names.contains(&"alpha/1.0.0/lib/net45/Alpha.dll".to_string()));
    assert!(names.contains(&"nupull.targets".to_string()));

    let mut props = String::new();
    archive
        .by_name("nupull.props")
        .unwrap()
        .read_to_string(&mut props)
        .unwrap();
    assert!(props.contains(r"alpha\1.0.0\build\net45\alpha.props"));
}

#[tokio::test]
async fn occupied_destination_aborts_the_run() {
    let mut server = mockito::Server::new_async().await;
    let _mocks = serve_feed(&mut server).await;
    let feed_url = format!("{}/v3/index.json", server.url());

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(out.join("alpha/1.0.0/lib/net45")).unwrap();
    std::fs::write(out.join("alpha/1.0.0/lib/net45/Alpha.dll"), b"occupied").unwrap();

    let options = options(&feed_url, &out, false);
    let feed = HttpFeed::new(&options.feed).unwrap();
    let mut sink = ManifestBuilder::new(Box::new(FileSystemSink::new(&out)));
    let err = OfflineDownloader::new(&feed)
        .run(&options, &mut sink, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DownloadError::OutputConflict(_)));
    // The occupied file was never overwritten.
    assert_eq!(
        std::fs::read(out.join("alpha/1.0.0/lib/net45/Alpha.dll")).unwrap(),
        b"occupied"
    );
}

#[tokio::test]
async fn missing_dependency_version_aborts_with_context() {
    let mut server = mockito::Server::new_async().await;
    let url = server.url();

    let _index = server
        .mock("GET", "/v3/index.json")
        .with_body(format!(
            r#"{{"version":"3.0.0","resources":[
                {{"@id":"{url}/flat/","@type":"PackageBaseAddress/3.0.0"}}
            ]}}"#
        ))
        .create_async()
        .await;
    let root = nupkg(
        "alpha",
        "1.0.0",
        r#"<dependencies>
             <group targetFramework="net45">
               <dependency id="beta" version="[9.0.0, 10.0.0)" />
             </group>
           </dependencies>"#,
        &[("lib/net45/Alpha.dll", b"x".as_ref())],
    );
    let _versions = server
        .mock("GET", "/flat/alpha/index.json")
        .with_body(r#"{"versions":["1.0.0"]}"#)
        .create_async()
        .await;
    let _root = server
        .mock("GET", "/flat/alpha/1.0.0/alpha.1.0.0.nupkg")
        .with_body(root)
        .create_async()
        .await;
    let _beta = server
        .mock("GET", "/flat/beta/index.json")
        .with_body(r#"{"versions":["1.0.0"]}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let options = options(&format!("{url}/v3/index.json"), &out, false);

    let feed = HttpFeed::new(&options.feed).unwrap();
    let mut sink = ManifestBuilder::new(Box::new(FileSystemSink::new(&out)));
    let err = OfflineDownloader::new(&feed)
        .run(&options, &mut sink, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "No version of 'beta' satisfies [9.0.0, 10.0.0)"
    );
}
