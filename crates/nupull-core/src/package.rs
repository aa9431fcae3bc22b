//! Package archive reading.
//!
//! A fetched package is a zip archive carrying a manifest (`.nuspec`) plus
//! its payload entries. This module parses the manifest into typed
//! dependency groups and buckets the payload entries into the three
//! framework-scoped asset collections: `lib/`, `build/`, `tools/`.

use std::io::{Cursor, Read};
use std::str::FromStr;

use nupull_schema::{FrameworkToken, PackageName, PackageVersion, VersionRange};
use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;
use tracing::debug;
use zip::ZipArchive;

/// Errors raised while opening or reading a package archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The archive is not a readable zip container.
    #[error("Not a valid archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// An entry could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The archive has no manifest entry.
    #[error("Package has no manifest")]
    MissingManifest,

    /// The manifest XML is structurally invalid or incomplete.
    #[error("Invalid package manifest: {0}")]
    Manifest(String),
}

/// A single dependency edge declared in the manifest.
#[derive(Debug, Clone)]
pub struct Dependency {
    /// Target package id.
    pub id: PackageName,
    /// Version range the edge accepts.
    pub range: VersionRange,
}

/// Dependencies scoped to one framework token.
#[derive(Debug, Clone)]
pub struct DependencyGroup {
    /// Framework the group applies to; `any` for the legacy flat list.
    pub framework: FrameworkToken,
    /// Edges in manifest order.
    pub dependencies: Vec<Dependency>,
}

/// A framework-scoped bundle of entry paths from one collection.
#[derive(Debug, Clone)]
pub struct AssetGroup {
    /// Framework folder the group was read from; `any` for bare entries.
    pub framework: FrameworkToken,
    /// Full entry paths (e.g. `lib/net45/Foo.dll`), archive order.
    pub paths: Vec<String>,
}

/// A fetched package: manifest data plus random access to its entries.
pub struct PackageArchive {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    id: PackageName,
    version: PackageVersion,
    dependency_groups: Vec<DependencyGroup>,
    lib: Vec<AssetGroup>,
    build: Vec<AssetGroup>,
    tools: Vec<AssetGroup>,
}

impl std::fmt::Debug for PackageArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageArchive")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("entries", &self.archive.len())
            .finish_non_exhaustive()
    }
}

impl PackageArchive {
    /// Open a package from raw archive bytes, parsing its manifest and
    /// bucketing its entries into asset groups.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a zip archive, the manifest
    /// entry is missing, or the manifest XML cannot be parsed.
    pub fn open(bytes: Vec<u8>) -> Result<Self, ArchiveError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;

        let manifest_name = (0..archive.len())
            .map(|i| archive.name_for_index(i).unwrap_or_default().to_string())
            .find(|name| !name.contains('/') && name.to_lowercase().ends_with(".nuspec"))
            .ok_or(ArchiveError::MissingManifest)?;

        let mut manifest_xml = String::new();
        archive
            .by_name(&manifest_name)?
            .read_to_string(&mut manifest_xml)?;
        let manifest = parse_nuspec(&manifest_xml)?;

        let mut lib = GroupBuilder::new("lib");
        let mut build = GroupBuilder::new("build");
        let mut tools = GroupBuilder::new("tools");
        for i in 0..archive.len() {
            let name = archive.name_for_index(i).unwrap_or_default().to_string();
            if name.ends_with('/') {
                continue;
            }
            lib.offer(&name);
            build.offer(&name);
            tools.offer(&name);
        }

        Ok(Self {
            archive,
            id: manifest.id,
            version: manifest.version,
            dependency_groups: manifest.dependency_groups,
            lib: lib.groups,
            build: build.groups,
            tools: tools.groups,
        })
    }

    /// Package id from the manifest.
    pub fn id(&self) -> &PackageName {
        &self.id
    }

    /// Package version from the manifest.
    pub fn version(&self) -> &PackageVersion {
        &self.version
    }

    /// Dependency groups in manifest order.
    pub fn dependency_groups(&self) -> &[DependencyGroup] {
        &self.dependency_groups
    }

    /// Library asset groups (candidate managed references).
    pub fn lib_groups(&self) -> &[AssetGroup] {
        &self.lib
    }

    /// Build asset groups (build-time import files).
    pub fn build_groups(&self) -> &[AssetGroup] {
        &self.build
    }

    /// Tool asset groups (auxiliary files, never referenced).
    pub fn tool_groups(&self) -> &[AssetGroup] {
        &self.tools
    }

    /// Every specific framework token appearing in any asset collection,
    /// deduplicated, for error reporting.
    pub fn supported_frameworks(&self) -> Vec<FrameworkToken> {
        let mut seen = Vec::new();
        for group in self
            .lib
            .iter()
            .chain(self.build.iter())
            .chain(self.tools.iter())
        {
            if !group.framework.is_any() && !seen.contains(&group.framework) {
                seen.push(group.framework.clone());
            }
        }
        seen
    }

    /// Read the full contents of one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry does not exist or cannot be read.
    pub fn read_entry(&mut self, path: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut entry = self.archive.by_name(path)?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

/// Buckets entries of one collection (`lib/`, `build/`, `tools/`) into
/// framework groups, preserving first-seen group order and archive-order
/// paths within each group.
struct GroupBuilder {
    prefix: &'static str,
    groups: Vec<AssetGroup>,
}

impl GroupBuilder {
    fn new(prefix: &'static str) -> Self {
        Self {
            prefix,
            groups: Vec::new(),
        }
    }

    fn offer(&mut self, entry: &str) {
        let Some(rest) = entry
            .strip_prefix(self.prefix)
            .and_then(|r| r.strip_prefix('/'))
        else {
            return;
        };
        if rest.is_empty() {
            return;
        }

        let framework = match rest.split_once('/') {
            // `lib/<file>` directly in the collection root is neutral.
            None => FrameworkToken::Any,
            Some((folder, _)) => match FrameworkToken::from_str(folder) {
                Ok(token) => token,
                Err(_) => {
                    debug!(entry, folder, "skipping entry under unknown framework folder");
                    return;
                }
            },
        };

        match self.groups.iter_mut().find(|g| g.framework == framework) {
            Some(group) => group.paths.push(entry.to_string()),
            None => self.groups.push(AssetGroup {
                framework,
                paths: vec![entry.to_string()],
            }),
        }
    }
}

struct ParsedManifest {
    id: PackageName,
    version: PackageVersion,
    dependency_groups: Vec<DependencyGroup>,
}

/// Parse the manifest XML: package id, version, and dependency groups.
///
/// Both shapes of the dependencies section are accepted: `<group
/// targetFramework=...>` elements and the legacy flat `<dependency>` list,
/// which lands in the `any` group.
fn parse_nuspec(xml: &str) -> Result<ParsedManifest, ArchiveError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut id: Option<PackageName> = None;
    let mut version: Option<PackageVersion> = None;
    let mut groups: Vec<DependencyGroup> = Vec::new();
    let mut flat: Vec<Dependency> = Vec::new();

    let mut path: Vec<String> = Vec::new();
    let mut in_group = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                if name == "group" && path_is(&path, &["package", "metadata", "dependencies"]) {
                    let framework = match attr(&e, "targetFramework")? {
                        Some(tf) => FrameworkToken::from_str(&tf)
                            .map_err(|err| ArchiveError::Manifest(err.to_string()))?,
                        None => FrameworkToken::Any,
                    };
                    groups.push(DependencyGroup {
                        framework,
                        dependencies: Vec::new(),
                    });
                    in_group = true;
                } else if name == "dependency" {
                    let dep = parse_dependency(&e)?;
                    if in_group {
                        if let Some(group) = groups.last_mut() {
                            group.dependencies.push(dep);
                        }
                    } else if path_is(&path, &["package", "metadata", "dependencies"]) {
                        flat.push(dep);
                    }
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(e.name().as_ref());
                if name == "dependency" {
                    let dep = parse_dependency(&e)?;
                    if in_group {
                        if let Some(group) = groups.last_mut() {
                            group.dependencies.push(dep);
                        }
                    } else if path_is(&path, &["package", "metadata", "dependencies"]) {
                        flat.push(dep);
                    }
                } else if name == "group"
                    && path_is(&path, &["package", "metadata", "dependencies"])
                {
                    // Empty group: declares framework support with no edges.
                    let framework = match attr(&e, "targetFramework")? {
                        Some(tf) => FrameworkToken::from_str(&tf)
                            .map_err(|err| ArchiveError::Manifest(err.to_string()))?,
                        None => FrameworkToken::Any,
                    };
                    groups.push(DependencyGroup {
                        framework,
                        dependencies: Vec::new(),
                    });
                }
            }
            Ok(Event::Text(t)) => {
                if path_is(&path, &["package", "metadata", "id"]) {
                    let text = t
                        .unescape()
                        .map_err(|e| ArchiveError::Manifest(e.to_string()))?;
                    id = Some(PackageName::new(&text));
                } else if path_is(&path, &["package", "metadata", "version"]) {
                    let text = t
                        .unescape()
                        .map_err(|e| ArchiveError::Manifest(e.to_string()))?;
                    version = Some(
                        text.parse()
                            .map_err(|e: nupull_schema::VersionError| {
                                ArchiveError::Manifest(e.to_string())
                            })?,
                    );
                }
            }
            Ok(Event::End(e)) => {
                if local_name(e.name().as_ref()) == "group" {
                    in_group = false;
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ArchiveError::Manifest(e.to_string())),
            _ => {}
        }
    }

    if !flat.is_empty() {
        groups.push(DependencyGroup {
            framework: FrameworkToken::Any,
            dependencies: flat,
        });
    }

    Ok(ParsedManifest {
        id: id.ok_or_else(|| ArchiveError::Manifest("missing package id".into()))?,
        version: version.ok_or_else(|| ArchiveError::Manifest("missing package version".into()))?,
        dependency_groups: groups,
    })
}

fn parse_dependency(e: &quick_xml::events::BytesStart<'_>) -> Result<Dependency, ArchiveError> {
    let id = attr(e, "id")?
        .ok_or_else(|| ArchiveError::Manifest("dependency without id".into()))?;
    let range = match attr(e, "version")? {
        Some(v) => v
            .parse()
            .map_err(|err: nupull_schema::VersionError| ArchiveError::Manifest(err.to_string()))?,
        // A version-less edge accepts anything.
        None => VersionRange::at_least(PackageVersion::new(0, 0, 0)),
    };
    Ok(Dependency {
        id: PackageName::new(&id),
        range,
    })
}

fn attr(
    e: &quick_xml::events::BytesStart<'_>,
    key: &str,
) -> Result<Option<String>, ArchiveError> {
    for a in e.attributes() {
        let a = a.map_err(|err| ArchiveError::Manifest(err.to_string()))?;
        if local_name(a.key.as_ref()) == key {
            let value = a
                .unescape_value()
                .map_err(|err| ArchiveError::Manifest(err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn local_name(qname: &[u8]) -> String {
    let name = qname
        .rsplit(|&b| b == b':')
        .next()
        .unwrap_or(qname);
    String::from_utf8_lossy(name).into_owned()
}

fn path_is(path: &[String], expected: &[&str]) -> bool {
    path.len() == expected.len() && path.iter().zip(expected).all(|(a, b)| a == b)
}

#[cfg(test)]
pub(crate) mod test_util {
    //! Builders for synthetic package archives, shared by module tests and
    //! the end-to-end tests.

    use std::io::Write;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    /// Build a package archive in memory from a nuspec body and entries.
    pub(crate) fn build_package(nuspec_id: &str, nuspec: &str, entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();

        writer
            .start_file(format!("{nuspec_id}.nuspec"), options)
            .unwrap();
        writer.write_all(nuspec.as_bytes()).unwrap();

        for (name, bytes) in entries {
            writer.start_file(name.to_string(), options).unwrap();
            writer.write_all(bytes).unwrap();
        }

        writer.finish().unwrap().into_inner()
    }

    /// A minimal nuspec body.
    pub(crate) fn nuspec(id: &str, version: &str, dependencies: &str) -> String {
        format!(
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
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::{build_package, nuspec};
    use super::*;

    #[test]
    fn parses_id_version_and_grouped_dependencies() {
        let body = nuspec(
            "A",
            "1.0.0",
            r#"<dependencies>
                 <group targetFramework=".NETFramework4.5">
                   <dependency id="B" version="[1.0.0, 2.0.0)" />
                 </group>
                 <group targetFramework=".NETStandard2.0" />
               </dependencies>"#,
        );
        let bytes = build_package("A", &body, &[("lib/net45/A.dll", b"x")]);
        let pkg = PackageArchive::open(bytes).unwrap();

        assert_eq!(pkg.id(), &PackageName::new("a"));
        assert_eq!(pkg.version(), &"1.0.0".parse().unwrap());

        let groups = pkg.dependency_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].framework, "net45".parse().unwrap());
        assert_eq!(groups[0].dependencies.len(), 1);
        assert_eq!(groups[0].dependencies[0].id, PackageName::new("b"));
        assert!(groups[1].dependencies.is_empty());
    }

    #[test]
    fn parses_flat_dependency_list_as_any_group() {
        let body = nuspec(
            "A",
            "1.0.0",
            r#"<dependencies>
                 <dependency id="B" version="1.0.0" />
                 <dependency id="C" />
               </dependencies>"#,
        );
        let bytes = build_package("A", &body, &[]);
        let pkg = PackageArchive::open(bytes).unwrap();

        let groups = pkg.dependency_groups();
        assert_eq!(groups.len(), 1);
        assert!(groups[0].framework.is_any());
        assert_eq!(groups[0].dependencies.len(), 2);
        // The version-less edge accepts anything.
        assert!(groups[0].dependencies[1]
            .range
            .contains(&"99.0.0".parse().unwrap()));
    }

    #[test]
    fn buckets_entries_into_collections_and_framework_groups() {
        let body = nuspec("A", "1.0.0", "");
        let bytes = build_package(
            "A",
            &body,
            &[
                ("lib/net45/A.dll", b"x".as_ref()),
                ("lib/net45/A.xml", b"x".as_ref()),
                ("lib/netstandard2.0/A.dll", b"x".as_ref()),
                ("lib/Neutral.dll", b"x".as_ref()),
                ("build/net45/A.targets", b"x".as_ref()),
                ("tools/install.ps1", b"x".as_ref()),
                ("content/readme.txt", b"x".as_ref()),
            ],
        );
        let pkg = PackageArchive::open(bytes).unwrap();

        assert_eq!(pkg.lib_groups().len(), 3);
        assert_eq!(pkg.lib_groups()[0].framework, "net45".parse().unwrap());
        assert_eq!(
            pkg.lib_groups()[0].paths,
            vec!["lib/net45/A.dll", "lib/net45/A.xml"]
        );
        assert!(pkg.lib_groups()[2].framework.is_any());

        assert_eq!(pkg.build_groups().len(), 1);
        assert_eq!(pkg.tool_groups().len(), 1);
        assert!(pkg.tool_groups()[0].framework.is_any());

        let supported = pkg.supported_frameworks();
        assert!(supported.contains(&"net45".parse().unwrap()));
        assert!(supported.contains(&"netstandard2.0".parse().unwrap()));
    }

    #[test]
    fn read_entry_round_trips() {
        let body = nuspec("A", "1.0.0", "");
        let bytes = build_package("A", &body, &[("lib/net45/A.dll", b"payload".as_ref())]);
        let mut pkg = PackageArchive::open(bytes).unwrap();
        assert_eq!(pkg.read_entry("lib/net45/A.dll").unwrap(), b"payload");
        assert!(pkg.read_entry("lib/net45/missing.dll").is_err());
    }

    #[test]
    fn missing_manifest_is_an_error() {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file("lib/net45/A.dll", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut writer, b"x").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        assert!(matches!(
            PackageArchive::open(bytes),
            Err(ArchiveError::MissingManifest)
        ));
    }

    #[test]
    fn garbage_bytes_are_an_archive_error() {
        assert!(matches!(
            PackageArchive::open(b"not a zip".to_vec()),
            Err(ArchiveError::Zip(_))
        ));
    }
}
