//! Integration manifest emission.
//!
//! [`ManifestBuilder`] decorates an [`OutputSink`]: every item passes
//! through it on the way down so it can record build-integration metadata,
//! then at finalize it synthesizes the generated documents and pushes them
//! through the same sink as ordinary items.
//!
//! Three documents are generated at the output root: a props manifest
//! importing every recorded `.props` file, a targets manifest holding one
//! `Reference` per recorded managed reference followed by an import per
//! recorded `.targets` file, and a redirect configuration with one
//! binding-redirect stanza per redirect-bearing reference. Paths inside
//! the documents are `$(MSBuildThisFileDirectory)`-relative, so the output
//! relocates as a unit.

use async_trait::async_trait;
use nupull_schema::{AssemblyIdentity, ReferenceKind};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use tracing::{debug, warn};

use crate::error::DownloadError;
use crate::identity;
use crate::sink::OutputSink;

/// Generated props manifest name.
pub const PROPS_FILE: &str = "nupull.props";
/// Generated targets manifest name.
pub const TARGETS_FILE: &str = "nupull.targets";
/// Generated assembly redirect configuration name.
pub const REDIRECTS_FILE: &str = "app.config";

const MSBUILD_NS: &str = "http://schemas.microsoft.com/developer/msbuild/2003";
const ASM_BINDING_NS: &str = "urn:schemas-microsoft-com:asm.v1";

struct RecordedReference {
    path: String,
    full_name: String,
}

/// Decorator over an [`OutputSink`] that accumulates reference, redirect,
/// props, and targets entries as items stream through, and writes the
/// generated manifests at finalize.
pub struct ManifestBuilder {
    inner: Box<dyn OutputSink>,
    references: Vec<RecordedReference>,
    redirects: Vec<AssemblyIdentity>,
    props: Vec<String>,
    targets: Vec<String>,
}

impl std::fmt::Debug for ManifestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestBuilder")
            .field("references", &self.references.len())
            .field("redirects", &self.redirects.len())
            .field("props", &self.props.len())
            .field("targets", &self.targets.len())
            .finish_non_exhaustive()
    }
}

impl ManifestBuilder {
    /// Wrap `inner`; all items and the generated manifests go through it.
    pub fn new(inner: Box<dyn OutputSink>) -> Self {
        Self {
            inner,
            references: Vec::new(),
            redirects: Vec::new(),
            props: Vec::new(),
            targets: Vec::new(),
        }
    }

    fn build_props(&self) -> Result<Vec<u8>, DownloadError> {
        let mut w = XmlDoc::new()?;
        w.start_with_ns("Project", MSBUILD_NS)?;
        for path in &self.props {
            w.empty_with_attrs("Import", &[("Project", &msbuild_path(path))])?;
        }
        w.end("Project")?;
        w.finish()
    }

    fn build_targets(&self) -> Result<Vec<u8>, DownloadError> {
        let mut w = XmlDoc::new()?;
        w.start_with_ns("Project", MSBUILD_NS)?;

        w.start("ItemGroup")?;
        for reference in &self.references {
            w.start_with_attrs("Reference", &[("Include", &reference.full_name)])?;
            w.text_element("HintPath", &msbuild_path(&reference.path))?;
            w.end("Reference")?;
        }
        w.end("ItemGroup")?;

        for path in &self.targets {
            w.empty_with_attrs("Import", &[("Project", &msbuild_path(path))])?;
        }
        w.end("Project")?;
        w.finish()
    }

    fn build_redirects(&self) -> Result<Vec<u8>, DownloadError> {
        let mut w = XmlDoc::new()?;
        w.start("configuration")?;
        w.start("runtime")?;
        w.start_with_ns("assemblyBinding", ASM_BINDING_NS)?;
        for id in &self.redirects {
            let current = id.version.to_four_part();
            w.start("dependentAssembly")?;
            w.empty_with_attrs(
                "assemblyIdentity",
                &[
                    ("name", id.name.as_str()),
                    ("publicKeyToken", &id.public_key_token_str()),
                    ("culture", id.culture_str()),
                ],
            )?;
            w.empty_with_attrs(
                "bindingRedirect",
                &[
                    ("oldVersion", &format!("0.0.0.0-{current}")),
                    ("newVersion", current.as_str()),
                ],
            )?;
            w.end("dependentAssembly")?;
        }
        w.end("assemblyBinding")?;
        w.end("runtime")?;
        w.end("configuration")?;
        w.finish()
    }
}

#[async_trait]
impl OutputSink for ManifestBuilder {
    async fn add(
        &mut self,
        path: &str,
        bytes: &[u8],
        kind: ReferenceKind,
    ) -> Result<(), DownloadError> {
        let mut kind = kind;
        match extension(path).as_str() {
            // Recorded for generation AND copied: these are data files too.
            "props" => self.props.push(path.to_string()),
            "targets" => self.targets.push(path.to_string()),
            "dll" if kind.is_reference() => match identity::read_identity(bytes) {
                Ok(id) => {
                    debug!(path, name = %id, "recorded reference");
                    if kind == ReferenceKind::ReferenceWithRedirect {
                        self.redirects.push(id.clone());
                    }
                    self.references.push(RecordedReference {
                        path: path.to_string(),
                        full_name: id.full_name(),
                    });
                }
                Err(e) => {
                    // Copy the bytes anyway; only the reference entry is lost.
                    warn!(path, error = %e, "cannot read assembly identity, copying without reference");
                    kind = ReferenceKind::None;
                }
            },
            _ => {}
        }
        self.inner.add(path, bytes, kind).await
    }

    async fn finalize(&mut self) -> Result<(), DownloadError> {
        let props = self.build_props()?;
        let targets = self.build_targets()?;
        let redirects = self.build_redirects()?;

        self.inner.add(PROPS_FILE, &props, ReferenceKind::None).await?;
        self.inner
            .add(TARGETS_FILE, &targets, ReferenceKind::None)
            .await?;
        self.inner
            .add(REDIRECTS_FILE, &redirects, ReferenceKind::None)
            .await?;
        self.inner.finalize().await
    }
}

fn extension(path: &str) -> String {
    path.rsplit('.').next().unwrap_or_default().to_lowercase()
}

/// Paths inside generated documents: manifest-directory-relative, with
/// the separator the consuming build tool expects.
fn msbuild_path(path: &str) -> String {
    format!("$(MSBuildThisFileDirectory){}", path.replace('/', "\\"))
}

/// Thin convenience wrapper over the XML writer.
struct XmlDoc {
    writer: Writer<Vec<u8>>,
}

impl XmlDoc {
    fn new() -> Result<Self, DownloadError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_err)?;
        Ok(Self { writer })
    }

    fn start(&mut self, name: &str) -> Result<(), DownloadError> {
        self.writer
            .write_event(Event::Start(BytesStart::new(name)))
            .map_err(xml_err)
    }

    fn start_with_ns(&mut self, name: &str, ns: &str) -> Result<(), DownloadError> {
        let mut el = BytesStart::new(name);
        el.push_attribute(("xmlns", ns));
        self.writer.write_event(Event::Start(el)).map_err(xml_err)
    }

    fn start_with_attrs(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), DownloadError> {
        let mut el = BytesStart::new(name);
        for (k, v) in attrs {
            el.push_attribute((*k, *v));
        }
        self.writer.write_event(Event::Start(el)).map_err(xml_err)
    }

    fn empty_with_attrs(&mut self, name: &str, attrs: &[(&str, &str)]) -> Result<(), DownloadError> {
        let mut el = BytesStart::new(name);
        for (k, v) in attrs {
            el.push_attribute((*k, *v));
        }
        self.writer.write_event(Event::Empty(el)).map_err(xml_err)
    }

    fn text_element(&mut self, name: &str, text: &str) -> Result<(), DownloadError> {
        self.start(name)?;
        self.writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_err)?;
        self.end(name)
    }

    fn end(&mut self, name: &str) -> Result<(), DownloadError> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_err)
    }

    fn finish(self) -> Result<Vec<u8>, DownloadError> {
        let mut bytes = self.writer.into_inner();
        bytes.push(b'\n');
        Ok(bytes)
    }
}

fn xml_err(e: impl std::fmt::Display) -> DownloadError {
    DownloadError::Io(std::io::Error::other(e.to_string()))
}
