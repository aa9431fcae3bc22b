//! nupull - materialize a package graph for offline build consumption
//!
//! Resolves a package and its transitive dependencies against one target
//! framework, pulls the archives from a remote feed, and writes the
//! selected assets together with generated build-integration manifests to
//! a local directory or a single zip archive.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;

use nupull_core::DownloadOptions;
use nupull_schema::{FrameworkToken, PackageName, PackageVersion};

/// The public feed used when none is given.
pub const DEFAULT_FEED: &str = "https://api.nuget.org/v3/index.json";

#[derive(Debug, Parser)]
#[command(name = "nupull")]
#[command(author, about = "Download a package graph for offline use")]
pub struct Cli {
    /// Name of the package to download
    #[arg(long)]
    pub name: String,

    /// Version of the package
    #[arg(long)]
    pub version: String,

    /// Target framework moniker (e.g. net472, netstandard2.0)
    #[arg(long)]
    pub framework: String,

    /// Feed service index to use
    #[arg(long, default_value = DEFAULT_FEED)]
    pub feed: String,

    /// Output path; defaults to ./<name>.<version>[.zip]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Write a single zip archive instead of loose files
    #[arg(long)]
    pub zip: bool,

    /// Show verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Validate the arguments into typed download options.
    ///
    /// # Errors
    ///
    /// Returns an error when the version or framework does not parse, or
    /// the framework is not a concrete target.
    pub fn into_options(self) -> Result<DownloadOptions> {
        let name = PackageName::new(&self.name);
        let version: PackageVersion = self
            .version
            .parse()
            .with_context(|| format!("Invalid package version '{}'", self.version))?;
        let framework: FrameworkToken = self
            .framework
            .parse()
            .with_context(|| format!("Invalid target framework '{}'", self.framework))?;
        if framework.is_any() {
            bail!("Must supply a concrete target framework");
        }

        let output = self.output.unwrap_or_else(|| {
            let stem = format!("{name}.{version}");
            if self.zip {
                PathBuf::from(format!("{stem}.zip"))
            } else {
                PathBuf::from(stem)
            }
        });

        Ok(DownloadOptions {
            name,
            version,
            framework,
            feed: self.feed,
            output,
            zip: self.zip,
        })
    }
}
