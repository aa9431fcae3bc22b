//! nupull binary entry point.

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use nupull_cli::Cli;
use nupull_core::emit::ManifestBuilder;
use nupull_core::feed::HttpFeed;
use nupull_core::sink::{FileSystemSink, ZipSink};
use nupull_core::{DownloadError, OfflineDownloader, OutputSink};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging; --verbose lowers the default filter.
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if let Err(err) = run(cli).await {
        // Expected conditions print their message; anything else is an
        // internal fault and prints the full chain.
        match err.downcast_ref::<DownloadError>() {
            Some(expected) => eprintln!("{expected}"),
            None => eprintln!("Unexpected failure: {err:?}"),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let options = cli.into_options()?;

    let feed = HttpFeed::new(&options.feed)?;
    let base: Box<dyn OutputSink> = if options.zip {
        Box::new(ZipSink::new(&options.output))
    } else {
        Box::new(FileSystemSink::new(&options.output))
    };
    let mut sink = ManifestBuilder::new(base);

    // Ctrl-C cancels the walk between queue iterations.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_cancel.cancel();
        }
    });

    OfflineDownloader::new(&feed)
        .run(&options, &mut sink, &cancel)
        .await?;

    println!("Wrote {}", options.output.display());
    Ok(())
}
