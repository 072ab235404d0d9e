//! CLI entry point for gwaripper.

use std::io::{self, IsTerminal, Read};

use anyhow::{Context, Result};
use clap::Parser;
use gwaripper::GwaRipper;
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, collect_urls};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let urls = if !args.urls.is_empty() {
        args.urls.clone()
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        collect_urls(&buffer)
    } else {
        Vec::new()
    };

    if urls.is_empty() {
        info!("No input provided. Pipe URLs via stdin or pass them as arguments.");
        info!("Example: echo 'https://soundgasm.net/u/user/title' | gwaripper");
        return Ok(());
    }

    let mut ripper = GwaRipper::open(args.to_config())
        .await
        .context("could not open the library")?;

    let interrupted = tokio::select! {
        () = run(&mut ripper, &urls) => false,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "could not listen for Ctrl-C");
            }
            warn!("interrupted, finishing up");
            true
        }
    };

    ripper.close().await;
    if interrupted {
        info!("stopped before all URLs were processed");
    }
    Ok(())
}

async fn run(ripper: &mut GwaRipper, urls: &[String]) {
    let total = urls.len();
    let mut settled = 0usize;
    for (i, url) in urls.iter().enumerate() {
        info!(url = %url, n = i + 1, total, "processing");
        let id = ripper.extract_and_download(url).await;
        let report = ripper.reports().get(id);
        if report.download_error.is_settled() {
            settled += 1;
        }
        info!(
            url = %url,
            extraction = %report.err_code,
            download = %report.download_error,
            "finished"
        );
    }
    let failed = total - settled;
    if failed > 0 {
        warn!(total, failed, "some URLs were not fully downloaded");
    } else {
        info!(total, "all URLs downloaded");
    }
}
