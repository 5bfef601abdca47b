use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use fiopush::{Credential, CredentialInput, PushConfig, Pusher, RefSelection, DEFAULT_SERVER_URL};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// A path to an ostree repo (defaults to current directory)
    #[arg(long, value_name = "PATH")]
    repo: Option<PathBuf>,

    /// An URL to OSTree Hub to upload repo to
    #[arg(long, default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// A Factory to upload repo for
    #[arg(long, default_value = "")]
    factory: String,

    /// A credential archive with auth material
    #[arg(long, value_name = "FILE")]
    creds: Option<PathBuf>,

    /// A Foundries API access token
    #[arg(long, default_value = "", hide_default_value = true)]
    token: String,

    /// Update the hub's summary at the end of the push
    #[arg(long)]
    summary: bool,

    /// Version of the OSTree Hub API to talk to
    #[arg(long, default_value = "v2")]
    api_version: String,

    /// Correlation ID added to each HTTP request (generated when empty)
    #[arg(long)]
    cor_id: Option<String>,

    /// Config file (defaults to fiopush.toml in the user config dir)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Only push these refs (repeatable)
    #[arg(long = "ref", value_name = "REF")]
    refs: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fiopush=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let repo = match args.repo {
        Some(repo) => repo,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = PushConfig::load(args.config.as_deref()).context("Failed to load config")?;
    let credential = Credential::select(&CredentialInput {
        server_url: args.server,
        factory: args.factory,
        token: args.token,
        archive: args.creds,
    })
    .context("Failed to create Fio Pusher")?;

    let refs = if args.refs.is_empty() {
        RefSelection::All
    } else {
        RefSelection::Only(args.refs)
    };
    let mut pusher = Pusher::new(&repo, credential, &args.api_version, config)
        .context("Failed to create Fio Pusher")?
        .with_refs(refs);

    pusher
        .push(args.cor_id.as_deref())
        .context("Failed to run Fio Pusher")?;
    tracing::info!(
        "Pushing {} to {}, factory: {}, correlation ID: {} ...",
        repo.display(),
        pusher.url(),
        pusher.factory(),
        pusher.correlation_id().unwrap_or_default()
    );

    let report = match pusher.wait().await {
        Ok(report) => report,
        Err(failure) => {
            failure.report.log();
            return Err(failure.error).context("Failed to push repo");
        }
    };
    report.log();

    if args.summary {
        tracing::info!("Updating summary...");
        match pusher.update_summary().await {
            Ok(()) => tracing::info!("Summary has been successfully updated"),
            Err(e) => tracing::error!("{e}"),
        }
    }

    Ok(())
}
