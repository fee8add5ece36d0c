use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use secret_mirror::{ReplicationConfig, config::NAMESPACE_FILE};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Mirrors secrets from another namespace into the one this controller runs in.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the key=value config file
    #[arg(short = 'f', long = "config")]
    config: PathBuf,

    /// File holding the namespace secrets are replicated into
    #[arg(long, default_value = NAMESPACE_FILE)]
    namespace_file: PathBuf,
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = ReplicationConfig::load(&args.config, &args.namespace_file)
        .with_context(|| format!("loading config from '{}'", args.config.display()))?;

    info!(
        "Loaded config: target namespace '{}', local namespace '{}', deletion policy {:?}",
        config.target_namespace, config.local_namespace, config.deletion_policy
    );

    secret_mirror::run(config).await?;

    Ok(())
}

#[tokio::main]
async fn main() {
    // Missing or empty -f exits with status 2 and the usage text
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "secret_mirror=info".into()),
        )
        .init();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
