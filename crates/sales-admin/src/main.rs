use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sales_core::acquisition::{DatasetFetcher, SystemCommandRunner};
use sales_core::credentials::{self, KaggleCredentials};
use sales_core::EtlConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sales ETL administrative tooling", long_about = None)]
struct Cli {
    /// Path to a TOML config file (defaults to $SALES_ETL_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the Kaggle API credential file
    SetupCredentials(SetupCredentialsArgs),
    /// Download, unzip and move the dataset into storage
    Fetch,
    /// List Kaggle datasets to verify the credentials
    ListDatasets,
}

#[derive(Args, Debug, Default)]
struct SetupCredentialsArgs {
    /// Raw credential JSON, e.g. '{"username":"...","key":"..."}'
    #[arg(long, conflicts_with = "from_env")]
    json: Option<String>,
    /// Read KAGGLE_USERNAME and KAGGLE_KEY instead
    #[arg(long)]
    from_env: bool,
    /// Destination file (defaults to the configured credentials path)
    #[arg(long)]
    path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = EtlConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Command::SetupCredentials(args) => handle_setup_credentials(&config, args),
        Command::Fetch => handle_fetch(&config).await,
        Command::ListDatasets => handle_list_datasets(&config).await,
    }
}

fn handle_setup_credentials(config: &EtlConfig, args: SetupCredentialsArgs) -> Result<()> {
    let dest = args.path.unwrap_or_else(|| config.credentials.path.clone());

    let result = match (args.json, args.from_env) {
        (Some(raw), false) => credentials::provision(&raw, &dest),
        (None, true) => KaggleCredentials::from_env()
            .and_then(|creds| credentials::write_credentials(&creds, &dest)),
        _ => bail!("pass either --json or --from-env"),
    };

    match result {
        Ok(path) => {
            println!("Setup successful: {}", path.display());
            Ok(())
        }
        Err(err) => {
            error!(error = %err, path = %dest.display(), "Setup failed");
            Err(err).context("Setup failed")
        }
    }
}

async fn handle_fetch(config: &EtlConfig) -> Result<()> {
    ensure_credentials(config)?;
    let fetcher = DatasetFetcher::new(
        SystemCommandRunner,
        config.dataset.clone(),
        &config.acquisition,
    );
    let stored = fetcher
        .acquire()
        .await
        .with_context(|| format!("failed to acquire dataset '{}'", config.dataset.id))?;
    println!("Dataset stored at {}", stored.display());
    Ok(())
}

async fn handle_list_datasets(config: &EtlConfig) -> Result<()> {
    ensure_credentials(config)?;
    let fetcher = DatasetFetcher::new(
        SystemCommandRunner,
        config.dataset.clone(),
        &config.acquisition,
    );
    let listing = fetcher
        .list_datasets()
        .await
        .context("failed to list datasets")?;
    print!("{listing}");
    Ok(())
}

fn ensure_credentials(config: &EtlConfig) -> Result<()> {
    let path = &config.credentials.path;
    let creds = credentials::load(path).with_context(|| {
        format!(
            "no usable credentials at {}; run `sales-admin setup-credentials` first",
            path.display()
        )
    })?;
    info!(username = %creds.username, "using Kaggle credentials");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn json_and_env_sources_conflict() {
        let result = Cli::try_parse_from([
            "sales-admin",
            "setup-credentials",
            "--json",
            "{}",
            "--from-env",
        ]);
        assert!(result.is_err());
    }
}
