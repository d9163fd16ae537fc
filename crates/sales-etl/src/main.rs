use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sales_core::acquisition::{DatasetFetcher, SystemCommandRunner};
use sales_core::aggregates::{build_report, SalesReport};
use sales_core::table_store::TableStore;
use sales_core::{EtlConfig, Pipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sales orders ETL pipeline", long_about = None)]
struct Cli {
    /// Path to a TOML config file (defaults to $SALES_ETL_CONFIG, then built-in defaults)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Normalize the sales CSV, derive features, aggregate and overwrite the sales table
    Run(RunArgs),
    /// Print the sales report without touching the table
    Report(ReportArgs),
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Download and unpack the dataset before running
    #[arg(long)]
    fetch: bool,
    /// Skip writing the sales table
    #[arg(long)]
    no_persist: bool,
    /// Print the aggregated report after the run
    #[arg(long)]
    show_report: bool,
}

#[derive(Args, Debug, Default)]
struct ReportArgs {
    /// Build the report from the persisted table instead of the source CSV
    #[arg(long)]
    from_table: bool,
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
        Command::Run(args) => handle_run(config, args).await,
        Command::Report(args) => handle_report(config, args),
    }
}

async fn handle_run(config: EtlConfig, args: RunArgs) -> Result<()> {
    if args.fetch {
        let fetcher = DatasetFetcher::new(
            SystemCommandRunner,
            config.dataset.clone(),
            &config.acquisition,
        );
        let stored = fetcher
            .acquire()
            .await
            .context("failed to acquire dataset")?;
        info!(path = %stored.display(), "dataset ready");
    }

    let outcome = Pipeline::new(config)
        .with_persist(!args.no_persist)
        .run()
        .context("sales pipeline failed")?;

    if args.show_report {
        print_report(&outcome.report);
    }
    println!("{}", serde_json::to_string_pretty(&outcome.summary)?);
    Ok(())
}

fn handle_report(config: EtlConfig, args: ReportArgs) -> Result<()> {
    let report = if args.from_table {
        let store = TableStore::new(&config.warehouse.root);
        let table = store
            .read(&config.warehouse.table)
            .with_context(|| format!("failed to read table '{}'", config.warehouse.table))?;
        build_report(&table).context("failed to aggregate persisted table")?
    } else {
        Pipeline::new(config)
            .with_persist(false)
            .run()
            .context("sales pipeline failed")?
            .report
    };
    print_report(&report);
    Ok(())
}

fn print_report(report: &SalesReport) {
    for (title, frame) in report.sections() {
        println!("{title}");
        println!("{frame}");
        println!();
    }
}
