use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod error;
mod event;
mod job;
mod models;
mod preprocess;
mod report;
mod rules;
mod secrets;
mod source;
mod writer;

use config::JobConfig;
use event::TrialEvent;
use job::RunReport;

#[derive(Parser)]
#[command(name = "trial-qualification")]
#[command(about = "Weekly four-week trial qualification labels for drivers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the destination table
    InitDb,
    /// Label one country's drivers for a week and upsert the results
    Run {
        #[arg(long)]
        country: String,
        /// Week to evaluate (YYYY-MM-DD); defaults to last week's Monday
        #[arg(long)]
        week: Option<String>,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Handle a trigger event, read from a JSON file or stdin
    Handle {
        #[arg(long)]
        event: Option<PathBuf>,
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Label rows from a CSV extract and upsert them into a CSV table
    Evaluate {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        country: String,
        #[arg(long)]
        week: Option<String>,
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = JobConfig::from_env().context("invalid job configuration")?;
    let secrets = config.secret_store().await;

    match cli.command {
        Commands::InitDb => {
            db::init_db(secrets.as_ref(), &config)
                .await
                .context("failed to initialise destination schema")?;
            println!("Schema ready.");
        }
        Commands::Run {
            country,
            week,
            report,
        } => {
            let event = TrialEvent::new(country, week);
            let run = run_against_warehouse(&config, secrets.as_ref(), &event).await?;
            finish(&run, report.as_deref())?;
        }
        Commands::Handle { event, report } => {
            let payload = match &event {
                Some(path) => std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read event {}", path.display()))?,
                None => {
                    let mut payload = String::new();
                    std::io::stdin()
                        .read_to_string(&mut payload)
                        .context("failed to read event from stdin")?;
                    payload
                }
            };
            let event = TrialEvent::from_json(&payload)?;
            let run = run_against_warehouse(&config, secrets.as_ref(), &event).await?;
            finish(&run, report.as_deref())?;
        }
        Commands::Evaluate {
            csv,
            out,
            country,
            week,
            report,
        } => {
            let event = TrialEvent::new(country, week);
            let source = source::CsvSource::new(&csv);
            let destination = writer::CsvDestination::new(&out);
            let run = job::run_trial(
                &source,
                &destination,
                &event,
                config.try_out_basis,
                Utc::now(),
            )
            .await
            .with_context(|| format!("offline run over {} failed", csv.display()))?;
            finish(&run, report.as_deref())?;
            println!("Labels written to {}.", destination.path().display());
        }
    }

    Ok(())
}

async fn run_against_warehouse(
    config: &JobConfig,
    secrets: &dyn secrets::SecretStore,
    event: &TrialEvent,
) -> anyhow::Result<RunReport> {
    let source = db::WarehouseSource::new(secrets, config);
    let destination = db::WarehouseDestination::new(secrets, config);
    job::run_trial(&source, &destination, event, config.try_out_basis, Utc::now())
        .await
        .with_context(|| format!("trial run for `{}` failed", event.country))
}

fn finish(run: &RunReport, report_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    println!(
        "Labelled {} drivers for {} (week of {}): {} replaced, {} inserted.",
        run.batch.len(),
        run.country,
        run.week,
        run.outcome.replaced,
        run.outcome.inserted
    );
    for count in run.label_counts().iter().filter(|count| count.count > 0) {
        println!("- {}: {}", count.label, count.count);
    }

    if let Some(path) = report_path {
        std::fs::write(path, report::build_report(run))
            .with_context(|| format!("failed to write report {}", path.display()))?;
        println!("Report written to {}.", path.display());
    }
    Ok(())
}
