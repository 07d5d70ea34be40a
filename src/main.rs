use clap::{Parser, Subcommand};
use funding_scraper::apis::create_source;
use funding_scraper::config::{parse_schedule_time, Config};
use funding_scraper::constants;
use funding_scraper::http_client::HttpClient;
use funding_scraper::logging;
use funding_scraper::pipeline::Pipeline;
use funding_scraper::storage::{FileStorage, Storage};
use funding_scraper::types::FundingSource;
use funding_scraper::workflow::{schedule, RunOutcome, Trigger, Workflow};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "funding_scraper")]
#[command(about = "Funding opportunity scraper with scheduled git persistence")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file (default: $FUNDING_CONFIG or config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape sources and write their CSV/JSON artifacts
    Scrape {
        /// Sources to run (comma-separated). Available: idrc, nih, grants_gov
        #[arg(long)]
        sources: Option<String>,
        /// Directory for the artifacts (overrides output.dir)
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Run the collect-and-commit workflow once (manual trigger)
    Run,
    /// Run the workflow every day at a fixed UTC time
    Schedule {
        /// Fire time as HH:MM UTC (overrides workflow.schedule_at)
        #[arg(long)]
        at: Option<String>,
    },
}

async fn run_scrape(config: &Config, source_list: Option<String>, output_dir: PathBuf) -> anyhow::Result<()> {
    let names: Vec<String> = match source_list {
        Some(list) => list.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        None => constants::get_supported_sources().into_iter().map(String::from).collect(),
    };

    let client = HttpClient::new(&config.http)?;
    let mut sources: Vec<Box<dyn FundingSource>> = Vec::new();
    for name in &names {
        match create_source(name, config, &client) {
            Some(source) => sources.push(source),
            None => {
                warn!("Unknown source specified: {}", name);
                println!("⚠️  Unknown source: {}", name);
            }
        }
    }
    if sources.is_empty() {
        anyhow::bail!(
            "no known sources selected (available: {})",
            constants::get_supported_sources().join(", ")
        );
    }

    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(output_dir));
    let summary = Pipeline::run_all(sources, storage).await?;

    for result in &summary.sources {
        println!("\n📊 Results for {}:", result.source_name);
        println!("   Records: {}", result.total_records);
        if let Some(csv) = &result.csv_file {
            println!("   Output file: {}", csv);
        }
        if !result.errors.is_empty() {
            println!("   ⚠️  Errors:");
            for error in &result.errors {
                println!("   - {}", error);
            }
        }
    }
    if let Some(n) = summary.combined_records {
        println!("\n✅ Saved {} unique funding opportunities.", n);
    }
    Ok(())
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Committed { commit, pushed } => {
            println!("✅ Committed {}{}", commit, if *pushed { " and pushed" } else { "" });
        }
        RunOutcome::NothingToCommit => println!("ℹ️  No changes to commit"),
        RunOutcome::ArtifactMissing { expected } => {
            println!("⚠️  {} not found, nothing persisted", expected)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    logging::init_logging(&config.output.log_dir);
    funding_scraper::metrics::init_metrics(&config.metrics);

    match cli.command {
        Commands::Scrape { sources, output_dir } => {
            println!("🔄 Running scraper...");
            let dir = output_dir.unwrap_or_else(|| config.output.dir.clone());
            run_scrape(&config, sources, dir).await?;
        }
        Commands::Run => {
            println!("🚀 Running workflow (manual trigger)...");
            let workflow = Workflow::from_config(&config);
            let result = tokio::select! {
                result = workflow.run(Trigger::Manual) => result,
                _ = tokio::signal::ctrl_c() => {
                    anyhow::bail!("Interrupted, workflow run aborted");
                }
            };
            match result {
                Ok(report) => {
                    print_outcome(&report.outcome);
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                Err(e) => {
                    error!("Workflow run failed: {}", e);
                    return Err(e.into());
                }
            }
        }
        Commands::Schedule { at } => {
            let at = match at {
                Some(s) => parse_schedule_time(&s)?,
                None => config.workflow.schedule_time()?,
            };
            println!("⏰ Scheduling daily workflow at {} UTC", at.format("%H:%M"));
            let workflow = Workflow::from_config(&config);
            schedule::run_daily(&workflow, at, None).await;
        }
    }
    Ok(())
}
