use anyhow::Context;
use clap::{Parser, Subcommand};
use forum_client::{RedditCredentials, RedditFetcher};
use pipeline::{Pipeline, PipelineContext, RetentionManager};
use pulse_core::{CoreError, ErrorReporter, PipelineConfig, Report};
use std::path::PathBuf;
use std::sync::Arc;
use storage::ReportArchive;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "forum_pulse=info,pipeline=info,forum_client=info,storage=info";

#[derive(Parser)]
#[command(name = "forum-pulse", version, about = "Collects forum posts and reports what people talk and ask about")]
struct Cli {
    /// TOML configuration file; built-in defaults are used when omitted
    #[arg(short, long, global = true, env = "FORUM_PULSE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect, analyze and archive one report
    Run {
        /// Print the full report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Delete cached data and reports older than the retention horizon
    Prune,
    /// Show the most recent archived report
    Latest {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    let result = match cli.command {
        Command::Run { json } => run(config, json).await,
        Command::Prune => prune(&config).await,
        Command::Latest { json } => latest(&config, json).await,
    };

    if let Err(error) = &result {
        ErrorReporter::new().report_error(error);
    }
    result.map_err(anyhow::Error::from)
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => {
            let mut config = PipelineConfig::default();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn run(config: PipelineConfig, json: bool) -> Result<(), CoreError> {
    tracing::info!(
        "Starting forum-pulse run over {} resources",
        config.resources.len()
    );

    let credentials = RedditCredentials::from_config(&config.reddit)?;
    let fetcher = RedditFetcher::new(credentials, config.collection.fetch_timeout())?;

    let pipeline = Pipeline::open(config, Arc::new(fetcher)).await?;
    let result = pipeline.run().await;
    pipeline.close().await;

    print_report(&result?, json)
}

async fn prune(config: &PipelineConfig) -> Result<(), CoreError> {
    let context = PipelineContext::from_config(config).await?;
    let archive = Arc::new(ReportArchive::new(config.storage.reports_dir.clone()));
    let retention = RetentionManager::from_config(&config.retention)
        .with_target(context.cache().clone())
        .with_target(archive);

    let result = retention.enforce().await;
    context.cache().close().await;
    let report = result?;

    for (label, removed) in &report.removed {
        println!("{:<14} {} removed", label, removed);
    }
    Ok(())
}

async fn latest(config: &PipelineConfig, json: bool) -> Result<(), CoreError> {
    let archive = ReportArchive::new(config.storage.reports_dir.clone());
    match archive.latest().await? {
        Some(report) => print_report(&report, json),
        None => {
            println!("No reports in {}", archive.dir().display());
            Ok(())
        }
    }
}

fn print_report(report: &Report, json: bool) -> Result<(), CoreError> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let summary = report.summary();
    println!(
        "Report {} ({}), last {} days",
        report.id(),
        report.generated_at().format("%Y-%m-%d %H:%M:%S UTC"),
        report.period_days()
    );
    println!(
        "{} posts and {} comments from {} resources",
        summary.total_posts, summary.total_comments, summary.resources_analyzed
    );

    println!("\nTrending terms:");
    for trend in report.trend_records().iter().take(10) {
        println!(
            "  {:<24} {:>5}  {:?}",
            trend.term, trend.frequency, trend.direction
        );
    }

    println!("\nRecurring questions:");
    for question in report.question_records().iter().take(10) {
        println!("  {:>3}x  {}", question.frequency, question.term);
    }

    println!("\nMost engaged:");
    for ranked in report.engagement_rankings().iter().take(10) {
        let title = ranked
            .item
            .text_title
            .as_deref()
            .unwrap_or(ranked.item.text_body.as_str());
        println!(
            "  {:>6}  r/{:<20} {}",
            ranked.score,
            ranked.resource,
            title.chars().take(60).collect::<String>()
        );
    }

    let failed: Vec<_> = report.diagnostics().failed_resources().collect();
    if !failed.is_empty() {
        println!("\nSkipped resources:");
        for outcome in failed {
            println!("  r/{:<20} {:?}", outcome.resource, outcome.status);
        }
    }
    Ok(())
}
