use analysis_orchestrator::{rescore_from_stored_values, AnalysisOrchestrator, ScreenerConfig};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use data_sources::MoatCache;
use report_store::{ReportDb, ReportStore};
use tracing_subscriber::EnvFilter;

mod render;

#[derive(Parser, Debug)]
#[command(
    name = "screener",
    author,
    version,
    about = "LEAPS candidate screener: tiered data acquisition and rubric scoring"
)]
struct Cli {
    /// Emit JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch, score and (by default) save a report for one ticker
    Analyze {
        ticker: String,
        /// Print the report without persisting it
        #[arg(long)]
        no_save: bool,
    },
    /// List saved analyses, newest first
    History {
        /// Only tickers containing this text
        #[arg(long, short)]
        search: Option<String>,
    },
    /// Re-score and print a saved report
    Show { ticker: String },
    /// Delete a ticker's saved report
    Delete { ticker: String },
    /// Record a known GuruFocus moat score in the local cache
    MoatSet { ticker: String, score: u32 },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    let cli = Cli::parse();
    let config = ScreenerConfig::from_env().context("invalid configuration")?;

    match cli.command {
        Commands::Analyze { ticker, no_save } => analyze(&config, &ticker, no_save, cli.json).await,
        Commands::History { search } => history(&config, search.as_deref(), cli.json).await,
        Commands::Show { ticker } => show(&config, &ticker, cli.json).await,
        Commands::Delete { ticker } => delete(&config, &ticker).await,
        Commands::MoatSet { ticker, score } => moat_set(&config, &ticker, score).await,
    }
}

fn init_tracing() {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    // logs go to stderr so table/JSON output stays clean on stdout
    if json_logging {
        let _ = tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_writer(std::io::stderr)
            .try_init();
    }
}

async fn open_store(config: &ScreenerConfig) -> Result<ReportStore> {
    let db = ReportDb::new(&config.database_url).await?;
    Ok(ReportStore::new(db))
}

async fn analyze(config: &ScreenerConfig, ticker: &str, no_save: bool, json: bool) -> Result<()> {
    let orchestrator = AnalysisOrchestrator::from_config(config).await;
    let report = orchestrator
        .analyze(ticker)
        .await
        .with_context(|| format!("analysis of {} failed", ticker))?;

    if !no_save {
        open_store(config).await?.save_report(&report).await?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render::report_table(&report));
    }
    Ok(())
}

async fn history(config: &ScreenerConfig, search: Option<&str>, json: bool) -> Result<()> {
    let entries = open_store(config).await?.list_history(search).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No saved analyses");
    } else {
        print!("{}", render::history_table(&entries));
    }
    Ok(())
}

async fn show(config: &ScreenerConfig, ticker: &str, json: bool) -> Result<()> {
    let stored = open_store(config)
        .await?
        .load_report(ticker)
        .await?
        .with_context(|| format!("no saved report for {}", ticker.trim().to_uppercase()))?;
    let report = rescore_from_stored_values(&stored).context("saved report is malformed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render::report_table(&report));
    }
    Ok(())
}

async fn delete(config: &ScreenerConfig, ticker: &str) -> Result<()> {
    let ticker = ticker.trim().to_uppercase();
    if open_store(config).await?.delete_ticker(&ticker).await? {
        println!("Deleted {}", ticker);
    } else {
        println!("Nothing saved for {}", ticker);
    }
    Ok(())
}

async fn moat_set(config: &ScreenerConfig, ticker: &str, score: u32) -> Result<()> {
    if score > 10 {
        anyhow::bail!("GuruFocus moat scores run from 0 to 10, got {}", score);
    }
    let cache = MoatCache::connect(&config.database_url).await?;
    cache.store(ticker, &score.to_string()).await?;
    println!("Cached moat score {} for {}", score, ticker.trim().to_uppercase());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_analyze_flags() {
        let cli = Cli::try_parse_from(["screener", "analyze", "acme", "--no-save", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Analyze { ticker, no_save } => {
                assert_eq!(ticker, "acme");
                assert!(no_save);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_history_search() {
        let cli = Cli::try_parse_from(["screener", "history", "-s", "AC"]).unwrap();
        assert!(matches!(cli.command, Commands::History { search: Some(ref s) } if s == "AC"));
    }
}
