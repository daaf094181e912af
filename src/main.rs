mod artifact;
mod config;
mod crawler;
mod db;
mod dedup;
mod error;
mod loader;
mod logging;
mod normalize;
mod pipeline;
mod record;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::config::Settings;
use crate::crawler::CommandCrawler;
use crate::db::InsertMode;
use crate::loader::{Loader, SqliteLoader};
use crate::pipeline::{Pipeline, RunOptions};

#[derive(Parser)]
#[command(
    name = "listing_pipeline",
    about = "Crawl property listings and load them into the destination store"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log file path, or "-" to log to stdout only (default: $LOG_FILE)
    #[arg(long, global = true)]
    log_file: Option<String>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl each target and load its artifact
    Run {
        /// Crawl targets (spider names), processed in order
        #[arg(required = true)]
        targets: Vec<String>,
        /// Seconds before a crawl is killed
        #[arg(long)]
        timeout: Option<u64>,
        /// Crawl only, never write to the store
        #[arg(long)]
        dry_run: bool,
        /// Replace the destination table instead of appending
        #[arg(long)]
        replace: bool,
        /// Extra arguments for the crawl, after `--` (e.g. -- -a max_pages=2)
        #[arg(last = true)]
        extra: Vec<String>,
    },
    /// Load an existing artifact without crawling
    Load {
        /// Artifact path (default: $FEED_URI)
        artifact: Option<PathBuf>,
        /// Replace the destination table instead of appending
        #[arg(long)]
        replace: bool,
    },
    /// Show destination table statistics
    Stats,
}

fn insert_mode(replace: bool) -> InsertMode {
    if replace {
        InsertMode::Replace
    } else {
        InsertMode::Append
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let settings = Settings::load()?;
    let _log_guard = logging::init(
        settings.log_path(cli.log_file.as_deref()).as_deref(),
        cli.verbose,
    )?;

    let t0 = Instant::now();

    let code = match cli.command {
        Commands::Run {
            targets,
            timeout,
            dry_run,
            replace,
            extra,
        } => {
            let crawler = CommandCrawler::from_settings(&settings);
            let loader = SqliteLoader::from_settings(&settings, insert_mode(replace));
            let pipeline = Pipeline::new(crawler, loader, settings.artifact_path());
            let options = RunOptions {
                timeout: timeout.map(Duration::from_secs),
                dry_run,
                extra_args: extra,
            };

            let report = pipeline.run(&targets, &options).await;

            println!("\nRun {}", report.run_id);
            for t in &report.targets {
                let inserted = t
                    .load
                    .as_ref()
                    .map(|l| l.inserted.to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "  {:<20} {:<16} crawl {:>8} | inserted {:>6} | {}",
                    t.target,
                    t.state.to_string(),
                    format_duration(t.crawl_elapsed),
                    inserted,
                    if t.succeeded() { "OK" } else { "FAILED" }
                );
            }

            if report.all_succeeded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Commands::Load { artifact, replace } => {
            let path = artifact.unwrap_or_else(|| settings.artifact_path());
            let records = artifact::read_records(&path)
                .with_context(|| format!("Cannot load {:?}", path))?;
            if records.is_empty() {
                warn!(path = %path.display(), "Artifact is empty, nothing to insert");
                return Ok(ExitCode::SUCCESS);
            }

            let loader = SqliteLoader::from_settings(&settings, insert_mode(replace));
            let report = loader.load(records)?;
            println!(
                "Read {}, rejected {}, batch duplicates {}, repeated links {}, already stored {}, \
                 inserted {} into {}.",
                report.read,
                report.rejected,
                report.batch_duplicates,
                report.link_duplicates,
                report.already_persisted,
                report.inserted,
                settings.db_table
            );
            ExitCode::SUCCESS
        }
        Commands::Stats => {
            let conn = db::connect(&settings.db_url)?;
            db::init_schema(&conn, &settings.db_table)?;
            let s = db::table_stats(&conn, &settings.db_table)?;
            println!("Table:      {}", settings.db_table);
            println!("Rows:       {}", s.rows);
            println!("With link:  {}", s.with_link);
            println!("USD priced: {}", s.foreign_currency);
            ExitCode::SUCCESS
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        info!("Done in {}", format_duration(elapsed));
    }

    Ok(code)
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
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
    fn parses_run_with_extra_crawl_args() {
        let cli = Cli::try_parse_from([
            "listing_pipeline",
            "run",
            "argenprop",
            "zonaprop",
            "--timeout",
            "300",
            "--dry-run",
            "--log-file",
            "-",
            "-v",
            "--",
            "-a",
            "max_pages=2",
        ])
        .unwrap();
        assert_eq!(cli.log_file.as_deref(), Some("-"));
        assert!(cli.verbose);
        match cli.command {
            Commands::Run { targets, timeout, dry_run, replace, extra } => {
                assert_eq!(targets, vec!["argenprop", "zonaprop"]);
                assert_eq!(timeout, Some(300));
                assert!(dry_run);
                assert!(!replace);
                assert_eq!(extra, vec!["-a", "max_pages=2"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn run_requires_a_target() {
        assert!(Cli::try_parse_from(["listing_pipeline", "run"]).is_err());
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }
}
