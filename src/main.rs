mod config;
mod error;
mod extract;
mod fetcher;
mod loader;
mod merge;
mod models;
mod parsers;
mod pipeline;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::fetcher::HttpPayloadSource;
use crate::models::{StructureStatus, TermSelection};
use crate::pipeline::{ImportStats, Pipeline, RunStatus};
use crate::storage::{write_csv, JsonFileSink, Repository, ScheduleSink};

#[derive(Parser)]
#[command(name = "timetable-etl", about = "University class-schedule import", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Import saved payload files (JSON responses or a saved schedule page)
    Import {
        #[arg(short, long)]
        institution: String,

        /// Payload files or directories containing them
        #[arg(long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Fetch the schedule from the institution's endpoint and import it
    Fetch {
        #[arg(short, long)]
        institution: String,

        /// Academic year as the portal expects it, e.g. 2025 or 2025-2026
        #[arg(long)]
        year: String,

        /// Term code as the portal expects it, e.g. 1, 3, 12, 01
        #[arg(long)]
        term: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// List configured and built-in institutions
    Institutions,

    /// Show database statistics
    Stats,

    /// Print the stored courses of an institution
    Courses {
        #[arg(short, long)]
        institution: String,
    },

    /// Apply schema migrations without importing data
    Migrate,
}

#[derive(Args)]
struct OutputArgs {
    /// Write the course list as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Export the course list as CSV
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Store the courses in the database
    #[arg(long)]
    save: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "timetable_etl=info,warn",
        1 => "timetable_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Import { institution, input, output } => {
            let _t = utils::Timer::start(format!("Import {}", institution));
            let repo = open_repo(&config, output.save)?;
            let sinks = Sinks::new(&output, repo.as_ref(), &institution);

            let mut pipeline = Pipeline::new(config.clone());
            if let Some(repo) = repo.as_ref() {
                pipeline = pipeline.with_run_log(repo);
            }
            let stats = pipeline.run_files(&institution, &input, &sinks.refs()).await?;
            finish(&stats, &output)?;
        }

        Command::Fetch { institution, year, term, output } => {
            let _t = utils::Timer::start(format!("Fetch {}", institution));
            let repo = open_repo(&config, output.save)?;
            let sinks = Sinks::new(&output, repo.as_ref(), &institution);
            let source = HttpPayloadSource::new(&config.fetcher).context("Failed to build HTTP source")?;

            let mut pipeline = Pipeline::new(config.clone()).with_source(Box::new(source));
            if let Some(repo) = repo.as_ref() {
                pipeline = pipeline.with_run_log(repo);
            }
            let selection = TermSelection { year, term };
            let stats = pipeline.run_fetch(&institution, &selection, &sinks.refs()).await?;
            finish(&stats, &output)?;
        }

        Command::Institutions => {
            for id in config.institution_ids() {
                if let Some(inst) = config.institution(&id) {
                    let fetchable = if inst.endpoint.is_some() { "fetch" } else { "files" };
                    println!("  {:<12} {:<5} {:<6} {}", id, inst.source.payload_kind().to_string(), fetchable, inst.name);
                }
            }
        }

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            let courses = repo.course_count()?;
            let institutions = repo.institution_count()?;
            let last = repo.last_import()?;
            println!("─────────────────────────────────");
            println!("  Timetable ETL — Database Stats");
            println!("─────────────────────────────────");
            println!("  Institutions : {}", utils::fmt_number(institutions));
            println!("  Courses      : {}", utils::fmt_number(courses));
            match last {
                Some(run) => println!(
                    "  Last import  : #{} {} via {} at {} ({}, {} courses)",
                    run.id, run.institution, run.origin, run.started_at, run.status, run.courses_saved
                ),
                None => println!("  Last import  : —"),
            }
            println!("─────────────────────────────────");
        }

        Command::Courses { institution } => {
            let repo = Repository::open(&config.storage.db_path)?;
            let courses = repo.list_courses(&institution)?;
            if courses.is_empty() {
                println!("No courses for {} — run `timetable-etl import --save` first.", institution);
            } else {
                println!("{} courses:", courses.len());
                for c in &courses {
                    println!(
                        "  {} {:>2}-{:<2} {}  {}  {}  [{}]",
                        utils::day_name(c.day),
                        c.start_section,
                        c.end_section,
                        c.name,
                        c.teacher,
                        c.position,
                        utils::compact_weeks(&c.weeks)
                    );
                }
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

fn open_repo(config: &AppConfig, save: bool) -> Result<Option<Repository>> {
    if !save {
        return Ok(None);
    }
    let repo = Repository::open(&config.storage.db_path).context("Failed to open DuckDB")?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    Ok(Some(repo))
}

/// Sinks requested on the command line.
struct Sinks<'a> {
    json: Option<JsonFileSink>,
    store: Option<storage::InstitutionSink<'a>>,
}

impl<'a> Sinks<'a> {
    fn new(output: &OutputArgs, repo: Option<&'a Repository>, institution: &str) -> Self {
        Self {
            json: output.output.as_ref().map(JsonFileSink::new),
            store: repo.map(|r| r.sink_for(institution)),
        }
    }

    fn refs(&self) -> Vec<&dyn ScheduleSink> {
        let mut sinks: Vec<&dyn ScheduleSink> = Vec::new();
        if let Some(json) = &self.json {
            sinks.push(json);
        }
        if let Some(store) = &self.store {
            sinks.push(store);
        }
        sinks
    }
}

fn finish(stats: &ImportStats, output: &OutputArgs) -> Result<()> {
    if let StructureStatus::Missing(reason) = &stats.report.structure {
        info!("{}: no schedule found ({})", stats.institution, reason);
    }

    if stats.status == RunStatus::Saved {
        if let Some(path) = &output.csv {
            write_csv(path, &stats.courses)?;
        }
    }

    if output.output.is_none() && output.csv.is_none() && !output.save {
        println!("{}", serde_json::to_string_pretty(&stats.courses)?);
    }

    info!(
        "Done: {} courses ({} rows seen, {} dropped, {} merged) [{:?}]",
        stats.courses.len(),
        stats.report.rows_seen,
        stats.report.rows_dropped,
        stats.report.records_merged,
        stats.status
    );
    Ok(())
}
