//! Command line entry point

use crate::client::NotionClient;
use crate::config::{FailurePolicy, MigrationConfig};
use crate::migration::{MigrationReport, MigrationRequest, Migrator};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Copy filtered Notion records into a new database.
#[derive(Parser, Debug)]
#[command(name = "notion-migrate", version, about, long_about = None)]
pub struct Cli {
    /// Source data source id
    pub source_store_id: String,

    /// Page the new database is created under
    pub parent_page_id: String,

    /// Title of the new database
    pub title: String,

    /// Simulate without writing; only the literal "false" runs for real
    #[arg(default_value = "true")]
    pub simulate: String,

    /// Scope name followed by secondary filter values
    pub filters: Vec<String>,

    /// Path to a TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Records processed per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Pause after each record, in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Record failed records in the report instead of aborting
    #[arg(long)]
    pub continue_on_error: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn dry_run(&self) -> bool {
        self.simulate != "false"
    }

    /// Apply flag overrides on top of file and environment settings.
    pub fn apply(&self, config: &mut MigrationConfig) {
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(delay_ms) = self.delay_ms {
            config.record_delay_ms = delay_ms;
        }
        if self.continue_on_error {
            config.failure_policy = FailurePolicy::Continue;
        }
    }

    pub fn request(&self) -> MigrationRequest {
        MigrationRequest {
            source_store_id: self.source_store_id.clone(),
            parent_page_id: self.parent_page_id.clone(),
            title: self.title.clone(),
            dry_run: self.dry_run(),
            filter_values: self.filters.clone(),
        }
    }
}

/// Initialize the tracing subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose {
        "notion_migrate=debug"
    } else {
        "notion_migrate=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn print_report(report: &MigrationReport) {
    let mode = if report.dry_run { " (dry run)" } else { "" };
    println!("Migration {}{}", report.run_id, mode);
    println!("  destination:        {}", report.target_store_id);
    println!("  records found:      {}", report.records_found);
    println!("  records migrated:   {}", report.records_migrated);
    println!("  relations resolved: {}", report.relations_resolved);
    println!(
        "  duration:           {}s",
        (report.finished_at - report.started_at).num_seconds()
    );
    if !report.failures.is_empty() {
        println!("  failures:");
        for failure in &report.failures {
            println!("    {} [{}] {}", failure.source_id, failure.stage, failure.message);
        }
    }
}

pub async fn run() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = MigrationConfig::load(cli.config.as_deref())?;
    config.apply_env();
    cli.apply(&mut config);
    config.validate()?;

    let api_key = config
        .api
        .api_key
        .clone()
        .context("NOTION_API_KEY is not set")?;
    let client = NotionClient::new(api_key)
        .with_base_url(config.api.base_url.clone())
        .with_version(config.api.version.clone());

    let migrator = Migrator::new(Arc::new(client), config);
    let report = match migrator.run(&cli.request()).await {
        Ok(report) => report,
        Err(err) => {
            if let Some(hint) = err.hint() {
                eprintln!("hint: {hint}");
            }
            return Err(err).context("migration failed");
        }
    };

    print_report(&report);
    Ok(())
}
