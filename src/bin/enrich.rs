use anyhow::{Context, Result};
use audiobook_station::catalog::Catalog;
use audiobook_station::config::{EnrichmentArgs, LibraryConfig};
use audiobook_station::enrichment::{GoogleBooksProvider, JobEvent, JobRegistry, JobRunner, JobStatus, build_refiner};
use audiobook_station::library::LibraryScanner;
use clap::Parser;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "enrich-library")]
#[command(about = "Enrich catalog books with Google Books metadata", long_about = None)]
struct Cli {
    /// Path to the JSON library config (same as server)
    #[arg(short, long, env = "LIBRARY_CONFIG", default_value = "library.json")]
    config: PathBuf,

    /// Only enrich these book ids (repeatable); all books by default
    #[arg(short, long = "book-id", value_name = "ID")]
    book_ids: Vec<i64>,

    /// Scan the library before enriching
    #[arg(long)]
    scan: bool,

    /// Print each event payload as JSON
    #[arg(short, long)]
    verbose: bool,

    #[command(flatten)]
    enrichment: EnrichmentArgs,
}

fn print_event(event: &JobEvent, total: usize, verbose: bool) {
    match event {
        JobEvent::Status(p) => println!("[status] {}", p.status),
        JobEvent::BookStep(p) => println!("  book {}: {}", p.book_id, p.action),
        JobEvent::BookCompleted(p) => println!(
            "[{}/{}] {} - {}: {} tags",
            p.progress.processed,
            total,
            p.author,
            p.title,
            p.tags.len()
        ),
        JobEvent::BookFailed(p) => println!(
            "[{}/{}] {} - {}: {}",
            p.progress.processed, total, p.author, p.title, p.detail
        ),
        JobEvent::Done(p) => println!(
            "[done] {}: {} processed, {} succeeded, {} failed",
            p.status, p.job.processed_count, p.job.succeeded_books, p.job.failed_books
        ),
    }
    if verbose {
        println!("{}", event.payload());
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();
    let config = LibraryConfig::load(&cli.config).await?;
    let catalog = Catalog::new(config.db_path()).await?;

    if cli.scan {
        let summary = LibraryScanner::from_config(&config)
            .scan_into(&catalog)
            .await
            .context("Failed to scan library")?;
        println!("Indexed {} files", summary.indexed);
    }

    let ids = (!cli.book_ids.is_empty()).then_some(cli.book_ids.as_slice());
    let targets = catalog.book_targets(ids).await?;
    if targets.is_empty() {
        println!("No books to enrich");
        return Ok(());
    }
    let total = targets.len();
    println!("Enriching {} books", total);

    let provider = GoogleBooksProvider::new(cli.enrichment.google_books_api_key.clone())?;
    let refiner = build_refiner(config.llm_settings(&cli.enrichment))?;
    let runner = JobRunner::new(
        Arc::new(provider),
        refiner,
        Arc::new(catalog.clone()),
        JobRegistry::new(),
    );

    let (job_id, mut events) = runner.start_streaming(targets);
    let mut final_status = None;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                print_event(&event, total, cli.verbose);
                if let Some(status) = event.final_status() {
                    final_status = Some(status);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if runner.registry().cancel(&job_id) {
                    println!("Cancelling after the current book...");
                }
            }
        }
    }

    match final_status {
        Some(JobStatus::Failed) => anyhow::bail!("Enrichment job {} failed", job_id),
        _ => Ok(()),
    }
}
