use anyhow::{Context, Result};
use audiobook_station::catalog::Catalog;
use audiobook_station::config::{EnrichmentArgs, LibraryConfig};
use audiobook_station::enrichment::{GoogleBooksProvider, JobRegistry, JobRunner, build_refiner};
use audiobook_station::library::LibraryScanner;
use audiobook_station::server::{self, AppState};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "audiobook-station")]
#[command(about = "Audiobook Station Server", long_about = None)]
struct Cli {
    /// Path to the JSON library config
    #[arg(short, long, env = "LIBRARY_CONFIG", default_value = "library.json")]
    config: PathBuf,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Scan the library before serving
    #[arg(long)]
    scan: bool,

    #[command(flatten)]
    enrichment: EnrichmentArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    let config = LibraryConfig::load(&cli.config).await?;

    tracing::info!("Starting Audiobook Station");
    tracing::info!("Config: {}", cli.config.display());
    for root in &config.library_roots {
        tracing::info!("Library root: {}", root.display());
    }

    let catalog = Catalog::new(config.db_path()).await?;
    let scanner = Arc::new(LibraryScanner::from_config(&config));

    if cli.scan {
        let summary = scanner
            .scan_into(&catalog)
            .await
            .context("Failed to scan library")?;
        tracing::info!("Initial scan indexed {} files", summary.indexed);
    }

    let provider = GoogleBooksProvider::new(cli.enrichment.google_books_api_key.clone())?;
    let refiner = build_refiner(config.llm_settings(&cli.enrichment))?;
    let runner = JobRunner::new(
        Arc::new(provider),
        refiner,
        Arc::new(catalog.clone()),
        JobRegistry::new(),
    );

    let app = server::create_router(AppState {
        catalog,
        scanner,
        runner,
    });
    let addr = format!("0.0.0.0:{}", cli.port);

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  POST   /scan                         - Scan library roots");
    tracing::info!("  GET    /books                        - List books (?q=)");
    tracing::info!("  GET    /books/:id                    - Book details with tags");
    tracing::info!("  GET    /search                       - Provider lookup (?title=&author=)");
    tracing::info!("  POST   /enrichment/jobs              - Start an enrichment job");
    tracing::info!("  GET    /enrichment/jobs/:id          - Job status");
    tracing::info!("  GET    /enrichment/jobs/:id/stream   - Job events (SSE)");
    tracing::info!("  DELETE /enrichment/jobs/:id          - Cancel a job");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
