use book_search_rs::{category_topics, BookApi, BookQuery, GoogleBooksApi};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Book Metadata Search
///
/// Look up volumes on Google Books by title and/or author.
#[derive(Parser, Debug)]
#[command(name = "book_search")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Book title
    #[arg(short, long, value_name = "TITLE")]
    title: Option<String>,

    /// Book author
    #[arg(short, long, value_name = "AUTHOR")]
    author: Option<String>,

    /// Google Books API key (can also be set via GOOGLE_BOOKS_API_KEY env var)
    #[arg(short = 'k', long, env = "GOOGLE_BOOKS_API_KEY", value_name = "KEY")]
    api_key: Option<String>,

    /// Show the full description of every result
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG controls verbosity; warnings and errors only by default
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let args = Args::parse();

    let query = BookQuery::new()
        .with_title(args.title.unwrap_or_default())
        .with_author(args.author.unwrap_or_default());
    if query.is_empty() {
        anyhow::bail!("Provide at least --title or --author");
    }

    let api = GoogleBooksApi::new(args.api_key)?;
    let volumes = BookApi::search(&api, &query).await?;

    if volumes.is_empty() {
        println!("No results for {}", query.to_query_string());
        return Ok(());
    }

    for (index, volume) in volumes.iter().enumerate() {
        println!(
            "{:>2}. [{}] {} - {}{}",
            index + 1,
            volume.id,
            volume.title.as_deref().unwrap_or("(untitled)"),
            volume.author_line().as_deref().unwrap_or("(unknown author)"),
            volume
                .published_year()
                .map(|year| format!(" ({})", year))
                .unwrap_or_default(),
        );
        let topics = category_topics(&volume.categories);
        if !topics.is_empty() {
            println!("    {}", topics.join(", "));
        }
        if args.verbose {
            if let Some(description) = &volume.description {
                println!("    {}", description);
            }
        }
    }

    Ok(())
}
