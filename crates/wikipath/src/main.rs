use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use wikipath_core::{Event, SearchErrorResponse, SearchRequest};
use wikipath_local::progress;
use wikipath_local::wiki::WikiClient;

use wikipath::runtime;

#[derive(Parser, Debug)]
#[command(name = "wikipath")]
#[command(about = "Find hyperlink paths between Wikipedia articles", long_about = None)]
struct Cli {
    /// Directory holding the segment and history database.
    #[arg(long, env = "WIKIPATH_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Find a path between two terms, streaming progress as SSE frames.
    Search(SearchCmd),
    /// Resolve a free-text term to a canonical article title (json).
    Resolve(ResolveCmd),
    /// List recorded searches, or show one by id (json).
    History(HistoryCmd),
    /// Search statistics plus segment-cache counters (json).
    Stats,
    /// Trim aged and excess segments from the store (json summary).
    Prune(PruneCmd),
    /// Print version info (json).
    Version,
}

#[derive(clap::Args, Debug)]
struct SearchCmd {
    /// Start term (free text; resolved to an article title).
    start: String,
    /// End term (free text; resolved to an article title).
    end: String,
    /// Number of diverse paths to collect (1-5).
    #[arg(long, default_value_t = 1)]
    max_paths: usize,
    /// Minimum Jaccard distance between returned paths (0-1).
    #[arg(long, default_value_t = 0.3)]
    min_diversity: f64,
    /// Print only the final JSON response instead of the event stream.
    #[arg(long)]
    no_stream: bool,
}

#[derive(clap::Args, Debug)]
struct ResolveCmd {
    term: String,
}

#[derive(clap::Args, Debug)]
struct HistoryCmd {
    /// Show one search in full.
    #[arg(long)]
    id: Option<i64>,
    /// Filter by term substring.
    #[arg(long)]
    query: Option<String>,
    #[arg(long, default_value_t = 100)]
    limit: usize,
    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(clap::Args, Debug)]
struct PruneCmd {
    /// Remove segments unused for this many days.
    #[arg(long, default_value_t = 30)]
    max_age_days: u64,
    /// Keep at most this many segments, most recently used first.
    #[arg(long, default_value_t = 10_000)]
    cap: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Search(cmd) => search(&cli.data_dir, cmd).await,
        Commands::Resolve(cmd) => resolve(cmd).await,
        Commands::History(cmd) => history(&cli.data_dir, cmd),
        Commands::Stats => stats(&cli.data_dir),
        Commands::Prune(cmd) => prune(&cli.data_dir, cmd),
        Commands::Version => {
            println!(
                "{}",
                serde_json::json!({
                    "name": "wikipath",
                    "version": env!("CARGO_PKG_VERSION"),
                })
            );
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("wikipath=info,wikipath_local=info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn search(data_dir: &PathBuf, cmd: SearchCmd) -> Result<()> {
    let components = runtime::open(data_dir)?;
    let request = SearchRequest {
        start: cmd.start,
        end: cmd.end,
        max_paths: cmd.max_paths,
        min_diversity: cmd.min_diversity,
    };

    let (events, mut receiver) = progress::channel();
    let cancel = CancellationToken::new();
    let orchestrator = components.orchestrator.clone();
    let run_cancel = cancel.clone();
    let run = tokio::spawn(async move { orchestrator.run(request, events, run_cancel).await });

    if cmd.no_stream {
        // Drain silently; the final response is the whole output.
        while receiver.next_event().await.is_some() {}
        match run.await? {
            Ok(response) => println!("{}", serde_json::to_string_pretty(&response)?),
            Err(e) => {
                let pages_checked = match &e {
                    wikipath_core::Error::NoPath { pages_checked, .. } => *pages_checked,
                    _ => 0,
                };
                let body = SearchErrorResponse {
                    success: false,
                    search_id: None,
                    error: e.to_string(),
                    pages_checked,
                };
                println!("{}", serde_json::to_string_pretty(&body)?);
            }
        }
        return Ok(());
    }

    let mut stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                // Client went away: stop the engine, discard the backlog.
                tracing::info!("interrupted, cancelling search");
                cancel.cancel();
                receiver.drain();
                break;
            }
            event = receiver.next_event() => {
                let Some(event) = event else { break };
                stdout.write_all(runtime::sse_frame(&event).as_bytes())?;
                stdout.flush()?;
                if matches!(event, Event::Done { .. }) {
                    break;
                }
            }
        }
    }
    let _ = run.await?;
    Ok(())
}

async fn resolve(cmd: ResolveCmd) -> Result<()> {
    use wikipath_core::LinkSource;

    let client = WikiClient::new(&runtime::client_config())?;
    let resolved = client.resolve(&cmd.term).await?;
    println!(
        "{}",
        serde_json::json!({
            "query": cmd.term,
            "resolved": resolved,
        })
    );
    Ok(())
}

fn history(data_dir: &PathBuf, cmd: HistoryCmd) -> Result<()> {
    let components = runtime::open(data_dir)?;
    if let Some(id) = cmd.id {
        let detail = components.store.get_search(id)?;
        match detail {
            Some(detail) => println!("{}", serde_json::to_string_pretty(&detail)?),
            None => println!("{}", serde_json::json!({"error": "search not found", "id": id})),
        }
        return Ok(());
    }
    let searches = components
        .store
        .list_searches(cmd.query.as_deref(), cmd.limit, cmd.offset)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({ "searches": searches }))?
    );
    Ok(())
}

fn stats(data_dir: &PathBuf) -> Result<()> {
    let components = runtime::open(data_dir)?;
    let search_stats = components.store.stats()?;
    let cache_stats = components.cache.stats();
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "searches": search_stats,
            "cache": cache_stats,
            "segments": components.store.segment_count()?,
        }))?
    );
    Ok(())
}

fn prune(data_dir: &PathBuf, cmd: PruneCmd) -> Result<()> {
    let components = runtime::open(data_dir)?;
    let max_age = std::time::Duration::from_secs(cmd.max_age_days * 24 * 60 * 60);
    let removed = components.store.prune(max_age, cmd.cap)?;
    println!(
        "{}",
        serde_json::json!({
            "removed": removed,
            "remaining": components.store.segment_count()?,
        })
    );
    Ok(())
}
