//! Developer CLI: run one query through a search session and print what the
//! search screen would show.
//!
//! ```bash
//! wiki-search "abyssal whip"
//! wiki-search "dragon" --pages 3
//! wiki-search "dragon dagger" --offline --db ./data/offline.db
//! wiki-search "elvarg" --prefetch -v
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use wikisearch::prefetch::PrefetchState;
use wikisearch::{DisplayState, OfflineBanner, ResultItem, ResultsView, SearchSession};

/// How long to wait for the first results before giving up.
const RESULT_WAIT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "wiki-search", version, about)]
struct Cli {
    /// Search query
    query: String,

    /// Search only pages saved for offline reading
    #[arg(long)]
    offline: bool,

    /// Offline library database (the index is created next to it)
    #[arg(long, default_value = "wikisearch-data/offline.db")]
    db: PathBuf,

    /// Number of online result pages to print
    #[arg(long, default_value = "1")]
    pages: u32,

    /// Prefetch the top result and report the rendered size
    #[arg(long)]
    prefetch: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    tracing_subscriber::fmt().with_max_level(level).with_target(true).init();

    if let Some(parent) = cli.db.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let session = SearchSession::new(cli.db.to_string_lossy().to_string(), None, !cli.offline)
        .context("opening search session")?;

    if !session.submit_query(cli.query.clone()) {
        bail!("query is empty");
    }

    let query = session.current_query();
    let state = tokio::time::timeout(
        RESULT_WAIT,
        session.wait_for(|s| s.query == query && s.generation > 0 && s.view != ResultsView::Loading),
    )
    .await
    .context("timed out waiting for results")?;

    print_state(&state);

    if let ResultsView::Populated { stream: wikisearch::ResultStream::Online { page } } = &state.view {
        let mut shown = page.items.len();
        let mut next = page.next_key;
        for _ in 1..cli.pages {
            let Some(key) = next else { break };
            let page = session.load_page(key).await.context("loading next page")?;
            for (offset, item) in page.items.iter().enumerate() {
                print_item(shown + offset + 1, item);
            }
            shown += page.items.len();
            next = page.next_key;
        }
    }

    if cli.prefetch {
        report_prefetch(&session, &state).await?;
    }

    Ok(())
}

fn print_state(state: &DisplayState) {
    match state.banner {
        OfflineBanner::Hidden => {}
        OfflineBanner::Offline => println!("[offline]"),
        OfflineBanner::ShowingOfflineResults => println!("[offline: showing saved pages]"),
    }
    match &state.view {
        ResultsView::Prompt => println!("Enter a query."),
        ResultsView::Loading => println!("Loading..."),
        ResultsView::Error { message, retryable } => {
            println!("Error: {}{}", message, if *retryable { " (retryable)" } else { "" })
        }
        ResultsView::NoResults => println!("No results for \"{}\".", state.query),
        ResultsView::Populated { stream } => {
            for (i, item) in stream.items().iter().enumerate() {
                print_item(i + 1, item);
            }
        }
    }
}

fn print_item(rank: usize, item: &ResultItem) {
    let mut flags = Vec::new();
    if item.is_full_text_match {
        flags.push("text match");
    }
    if item.is_offline_available {
        flags.push("saved");
    }
    let flags = if flags.is_empty() { String::new() } else { format!(" [{}]", flags.join(", ")) };
    println!("{:>3}. {} (#{}){}", rank, item.title, item.id, flags);
    if !item.snippet.is_empty() {
        println!("     {}", item.snippet);
    }
}

async fn report_prefetch(session: &SearchSession, state: &DisplayState) -> Result<()> {
    let Some(top) = state.items().first() else {
        println!("Nothing to prefetch.");
        return Ok(());
    };
    session.prefetch_top_result();

    let mut settled = session.prefetch_state();
    let deadline = tokio::time::Instant::now() + RESULT_WAIT;
    while matches!(settled, PrefetchState::Fetching { .. }) && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
        settled = session.prefetch_state();
    }

    match session.take_cached_page(top.id.clone()) {
        Some(page) => println!(
            "Prefetched \"{}\" rev {} ({} bytes) from {}",
            top.title,
            page.revision_id,
            page.rendered_content.len(),
            page.canonical_url
        ),
        None => println!("Prefetch of \"{}\" did not complete ({:?}).", top.title, settled),
    }
    Ok(())
}
