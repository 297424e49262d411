//! scopusviz - Scopus Visual Bibliometrics
//!
//! Searches Scopus, aggregates the results into chart-ready tables and exports
//! them as CSV/JSON.
//!
//! ## Usage
//!
//! ### CLI Mode
//! ```bash
//! scopusviz search 'TITLE-ABS-KEY("machine learning")' --count 100 --from 2020-01 --to 2023-12
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! scopusviz serve --port 3000
//! ```

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use scopusviz::aggregate::{self, PeriodFilter, DEFAULT_TOP_N};
use scopusviz::config::{DEFAULT_BASE_URL, DEFAULT_PAGE_SIZE, DEFAULT_SEARCH_LIMIT};
use scopusviz::server::{self, AppState};
use scopusviz::session::Session;
use scopusviz::{export, ScopusClient, ScopusConfig, SearchEquation, YearMonth};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Scopus Visual Bibliometrics
#[derive(Parser)]
#[command(name = "scopusviz")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Elsevier API key
    #[arg(long, env = "SCOPUS_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Search API endpoint
    #[arg(long, default_value = DEFAULT_BASE_URL, global = true)]
    base_url: String,

    /// Records per request
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, global = true)]
    page_size: usize,

    /// Search view: STANDARD or COMPLETE (COMPLETE includes abstracts and all authors)
    #[arg(long, default_value = "STANDARD", global = true)]
    view: String,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30, global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search Scopus, print a summary and write exports
    Search {
        /// Search equation, e.g. TITLE-ABS-KEY("machine learning")
        equation: String,

        /// Maximum number of records to fetch
        #[arg(short, long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        count: usize,

        /// Period start (YYYY-MM)
        #[arg(long)]
        from: Option<YearMonth>,

        /// Period end (YYYY-MM)
        #[arg(long)]
        to: Option<YearMonth>,

        /// Rolling window in months
        #[arg(long, default_value_t = 6)]
        window: usize,

        /// Length of top-N listings
        #[arg(long, default_value_t = DEFAULT_TOP_N)]
        top: usize,

        /// Output directory
        #[arg(short, long, default_value = "./output")]
        output: PathBuf,
    },

    /// Run as HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.json_logs {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    let config = ScopusConfig::new(cli.api_key.unwrap_or_default())
        .with_base_url(cli.base_url)
        .with_page_size(cli.page_size)
        .with_view(cli.view)
        .with_timeout(Duration::from_secs(cli.timeout));

    match cli.command {
        Commands::Search {
            equation,
            count,
            from,
            to,
            window,
            top,
            output,
        } => run_search(config, equation, count, from, to, window, top, output).await,
        Commands::Serve { port, host } => run_server(config, host, port).await,
    }
}

// ============================================================================
// Search
// ============================================================================

/// Aggregates written next to the record exports
#[derive(Serialize)]
struct AggregateExport {
    equation: String,
    requested: usize,
    fetched: usize,
    partial: bool,
    window: usize,
    tables: aggregate::AggregateTables,
    rolling: Vec<aggregate::MonthlyCount>,
    frames: Vec<aggregate::RollingFrame>,
}

#[allow(clippy::too_many_arguments)]
async fn run_search(
    config: ScopusConfig,
    equation: String,
    count: usize,
    from: Option<YearMonth>,
    to: Option<YearMonth>,
    window: usize,
    top: usize,
    output_dir: PathBuf,
) -> Result<()> {
    let equation = SearchEquation::new(equation).context("Invalid search equation")?;
    let client = ScopusClient::new(config).context("Invalid configuration")?;

    println!("Searching Scopus: {}", equation);
    let mut session = Session::fetch(&client, equation, count).await;

    if let Some(err) = session.fetch_error() {
        warn!(error = %err, "Fetch aborted");
        println!(
            "Fetch aborted after {} records: {}{}",
            session.results().len(),
            err,
            if err.is_retryable() { " (retry later)" } else { "" }
        );
    }

    if !has_records(&session)? {
        println!("No results found.");
        return Ok(());
    }
    println!("Fetched {} of {} requested records.", session.results().len(), count);

    // Open bounds default to the data's own range
    let period = PeriodFilter::from_bounds(from, to, session.results().month_range())
        .context("Invalid period")?;
    session.set_period(period);

    let tables = session.tables();
    let window = tables.clamp_window(window);
    print_summary(&tables, top, window);

    // Create output folder
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let output_folder = output_dir.join(format!("{}_scopus", timestamp));
    std::fs::create_dir_all(&output_folder).context("Failed to create output directory")?;

    export::save_csv(&output_folder.join("results.csv"), session.results())
        .context("Failed to write CSV")?;
    export::save_json(&output_folder.join("results.json"), session.results())
        .context("Failed to write JSON")?;

    let aggregates = AggregateExport {
        equation: session.equation().to_string(),
        requested: session.requested(),
        fetched: session.results().len(),
        partial: session.is_partial(),
        window,
        rolling: tables.rolling(window),
        frames: session.frames(window),
        tables,
    };
    export::save_json(&output_folder.join("aggregates.json"), &aggregates)
        .context("Failed to write aggregates")?;

    info!(folder = %output_folder.display(), "Exports written");
    println!("\n✓ Done. Results in: {}", output_folder.display());
    Ok(())
}

/// `Ok(false)` only when the query genuinely matched nothing; an aborted
/// fetch that collected nothing is an error.
fn has_records(session: &Session) -> Result<bool> {
    if !session.results().is_empty() {
        return Ok(true);
    }
    if let Some(err) = session.fetch_error() {
        anyhow::bail!("Fetch aborted before any records were collected: {}", err);
    }
    Ok(false)
}

fn print_summary(tables: &aggregate::AggregateTables, top: usize, window: usize) {
    if let Some(period) = &tables.period {
        println!("\nPeriod: {} to {}", period.start(), period.end());
    }
    println!("Articles in period: {}", tables.articles);

    let sections = [
        ("Authors", &tables.authors),
        ("Organizations", &tables.organizations),
        ("Countries", &tables.countries),
        ("Words", &tables.words),
    ];
    for (title, table) in sections {
        println!("\n--- Top {} ---", title);
        for entry in table.top(top) {
            println!("{:>5}  {}", entry.count, entry.name);
        }
    }

    println!("\n--- Publications per month ({}-month rolling) ---", window);
    for point in tables.rolling(window) {
        println!("{}  {}", point.month, point.count);
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(config: ScopusConfig, host: String, port: u16) -> Result<()> {
    info!(host = %host, port = port, "Starting HTTP server");

    let state = Arc::new(AppState::new(config).context("Invalid configuration")?);
    let app = server::router(state);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn fetch_with(response: ResponseTemplate) -> Session {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(response)
            .mount(&server)
            .await;
        let client = ScopusClient::new(ScopusConfig::new("key").with_base_url(server.uri())).unwrap();
        Session::fetch(&client, SearchEquation::new("a AND b").unwrap(), 10).await
    }

    #[tokio::test]
    async fn test_aborted_empty_fetch_is_an_error() {
        let session = fetch_with(ResponseTemplate::new(401).set_body_string("Invalid API Key")).await;
        let err = has_records(&session).unwrap_err();
        assert!(err.to_string().contains("Invalid API Key"));
    }

    #[tokio::test]
    async fn test_empty_result_is_not_an_error() {
        let session = fetch_with(ResponseTemplate::new(200).set_body_json(json!({
            "search-results": {
                "opensearch:totalResults": "0",
                "entry": [{"@_fa": "true", "error": "Result set was empty"}]
            }
        })))
        .await;
        assert!(!has_records(&session).unwrap());
    }
}
