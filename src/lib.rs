//! # scopusviz
//!
//! Scopus Visual Bibliometrics - search, aggregate and export Scopus results.
//!
//! ## Modules
//!
//! - [`scopus`] - Scopus Search API client and pagination
//! - [`record`] - Article records and the de-duplicated result set
//! - [`aggregate`] - Author/country/period/word tables and rolling windows
//! - [`export`] - CSV and JSON export
//! - [`session`] - Per-search context for the display layer
//! - [`server`] - HTTP endpoints
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use scopusviz::{aggregate, ScopusClient, ScopusConfig, SearchEquation};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ScopusClient::new(ScopusConfig::new("my-api-key"))?;
//!     let equation = SearchEquation::new("TITLE-ABS-KEY(\"machine learning\")")?;
//!     let results = client.search_all(&equation, 100).await?;
//!     let tables = aggregate::build(&results, None);
//!     println!("Top authors: {:?}", tables.authors.top(5));
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod equation;
pub mod error;
pub mod export;
pub mod record;
pub mod scopus;
pub mod server;
pub mod session;

pub use config::ScopusConfig;
pub use equation::SearchEquation;
pub use error::{FetchAborted, Result, ScopusError};
pub use record::{ArticleRecord, ResultSet, YearMonth};
pub use scopus::ScopusClient;
