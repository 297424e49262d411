//! Scopus Search API Client
//!
//! Fetches article records page by page and turns the loosely-shaped Scopus
//! JSON into typed [`ArticleRecord`]s.
//!
//! API notes:
//! - `X-ELS-APIKey` header carries the credential
//! - `start`/`count` are offset based; `count` is capped per view (25 for STANDARD)
//! - `opensearch:totalResults` arrives as a string
//! - an empty result set is reported as a single entry holding an `error` field

use crate::config::ScopusConfig;
use crate::equation::SearchEquation;
use crate::error::{FetchAborted, OptionExt, Result, ScopusError};
use crate::record::{Affiliation, ArticleRecord, AuthorCountry, ResultSet, YearMonth};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// One page of parsed results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    /// Total matches reported by the API; `None` when the field is absent
    pub total_results: Option<usize>,
    /// Entries in the order returned
    pub records: Vec<ArticleRecord>,
}

/// Offset/count pair for the next page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub start: usize,
    pub count: usize,
}

/// Where a paged fetch currently stands.
#[derive(Debug)]
pub enum FetchState {
    /// More pages are needed and available
    Fetching,
    /// Target reached or the API has nothing more
    Exhausted,
    /// An API error stopped the fetch
    Aborted(ScopusError),
}

/// Pagination state machine driving [`ScopusClient::search_all`].
///
/// Kept free of I/O so the stopping rules can be exercised directly.
#[derive(Debug)]
pub struct Pagination {
    target: usize,
    page_size: usize,
    offset: usize,
    total: Option<usize>,
    results: ResultSet,
    state: FetchState,
}

impl Pagination {
    pub fn new(target: usize, page_size: usize) -> Self {
        let state = if target == 0 || page_size == 0 {
            FetchState::Exhausted
        } else {
            FetchState::Fetching
        };
        Self {
            target,
            page_size,
            offset: 0,
            total: None,
            results: ResultSet::new(),
            state,
        }
    }

    pub fn state(&self) -> &FetchState {
        &self.state
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    /// Total reported by the most recent page, if any page has arrived.
    pub fn total_available(&self) -> Option<usize> {
        self.total
    }

    /// The next page to request, or `None` once the fetch has stopped.
    ///
    /// Never asks beyond `min(target, total)`.
    pub fn next_request(&self) -> Option<PageRequest> {
        if !matches!(self.state, FetchState::Fetching) {
            return None;
        }
        let mut count = self.page_size.min(self.target - self.results.len());
        if let Some(total) = self.total {
            count = count.min(total.saturating_sub(self.offset));
        }
        (count > 0).then_some(PageRequest {
            start: self.offset,
            count,
        })
    }

    /// Apply a successfully fetched page.
    pub fn on_page(&mut self, request: PageRequest, page: SearchPage) {
        let returned = page.records.len();
        if page.total_results.is_some() {
            self.total = page.total_results;
        }
        self.offset += returned;

        let mut duplicates = 0;
        for record in page.records {
            if self.results.len() >= self.target {
                break;
            }
            if !self.results.insert(record) {
                duplicates += 1;
            }
        }
        if duplicates > 0 {
            debug!(duplicates, start = request.start, "Skipped duplicate records");
        }

        let exhausted = self.results.len() >= self.target
            || returned < request.count
            || self.total.is_some_and(|total| self.offset >= total);
        if exhausted {
            self.state = FetchState::Exhausted;
        }
    }

    /// Record a failed page; no further requests are made.
    pub fn on_error(&mut self, error: ScopusError) {
        self.state = FetchState::Aborted(error);
    }

    /// Consume the machine, separating success from an aborted fetch.
    pub fn finish(self) -> std::result::Result<ResultSet, FetchAborted> {
        match self.state {
            FetchState::Aborted(error) => Err(FetchAborted {
                partial: self.results,
                error,
            }),
            FetchState::Fetching | FetchState::Exhausted => Ok(self.results),
        }
    }
}

/// Scopus Search API client
pub struct ScopusClient {
    client: Client,
    config: ScopusConfig,
}

impl ScopusClient {
    /// Create a client after validating `config`.
    pub fn new(config: ScopusConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("scopusviz/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ScopusError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ScopusConfig {
        &self.config
    }

    /// Fetch up to `max_results` unique records.
    ///
    /// Pages are requested sequentially. A result shorter than `max_results`
    /// means the API ran out of matches; an API error stops the loop and is
    /// returned together with the records gathered so far. Nothing is retried.
    pub async fn search_all(
        &self,
        equation: &SearchEquation,
        max_results: usize,
    ) -> std::result::Result<ResultSet, FetchAborted> {
        info!(
            query = %equation,
            max_results,
            page_size = self.config.page_size,
            "Starting Scopus query"
        );

        let mut pagination = Pagination::new(max_results, self.config.page_size);

        while let Some(request) = pagination.next_request() {
            match self.search_page(equation, request.start, request.count).await {
                Ok(page) => {
                    info!(
                        start = request.start,
                        returned = page.records.len(),
                        total = ?page.total_results,
                        "Fetched Scopus page"
                    );
                    pagination.on_page(request, page);
                }
                Err(e) => {
                    warn!(start = request.start, error = %e, "Scopus page failed, aborting fetch");
                    pagination.on_error(e);
                }
            }
        }

        let collected = pagination.results().len();
        let outcome = pagination.finish();
        match &outcome {
            Ok(_) => info!(collected, "Scopus query complete"),
            Err(aborted) => warn!(collected, error = %aborted.error, "Scopus query aborted"),
        }
        outcome
    }

    /// Fetch a single page starting at offset `start`.
    pub async fn search_page(
        &self,
        equation: &SearchEquation,
        start: usize,
        count: usize,
    ) -> Result<SearchPage> {
        let params = [
            ("query", equation.as_str().to_string()),
            ("start", start.to_string()),
            ("count", count.to_string()),
            ("view", self.config.view.clone()),
        ];

        debug!(url = %self.config.base_url, start, count, "Sending Scopus request");

        let response = self
            .client
            .get(&self.config.base_url)
            .header("Accept", "application/json")
            .header("X-ELS-APIKey", &self.config.api_key)
            .query(&params)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(SearchPage::default());
        }

        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        parse_response(&body)
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
fn classify_status(status: StatusCode, body: &str) -> ScopusError {
    let message = api_message(body).unwrap_or_else(|| format!("HTTP {}", status));
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ScopusError::Auth(message),
        StatusCode::TOO_MANY_REQUESTS => ScopusError::QuotaExceeded(message),
        s if s.is_server_error() || s == StatusCode::REQUEST_TIMEOUT => {
            ScopusError::Transient(message)
        }
        _ => ScopusError::Query(message),
    }
}

/// Pull the human-readable message out of a Scopus error body.
fn api_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ServiceErrorBody {
        #[serde(rename = "service-error")]
        service_error: Option<ServiceError>,
        #[serde(rename = "error-response")]
        error_response: Option<ErrorResponse>,
    }
    #[derive(Deserialize)]
    struct ServiceError {
        status: ServiceStatus,
    }
    #[derive(Deserialize)]
    struct ServiceStatus {
        #[serde(rename = "statusText")]
        status_text: Option<String>,
        #[serde(rename = "statusCode")]
        status_code: Option<String>,
    }
    #[derive(Deserialize)]
    struct ErrorResponse {
        #[serde(rename = "error-message")]
        error_message: Option<String>,
        #[serde(rename = "error-code")]
        error_code: Option<String>,
    }

    let parsed = serde_json::from_str::<ServiceErrorBody>(body).ok();
    let from_json = parsed.and_then(|b| {
        b.service_error
            .and_then(|e| e.status.status_text.or(e.status.status_code))
            .or_else(|| {
                b.error_response
                    .and_then(|e| e.error_message.or(e.error_code))
            })
    });

    from_json.or_else(|| {
        let trimmed = body.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

// === Scopus API Response Types ===

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "search-results")]
    search_results: SearchResults,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(rename = "opensearch:totalResults", default)]
    total_results: Option<serde_json::Value>,
    #[serde(default)]
    entry: Option<Vec<RawEntry>>,
}

/// Scopus emits either a single object or an array for repeated elements.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn flatten<T>(value: Option<OneOrMany<T>>) -> Vec<T> {
    match value {
        Some(OneOrMany::Many(items)) => items,
        Some(OneOrMany::One(item)) => vec![item],
        None => Vec::new(),
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(rename = "dc:identifier")]
    identifier: Option<String>,
    eid: Option<String>,
    #[serde(rename = "dc:title")]
    title: Option<String>,
    #[serde(rename = "dc:creator")]
    creator: Option<String>,
    #[serde(rename = "prism:coverDate")]
    cover_date: Option<String>,
    #[serde(rename = "prism:publicationName")]
    publication_name: Option<String>,
    #[serde(rename = "prism:doi")]
    doi: Option<String>,
    #[serde(rename = "dc:description")]
    description: Option<String>,
    authkeywords: Option<OneOrMany<String>>,
    author: Option<OneOrMany<RawAuthor>>,
    affiliation: Option<OneOrMany<RawAffiliation>>,
    #[serde(rename = "subject-area")]
    subject_area: Option<OneOrMany<RawSubjectArea>>,
    /// Present only on the "Result set was empty" sentinel entry
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    authname: Option<String>,
    surname: Option<String>,
    #[serde(rename = "given-name")]
    given_name: Option<String>,
    afid: Option<OneOrMany<RawAfid>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawAfid {
    Tagged {
        #[serde(rename = "$")]
        value: String,
    },
    Plain(String),
}

impl RawAfid {
    fn into_value(self) -> String {
        match self {
            RawAfid::Tagged { value } | RawAfid::Plain(value) => value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawAffiliation {
    afid: Option<String>,
    affilname: Option<String>,
    #[serde(rename = "affiliation-country")]
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSubjectArea {
    #[serde(rename = "@abbrev")]
    abbrev: Option<String>,
}

/// Parse a Search API response body.
fn parse_response(body: &str) -> Result<SearchPage> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| ScopusError::Query(format!("Schema mismatch: {}", e)))?;
    let results = response.search_results;

    // Without a usable total the short-page rule alone ends the fetch
    let total_results = results.total_results.as_ref().and_then(parse_count);
    if total_results.is_none() {
        debug!("Response carries no opensearch:totalResults");
    }

    let mut records = Vec::new();
    for entry in results.entry.unwrap_or_default() {
        if entry.identifier.is_none() {
            if let Some(reason) = &entry.error {
                debug!(reason = %reason, "Empty result sentinel");
                continue;
            }
        }
        records.push(parse_entry(entry)?);
    }

    Ok(SearchPage {
        total_results,
        records,
    })
}

fn parse_count(value: &serde_json::Value) -> Option<usize> {
    match value {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Number(n) => n.as_u64().map(|n| n as usize),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Convert one raw entry, enforcing the required fields.
fn parse_entry(entry: RawEntry) -> Result<ArticleRecord> {
    let identifier = non_empty(entry.identifier).ok_or_schema("entry without dc:identifier")?;
    let title = non_empty(entry.title)
        .ok_or_schema(&format!("entry {} without dc:title", identifier))?;

    let raw_affiliations = flatten(entry.affiliation);
    let affiliation_country: HashMap<&str, &str> = raw_affiliations
        .iter()
        .filter_map(|a| Some((a.afid.as_deref()?, a.country.as_deref()?)))
        .collect();

    let mut authors = Vec::new();
    let mut author_countries = Vec::new();
    for author in flatten(entry.author) {
        let name = non_empty(author.authname).or_else(|| {
            let surname = non_empty(author.surname)?;
            Some(match non_empty(author.given_name) {
                Some(given) => format!("{}, {}", surname, given),
                None => surname,
            })
        });
        let Some(name) = name else { continue };

        for afid in flatten(author.afid) {
            if let Some(country) = affiliation_country.get(afid.into_value().as_str()) {
                let pair = AuthorCountry {
                    author: name.clone(),
                    country: country.to_string(),
                };
                if !author_countries.contains(&pair) {
                    author_countries.push(pair);
                }
            }
        }
        authors.push(name);
    }
    if authors.is_empty() {
        authors.extend(non_empty(entry.creator));
    }

    let affiliations = raw_affiliations
        .into_iter()
        .map(|a| Affiliation {
            name: non_empty(a.affilname),
            country: non_empty(a.country),
        })
        .collect();

    let keywords = flatten(entry.authkeywords)
        .iter()
        .flat_map(|k| k.split('|'))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect();

    let subject_area = flatten(entry.subject_area)
        .into_iter()
        .find_map(|s| non_empty(s.abbrev));

    Ok(ArticleRecord {
        identifier,
        eid: non_empty(entry.eid),
        title,
        authors,
        author_countries,
        affiliations,
        cover_month: entry.cover_date.as_deref().and_then(YearMonth::from_cover_date),
        keywords,
        description: non_empty(entry.description),
        subject_area,
        publication_name: non_empty(entry.publication_name),
        doi: non_empty(entry.doi),
    })
}
