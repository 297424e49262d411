//! HTTP server exposing searches, tables and exports as JSON/CSV.
//!
//! Chart rendering happens in the client; this only serves the data.

use crate::aggregate::{AggregateTables, CountEntry, MonthlyCount, PeriodFilter, RollingFrame, DEFAULT_TOP_N};
use crate::config::{ScopusConfig, DEFAULT_SEARCH_LIMIT};
use crate::equation::SearchEquation;
use crate::error::ScopusError;
use crate::export;
use crate::record::YearMonth;
use crate::scopus::ScopusClient;
use crate::session::Session;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Sessions kept before the oldest is evicted
pub const DEFAULT_MAX_SESSIONS: usize = 32;

/// Shared server state
pub struct AppState {
    client: ScopusClient,
    /// Keyed by ascending id, so the first entry is always the oldest
    sessions: RwLock<BTreeMap<u64, Session>>,
    max_sessions: usize,
    next_id: AtomicU64,
}

impl AppState {
    pub fn new(config: ScopusConfig) -> crate::Result<Self> {
        Ok(Self {
            client: ScopusClient::new(config)?,
            sessions: RwLock::new(BTreeMap::new()),
            max_sessions: DEFAULT_MAX_SESSIONS,
            next_id: AtomicU64::new(1),
        })
    }

    /// Cap on stored sessions; at least one is always kept.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions.max(1);
        self
    }

    /// Store a session under a fresh id, evicting the oldest ones past the cap.
    async fn insert(&self, session: Session) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.write().await;
        sessions.insert(id, session);
        while sessions.len() > self.max_sessions {
            if let Some((evicted, _)) = sessions.pop_first() {
                debug!(session = evicted, "Evicted oldest session");
            }
        }
        id
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/search", post(search_handler))
        .route("/sessions/{id}", delete(delete_session_handler))
        .route("/sessions/{id}/period", put(set_period_handler))
        .route("/sessions/{id}/tables", get(tables_handler))
        .route("/sessions/{id}/rolling", get(rolling_handler))
        .route("/sessions/{id}/export.csv", get(export_csv_handler))
        .route("/sessions/{id}/export.json", get(export_json_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error body returned by every endpoint
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub kind: &'static str,
    pub message: String,
    #[serde(skip)]
    status: StatusCode,
}

impl ApiError {
    fn not_found(id: u64) -> Self {
        Self {
            kind: "not_found",
            message: format!("Unknown session {}", id),
            status: StatusCode::NOT_FOUND,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

/// Stable machine-readable name for each error kind.
fn error_kind(err: &ScopusError) -> &'static str {
    match err {
        ScopusError::Auth(_) => "auth",
        ScopusError::QuotaExceeded(_) => "quota",
        ScopusError::Query(_) => "query",
        ScopusError::Transient(_) => "transient",
        ScopusError::Validation(_) => "validation",
        ScopusError::Config(_) => "config",
        ScopusError::Io(_) | ScopusError::Json(_) | ScopusError::Csv(_) => "internal",
    }
}

impl From<ScopusError> for ApiError {
    fn from(err: ScopusError) -> Self {
        let status = match &err {
            ScopusError::Validation(_) | ScopusError::Query(_) => StatusCode::BAD_REQUEST,
            ScopusError::Auth(_) => StatusCode::UNAUTHORIZED,
            ScopusError::QuotaExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            ScopusError::Transient(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            kind: error_kind(&err),
            message: err.to_string(),
            status,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Search request body
#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    DEFAULT_SEARCH_LIMIT
}

/// Fetch summary; the records themselves are served by the session endpoints
#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub session_id: u64,
    /// `complete` or `partial`
    pub status: &'static str,
    pub count: usize,
    pub error: Option<FetchErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct FetchErrorBody {
    pub kind: &'static str,
    pub message: String,
    pub retryable: bool,
}

/// Search endpoint handler
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<Json<SearchResponse>> {
    info!(query = %req.query, count = req.count, "Search request");

    let equation = SearchEquation::new(req.query)?;
    let session = Session::fetch(&state.client, equation, req.count).await;

    let error = session.fetch_error().map(|e| {
        error!(error = %e, "Search aborted");
        FetchErrorBody {
            kind: error_kind(e),
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    });
    let status = if session.is_partial() { "partial" } else { "complete" };
    let count = session.results().len();
    let session_id = state.insert(session).await;

    Ok(Json(SearchResponse {
        session_id,
        status,
        count,
        error,
    }))
}

/// Drop a session and its records.
pub async fn delete_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<StatusCode> {
    match state.sessions.write().await.remove(&id) {
        Some(_) => {
            info!(session = id, "Session deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::not_found(id)),
    }
}

/// Active period body; both bounds absent clears the period.
#[derive(Debug, Default, Deserialize)]
pub struct PeriodBody {
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Set the session's active period, used by later requests that give no bounds.
pub async fn set_period_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(body): Json<PeriodBody>,
) -> ApiResult<Json<Option<PeriodFilter>>> {
    let mut sessions = state.sessions.write().await;
    let session = sessions.get_mut(&id).ok_or_else(|| ApiError::not_found(id))?;
    let period = PeriodFilter::from_bounds(
        parse_month(&body.from)?,
        parse_month(&body.to)?,
        session.results().month_range(),
    )?;
    session.set_period(period);
    Ok(Json(period))
}

fn parse_month(raw: &Option<String>) -> crate::Result<Option<YearMonth>> {
    raw.as_deref().map(str::parse::<YearMonth>).transpose()
}

/// Optional period bounds, both `YYYY-MM`
#[derive(Debug, Default, Deserialize)]
pub struct PeriodParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub top: Option<usize>,
    pub window: Option<usize>,
}

impl PeriodParams {
    /// Without bounds the session's active period applies; a single bound is
    /// completed from the session's own date range.
    fn resolve(&self, session: &Session) -> crate::Result<Option<PeriodFilter>> {
        if self.from.is_none() && self.to.is_none() {
            return Ok(session.period().copied());
        }
        PeriodFilter::from_bounds(
            parse_month(&self.from)?,
            parse_month(&self.to)?,
            session.results().month_range(),
        )
    }
}

/// Tables truncated to top-N views for charting
#[derive(Debug, Serialize)]
pub struct TablesResponse {
    pub articles: usize,
    pub period: Option<PeriodFilter>,
    pub authors: Vec<CountEntry>,
    pub organizations: Vec<CountEntry>,
    pub countries: Vec<CountEntry>,
    pub subject_areas: Vec<CountEntry>,
    pub words: Vec<CountEntry>,
    pub monthly: Vec<MonthlyCount>,
    pub yearly: BTreeMap<i32, u64>,
    pub max_window: usize,
}

impl TablesResponse {
    fn new(tables: AggregateTables, top: usize) -> Self {
        Self {
            articles: tables.articles,
            period: tables.period,
            authors: tables.authors.top(top),
            organizations: tables.organizations.top(top),
            countries: tables.countries.sorted(),
            subject_areas: tables.subject_areas.sorted(),
            words: tables.words.top(crate::aggregate::FRAME_TOP_WORDS),
            max_window: tables.max_window(),
            monthly: tables.monthly,
            yearly: tables.yearly,
        }
    }
}

pub async fn tables_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Query(params): Query<PeriodParams>,
) -> ApiResult<Json<TablesResponse>> {
    let sessions = state.sessions.read().await;
    let session = sessions.get(&id).ok_or_else(|| ApiError::not_found(id))?;
    let period = params.resolve(session)?;
    let tables = session.tables_for(period.as_ref());
    Ok(Json(TablesResponse::new(tables, params.top.unwrap_or(DEFAULT_TOP_N))))
}

#[derive(Debug, Serialize)]
pub struct RollingResponse {
    /// Window actually used after clamping
    pub window: usize,
    pub max_window: usize,
    pub series: Vec<MonthlyCount>,
    pub frames: Vec<RollingFrame>,
}

pub async fn rolling_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Query(params): Query<PeriodParams>,
) -> ApiResult<Json<RollingResponse>> {
    let sessions = state.sessions.read().await;
    let session = sessions.get(&id).ok_or_else(|| ApiError::not_found(id))?;
    let period = params.resolve(session)?;
    let tables = session.tables_for(period.as_ref());

    let requested = params.window.unwrap_or(6);
    let window = tables.clamp_window(requested);
    Ok(Json(RollingResponse {
        window,
        max_window: tables.max_window(),
        series: tables.rolling(window),
        frames: crate::aggregate::rolling_frames(session.results(), period.as_ref(), window),
    }))
}

pub async fn export_csv_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<Response> {
    let sessions = state.sessions.read().await;
    let session = sessions.get(&id).ok_or_else(|| ApiError::not_found(id))?;
    let mut body = Vec::new();
    export::write_csv(session.results(), &mut body)?;
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"scopus_results.csv\""),
        ],
        body,
    )
        .into_response())
}

pub async fn export_json_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<Response> {
    let sessions = state.sessions.read().await;
    let session = sessions.get(&id).ok_or_else(|| ApiError::not_found(id))?;
    Ok(Json(session.results()).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn state_with(server: &MockServer) -> Arc<AppState> {
        let config = ScopusConfig::new("key").with_base_url(server.uri());
        Arc::new(AppState::new(config).unwrap())
    }

    async fn mock_two_articles(server: &MockServer) {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "search-results": {
                    "opensearch:totalResults": "2",
                    "entry": [
                        {
                            "dc:identifier": "SCOPUS_ID:1", "dc:title": "One",
                            "prism:coverDate": "2021-01-10",
                            "author": [{"authname": "A"}, {"authname": "B"}],
                            "affiliation": [{"affilname": "MIT", "affiliation-country": "US"}]
                        },
                        {
                            "dc:identifier": "SCOPUS_ID:2", "dc:title": "Two",
                            "prism:coverDate": "2021-02-10",
                            "author": {"authname": "B"},
                            "affiliation": [{"affilname": "MIT", "affiliation-country": "US"}]
                        }
                    ]
                }
            })))
            .mount(server)
            .await;
    }

    async fn search(state: &Arc<AppState>, query: &str) -> ApiResult<Json<SearchResponse>> {
        search_handler(
            State(state.clone()),
            Json(SearchRequest {
                query: query.to_string(),
                count: 25,
            }),
        )
        .await
    }

    #[tokio::test]
    async fn test_search_then_tables() {
        let server = MockServer::start().await;
        mock_two_articles(&server).await;
        let state = state_with(&server).await;

        let Json(resp) = search(&state, "TITLE(x) AND KEY(y)").await.unwrap();
        assert_eq!(resp.status, "complete");
        assert_eq!(resp.count, 2);

        let Json(tables) = tables_handler(
            State(state.clone()),
            Path(resp.session_id),
            Query(PeriodParams::default()),
        )
        .await
        .unwrap();
        assert_eq!(tables.articles, 2);
        assert_eq!(tables.authors[0], CountEntry { name: "B".into(), count: 2 });
        assert_eq!(tables.countries[0].count, 2);
        assert_eq!(tables.max_window, 2);

        let params = PeriodParams {
            from: Some("2021-02".into()),
            ..Default::default()
        };
        let Json(narrow) = tables_handler(State(state.clone()), Path(resp.session_id), Query(params))
            .await
            .unwrap();
        assert_eq!(narrow.articles, 1);
    }

    #[tokio::test]
    async fn test_rolling_clamps_window() {
        let server = MockServer::start().await;
        mock_two_articles(&server).await;
        let state = state_with(&server).await;
        let Json(resp) = search(&state, "a AND b").await.unwrap();

        let params = PeriodParams {
            window: Some(12),
            ..Default::default()
        };
        let Json(rolling) = rolling_handler(State(state.clone()), Path(resp.session_id), Query(params))
            .await
            .unwrap();
        assert_eq!(rolling.window, 2);
        assert_eq!(rolling.series.last().unwrap().count, 2);
        assert_eq!(rolling.frames.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_equation_is_bad_request() {
        let server = MockServer::start().await;
        let state = state_with(&server).await;
        let err = search(&state, "   ").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind, "query");
    }

    #[tokio::test]
    async fn test_aborted_search_reports_partial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        let state = state_with(&server).await;
        let Json(resp) = search(&state, "a AND b").await.unwrap();
        assert_eq!(resp.status, "partial");
        let error = resp.error.unwrap();
        assert_eq!(error.kind, "quota");
        assert!(!error.retryable);
    }

    #[tokio::test]
    async fn test_unknown_session_and_bad_period() {
        let server = MockServer::start().await;
        mock_two_articles(&server).await;
        let state = state_with(&server).await;

        let err = export_json_handler(State(state.clone()), Path(999)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let Json(resp) = search(&state, "a AND b").await.unwrap();
        let params = PeriodParams {
            from: Some("2021-05".into()),
            to: Some("2021-01".into()),
            ..Default::default()
        };
        let err = tables_handler(State(state.clone()), Path(resp.session_id), Query(params))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_single_bound_past_data_gives_empty_tables() {
        let server = MockServer::start().await;
        mock_two_articles(&server).await;
        let state = state_with(&server).await;
        let Json(resp) = search(&state, "a AND b").await.unwrap();

        let params = PeriodParams {
            from: Some("2022-01".into()),
            ..Default::default()
        };
        let Json(tables) = tables_handler(State(state.clone()), Path(resp.session_id), Query(params))
            .await
            .unwrap();
        assert_eq!(tables.articles, 0);
        assert!(tables.authors.is_empty());

        let params = PeriodParams {
            to: Some("2020-06".into()),
            ..Default::default()
        };
        let Json(rolling) = rolling_handler(State(state.clone()), Path(resp.session_id), Query(params))
            .await
            .unwrap();
        assert!(rolling.series.is_empty());
        assert!(rolling.frames.is_empty());
    }

    #[tokio::test]
    async fn test_oldest_session_is_evicted() {
        let server = MockServer::start().await;
        mock_two_articles(&server).await;
        let config = ScopusConfig::new("key").with_base_url(server.uri());
        let state = Arc::new(AppState::new(config).unwrap().with_max_sessions(2));

        let mut ids = Vec::new();
        for _ in 0..3 {
            let Json(resp) = search(&state, "a AND b").await.unwrap();
            ids.push(resp.session_id);
        }
        assert_eq!(state.sessions.read().await.len(), 2);

        let err = export_json_handler(State(state.clone()), Path(ids[0])).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        for id in &ids[1..] {
            assert!(export_json_handler(State(state.clone()), Path(*id)).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_delete_session() {
        let server = MockServer::start().await;
        mock_two_articles(&server).await;
        let state = state_with(&server).await;
        let Json(resp) = search(&state, "a AND b").await.unwrap();

        let status = delete_session_handler(State(state.clone()), Path(resp.session_id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(state.sessions.read().await.is_empty());

        let err = delete_session_handler(State(state.clone()), Path(resp.session_id))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_active_period_applies_to_later_requests() {
        let server = MockServer::start().await;
        mock_two_articles(&server).await;
        let state = state_with(&server).await;
        let Json(resp) = search(&state, "a AND b").await.unwrap();

        let body = PeriodBody {
            from: Some("2021-02".into()),
            to: None,
        };
        let Json(period) = set_period_handler(State(state.clone()), Path(resp.session_id), Json(body))
            .await
            .unwrap();
        let period = period.unwrap();
        assert_eq!(period.start().to_string(), "2021-02");
        assert_eq!(period.end().to_string(), "2021-02");

        let Json(tables) = tables_handler(
            State(state.clone()),
            Path(resp.session_id),
            Query(PeriodParams::default()),
        )
        .await
        .unwrap();
        assert_eq!(tables.articles, 1);
        assert_eq!(tables.period, Some(period));

        // explicit bounds still override the active period
        let params = PeriodParams {
            from: Some("2021-01".into()),
            to: Some("2021-02".into()),
            ..Default::default()
        };
        let Json(tables) = tables_handler(State(state.clone()), Path(resp.session_id), Query(params))
            .await
            .unwrap();
        assert_eq!(tables.articles, 2);

        let Json(cleared) = set_period_handler(
            State(state.clone()),
            Path(resp.session_id),
            Json(PeriodBody::default()),
        )
        .await
        .unwrap();
        assert_eq!(cleared, None);
    }

    #[tokio::test]
    async fn test_export_csv() {
        let server = MockServer::start().await;
        mock_two_articles(&server).await;
        let state = state_with(&server).await;
        let Json(resp) = search(&state, "a AND b").await.unwrap();

        let response = export_csv_handler(State(state.clone()), Path(resp.session_id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
    }
}
