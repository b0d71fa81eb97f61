use crate::api::auth::bearer_token;
use crate::api::errors::ApiError;
use crate::query::cache::QueryCache;
use crate::query::columns::parse_column_list;
use crate::query::columns::Metric;
use crate::query::summary::{ReportQuery, ViewGrant, VisitsSummary};
use crate::query::table::{MetricValue, PeriodResult};
use crate::storage::archive::SiteId;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared application state for the report handlers.
pub struct AppState {
    pub summary: VisitsSummary,
    pub query_cache: QueryCache,
    pub dashboard_origin: Option<String>,
    /// True when no access rules are configured.
    pub access_open: bool,
    /// Reports computed from the archive.
    pub reports_served_total: AtomicU64,
    /// Reports answered from the cache.
    pub cache_hits_total: AtomicU64,
    pub access_denied_total: AtomicU64,
}

impl AppState {
    pub fn new(
        summary: VisitsSummary,
        query_cache: QueryCache,
        dashboard_origin: Option<String>,
        access_open: bool,
    ) -> Self {
        Self {
            summary,
            query_cache,
            dashboard_origin,
            access_open,
            reports_served_total: AtomicU64::new(0),
            cache_hits_total: AtomicU64::new(0),
            access_denied_total: AtomicU64::new(0),
        }
    }

    /// The request's only access check; the grant is handed to the service.
    fn authorize(&self, token: Option<&str>, site_id: SiteId) -> Result<ViewGrant, ApiError> {
        self.summary.authorize(token, site_id).inspect_err(|_| {
            self.access_denied_total.fetch_add(1, Ordering::Relaxed);
        })
    }
}

/// Query parameters shared by every report endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportParams {
    #[serde(rename = "idSite")]
    pub id_site: SiteId,
    #[serde(default = "default_period")]
    pub period: String,
    #[serde(default = "default_date")]
    pub date: String,
    pub segment: Option<String>,
    /// Comma-separated metric names; only used by `VisitsSummary.get`.
    pub columns: Option<String>,
    pub token_auth: Option<String>,
}

fn default_period() -> String {
    "day".to_string()
}

fn default_date() -> String {
    "today".to_string()
}

impl ReportParams {
    /// Resolve period, date and segment against today's UTC date.
    pub fn to_query(&self) -> Result<ReportQuery, ApiError> {
        ReportQuery::parse(
            self.id_site,
            &self.period,
            &self.date,
            self.segment.as_deref(),
            chrono::Utc::now().date_naive(),
        )
    }

    /// `token_auth` wins over an `Authorization: Bearer` header.
    fn token(&self, headers: &HeaderMap) -> Option<String> {
        self.token_auth
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| bearer_token(headers))
            .map(str::to_string)
    }
}

fn json_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

/// Wrapper giving atomic scalar results an object shape.
#[derive(Serialize)]
struct ValueBody<'a, T> {
    value: &'a T,
}

fn scalar_body<T: Serialize>(result: &PeriodResult<T>) -> Result<String, ApiError> {
    let body = match result {
        PeriodResult::Single(value) => serde_json::to_string(&ValueBody { value }),
        PeriodResult::Composite(_) => serde_json::to_string(result),
    };
    body.map_err(|e| ApiError::Internal(format!("JSON serialization failed: {e}")))
}

/// GET /api/VisitsSummary.get: Base and derived visit metrics.
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ReportParams>,
) -> Result<Response, ApiError> {
    let query = params.to_query()?;
    let columns = parse_column_list(params.columns.as_deref().unwrap_or(""))?;
    let token = params.token(&headers);

    // Authorize before the cache so cached data never bypasses access rules.
    let grant = state.authorize(token.as_deref(), query.site_id)?;

    let cache_key = query.cache_key("get", &columns);
    if let Some(cached) = state.query_cache.get(&cache_key) {
        state.cache_hits_total.fetch_add(1, Ordering::Relaxed);
        return Ok(json_response(cached));
    }

    let summary = state.summary.clone();
    let table = tokio::task::spawn_blocking(move || summary.get_granted(grant, &query, &columns))
        .await
        .map_err(|e| ApiError::Internal(format!("Query task panicked: {e}")))??;

    let body = serde_json::to_string(&table)
        .map_err(|e| ApiError::Internal(format!("JSON serialization failed: {e}")))?;
    state.query_cache.insert(cache_key, body.clone());
    state.reports_served_total.fetch_add(1, Ordering::Relaxed);
    Ok(json_response(body))
}

/// Run a single-metric report on a blocking thread and render it.
async fn scalar_report<T, F>(
    state: Arc<AppState>,
    headers: &HeaderMap,
    params: &ReportParams,
    report: F,
) -> Result<Response, ApiError>
where
    T: Serialize + Send + 'static,
    F: Fn(&VisitsSummary, ViewGrant, &ReportQuery) -> Result<PeriodResult<T>, ApiError>
        + Send
        + 'static,
{
    let query = params.to_query()?;
    let token = params.token(headers);
    let grant = state.authorize(token.as_deref(), query.site_id)?;

    let summary = state.summary.clone();
    let result = tokio::task::spawn_blocking(move || report(&summary, grant, &query))
        .await
        .map_err(|e| ApiError::Internal(format!("Query task panicked: {e}")))??;

    let body = scalar_body(&result)?;
    state.reports_served_total.fetch_add(1, Ordering::Relaxed);
    Ok(json_response(body))
}

/// [`scalar_report`] for one archived base metric.
async fn metric_report(
    state: Arc<AppState>,
    headers: &HeaderMap,
    params: &ReportParams,
    metric: Metric,
) -> Result<Response, ApiError> {
    scalar_report::<MetricValue, _>(state, headers, params, move |summary, grant, query| {
        summary.get_metric_granted(grant, query, metric)
    })
    .await
}

/// GET /api/VisitsSummary.getVisits: Number of visits.
pub async fn get_visits(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ReportParams>,
) -> Result<Response, ApiError> {
    metric_report(state, &headers, &params, Metric::Visits).await
}

/// GET /api/VisitsSummary.getUniqueVisitors: Number of unique visitors.
pub async fn get_unique_visitors(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ReportParams>,
) -> Result<Response, ApiError> {
    metric_report(state, &headers, &params, Metric::UniqueVisitors).await
}

/// GET /api/VisitsSummary.getActions: Number of actions.
pub async fn get_actions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ReportParams>,
) -> Result<Response, ApiError> {
    metric_report(state, &headers, &params, Metric::Actions).await
}

/// GET /api/VisitsSummary.getMaxActions: Most actions in a single visit.
pub async fn get_max_actions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ReportParams>,
) -> Result<Response, ApiError> {
    metric_report(state, &headers, &params, Metric::MaxActions).await
}

/// GET /api/VisitsSummary.getBounceCount: Number of single-action visits.
pub async fn get_bounce_count(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ReportParams>,
) -> Result<Response, ApiError> {
    metric_report(state, &headers, &params, Metric::BounceCount).await
}

/// GET /api/VisitsSummary.getVisitsConverted: Visits that converted a goal.
pub async fn get_visits_converted(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ReportParams>,
) -> Result<Response, ApiError> {
    metric_report(state, &headers, &params, Metric::VisitsConverted).await
}

/// GET /api/VisitsSummary.getSumVisitsLength: Total time on site, in seconds.
pub async fn get_sum_visits_length(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ReportParams>,
) -> Result<Response, ApiError> {
    metric_report(state, &headers, &params, Metric::SumVisitLength).await
}

/// GET /api/VisitsSummary.getSumVisitsLengthPretty: Total time on site, formatted.
pub async fn get_sum_visits_length_pretty(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ReportParams>,
) -> Result<Response, ApiError> {
    scalar_report(
        state,
        &headers,
        &params,
        VisitsSummary::get_sum_visits_length_pretty_granted,
    )
    .await
}
