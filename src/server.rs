use crate::api::errors::ApiError;
use crate::api::visits::{self, AppState};
use axum::extract::State;
use axum::http::{header, HeaderValue, Method, Uri};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let report_cors = build_report_cors(state.dashboard_origin.as_deref());

    let report_routes = Router::new()
        .route("/VisitsSummary.get", get(visits::get_summary))
        .route("/VisitsSummary.getVisits", get(visits::get_visits))
        .route(
            "/VisitsSummary.getUniqueVisitors",
            get(visits::get_unique_visitors),
        )
        .route("/VisitsSummary.getActions", get(visits::get_actions))
        .route("/VisitsSummary.getMaxActions", get(visits::get_max_actions))
        .route(
            "/VisitsSummary.getBounceCount",
            get(visits::get_bounce_count),
        )
        .route(
            "/VisitsSummary.getVisitsConverted",
            get(visits::get_visits_converted),
        )
        .route(
            "/VisitsSummary.getSumVisitsLength",
            get(visits::get_sum_visits_length),
        )
        .route(
            "/VisitsSummary.getSumVisitsLengthPretty",
            get(visits::get_sum_visits_length_pretty),
        )
        .layer(report_cors);

    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
        .route("/metrics", get(prometheus_metrics))
        .nest("/api", report_routes)
        .fallback(not_found)
        .layer(axum::middleware::map_response(add_security_headers))
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            std::time::Duration::from_secs(30),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Inject OWASP-recommended security headers on every HTTP response.
async fn add_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        "referrer-policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    // Report bodies are per-token; keep them out of shared caches.
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// CORS for report routes. Reports are read-only, so only GET is allowed.
fn build_report_cors(dashboard_origin: Option<&str>) -> CorsLayer {
    let methods = [Method::GET, Method::OPTIONS];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION];
    match dashboard_origin.map(str::parse::<HeaderValue>) {
        Some(Ok(origin)) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(methods)
            .allow_headers(headers),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Invalid dashboard origin, allowing any origin");
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(methods)
                .allow_headers(headers)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers),
    }
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("no route for {}", uri.path()))
}

/// GET /health: Simple health check endpoint.
async fn health_check() -> &'static str {
    "ok"
}

/// GET /health/detailed: Detailed health check with system info.
async fn detailed_health_check(
    State(state): State<Arc<AppState>>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "cache_entries": state.query_cache.len(),
        "access_open": state.access_open,
    }))
}

/// GET /metrics: Prometheus-compatible metrics endpoint.
async fn prometheus_metrics(
    State(state): State<Arc<AppState>>,
) -> ([(header::HeaderName, &'static str); 1], String) {
    use std::fmt::Write;
    use std::sync::atomic::Ordering;

    let served = state.reports_served_total.load(Ordering::Relaxed);
    let cache_hits = state.cache_hits_total.load(Ordering::Relaxed);
    let denied = state.access_denied_total.load(Ordering::Relaxed);
    let cache_entries = state.query_cache.len();

    let mut out = String::with_capacity(512);
    let _ = writeln!(
        out,
        "# HELP visits_summary_reports_served_total Reports computed from the archive since startup"
    );
    let _ = writeln!(out, "# TYPE visits_summary_reports_served_total counter");
    let _ = writeln!(out, "visits_summary_reports_served_total {served}");
    let _ = writeln!(
        out,
        "# HELP visits_summary_cache_hits_total Reports answered from the report cache since startup"
    );
    let _ = writeln!(out, "# TYPE visits_summary_cache_hits_total counter");
    let _ = writeln!(out, "visits_summary_cache_hits_total {cache_hits}");
    let _ = writeln!(
        out,
        "# HELP visits_summary_access_denied_total Report requests rejected for missing view access"
    );
    let _ = writeln!(out, "# TYPE visits_summary_access_denied_total counter");
    let _ = writeln!(out, "visits_summary_access_denied_total {denied}");
    let _ = writeln!(
        out,
        "# HELP visits_summary_cache_entries Number of cached report bodies"
    );
    let _ = writeln!(out, "# TYPE visits_summary_cache_entries gauge");
    let _ = writeln!(out, "visits_summary_cache_entries {cache_entries}");

    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], out)
}
