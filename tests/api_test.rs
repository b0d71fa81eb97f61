use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use chrono::NaiveDate;
use http_body_util::BodyExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use visits_summary::api::auth::{hash_token, AccessControl, AccessDenied, TokenAccess};
use visits_summary::api::visits::AppState;
use visits_summary::config::TokenGrant;
use visits_summary::query::cache::QueryCache;
use visits_summary::query::columns::Metric;
use visits_summary::query::period::{Period, PeriodSpan};
use visits_summary::query::segment::Segment;
use visits_summary::query::summary::VisitsSummary;
use visits_summary::server::build_router;
use visits_summary::storage::archive::{DuckDbArchive, SiteId};
use visits_summary::storage::import::import_json_lines;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn day(s: &str) -> PeriodSpan {
    PeriodSpan {
        period: Period::Day,
        start: date(s),
        end: date(s),
    }
}

fn seed_day(archive: &DuckDbArchive, site_id: u32, span: &PeriodSpan, segment: Option<&Segment>, values: [f64; 6]) {
    let metrics = [
        Metric::Visits,
        Metric::Actions,
        Metric::VisitsConverted,
        Metric::BounceCount,
        Metric::SumVisitLength,
        Metric::MaxActions,
    ];
    for (metric, value) in metrics.into_iter().zip(values) {
        archive.record(site_id, span, segment, metric, value).unwrap();
    }
}

/// Site 1 has three days of data and is readable anonymously.
/// Site 2 requires the token "secret".
fn make_app() -> (Router, Arc<AppState>) {
    let archive = DuckDbArchive::open_in_memory().unwrap();
    seed_day(&archive, 1, &day("2024-01-01"), None, [3.0, 10.0, 1.0, 1.0, 190.0, 6.0]);
    seed_day(&archive, 1, &day("2024-01-02"), None, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    seed_day(&archive, 1, &day("2024-01-03"), None, [2.0, 7.0, 0.0, 0.0, 3_725.0, 5.0]);
    let firefox = Segment::parse(Some("browserCode==FF")).unwrap();
    seed_day(&archive, 1, &day("2024-01-01"), firefox.as_ref(), [1.0, 1.0, 0.0, 1.0, 10.0, 1.0]);
    seed_day(&archive, 2, &day("2024-01-01"), None, [8.0, 16.0, 2.0, 4.0, 800.0, 9.0]);
    archive
        .record(
            1,
            &PeriodSpan {
                period: Period::Month,
                start: date("2024-01-01"),
                end: date("2024-01-31"),
            },
            None,
            Metric::UniqueVisitors,
            4.0,
        )
        .unwrap();

    let access = TokenAccess::new(
        vec![1],
        vec![TokenGrant {
            token_sha256: hash_token("secret"),
            sites: vec![2],
        }],
    );
    let summary = VisitsSummary::new(Arc::new(archive), Arc::new(access), false);
    let state = Arc::new(AppState::new(summary, QueryCache::new(60, 100), None, false));
    (build_router(Arc::clone(&state)), state)
}

async fn get(app: &Router, uri: &str) -> Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn test_get_default_columns() {
    let (app, _) = make_app();
    let response = get(&app, "/api/VisitsSummary.get?idSite=1&period=day&date=2024-01-01").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        r#"{"nb_visits":3,"nb_actions":10,"nb_visits_converted":1,"bounce_count":1,"sum_visit_length":190,"max_actions":6,"bounce_rate":33,"nb_actions_per_visit":3.3,"avg_time_on_site":63}"#
    );
}

#[tokio::test]
async fn test_get_derived_column_only() {
    let (app, _) = make_app();
    let response = get(
        &app,
        "/api/VisitsSummary.get?idSite=1&date=2024-01-01&columns=bounce_rate",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"bounce_rate":33}"#);
}

#[tokio::test]
async fn test_get_explicit_columns_keep_request_order() {
    let (app, _) = make_app();
    let response = get(
        &app,
        "/api/VisitsSummary.get?idSite=1&date=2024-01-01&columns=avg_time_on_site,nb_visits,max_actions,nb_visits",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        r#"{"nb_visits":3,"max_actions":6,"avg_time_on_site":63}"#
    );
}

#[tokio::test]
async fn test_get_composite_dates() {
    let (app, _) = make_app();
    let response = get(
        &app,
        "/api/VisitsSummary.get?idSite=1&period=day&date=2024-01-01,2024-01-03&columns=nb_visits,nb_actions_per_visit",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        r#"{"2024-01-01":{"nb_visits":3,"nb_actions_per_visit":3.3},"2024-01-02":{"nb_visits":0,"nb_actions_per_visit":0},"2024-01-03":{"nb_visits":2,"nb_actions_per_visit":3.5}}"#
    );
}

#[tokio::test]
async fn test_get_month_includes_unique_visitors() {
    let (app, _) = make_app();
    let response = get(&app, "/api/VisitsSummary.get?idSite=1&period=month&date=2024-01-15").await;
    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["nb_uniq_visitors"], 4);
    assert_eq!(json["nb_visits"], 0);
    assert_eq!(json["bounce_rate"], 0);
}

#[tokio::test]
async fn test_get_segment_reads_its_own_rows() {
    let (app, _) = make_app();
    let response = get(
        &app,
        "/api/VisitsSummary.get?idSite=1&date=2024-01-01&segment=browserCode%3D%3DFF&columns=nb_visits,bounce_rate",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        r#"{"nb_visits":1,"bounce_rate":100}"#
    );
}

#[tokio::test]
async fn test_unknown_column_is_bad_request() {
    let (app, _) = make_app();
    let response = get(
        &app,
        "/api/VisitsSummary.get?idSite=1&date=2024-01-01&columns=nb_visits,nb_pageviews",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["error"], "unknown metric 'nb_pageviews'");
}

#[tokio::test]
async fn test_invalid_period_and_date_are_bad_requests() {
    let (app, _) = make_app();
    let response = get(&app, "/api/VisitsSummary.getVisits?idSite=1&period=decade").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = get(
        &app,
        "/api/VisitsSummary.getVisits?idSite=1&period=range&date=2024-01-01",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_access_denied_without_token() {
    let (app, state) = make_app();
    let response = get(&app, "/api/VisitsSummary.get?idSite=2&date=2024-01-01").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(state.query_cache.is_empty());

    let response = get(
        &app,
        "/api/VisitsSummary.getVisits?idSite=2&date=2024-01-01&token_auth=wrong",
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_token_grants_access() {
    let (app, _) = make_app();
    let response = get(
        &app,
        "/api/VisitsSummary.getVisits?idSite=2&date=2024-01-01&token_auth=secret",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"value":8}"#);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/VisitsSummary.getBounceCount?idSite=2&date=2024-01-01")
                .header("authorization", "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"value":4}"#);
}

#[tokio::test]
async fn test_cached_body_still_checks_access() {
    let (app, state) = make_app();
    let uri = "/api/VisitsSummary.get?idSite=2&date=2024-01-01&token_auth=secret";
    let first = body_text(get(&app, uri).await).await;
    assert_eq!(state.query_cache.len(), 1);
    let second = body_text(get(&app, uri).await).await;
    assert_eq!(first, second);

    let response = get(&app, "/api/VisitsSummary.get?idSite=2&date=2024-01-01").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_scalar_reports() {
    let (app, _) = make_app();
    let cases = [
        ("getVisits", "3"),
        ("getActions", "10"),
        ("getMaxActions", "6"),
        ("getBounceCount", "1"),
        ("getVisitsConverted", "1"),
        ("getSumVisitsLength", "190"),
        ("getUniqueVisitors", "0"),
    ];
    for (method, expected) in cases {
        let uri = format!("/api/VisitsSummary.{method}?idSite=1&date=2024-01-01");
        let response = get(&app, &uri).await;
        assert_eq!(response.status(), StatusCode::OK, "{method}");
        assert_eq!(
            body_text(response).await,
            format!(r#"{{"value":{expected}}}"#),
            "{method}"
        );
    }
}

#[tokio::test]
async fn test_scalar_report_composite() {
    let (app, _) = make_app();
    let response = get(
        &app,
        "/api/VisitsSummary.getVisits?idSite=1&date=2024-01-01,2024-01-02",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        r#"{"2024-01-01":3,"2024-01-02":0}"#
    );
}

#[tokio::test]
async fn test_sum_visits_length_pretty() {
    let (app, _) = make_app();
    let response = get(
        &app,
        "/api/VisitsSummary.getSumVisitsLengthPretty?idSite=1&date=2024-01-03",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, r#"{"value":"1 hours 2 min"}"#);

    let response = get(
        &app,
        "/api/VisitsSummary.getSumVisitsLengthPretty?idSite=1&date=2024-01-01,2024-01-02",
    )
    .await;
    assert_eq!(
        body_text(response).await,
        r#"{"2024-01-01":"3 min 10s","2024-01-02":"0s"}"#
    );
}

#[tokio::test]
async fn test_imported_values_are_reported() {
    let archive = DuckDbArchive::open_in_memory().unwrap();
    let input = r#"
{"idSite": 5, "period": "day", "date": "2024-02-10", "name": "nb_visits", "value": 4}
{"idSite": 5, "period": "day", "date": "2024-02-10", "name": "nb_actions", "value": 10}
{"idSite": 5, "period": "day", "date": "2024-02-10", "name": "bounce_count", "value": 1}
{"idSite": 5, "period": "day", "date": "2024-02-10", "name": "sum_visit_length", "value": 250}
"#;
    let written = import_json_lines(&archive, input.as_bytes(), date("2024-03-01")).unwrap();
    assert_eq!(written, 4);

    let summary = VisitsSummary::new(Arc::new(archive), Arc::new(TokenAccess::default()), false);
    let state = Arc::new(AppState::new(summary, QueryCache::new(60, 100), None, true));
    let app = build_router(state);

    let response = get(
        &app,
        "/api/VisitsSummary.get?idSite=5&date=2024-02-10&columns=nb_visits,nb_actions,bounce_rate,avg_time_on_site",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        r#"{"nb_visits":4,"nb_actions":10,"bounce_rate":25,"avg_time_on_site":63}"#
    );
}

struct CountingAccess(AtomicUsize);

impl AccessControl for CountingAccess {
    fn check_view_access(&self, _token: Option<&str>, _site_id: SiteId) -> Result<(), AccessDenied> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[tokio::test]
async fn test_each_request_checks_access_once() {
    let archive = DuckDbArchive::open_in_memory().unwrap();
    seed_day(&archive, 1, &day("2024-01-01"), None, [3.0, 10.0, 1.0, 1.0, 190.0, 6.0]);
    let access = Arc::new(CountingAccess(AtomicUsize::new(0)));
    let summary = VisitsSummary::new(
        Arc::new(archive),
        Arc::clone(&access) as Arc<dyn AccessControl>,
        false,
    );
    let state = Arc::new(AppState::new(summary, QueryCache::new(60, 100), None, false));
    let app = build_router(Arc::clone(&state));

    let response = get(&app, "/api/VisitsSummary.get?idSite=1&date=2024-01-01").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(access.0.load(Ordering::Relaxed), 1);

    let response = get(&app, "/api/VisitsSummary.getVisits?idSite=1&date=2024-01-01").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(access.0.load(Ordering::Relaxed), 2);

    let response = get(
        &app,
        "/api/VisitsSummary.getSumVisitsLengthPretty?idSite=1&date=2024-01-01",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(access.0.load(Ordering::Relaxed), 3);

    // A cache hit is still authorized, once
    let response = get(&app, "/api/VisitsSummary.get?idSite=1&date=2024-01-01").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(access.0.load(Ordering::Relaxed), 4);
    assert_eq!(state.cache_hits_total.load(Ordering::Relaxed), 1);
}
