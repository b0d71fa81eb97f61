use crate::api::auth::{AccessControl, AccessDenied};
use crate::api::errors::ApiError;
use crate::query::columns::Metric;
use crate::query::derived::apply_derived;
use crate::query::period::{resolve, DateSpec, Period, PeriodSpan};
use crate::query::pretty::pretty_metric_duration;
use crate::query::request::MetricRequest;
use crate::query::segment::{segment_key, Segment};
use crate::query::table::{MetricValue, PeriodResult, ResultTable};
use crate::storage::archive::{Archive, SiteId};
use chrono::NaiveDate;
use std::fmt::Write;
use std::sync::Arc;

/// A validated report request: which site, which spans, which segment.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportQuery {
    pub site_id: SiteId,
    pub period: Period,
    pub spans: PeriodResult<PeriodSpan>,
    pub segment: Option<Segment>,
}

impl ReportQuery {
    /// Parse raw request parameters, anchoring relative dates on `today`.
    pub fn parse(
        site_id: SiteId,
        period: &str,
        date: &str,
        segment: Option<&str>,
        today: NaiveDate,
    ) -> Result<Self, ApiError> {
        let period: Period = period.parse()?;
        let date = DateSpec::parse(date, today)?;
        let spans = resolve(period, date, today)?;
        let segment = Segment::parse(segment)?;
        Ok(Self {
            site_id,
            period,
            spans,
            segment,
        })
    }

    /// Cache key covering everything that changes the result of `report`.
    pub fn cache_key(&self, report: &str, columns: &[Metric]) -> String {
        let mut key = format!("{report}:{}:{}", self.site_id, self.period);
        for span in self.spans.values() {
            let _ = write!(key, ":{}..{}", span.start, span.end);
        }
        let _ = write!(key, ":{}:", segment_key(self.segment.as_ref()));
        for (i, metric) in columns.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            key.push_str(metric.as_str());
        }
        key
    }
}

/// Proof that the caller's view access to one site has been checked.
///
/// Only [`VisitsSummary::authorize`] creates one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewGrant {
    site_id: SiteId,
}

impl ViewGrant {
    pub const fn site_id(self) -> SiteId {
        self.site_id
    }

    fn covers(self, query: &ReportQuery) -> Result<(), ApiError> {
        if self.site_id == query.site_id {
            Ok(())
        } else {
            Err(AccessDenied {
                site_id: query.site_id,
            }
            .into())
        }
    }
}

/// Core visit metrics for a site: visits, unique visitors, actions, time on
/// site, bounces and converted visits, plus the ratios derived from them.
///
/// Every token-taking operation checks view access itself. The `_granted`
/// variants take a [`ViewGrant`] from an earlier [`authorize`](Self::authorize)
/// so callers that must check first do not check twice.
#[derive(Clone)]
pub struct VisitsSummary {
    archive: Arc<dyn Archive>,
    access: Arc<dyn AccessControl>,
    unique_visitors_year_and_range: bool,
}

impl VisitsSummary {
    pub fn new(
        archive: Arc<dyn Archive>,
        access: Arc<dyn AccessControl>,
        unique_visitors_year_and_range: bool,
    ) -> Self {
        Self {
            archive,
            access,
            unique_visitors_year_and_range,
        }
    }

    pub fn authorize(&self, token: Option<&str>, site_id: SiteId) -> Result<ViewGrant, ApiError> {
        self.access.check_view_access(token, site_id)?;
        Ok(ViewGrant { site_id })
    }

    /// Resolve requested columns for a period.
    pub fn normalize(&self, period: Period, columns: &[Metric]) -> MetricRequest {
        MetricRequest::normalize(
            columns,
            period.unique_visitors_enabled(self.unique_visitors_year_and_range),
        )
    }

    /// Base and derived metrics for every requested span.
    ///
    /// An empty `columns` list returns every default metric.
    pub fn get(
        &self,
        token: Option<&str>,
        query: &ReportQuery,
        columns: &[Metric],
    ) -> Result<ResultTable, ApiError> {
        let grant = self.authorize(token, query.site_id)?;
        self.get_granted(grant, query, columns)
    }

    pub fn get_granted(
        &self,
        grant: ViewGrant,
        query: &ReportQuery,
        columns: &[Metric],
    ) -> Result<ResultTable, ApiError> {
        grant.covers(query)?;
        let request = self.normalize(query.period, columns);
        let mut table = self.archive.fetch_table(
            query.site_id,
            &query.spans,
            query.segment.as_ref(),
            &request.fetch,
        )?;
        apply_derived(&mut table, &request);
        Ok(table)
    }

    /// Raw archived value of one base metric per span.
    pub fn get_metric_granted(
        &self,
        grant: ViewGrant,
        query: &ReportQuery,
        metric: Metric,
    ) -> Result<PeriodResult<MetricValue>, ApiError> {
        grant.covers(query)?;
        if metric.is_derived() {
            return Err(ApiError::BadRequest(format!(
                "{metric} is not an archived metric"
            )));
        }
        let table = self.archive.fetch_table(
            query.site_id,
            &query.spans,
            query.segment.as_ref(),
            &[metric],
        )?;
        Ok(table.map(|row| row.get(metric).unwrap_or(MetricValue::ZERO)))
    }

    fn get_numeric(
        &self,
        token: Option<&str>,
        query: &ReportQuery,
        metric: Metric,
    ) -> Result<PeriodResult<MetricValue>, ApiError> {
        let grant = self.authorize(token, query.site_id)?;
        self.get_metric_granted(grant, query, metric)
    }

    pub fn get_visits(
        &self,
        token: Option<&str>,
        query: &ReportQuery,
    ) -> Result<PeriodResult<MetricValue>, ApiError> {
        self.get_numeric(token, query, Metric::Visits)
    }

    pub fn get_unique_visitors(
        &self,
        token: Option<&str>,
        query: &ReportQuery,
    ) -> Result<PeriodResult<MetricValue>, ApiError> {
        self.get_numeric(token, query, Metric::UniqueVisitors)
    }

    pub fn get_actions(
        &self,
        token: Option<&str>,
        query: &ReportQuery,
    ) -> Result<PeriodResult<MetricValue>, ApiError> {
        self.get_numeric(token, query, Metric::Actions)
    }

    pub fn get_max_actions(
        &self,
        token: Option<&str>,
        query: &ReportQuery,
    ) -> Result<PeriodResult<MetricValue>, ApiError> {
        self.get_numeric(token, query, Metric::MaxActions)
    }

    pub fn get_bounce_count(
        &self,
        token: Option<&str>,
        query: &ReportQuery,
    ) -> Result<PeriodResult<MetricValue>, ApiError> {
        self.get_numeric(token, query, Metric::BounceCount)
    }

    pub fn get_visits_converted(
        &self,
        token: Option<&str>,
        query: &ReportQuery,
    ) -> Result<PeriodResult<MetricValue>, ApiError> {
        self.get_numeric(token, query, Metric::VisitsConverted)
    }

    pub fn get_sum_visits_length(
        &self,
        token: Option<&str>,
        query: &ReportQuery,
    ) -> Result<PeriodResult<MetricValue>, ApiError> {
        self.get_numeric(token, query, Metric::SumVisitLength)
    }

    /// Total time on site as a human-readable duration, per span.
    pub fn get_sum_visits_length_pretty(
        &self,
        token: Option<&str>,
        query: &ReportQuery,
    ) -> Result<PeriodResult<String>, ApiError> {
        let grant = self.authorize(token, query.site_id)?;
        self.get_sum_visits_length_pretty_granted(grant, query)
    }

    pub fn get_sum_visits_length_pretty_granted(
        &self,
        grant: ViewGrant,
        query: &ReportQuery,
    ) -> Result<PeriodResult<String>, ApiError> {
        Ok(self
            .get_metric_granted(grant, query, Metric::SumVisitLength)?
            .map(pretty_metric_duration))
    }
}
