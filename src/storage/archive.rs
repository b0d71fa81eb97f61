use crate::query::columns::Metric;
use crate::query::period::PeriodSpan;
use crate::query::segment::{segment_key, Segment};
use crate::query::table::{MetricRow, MetricValue, PeriodResult, ResultTable};
use duckdb::Connection;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Numeric site identifier.
pub type SiteId = u32;

/// Errors raised by an archive backend.
#[derive(Debug)]
pub enum ArchiveError {
    Database(duckdb::Error),
    /// Derived metrics are computed at query time and cannot be stored.
    NotStorable(Metric),
    /// NaN and infinities have no JSON representation.
    NotFinite { metric: Metric, value: f64 },
}

impl std::fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Database(e) => write!(f, "Archive database error: {e}"),
            Self::NotStorable(m) => write!(f, "Metric {m} is derived and cannot be archived"),
            Self::NotFinite { metric, value } => {
                write!(f, "Metric {metric} has non-finite value {value}")
            }
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Database(e) => Some(e),
            Self::NotStorable(_) | Self::NotFinite { .. } => None,
        }
    }
}

impl From<duckdb::Error> for ArchiveError {
    fn from(e: duckdb::Error) -> Self {
        Self::Database(e)
    }
}

/// Read access to pre-aggregated numeric metrics.
pub trait Archive: Send + Sync {
    /// Fetch `columns` for one period span. Every requested base column is
    /// present in the returned row, in request order.
    fn fetch_row(
        &self,
        site_id: SiteId,
        span: &PeriodSpan,
        segment: Option<&Segment>,
        columns: &[Metric],
    ) -> Result<MetricRow, ArchiveError>;

    /// Fetch `columns` for every span, keeping the atomic/composite shape.
    fn fetch_table(
        &self,
        site_id: SiteId,
        spans: &PeriodResult<PeriodSpan>,
        segment: Option<&Segment>,
        columns: &[Metric],
    ) -> Result<ResultTable, ArchiveError> {
        spans.try_map(|span| self.fetch_row(site_id, span, segment, columns))
    }
}

/// Archive backed by the `archive_numeric` DuckDB table.
#[derive(Clone)]
pub struct DuckDbArchive {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbArchive {
    pub const fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Open (or create) an on-disk archive and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let conn = Connection::open(path)?;
        crate::storage::migrations::run_migrations(&conn)?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// In-memory archive with the schema applied.
    pub fn open_in_memory() -> Result<Self, ArchiveError> {
        let conn = Connection::open_in_memory()?;
        crate::storage::migrations::run_migrations(&conn)?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// Store or overwrite one base metric value.
    pub fn record(
        &self,
        site_id: SiteId,
        span: &PeriodSpan,
        segment: Option<&Segment>,
        metric: Metric,
        value: f64,
    ) -> Result<(), ArchiveError> {
        check_storable(metric, value)?;
        let conn = self.conn.lock();
        insert_value(&conn, site_id, span, &segment_key(segment), metric, value)
    }

    /// Store every value in one transaction. Nothing is written if any value
    /// is rejected.
    pub fn record_all(&self, values: &[ArchivedValue]) -> Result<usize, ArchiveError> {
        for v in values {
            check_storable(v.metric, v.value)?;
        }
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for v in values {
            insert_value(
                &tx,
                v.site_id,
                &v.span,
                &segment_key(v.segment.as_ref()),
                v.metric,
                v.value,
            )?;
        }
        tx.commit()?;
        Ok(values.len())
    }
}

/// One base metric value addressed by site, span and segment.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedValue {
    pub site_id: SiteId,
    pub span: PeriodSpan,
    pub segment: Option<Segment>,
    pub metric: Metric,
    pub value: f64,
}

fn check_storable(metric: Metric, value: f64) -> Result<(), ArchiveError> {
    if metric.is_derived() {
        return Err(ArchiveError::NotStorable(metric));
    }
    if !value.is_finite() {
        return Err(ArchiveError::NotFinite { metric, value });
    }
    Ok(())
}

fn insert_value(
    conn: &Connection,
    site_id: SiteId,
    span: &PeriodSpan,
    segment_hash: &str,
    metric: Metric,
    value: f64,
) -> Result<(), ArchiveError> {
    conn.execute(
        "INSERT OR REPLACE INTO archive_numeric
             (site_id, period, date1, date2, segment_hash, name, value)
         VALUES (?, ?, CAST(? AS DATE), CAST(? AS DATE), ?, ?, ?)",
        duckdb::params![
            site_id,
            span.period.as_str(),
            span.start.to_string(),
            span.end.to_string(),
            segment_hash,
            metric.as_str(),
            value
        ],
    )?;
    Ok(())
}

impl Archive for DuckDbArchive {
    fn fetch_row(
        &self,
        site_id: SiteId,
        span: &PeriodSpan,
        segment: Option<&Segment>,
        columns: &[Metric],
    ) -> Result<MetricRow, ArchiveError> {
        tracing::debug!(
            site_id,
            period = %span.period,
            label = %span.label(),
            columns = columns.len(),
            "Fetching archived metrics"
        );

        let stored: HashMap<String, f64> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare(
                "SELECT name, value FROM archive_numeric
                 WHERE site_id = ? AND period = ?
                   AND date1 = CAST(? AS DATE) AND date2 = CAST(? AS DATE)
                   AND segment_hash = ?",
            )?;
            let rows = stmt.query_map(
                duckdb::params![
                    site_id,
                    span.period.as_str(),
                    span.start.to_string(),
                    span.end.to_string(),
                    segment_key(segment)
                ],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
            )?;
            rows.collect::<Result<_, _>>()?
        };

        Ok(columns
            .iter()
            .filter(|m| !m.is_derived())
            .map(|m| {
                let value = stored
                    .get(m.as_str())
                    .map_or(MetricValue::ZERO, |v| MetricValue::from_f64(*v));
                (*m, value)
            })
            .collect())
    }
}
