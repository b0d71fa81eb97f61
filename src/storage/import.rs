use crate::query::columns::Metric;
use crate::query::period::{resolve, DateSpec, Period};
use crate::query::segment::Segment;
use crate::query::table::PeriodResult;
use crate::storage::archive::{ArchiveError, ArchivedValue, DuckDbArchive, SiteId};
use chrono::NaiveDate;
use serde::Deserialize;
use std::io::BufRead;

/// One line of an archive import file.
///
/// ```json
/// {"idSite": 1, "period": "day", "date": "2024-01-15", "name": "nb_visits", "value": 42}
/// ```
#[derive(Debug, Deserialize)]
struct ImportLine {
    #[serde(rename = "idSite")]
    site_id: SiteId,
    period: String,
    date: String,
    #[serde(default)]
    segment: Option<String>,
    name: String,
    value: f64,
}

#[derive(Debug)]
pub enum ImportError {
    Io(std::io::Error),
    /// A line that could not be turned into an archived value (1-based).
    InvalidLine { line: usize, message: String },
    Archive(ArchiveError),
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Failed to read import file: {e}"),
            Self::InvalidLine { line, message } => write!(f, "line {line}: {message}"),
            Self::Archive(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::InvalidLine { .. } => None,
            Self::Archive(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ArchiveError> for ImportError {
    fn from(e: ArchiveError) -> Self {
        Self::Archive(e)
    }
}

fn parse_line(raw: &str, today: NaiveDate) -> Result<ArchivedValue, String> {
    let line: ImportLine = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let period: Period = line.period.parse().map_err(|e| format!("{e}"))?;
    let date = DateSpec::parse(&line.date, today).map_err(|e| format!("{e}"))?;
    let span = match resolve(period, date, today).map_err(|e| format!("{e}"))? {
        PeriodResult::Single(span) => span,
        PeriodResult::Composite(_) => {
            return Err(format!(
                "date '{}' covers several {period} periods",
                line.date
            ))
        }
    };
    let metric: Metric = line.name.parse().map_err(|e| format!("{e}"))?;
    if metric.is_derived() {
        return Err(format!("{metric} is derived and cannot be imported"));
    }
    let segment = Segment::parse(line.segment.as_deref()).map_err(|e| format!("{e}"))?;
    Ok(ArchivedValue {
        site_id: line.site_id,
        span,
        segment,
        metric,
        value: line.value,
    })
}

/// Load JSON Lines archive values into `archive`.
///
/// Blank lines are skipped. The whole file is validated before anything is
/// written, and the write is a single transaction. Returns the number of
/// values stored.
pub fn import_json_lines<R: BufRead>(
    archive: &DuckDbArchive,
    reader: R,
    today: NaiveDate,
) -> Result<usize, ImportError> {
    let mut values = Vec::new();
    for (i, raw) in reader.lines().enumerate() {
        let raw = raw?;
        if raw.trim().is_empty() {
            continue;
        }
        let value = parse_line(&raw, today).map_err(|message| ImportError::InvalidLine {
            line: i + 1,
            message,
        })?;
        values.push(value);
    }
    let written = archive.record_all(&values)?;
    tracing::info!(values = written, "Archive import completed");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::period::PeriodSpan;
    use crate::query::table::MetricValue;
    use crate::storage::archive::Archive;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 20).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_import_day_and_month_values() {
        let archive = DuckDbArchive::open_in_memory().unwrap();
        let input = r#"
{"idSite": 1, "period": "day", "date": "2024-01-15", "name": "nb_visits", "value": 42}
{"idSite": 1, "period": "month", "date": "2024-01-01", "name": "nb_uniq_visitors", "value": 30}

{"idSite": 1, "period": "day", "date": "2024-01-15", "segment": "browserCode==FF", "name": "nb_visits", "value": 5}
"#;
        let written = import_json_lines(&archive, input.as_bytes(), today()).unwrap();
        assert_eq!(written, 3);

        let day = PeriodSpan {
            period: Period::Day,
            start: date("2024-01-15"),
            end: date("2024-01-15"),
        };
        let row = archive.fetch_row(1, &day, None, &[Metric::Visits]).unwrap();
        assert_eq!(row.get(Metric::Visits), Some(MetricValue::Int(42)));

        let firefox = Segment::parse(Some("browserCode==FF")).unwrap();
        let row = archive
            .fetch_row(1, &day, firefox.as_ref(), &[Metric::Visits])
            .unwrap();
        assert_eq!(row.get(Metric::Visits), Some(MetricValue::Int(5)));

        let month = PeriodSpan {
            period: Period::Month,
            start: date("2024-01-01"),
            end: date("2024-01-31"),
        };
        let row = archive
            .fetch_row(1, &month, None, &[Metric::UniqueVisitors])
            .unwrap();
        assert_eq!(row.get(Metric::UniqueVisitors), Some(MetricValue::Int(30)));
    }

    #[test]
    fn test_import_range_and_relative_dates() {
        let archive = DuckDbArchive::open_in_memory().unwrap();
        let input = concat!(
            r#"{"idSite": 2, "period": "range", "date": "2024-01-01,2024-01-10", "name": "nb_actions", "value": 7}"#,
            "\n",
            r#"{"idSite": 2, "period": "day", "date": "yesterday", "name": "nb_actions", "value": 3}"#,
        );
        assert_eq!(
            import_json_lines(&archive, input.as_bytes(), today()).unwrap(),
            2
        );
        let yesterday = PeriodSpan {
            period: Period::Day,
            start: date("2024-01-19"),
            end: date("2024-01-19"),
        };
        let row = archive
            .fetch_row(2, &yesterday, None, &[Metric::Actions])
            .unwrap();
        assert_eq!(row.get(Metric::Actions), Some(MetricValue::Int(3)));
    }

    #[test]
    fn test_invalid_line_reports_position_and_writes_nothing() {
        let archive = DuckDbArchive::open_in_memory().unwrap();
        let input = concat!(
            r#"{"idSite": 1, "period": "day", "date": "2024-01-15", "name": "nb_visits", "value": 1}"#,
            "\n",
            r#"{"idSite": 1, "period": "day", "date": "2024-01-15", "name": "nb_pageviews", "value": 1}"#,
        );
        let err = import_json_lines(&archive, input.as_bytes(), today()).unwrap_err();
        match err {
            ImportError::InvalidLine { line, message } => {
                assert_eq!(line, 2);
                assert_eq!(message, "unknown metric 'nb_pageviews'");
            }
            other => panic!("unexpected error: {other}"),
        }

        let day = PeriodSpan {
            period: Period::Day,
            start: date("2024-01-15"),
            end: date("2024-01-15"),
        };
        let row = archive.fetch_row(1, &day, None, &[Metric::Visits]).unwrap();
        assert_eq!(row.get(Metric::Visits), Some(MetricValue::Int(0)));
    }

    #[test]
    fn test_rejected_lines() {
        let cases = [
            r#"{"idSite": 1, "period": "day", "date": "2024-01-15", "name": "bounce_rate", "value": 50}"#,
            r#"{"idSite": 1, "period": "day", "date": "last3", "name": "nb_visits", "value": 1}"#,
            r#"{"idSite": 1, "period": "range", "date": "2024-01-15", "name": "nb_visits", "value": 1}"#,
            r#"{"idSite": 1, "period": "day", "date": "2024-01-15", "name": "nb_visits"}"#,
            "not json",
        ];
        for raw in cases {
            assert!(parse_line(raw, today()).is_err(), "{raw}");
        }
    }
}
