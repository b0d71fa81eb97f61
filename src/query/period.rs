use crate::query::table::PeriodResult;
use chrono::{Datelike, Days, Months, NaiveDate};
use std::fmt;
use std::str::FromStr;

/// Upper bound on the number of sub-periods in one composite request.
pub const MAX_SUBPERIODS: usize = 1000;

/// Reporting granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
    Range,
}

impl Period {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
            Self::Range => "range",
        }
    }

    /// Whether unique visitors are archived for this granularity.
    ///
    /// Day, week and month always carry them; year and range only when the
    /// deployment opts in, since they are expensive to compute.
    pub const fn unique_visitors_enabled(self, year_and_range: bool) -> bool {
        match self {
            Self::Day | Self::Week | Self::Month => true,
            Self::Year | Self::Range => year_and_range,
        }
    }

    /// The span of this granularity containing `date`.
    fn containing(self, date: NaiveDate) -> Result<PeriodSpan, PeriodError> {
        let overflow = || PeriodError::InvalidDate(date.to_string());
        let (start, end) = match self {
            Self::Day | Self::Range => (date, date),
            Self::Week => {
                let offset = u64::from(date.weekday().num_days_from_monday());
                let start = date.checked_sub_days(Days::new(offset)).ok_or_else(overflow)?;
                let end = start.checked_add_days(Days::new(6)).ok_or_else(overflow)?;
                (start, end)
            }
            Self::Month => {
                let start = date.with_day(1).ok_or_else(overflow)?;
                let end = start
                    .checked_add_months(Months::new(1))
                    .and_then(|d| d.pred_opt())
                    .ok_or_else(overflow)?;
                (start, end)
            }
            Self::Year => {
                let start = NaiveDate::from_ymd_opt(date.year(), 1, 1).ok_or_else(overflow)?;
                let end = NaiveDate::from_ymd_opt(date.year(), 12, 31).ok_or_else(overflow)?;
                (start, end)
            }
        };
        Ok(PeriodSpan {
            period: self,
            start,
            end,
        })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            "range" => Ok(Self::Range),
            other => Err(PeriodError::UnknownPeriod(other.to_string())),
        }
    }
}

/// Errors from parsing or resolving a period/date pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    UnknownPeriod(String),
    InvalidDate(String),
    EndBeforeStart,
    RangeNeedsInterval,
    TooManyPeriods(usize),
}

impl fmt::Display for PeriodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPeriod(p) => write!(
                f,
                "Invalid period: {p}. Use 'day', 'week', 'month', 'year' or 'range'."
            ),
            Self::InvalidDate(d) => write!(
                f,
                "Invalid date: {d}. Use 'today', 'yesterday', 'YYYY-MM-DD', 'lastN', 'previousN' or 'YYYY-MM-DD,YYYY-MM-DD'."
            ),
            Self::EndBeforeStart => write!(f, "End date must not be before start date"),
            Self::RangeNeedsInterval => write!(
                f,
                "Period 'range' requires a date interval such as '2024-01-01,2024-01-31' or 'last7'"
            ),
            Self::TooManyPeriods(n) => write!(
                f,
                "Request covers {n} periods; at most {MAX_SUBPERIODS} are allowed"
            ),
        }
    }
}

impl std::error::Error for PeriodError {}

/// The `date` request parameter, with `today`/`yesterday` already anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateSpec {
    Single(NaiveDate),
    Last(u32),
    Previous(u32),
    Between(NaiveDate, NaiveDate),
}

fn parse_day(s: &str, today: NaiveDate) -> Result<NaiveDate, PeriodError> {
    match s {
        "today" => Ok(today),
        "yesterday" => today
            .pred_opt()
            .ok_or_else(|| PeriodError::InvalidDate(s.to_string())),
        _ => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map_err(|_| PeriodError::InvalidDate(s.to_string())),
    }
}

fn parse_count(s: &str, raw: &str) -> Result<u32, PeriodError> {
    let n: u32 = s
        .parse()
        .map_err(|_| PeriodError::InvalidDate(raw.to_string()))?;
    if n == 0 {
        return Err(PeriodError::InvalidDate(raw.to_string()));
    }
    if n as usize > MAX_SUBPERIODS {
        return Err(PeriodError::TooManyPeriods(n as usize));
    }
    Ok(n)
}

impl DateSpec {
    pub fn parse(raw: &str, today: NaiveDate) -> Result<Self, PeriodError> {
        let s = raw.trim();
        if let Some(n) = s.strip_prefix("last") {
            return parse_count(n, raw).map(Self::Last);
        }
        if let Some(n) = s.strip_prefix("previous") {
            return parse_count(n, raw).map(Self::Previous);
        }
        if let Some((a, b)) = s.split_once(',') {
            let start = parse_day(a.trim(), today)?;
            let end = parse_day(b.trim(), today)?;
            if end < start {
                return Err(PeriodError::EndBeforeStart);
            }
            return Ok(Self::Between(start, end));
        }
        parse_day(s, today).map(Self::Single)
    }
}

/// An inclusive date interval at a given granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeriodSpan {
    pub period: Period,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodSpan {
    /// Key used for this span in composite results.
    pub fn label(&self) -> String {
        match self.period {
            Period::Day => self.start.format("%Y-%m-%d").to_string(),
            Period::Week => format!("From {} to {}", self.start, self.end),
            Period::Month => self.start.format("%Y-%m").to_string(),
            Period::Year => self.start.format("%Y").to_string(),
            Period::Range => format!("{},{}", self.start, self.end),
        }
    }

    fn next(&self) -> Result<Self, PeriodError> {
        let day = self
            .end
            .succ_opt()
            .ok_or_else(|| PeriodError::InvalidDate(self.end.to_string()))?;
        self.period.containing(day)
    }

    fn previous(&self) -> Result<Self, PeriodError> {
        let day = self
            .start
            .pred_opt()
            .ok_or_else(|| PeriodError::InvalidDate(self.start.to_string()))?;
        self.period.containing(day)
    }
}

fn composite(spans: Vec<PeriodSpan>) -> PeriodResult<PeriodSpan> {
    PeriodResult::Composite(spans.into_iter().map(|s| (s.label(), s)).collect())
}

/// Walk `count` spans backwards from `last` and return them oldest first.
fn spans_ending_at(last: PeriodSpan, count: u32) -> Result<Vec<PeriodSpan>, PeriodError> {
    let mut spans = Vec::with_capacity(count as usize);
    spans.push(last);
    for _ in 1..count {
        let earlier = spans[spans.len() - 1].previous()?;
        spans.push(earlier);
    }
    spans.reverse();
    Ok(spans)
}

/// Resolve a period and date into one atomic span or a labelled sequence of
/// sub-period spans.
pub fn resolve(
    period: Period,
    date: DateSpec,
    today: NaiveDate,
) -> Result<PeriodResult<PeriodSpan>, PeriodError> {
    let invalid = |d: NaiveDate| PeriodError::InvalidDate(d.to_string());

    if period == Period::Range {
        let (start, end) = match date {
            DateSpec::Single(_) => return Err(PeriodError::RangeNeedsInterval),
            DateSpec::Between(start, end) => (start, end),
            DateSpec::Last(n) => (
                today
                    .checked_sub_days(Days::new(u64::from(n - 1)))
                    .ok_or_else(|| invalid(today))?,
                today,
            ),
            DateSpec::Previous(n) => {
                let end = today.pred_opt().ok_or_else(|| invalid(today))?;
                let start = end
                    .checked_sub_days(Days::new(u64::from(n - 1)))
                    .ok_or_else(|| invalid(end))?;
                (start, end)
            }
        };
        return Ok(PeriodResult::Single(PeriodSpan {
            period,
            start,
            end,
        }));
    }

    match date {
        DateSpec::Single(day) => Ok(PeriodResult::Single(period.containing(day)?)),
        DateSpec::Last(n) => Ok(composite(spans_ending_at(period.containing(today)?, n)?)),
        DateSpec::Previous(n) => {
            let last = period.containing(today)?.previous()?;
            Ok(composite(spans_ending_at(last, n)?))
        }
        DateSpec::Between(start, end) => {
            let last = period.containing(end)?;
            let mut spans = vec![period.containing(start)?];
            while spans[spans.len() - 1] != last {
                if spans.len() >= MAX_SUBPERIODS {
                    return Err(PeriodError::TooManyPeriods(spans.len() + 1));
                }
                let next = spans[spans.len() - 1].next()?;
                spans.push(next);
            }
            Ok(composite(spans))
        }
    }
}
