use crate::query::columns::Metric;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// A single numeric cell: an integer count or a float (seconds, ratios).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Int(i64),
    Float(f64),
}

impl MetricValue {
    pub const ZERO: Self = Self::Int(0);

    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(v) => v as f64,
            Self::Float(v) => v,
        }
    }

    /// Build a value from a float, keeping integral values as integers.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
            Self::Int(value as i64)
        } else {
            Self::Float(value)
        }
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

/// One period's worth of metrics, in column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricRow {
    columns: Vec<(Metric, MetricValue)>,
}

impl MetricRow {
    pub const fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    pub fn get(&self, metric: Metric) -> Option<MetricValue> {
        self.columns
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, v)| *v)
    }

    /// Set a column, replacing it in place if present or appending it otherwise.
    pub fn set(&mut self, metric: Metric, value: MetricValue) {
        if let Some(slot) = self.columns.iter_mut().find(|(m, _)| *m == metric) {
            slot.1 = value;
        } else {
            self.columns.push((metric, value));
        }
    }

    pub fn delete_columns(&mut self, metrics: &[Metric]) {
        self.columns.retain(|(m, _)| !metrics.contains(m));
    }

    pub fn metrics(&self) -> impl Iterator<Item = Metric> + '_ {
        self.columns.iter().map(|(m, _)| *m)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Metric, MetricValue)> + '_ {
        self.columns.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl FromIterator<(Metric, MetricValue)> for MetricRow {
    fn from_iter<I: IntoIterator<Item = (Metric, MetricValue)>>(iter: I) -> Self {
        let mut row = Self::new();
        for (metric, value) in iter {
            row.set(metric, value);
        }
        row
    }
}

impl Serialize for MetricRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (metric, value) in &self.columns {
            map.serialize_entry(metric.as_str(), value)?;
        }
        map.end()
    }
}

/// The result of a report over an atomic period or over several sub-periods.
///
/// Atomic periods (one day, one month, one explicit range) produce `Single`.
/// Multi-period requests such as `last7` produce `Composite`, one entry per
/// sub-period in chronological order, keyed by the period label.
#[derive(Debug, Clone, PartialEq)]
pub enum PeriodResult<T> {
    Single(T),
    Composite(Vec<(String, T)>),
}

/// Metrics table returned by the archive and by `VisitsSummary::get`.
pub type ResultTable = PeriodResult<MetricRow>;

impl<T> PeriodResult<T> {
    /// Apply `f` to every constituent value, whatever the shape.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(&mut T)) {
        match self {
            Self::Single(value) => f(value),
            Self::Composite(entries) => entries.iter_mut().for_each(|(_, value)| f(value)),
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> PeriodResult<U> {
        match self {
            Self::Single(value) => PeriodResult::Single(f(value)),
            Self::Composite(entries) => PeriodResult::Composite(
                entries
                    .into_iter()
                    .map(|(label, value)| (label, f(value)))
                    .collect(),
            ),
        }
    }

    /// Fallible map over borrowed values; stops at the first error.
    pub fn try_map<U, E>(
        &self,
        mut f: impl FnMut(&T) -> Result<U, E>,
    ) -> Result<PeriodResult<U>, E> {
        Ok(match self {
            Self::Single(value) => PeriodResult::Single(f(value)?),
            Self::Composite(entries) => PeriodResult::Composite(
                entries
                    .iter()
                    .map(|(label, value)| Ok((label.clone(), f(value)?)))
                    .collect::<Result<_, E>>()?,
            ),
        })
    }

    pub fn values(&self) -> Box<dyn Iterator<Item = &T> + '_> {
        match self {
            Self::Single(value) => Box::new(std::iter::once(value)),
            Self::Composite(entries) => Box::new(entries.iter().map(|(_, v)| v)),
        }
    }

    pub const fn is_composite(&self) -> bool {
        matches!(self, Self::Composite(_))
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Composite(entries) => entries.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultTable {
    pub fn delete_columns(&mut self, metrics: &[Metric]) {
        if metrics.is_empty() {
            return;
        }
        self.for_each_mut(|row| row.delete_columns(metrics));
    }
}

impl<T: Serialize> Serialize for PeriodResult<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Single(value) => value.serialize(serializer),
            Self::Composite(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (label, value) in entries {
                    map.serialize_entry(label, value)?;
                }
                map.end()
            }
        }
    }
}
