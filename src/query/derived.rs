use crate::query::columns::{DerivedMetric, Ratio};
use crate::query::request::MetricRequest;
use crate::query::table::{MetricRow, MetricValue, ResultTable};

/// Round half away from zero to `precision` decimal places.
fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10f64.powi(i32::try_from(precision).unwrap_or(i32::MAX));
    (value * factor).round() / factor
}

/// `round(100 * numerator / denominator, precision)`, or 0 when the
/// denominator is missing or zero.
pub fn percentage(
    numerator: Option<MetricValue>,
    denominator: Option<MetricValue>,
    precision: u32,
) -> MetricValue {
    ratio(numerator, denominator, precision, 100.0)
}

/// `round(numerator / denominator, precision)`, or 0 when the denominator is
/// missing or zero.
pub fn quotient(
    numerator: Option<MetricValue>,
    denominator: Option<MetricValue>,
    precision: u32,
) -> MetricValue {
    ratio(numerator, denominator, precision, 1.0)
}

fn ratio(
    numerator: Option<MetricValue>,
    denominator: Option<MetricValue>,
    precision: u32,
    scale: f64,
) -> MetricValue {
    let den = denominator.map_or(0.0, MetricValue::as_f64);
    if den == 0.0 || !den.is_finite() {
        return MetricValue::ZERO;
    }
    let num = numerator.map_or(0.0, MetricValue::as_f64);
    MetricValue::from_f64(round_to(scale * num / den, precision))
}

/// Add one derived column to a row from its two dependency columns.
pub fn add_derived_column(row: &mut MetricRow, derived: DerivedMetric) {
    let (numerator, denominator) = derived.dependencies();
    let num = row.get(numerator);
    let den = row.get(denominator);
    let value = match derived.ratio() {
        Ratio::Percentage => percentage(num, den, derived.precision()),
        Ratio::Quotient => quotient(num, den, derived.precision()),
    };
    row.set(derived.metric(), value);
}

/// Compute the requested derived columns on every row, then drop the columns
/// that were only fetched as their inputs.
///
/// Derivation must run before deletion: a dependency-only column is still
/// needed to compute the ratio it was fetched for.
pub fn apply_derived(table: &mut ResultTable, request: &MetricRequest) {
    table.for_each_mut(|row| {
        for derived in request.derived.iter() {
            add_derived_column(row, derived);
        }
    });
    table.delete_columns(&request.dependency_only);
}
