use crate::query::table::MetricValue;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Format a duration in seconds as a short human string.
///
/// Only the two most significant units are kept: `2 days 3 hours`,
/// `1 hours 5 min`, `4 min 12s`, `37s`.
pub fn pretty_duration(seconds: u64) -> String {
    let days = seconds / DAY;
    let hours = (seconds % DAY) / HOUR;
    let minutes = (seconds % HOUR) / MINUTE;
    let secs = seconds % MINUTE;

    if days > 0 {
        format!("{days} days {hours} hours")
    } else if hours > 0 {
        format!("{hours} hours {minutes} min")
    } else if minutes > 0 {
        format!("{minutes} min {secs}s")
    } else {
        format!("{secs}s")
    }
}

/// [`pretty_duration`] for an archive value. Fractions are truncated and
/// negative or non-finite values count as zero.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn pretty_metric_duration(value: MetricValue) -> String {
    let seconds = match value {
        MetricValue::Int(v) => u64::try_from(v).unwrap_or(0),
        MetricValue::Float(v) if v.is_finite() && v > 0.0 => v.trunc() as u64,
        MetricValue::Float(_) => 0,
    };
    pretty_duration(seconds)
}
