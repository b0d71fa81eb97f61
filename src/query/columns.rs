use std::fmt;
use std::str::FromStr;

/// A metric name known to the visits summary report.
///
/// Base metrics are stored in the archive. Derived metrics are computed on
/// the fly from two base metrics and never reach storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Visits,
    UniqueVisitors,
    Actions,
    VisitsConverted,
    BounceCount,
    SumVisitLength,
    MaxActions,
    BounceRate,
    ActionsPerVisit,
    AvgTimeOnSite,
}

impl Metric {
    pub const ALL: [Self; 10] = [
        Self::Visits,
        Self::UniqueVisitors,
        Self::Actions,
        Self::VisitsConverted,
        Self::BounceCount,
        Self::SumVisitLength,
        Self::MaxActions,
        Self::BounceRate,
        Self::ActionsPerVisit,
        Self::AvgTimeOnSite,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Visits => "nb_visits",
            Self::UniqueVisitors => "nb_uniq_visitors",
            Self::Actions => "nb_actions",
            Self::VisitsConverted => "nb_visits_converted",
            Self::BounceCount => "bounce_count",
            Self::SumVisitLength => "sum_visit_length",
            Self::MaxActions => "max_actions",
            Self::BounceRate => "bounce_rate",
            Self::ActionsPerVisit => "nb_actions_per_visit",
            Self::AvgTimeOnSite => "avg_time_on_site",
        }
    }

    /// The derived metric this name refers to, if any.
    pub const fn as_derived(self) -> Option<DerivedMetric> {
        match self {
            Self::BounceRate => Some(DerivedMetric::BounceRate),
            Self::ActionsPerVisit => Some(DerivedMetric::ActionsPerVisit),
            Self::AvgTimeOnSite => Some(DerivedMetric::AvgTimeOnSite),
            _ => None,
        }
    }

    pub const fn is_derived(self) -> bool {
        self.as_derived().is_some()
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a requested column is not part of the metric vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMetric(pub String);

impl fmt::Display for UnknownMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown metric '{}'", self.0)
    }
}

impl std::error::Error for UnknownMetric {}

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

/// How a derived column is computed from its two dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ratio {
    Percentage,
    Quotient,
}

/// One of the three ratio metrics computed from base metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedMetric {
    BounceRate,
    ActionsPerVisit,
    AvgTimeOnSite,
}

impl DerivedMetric {
    pub const ALL: [Self; 3] = [Self::BounceRate, Self::ActionsPerVisit, Self::AvgTimeOnSite];

    pub const fn metric(self) -> Metric {
        match self {
            Self::BounceRate => Metric::BounceRate,
            Self::ActionsPerVisit => Metric::ActionsPerVisit,
            Self::AvgTimeOnSite => Metric::AvgTimeOnSite,
        }
    }

    /// The `(numerator, denominator)` base metrics.
    pub const fn dependencies(self) -> (Metric, Metric) {
        match self {
            Self::BounceRate => (Metric::BounceCount, Metric::Visits),
            Self::ActionsPerVisit => (Metric::Actions, Metric::Visits),
            Self::AvgTimeOnSite => (Metric::SumVisitLength, Metric::Visits),
        }
    }

    pub const fn ratio(self) -> Ratio {
        match self {
            Self::BounceRate => Ratio::Percentage,
            Self::ActionsPerVisit | Self::AvgTimeOnSite => Ratio::Quotient,
        }
    }

    /// Decimal places kept after rounding.
    pub const fn precision(self) -> u32 {
        match self {
            Self::ActionsPerVisit => 1,
            Self::BounceRate | Self::AvgTimeOnSite => 0,
        }
    }
}

/// Parse a comma-separated column list as received from the HTTP layer.
///
/// Whitespace around names is trimmed and empty items are skipped, so an
/// empty or blank string yields an empty list.
pub fn parse_column_list(raw: &str) -> Result<Vec<Metric>, UnknownMetric> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_names() {
        for metric in Metric::ALL {
            assert_eq!(metric.as_str().parse::<Metric>().unwrap(), metric);
        }
    }

    #[test]
    fn test_unknown_metric() {
        let err = "nb_pageviews".parse::<Metric>().unwrap_err();
        assert_eq!(err, UnknownMetric("nb_pageviews".to_string()));
        assert_eq!(err.to_string(), "unknown metric 'nb_pageviews'");
    }

    #[test]
    fn test_names_are_case_sensitive() {
        assert!("NB_VISITS".parse::<Metric>().is_err());
    }

    #[test]
    fn test_only_three_derived() {
        let derived: Vec<Metric> = Metric::ALL.into_iter().filter(|m| m.is_derived()).collect();
        assert_eq!(
            derived,
            vec![
                Metric::BounceRate,
                Metric::ActionsPerVisit,
                Metric::AvgTimeOnSite
            ]
        );
    }

    #[test]
    fn test_dependency_map() {
        assert_eq!(
            DerivedMetric::BounceRate.dependencies(),
            (Metric::BounceCount, Metric::Visits)
        );
        assert_eq!(
            DerivedMetric::ActionsPerVisit.dependencies(),
            (Metric::Actions, Metric::Visits)
        );
        assert_eq!(
            DerivedMetric::AvgTimeOnSite.dependencies(),
            (Metric::SumVisitLength, Metric::Visits)
        );
        for derived in DerivedMetric::ALL {
            let (num, den) = derived.dependencies();
            assert!(!num.is_derived() && !den.is_derived());
            assert_eq!(derived.metric().as_derived(), Some(derived));
        }
    }

    #[test]
    fn test_precision_and_ratio() {
        assert_eq!(DerivedMetric::BounceRate.ratio(), Ratio::Percentage);
        assert_eq!(DerivedMetric::BounceRate.precision(), 0);
        assert_eq!(DerivedMetric::ActionsPerVisit.ratio(), Ratio::Quotient);
        assert_eq!(DerivedMetric::ActionsPerVisit.precision(), 1);
        assert_eq!(DerivedMetric::AvgTimeOnSite.ratio(), Ratio::Quotient);
        assert_eq!(DerivedMetric::AvgTimeOnSite.precision(), 0);
    }

    #[test]
    fn test_parse_column_list() {
        let cols = parse_column_list(" nb_visits, bounce_rate ,,").unwrap();
        assert_eq!(cols, vec![Metric::Visits, Metric::BounceRate]);
    }

    #[test]
    fn test_parse_column_list_empty() {
        assert!(parse_column_list("").unwrap().is_empty());
        assert!(parse_column_list("  ").unwrap().is_empty());
    }

    #[test]
    fn test_parse_column_list_rejects_unknown() {
        let err = parse_column_list("nb_visits,foo").unwrap_err();
        assert_eq!(err.0, "foo");
    }
}
