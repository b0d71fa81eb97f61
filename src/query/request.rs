use crate::query::columns::{DerivedMetric, Metric};

/// Base metrics fetched when the caller does not name any column.
const DEFAULT_COLUMNS: [Metric; 6] = [
    Metric::Visits,
    Metric::Actions,
    Metric::VisitsConverted,
    Metric::BounceCount,
    Metric::SumVisitLength,
    Metric::MaxActions,
];

/// Which derived metrics the caller asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DerivedFlags {
    pub bounce_rate: bool,
    pub actions_per_visit: bool,
    pub avg_time_on_site: bool,
}

impl DerivedFlags {
    pub const ALL: Self = Self {
        bounce_rate: true,
        actions_per_visit: true,
        avg_time_on_site: true,
    };

    pub const fn is_set(self, derived: DerivedMetric) -> bool {
        match derived {
            DerivedMetric::BounceRate => self.bounce_rate,
            DerivedMetric::ActionsPerVisit => self.actions_per_visit,
            DerivedMetric::AvgTimeOnSite => self.avg_time_on_site,
        }
    }

    fn set(&mut self, derived: DerivedMetric) {
        match derived {
            DerivedMetric::BounceRate => self.bounce_rate = true,
            DerivedMetric::ActionsPerVisit => self.actions_per_visit = true,
            DerivedMetric::AvgTimeOnSite => self.avg_time_on_site = true,
        }
    }

    /// The set flags, in dependency-map order.
    pub fn iter(self) -> impl Iterator<Item = DerivedMetric> {
        DerivedMetric::ALL
            .into_iter()
            .filter(move |d| self.is_set(*d))
    }
}

/// A caller's column request resolved against the archive's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricRequest {
    /// Base metrics to read from the archive, in binding order.
    pub fetch: Vec<Metric>,
    pub derived: DerivedFlags,
    /// Columns fetched only as inputs to a derived metric; removed before
    /// the result is returned.
    pub dependency_only: Vec<Metric>,
}

impl MetricRequest {
    /// Resolve `requested` into the columns to fetch.
    ///
    /// An empty request selects every default base metric plus all three
    /// derived metrics. `nb_uniq_visitors` joins the defaults only when
    /// `unique_visitors_enabled` is set for the requested period.
    pub fn normalize(requested: &[Metric], unique_visitors_enabled: bool) -> Self {
        if requested.is_empty() {
            let mut fetch = Vec::with_capacity(DEFAULT_COLUMNS.len() + 1);
            if unique_visitors_enabled {
                fetch.push(Metric::UniqueVisitors);
            }
            fetch.extend(DEFAULT_COLUMNS);
            return Self {
                fetch,
                derived: DerivedFlags::ALL,
                dependency_only: Vec::new(),
            };
        }

        let mut derived = DerivedFlags::default();
        let mut fetch: Vec<Metric> = Vec::with_capacity(requested.len());
        for metric in requested {
            match metric.as_derived() {
                Some(d) => derived.set(d),
                None if !fetch.contains(metric) => fetch.push(*metric),
                None => {}
            }
        }

        let mut dependency_only: Vec<Metric> = derived
            .iter()
            .flat_map(|d| {
                let (numerator, denominator) = d.dependencies();
                [numerator, denominator]
            })
            .filter(|m| !fetch.contains(m))
            .collect();
        // Reverse-lexicographic by name keeps storage binding order stable.
        dependency_only.sort_unstable_by(|a, b| b.as_str().cmp(a.as_str()));
        dependency_only.dedup();

        fetch.extend_from_slice(&dependency_only);
        Self {
            fetch,
            derived,
            dependency_only,
        }
    }

    /// Columns the caller will see, in output order.
    pub fn visible_columns(&self) -> Vec<Metric> {
        self.fetch
            .iter()
            .copied()
            .filter(|m| !self.dependency_only.contains(m))
            .chain(self.derived.iter().map(DerivedMetric::metric))
            .collect()
    }
}
