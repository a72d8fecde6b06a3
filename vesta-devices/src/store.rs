use std::collections::{HashMap, HashSet, VecDeque};

use vesta_core::{MeasurementValue, ParameterName};

/// One stored observation of a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub value: MeasurementValue,
    pub timestamp: jiff::Timestamp,
}

/// Per-device time series of parameter values, newest first.
///
/// Besides the history, the store tracks which parameters were written since
/// the last [`MeasurementStore::begin_cycle`], which lets callers tell a
/// fresh report apart from a value that has merely not changed.
#[derive(Debug, Clone, Default)]
pub struct MeasurementStore {
    series: HashMap<ParameterName, VecDeque<Sample>>,
    updated: HashSet<ParameterName>,
    history_limit: Option<usize>,
}

impl MeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that keeps at most `limit` samples per parameter, evicting the
    /// oldest ones first. `None` keeps everything.
    pub fn with_capacity(limit: Option<usize>) -> Self {
        Self {
            history_limit: limit.map(|l| l.max(1)),
            ..Self::default()
        }
    }

    /// Clears the changed-this-cycle markers.
    pub fn begin_cycle(&mut self) {
        self.updated.clear();
    }

    /// Inserts a sample in timestamp order and marks the parameter as
    /// updated for this cycle.
    ///
    /// Returns `true` when the sample became the latest value of the
    /// parameter, `false` when it landed behind a newer sample.
    pub fn record(
        &mut self,
        parameter: ParameterName,
        value: MeasurementValue,
        timestamp: jiff::Timestamp,
    ) -> bool {
        let series = self.series.entry(parameter.clone()).or_default();

        // Equal timestamps go in front so the last arrival wins.
        let index = series.partition_point(|s| s.timestamp > timestamp);
        series.insert(index, Sample { value, timestamp });

        if let Some(limit) = self.history_limit {
            series.truncate(limit);
        }

        self.updated.insert(parameter);
        index == 0
    }

    pub fn latest(&self, parameter: &str) -> Option<&Sample> {
        self.series.get(parameter).and_then(VecDeque::front)
    }

    pub fn was_updated_this_cycle(&self, parameter: &str) -> bool {
        self.updated.contains(parameter)
    }

    pub fn contains(&self, parameter: &str) -> bool {
        self.series.contains_key(parameter)
    }

    /// Samples for `parameter`, newest first.
    pub fn history(&self, parameter: &str) -> impl Iterator<Item = &Sample> {
        self.series.get(parameter).into_iter().flatten()
    }

    pub fn updated_parameters(&self) -> impl Iterator<Item = &ParameterName> {
        self.updated.iter()
    }

    pub fn parameters(&self) -> impl Iterator<Item = &ParameterName> {
        self.series.keys()
    }
}
