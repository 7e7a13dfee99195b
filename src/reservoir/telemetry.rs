use std::collections::{HashMap, VecDeque};
use tracing::trace;

pub const PH: &str = "ph";
pub const EC: &str = "ec";
pub const LIQUID_LEVEL: &str = "liquidLevel";

/// Bounded per-metric history plus last-known discrete values.
///
/// Each metric keeps at most `capacity` samples, oldest first; recording into
/// a full series evicts the oldest sample.
#[derive(Debug, Clone)]
pub struct TelemetryStore {
    capacity: usize,
    series: HashMap<String, VecDeque<f64>>,
    discrete: HashMap<String, String>,
}

impl TelemetryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: HashMap::new(),
            discrete: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&mut self, metric: &str, value: f64) {
        let capacity = self.capacity;
        let series = self
            .series
            .entry(metric.to_string())
            .or_insert_with(|| VecDeque::with_capacity(capacity));
        if series.len() == capacity {
            series.pop_front();
        }
        series.push_back(value);
        trace!("{} <- {}", metric, value);
    }

    pub fn latest(&self, metric: &str) -> Option<f64> {
        self.series.get(metric).and_then(|s| s.back().copied())
    }

    /// Snapshot of the series, oldest first.
    pub fn history(&self, metric: &str) -> Vec<f64> {
        self.series
            .get(metric)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, metric: &str) -> usize {
        self.series.get(metric).map_or(0, VecDeque::len)
    }

    /// Minimum and maximum over the retained samples.
    pub fn range(&self, metric: &str) -> Option<(f64, f64)> {
        let series = self.series.get(metric)?;
        let first = *series.front()?;
        Some(
            series
                .iter()
                .fold((first, first), |(lo, hi), v| (lo.min(*v), hi.max(*v))),
        )
    }

    pub fn set_discrete(&mut self, name: &str, value: impl Into<String>) {
        self.discrete.insert(name.to_string(), value.into());
    }

    pub fn discrete(&self, name: &str) -> Option<&str> {
        self.discrete.get(name).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.series.clear();
        self.discrete.clear();
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new(100)
    }
}
