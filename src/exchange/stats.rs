//! Runtime metric aggregation for exchange statistics.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Background CPU time spent by sources servicing requests.
pub const BACKGROUND_CPU_TIME_MS: &str = "backgroundCpuTimeMs";

pub const PEAK_BYTES: &str = "exchangeClient.peakBytes";
pub const NUM_RECEIVED_PAGES: &str = "exchangeClient.numReceivedPages";
pub const AVERAGE_RECEIVED_PAGE_BYTES: &str = "exchangeClient.averageReceivedPageBytes";
pub const NUM_REQUESTS: &str = "exchangeClient.numRequests";
pub const NUM_SIZE_PROBES: &str = "exchangeClient.numSizeProbes";
pub const NUM_FAILED_REQUESTS: &str = "exchangeClient.numFailedRequests";

/// Unit a metric is reported in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricUnit {
    #[default]
    None,
    Bytes,
    Millis,
}

/// Summary of the values recorded under one metric name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeMetric {
    pub unit: MetricUnit,
    pub sum: i64,
    pub count: i64,
    pub min: i64,
    pub max: i64,
}

impl RuntimeMetric {
    pub fn new(unit: MetricUnit) -> Self {
        Self {
            unit,
            sum: 0,
            count: 0,
            min: i64::MAX,
            max: i64::MIN,
        }
    }

    pub fn from_value(value: i64, unit: MetricUnit) -> Self {
        let mut metric = Self::new(unit);
        metric.add_value(value);
        metric
    }

    pub fn add_value(&mut self, value: i64) {
        self.sum = self.sum.saturating_add(value);
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn merge(&mut self, other: &RuntimeMetric) {
        if other.count == 0 {
            return;
        }
        self.sum = self.sum.saturating_add(other.sum);
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

impl Default for RuntimeMetric {
    fn default() -> Self {
        Self::new(MetricUnit::None)
    }
}

/// Infer the unit from the conventional metric-name suffix.
pub(crate) fn unit_for(name: &str) -> MetricUnit {
    if name.ends_with("Bytes") {
        MetricUnit::Bytes
    } else if name.ends_with("Ms") {
        MetricUnit::Millis
    } else {
        MetricUnit::None
    }
}

/// Record `value` under `name`, creating the metric on first use.
pub(crate) fn add_to(stats: &mut HashMap<String, RuntimeMetric>, name: &str, value: i64) {
    stats
        .entry(name.to_string())
        .or_insert_with(|| RuntimeMetric::new(unit_for(name)))
        .add_value(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_value_tracks_bounds() {
        let mut m = RuntimeMetric::default();
        m.add_value(5);
        m.add_value(-2);
        m.add_value(9);
        assert_eq!(m.sum, 12);
        assert_eq!(m.count, 3);
        assert_eq!(m.min, -2);
        assert_eq!(m.max, 9);
        assert_eq!(m.average(), Some(4.0));
    }

    #[test]
    fn merge_ignores_empty_metric() {
        let mut m = RuntimeMetric::from_value(3, MetricUnit::Bytes);
        m.merge(&RuntimeMetric::new(MetricUnit::Bytes));
        assert_eq!(m.count, 1);
        assert_eq!(m.min, 3);

        m.merge(&RuntimeMetric::from_value(7, MetricUnit::Bytes));
        assert_eq!(m.sum, 10);
        assert_eq!(m.max, 7);
    }

    #[test]
    fn unit_from_suffix() {
        assert_eq!(unit_for(BACKGROUND_CPU_TIME_MS), MetricUnit::Millis);
        assert_eq!(unit_for(PEAK_BYTES), MetricUnit::Bytes);
        assert_eq!(unit_for(NUM_REQUESTS), MetricUnit::None);
    }
}
