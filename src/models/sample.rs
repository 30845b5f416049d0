use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::clock::local_date;

/// Physiological metrics tracked per day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
  /// Heart-rate variability (RMSSD, ms)
  Hrv,
  /// Resting heart rate (bpm)
  RestingHr,
  /// Sleep duration (hours)
  SleepDuration,
  /// Respiratory rate (breaths/min)
  RespiratoryRate,
}

/// How several same-day samples fold into one daily value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyAggregation {
  Average,
  Sum,
}

impl MetricKind {
  pub const ALL: [MetricKind; 4] = [
    MetricKind::Hrv,
    MetricKind::RestingHr,
    MetricKind::SleepDuration,
    MetricKind::RespiratoryRate,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      MetricKind::Hrv => "hrv",
      MetricKind::RestingHr => "resting_hr",
      MetricKind::SleepDuration => "sleep_duration",
      MetricKind::RespiratoryRate => "respiratory_rate",
    }
  }

  /// Sleep sessions split across the night add up; point readings average.
  pub fn aggregation(&self) -> DailyAggregation {
    match self {
      MetricKind::SleepDuration => DailyAggregation::Sum,
      _ => DailyAggregation::Average,
    }
  }
}

impl fmt::Display for MetricKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// One ingested reading, already pinned to a local calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySample {
  pub date: NaiveDate,
  pub metric: MetricKind,
  pub value: f64,
}

impl DailySample {
  pub fn new(date: NaiveDate, metric: MetricKind, value: f64) -> Self {
    Self { date, metric, value }
  }

  /// Build a sample from a timestamped reading, normalizing to local midnight.
  pub fn at(at: DateTime<Utc>, offset: FixedOffset, metric: MetricKind, value: f64) -> Self {
    Self {
      date: local_date(at, offset),
      metric,
      value,
    }
  }
}

/// Fold samples of one metric into a single value per day.
///
/// Non-finite and non-positive readings are dropped before folding, so a day
/// made only of empty readings produces no entry at all.
pub fn aggregate_daily(samples: &[DailySample], metric: MetricKind) -> BTreeMap<NaiveDate, f64> {
  let mut buckets: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();

  for sample in samples
    .iter()
    .filter(|s| s.metric == metric && s.value.is_finite() && s.value > 0.0)
  {
    let entry = buckets.entry(sample.date).or_insert((0.0, 0));
    entry.0 += sample.value;
    entry.1 += 1;
  }

  buckets
    .into_iter()
    .map(|(date, (sum, count))| {
      let value = match metric.aggregation() {
        DailyAggregation::Sum => sum,
        DailyAggregation::Average => sum / count as f64,
      };
      (date, value)
    })
    .collect()
}
