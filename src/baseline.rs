//! Rolling 7-day baselines
//!
//! A baseline for day D is the plain mean of the non-zero daily values in
//! `[D - 7, D)`. Today never contributes to its own baseline.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{baseline_key, CacheOrchestrator, Ttl};
use crate::error::WellnessError;
use crate::models::{aggregate_daily, DailySample, MetricKind};
use crate::providers::PhysioDataProvider;
use crate::trend::{DailyDeviation, TrendMetric};

pub const BASELINE_WINDOW_DAYS: i64 = 7;

/// ---------------------------------------------------------------------------
/// Pure Calculations
/// ---------------------------------------------------------------------------

/// Mean of the daily values in `[as_of - 7, as_of)`, None when the window is empty.
pub fn baseline_from_daily(daily: &BTreeMap<NaiveDate, f64>, as_of: NaiveDate) -> Option<f64> {
  let start = as_of - Duration::days(BASELINE_WINDOW_DAYS);
  let values: Vec<f64> = daily
    .range(start..as_of)
    .map(|(_, v)| *v)
    .filter(|v| v.is_finite() && *v != 0.0)
    .collect();

  if values.is_empty() {
    return None;
  }
  Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Baseline straight from raw samples of one metric.
pub fn rolling_baseline(samples: &[DailySample], metric: MetricKind, as_of: NaiveDate) -> Option<f64> {
  baseline_from_daily(&aggregate_daily(samples, metric), as_of)
}

/// Percent change of `current` relative to `baseline`.
pub fn percent_deviation(current: Option<f64>, baseline: Option<f64>) -> Option<f64> {
  match (current, baseline) {
    (Some(curr), Some(base)) if base > 0.0 => Some(((curr - base) / base) * 100.0),
    _ => None,
  }
}

/// All four baselines for one day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaselineSet {
  pub hrv: Option<f64>,
  pub resting_hr: Option<f64>,
  pub sleep_hours: Option<f64>,
  pub respiratory_rate: Option<f64>,
}

impl BaselineSet {
  pub fn get(&self, metric: MetricKind) -> Option<f64> {
    match metric {
      MetricKind::Hrv => self.hrv,
      MetricKind::RestingHr => self.resting_hr,
      MetricKind::SleepDuration => self.sleep_hours,
      MetricKind::RespiratoryRate => self.respiratory_rate,
    }
  }

  fn set(&mut self, metric: MetricKind, value: Option<f64>) {
    match metric {
      MetricKind::Hrv => self.hrv = value,
      MetricKind::RestingHr => self.resting_hr = value,
      MetricKind::SleepDuration => self.sleep_hours = value,
      MetricKind::RespiratoryRate => self.respiratory_rate = value,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Engine
/// ---------------------------------------------------------------------------

pub struct BaselineEngine {
  provider: Arc<dyn PhysioDataProvider>,
  cache: Arc<CacheOrchestrator>,
  ttl: Duration,
}

impl BaselineEngine {
  pub fn new(provider: Arc<dyn PhysioDataProvider>, cache: Arc<CacheOrchestrator>, ttl: Duration) -> Self {
    Self { provider, cache, ttl }
  }

  /// Baselines for `as_of`, shared across all four metrics under one cache entry.
  ///
  /// A provider failure yields None and leaves nothing cached.
  pub async fn baselines(&self, as_of: NaiveDate) -> Option<BaselineSet> {
    let key = baseline_key(as_of);
    let result = self
      .cache
      .try_fetch(&key, Ttl::For(self.ttl), || self.compute_set(as_of))
      .await;

    match result {
      Ok(set) => Some(set),
      Err(e) => {
        warn!(date = %as_of, error = %e, "baseline computation failed");
        None
      }
    }
  }

  pub async fn baseline(&self, metric: MetricKind, as_of: NaiveDate) -> Option<f64> {
    self.baselines(as_of).await.and_then(|set| set.get(metric))
  }

  async fn compute_set(&self, as_of: NaiveDate) -> Result<BaselineSet, WellnessError> {
    let from = as_of - Duration::days(BASELINE_WINDOW_DAYS);
    let to = as_of - Duration::days(1);
    let mut set = BaselineSet::default();

    for metric in MetricKind::ALL {
      let samples = self
        .provider
        .samples(metric, from, to)
        .await
        .map_err(|e| e.into_unavailable(self.provider.name()))?;
      set.set(metric, rolling_baseline(&samples, metric, as_of));
    }

    debug!(date = %as_of, "baselines computed");
    Ok(set)
  }

  /// Per-day deviations from each day's own trailing baseline, oldest first,
  /// for the `days` days ending at `as_of`.
  pub async fn deviations(&self, as_of: NaiveDate, days: u32) -> Result<Vec<DailyDeviation>, WellnessError> {
    if days == 0 {
      return Ok(Vec::new());
    }
    let first_day = as_of - Duration::days(i64::from(days) - 1);
    let from = first_day - Duration::days(BASELINE_WINDOW_DAYS);

    let mut daily_by_metric = BTreeMap::new();
    for metric in TrendMetric::ALL {
      let source = metric.source_metric();
      let samples = self
        .provider
        .samples(source, from, as_of)
        .await
        .map_err(|e| e.into_unavailable(self.provider.name()))?;
      daily_by_metric.insert(source, aggregate_daily(&samples, source));
    }

    let deviations = first_day
      .iter_days()
      .take(days as usize)
      .map(|date| {
        let mut deviation = DailyDeviation::empty(date);
        for metric in TrendMetric::ALL {
          if let Some(daily) = daily_by_metric.get(&metric.source_metric()) {
            let pct = percent_deviation(daily.get(&date).copied(), baseline_from_daily(daily, date));
            deviation.set(metric, pct);
          }
        }
        deviation
      })
      .collect();

    Ok(deviations)
  }
}
