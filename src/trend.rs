//! Sustained-deviation detection
//!
//! Looks at the most recent few days of baseline deviations and flags metrics
//! that have stayed past their threshold for consecutive days. An alert needs
//! several metrics flagged at once; output is a severity band, not a diagnosis.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::MetricKind;

/// ---------------------------------------------------------------------------
/// Tracked Metrics
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMetric {
  Hrv,
  RestingHr,
  RespiratoryRate,
  /// Tracked through sleep duration
  SleepQuality,
}

impl TrendMetric {
  pub const ALL: [TrendMetric; 4] = [
    TrendMetric::Hrv,
    TrendMetric::RestingHr,
    TrendMetric::RespiratoryRate,
    TrendMetric::SleepQuality,
  ];

  pub fn source_metric(&self) -> MetricKind {
    match self {
      TrendMetric::Hrv => MetricKind::Hrv,
      TrendMetric::RestingHr => MetricKind::RestingHr,
      TrendMetric::RespiratoryRate => MetricKind::RespiratoryRate,
      TrendMetric::SleepQuality => MetricKind::SleepDuration,
    }
  }

  /// Percent deviation past which a day counts as abnormal. Negative values
  /// mean "below baseline is bad".
  pub fn threshold_pct(&self) -> f64 {
    match self {
      TrendMetric::Hrv => -10.0,
      TrendMetric::RestingHr => 3.0,
      TrendMetric::RespiratoryRate => 5.0,
      TrendMetric::SleepQuality => -15.0,
    }
  }

  /// Strictly past the threshold; a day sitting exactly on it is normal.
  pub fn is_abnormal(&self, deviation_pct: f64) -> bool {
    let threshold = self.threshold_pct();
    if threshold < 0.0 {
      deviation_pct < threshold
    } else {
      deviation_pct > threshold
    }
  }
}

/// Percent deviation of each tracked metric from its own trailing baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyDeviation {
  pub date: NaiveDate,
  pub hrv: Option<f64>,
  pub resting_hr: Option<f64>,
  pub respiratory_rate: Option<f64>,
  pub sleep: Option<f64>,
}

impl DailyDeviation {
  pub fn empty(date: NaiveDate) -> Self {
    Self {
      date,
      hrv: None,
      resting_hr: None,
      respiratory_rate: None,
      sleep: None,
    }
  }

  pub fn get(&self, metric: TrendMetric) -> Option<f64> {
    match metric {
      TrendMetric::Hrv => self.hrv,
      TrendMetric::RestingHr => self.resting_hr,
      TrendMetric::RespiratoryRate => self.respiratory_rate,
      TrendMetric::SleepQuality => self.sleep,
    }
  }

  pub fn set(&mut self, metric: TrendMetric, value: Option<f64>) {
    match metric {
      TrendMetric::Hrv => self.hrv = value,
      TrendMetric::RestingHr => self.resting_hr = value,
      TrendMetric::RespiratoryRate => self.respiratory_rate = value,
      TrendMetric::SleepQuality => self.sleep = value,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Alerts
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
  Yellow,
  Amber,
  Red,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFlag {
  pub metric: TrendMetric,
  /// Consecutive abnormal days ending at the most recent day
  pub streak: usize,
  pub latest_deviation_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendAlert {
  pub flags: Vec<MetricFlag>,
  pub max_streak: usize,
  pub severity: Severity,
}

/// ---------------------------------------------------------------------------
/// Detector
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TrendDetector {
  pub window_days: usize,
  pub min_streak: usize,
  pub min_abnormal_metrics: usize,
}

impl Default for TrendDetector {
  fn default() -> Self {
    Self {
      window_days: 3,
      min_streak: 2,
      min_abnormal_metrics: 2,
    }
  }
}

impl TrendDetector {
  pub fn detect(&self, deviations: &[DailyDeviation]) -> Option<TrendAlert> {
    let mut days: Vec<&DailyDeviation> = deviations.iter().collect();
    days.sort_by_key(|d| d.date);
    let recent: Vec<&DailyDeviation> = days.into_iter().rev().take(self.window_days).collect();

    let flags: Vec<MetricFlag> = TrendMetric::ALL
      .iter()
      .filter_map(|metric| {
        let streak = Self::streak(&recent, *metric);
        if streak < self.min_streak {
          return None;
        }
        let latest_deviation_pct = recent.first()?.get(*metric)?;
        Some(MetricFlag {
          metric: *metric,
          streak,
          latest_deviation_pct,
        })
      })
      .collect();

    if flags.len() < self.min_abnormal_metrics {
      return None;
    }

    let max_streak = flags.iter().map(|f| f.streak).max().unwrap_or(0);
    let severity = Self::severity(flags.len(), max_streak);

    Some(TrendAlert {
      flags,
      max_streak,
      severity,
    })
  }

  /// Abnormal days counted back from the newest; a normal, missing or
  /// non-adjacent day ends the run.
  fn streak(newest_first: &[&DailyDeviation], metric: TrendMetric) -> usize {
    let mut streak = 0;
    let mut expected_date: Option<NaiveDate> = None;

    for day in newest_first {
      if let Some(expected) = expected_date {
        if day.date != expected {
          break;
        }
      }
      match day.get(metric) {
        Some(pct) if metric.is_abnormal(pct) => streak += 1,
        _ => break,
      }
      expected_date = day.date.pred_opt();
    }

    streak
  }

  fn severity(abnormal_metrics: usize, max_streak: usize) -> Severity {
    let points = abnormal_metrics + usize::from(max_streak >= 3);
    match points {
      0..=2 => Severity::Yellow,
      3 => Severity::Amber,
      _ => Severity::Red,
    }
  }
}
