use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::sample::MetricKind;

/// ---------------------------------------------------------------------------
/// Daily Physiology
/// ---------------------------------------------------------------------------

/// Aggregated raw values and trailing baselines for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyPhysio {
  pub date: NaiveDate,
  pub hrv: Option<f64>,
  pub resting_hr: Option<f64>,
  pub sleep_hours: Option<f64>,
  pub respiratory_rate: Option<f64>,
  pub hrv_baseline: Option<f64>,
  pub resting_hr_baseline: Option<f64>,
  pub sleep_baseline: Option<f64>,
  pub respiratory_baseline: Option<f64>,
}

impl DailyPhysio {
  pub fn placeholder(date: NaiveDate) -> Self {
    Self {
      date,
      hrv: None,
      resting_hr: None,
      sleep_hours: None,
      respiratory_rate: None,
      hrv_baseline: None,
      resting_hr_baseline: None,
      sleep_baseline: None,
      respiratory_baseline: None,
    }
  }

  pub fn value(&self, metric: MetricKind) -> Option<f64> {
    match metric {
      MetricKind::Hrv => self.hrv,
      MetricKind::RestingHr => self.resting_hr,
      MetricKind::SleepDuration => self.sleep_hours,
      MetricKind::RespiratoryRate => self.respiratory_rate,
    }
  }

  pub fn baseline(&self, metric: MetricKind) -> Option<f64> {
    match metric {
      MetricKind::Hrv => self.hrv_baseline,
      MetricKind::RestingHr => self.resting_hr_baseline,
      MetricKind::SleepDuration => self.sleep_baseline,
      MetricKind::RespiratoryRate => self.respiratory_baseline,
    }
  }

  pub fn set_value(&mut self, metric: MetricKind, value: Option<f64>) {
    match metric {
      MetricKind::Hrv => self.hrv = value,
      MetricKind::RestingHr => self.resting_hr = value,
      MetricKind::SleepDuration => self.sleep_hours = value,
      MetricKind::RespiratoryRate => self.respiratory_rate = value,
    }
  }

  pub fn set_baseline(&mut self, metric: MetricKind, value: Option<f64>) {
    match metric {
      MetricKind::Hrv => self.hrv_baseline = value,
      MetricKind::RestingHr => self.resting_hr_baseline = value,
      MetricKind::SleepDuration => self.sleep_baseline = value,
      MetricKind::RespiratoryRate => self.respiratory_baseline = value,
    }
  }

  pub fn has_data(&self) -> bool {
    MetricKind::ALL.iter().any(|m| self.value(*m).is_some())
  }
}

/// ---------------------------------------------------------------------------
/// Daily Training Load
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyLoad {
  pub date: NaiveDate,
  pub tss: f64,
  /// Chronic training load (fitness)
  pub ctl: f64,
  /// Acute training load (fatigue)
  pub atl: f64,
}

impl DailyLoad {
  /// Training stress balance (form)
  pub fn tsb(&self) -> f64 {
    self.ctl - self.atl
  }
}

/// ---------------------------------------------------------------------------
/// Scores
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
  Recovery,
  Sleep,
  Strain,
}

impl ScoreKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      ScoreKind::Recovery => "recovery",
      ScoreKind::Sleep => "sleep",
      ScoreKind::Strain => "strain",
    }
  }

  /// Stored values at or below this came from the earlier coarse formulas and
  /// are still eligible for a non-forced backfill.
  pub fn confidence_threshold(&self) -> f64 {
    match self {
      ScoreKind::Recovery => 60.0,
      ScoreKind::Sleep => 60.0,
      ScoreKind::Strain => 40.0,
    }
  }

  /// Strain describes load rather than readiness, so it carries no band.
  pub fn band(&self, value: f64) -> Option<Band> {
    match self {
      ScoreKind::Strain => None,
      _ => Some(Band::from_score(value)),
    }
  }
}

impl fmt::Display for ScoreKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Band {
  Optimal,
  Good,
  Fair,
  PayAttention,
}

impl Band {
  pub fn from_score(value: f64) -> Self {
    match value {
      v if v >= 85.0 => Band::Optimal,
      v if v >= 70.0 => Band::Good,
      v if v >= 50.0 => Band::Fair,
      _ => Band::PayAttention,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Band::Optimal => "optimal",
      Band::Good => "good",
      Band::Fair => "fair",
      Band::PayAttention => "pay_attention",
    }
  }
}

impl FromStr for Band {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "optimal" => Ok(Band::Optimal),
      "good" => Ok(Band::Good),
      "fair" => Ok(Band::Fair),
      "pay_attention" => Ok(Band::PayAttention),
      other => Err(format!("unknown band: {}", other)),
    }
  }
}

/// A computed, already clamped score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
  pub value: f64,
  pub band: Option<Band>,
}

impl Score {
  pub fn new(kind: ScoreKind, raw: f64) -> Self {
    let value = raw.clamp(0.0, 100.0);
    Self {
      value,
      band: kind.band(value),
    }
  }
}

/// Per-field score state; `NotYetComputed` is distinct from any real value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScoreSlot {
  #[default]
  NotYetComputed,
  Computed {
    score: Score,
    computed_at: DateTime<Utc>,
  },
}

impl ScoreSlot {
  pub fn value(&self) -> Option<f64> {
    match self {
      ScoreSlot::NotYetComputed => None,
      ScoreSlot::Computed { score, .. } => Some(score.value),
    }
  }

  pub fn band(&self) -> Option<Band> {
    match self {
      ScoreSlot::NotYetComputed => None,
      ScoreSlot::Computed { score, .. } => score.band,
    }
  }

  /// Whether a backfill may overwrite this slot.
  pub fn accepts_backfill(&self, kind: ScoreKind, force: bool) -> bool {
    if force {
      return true;
    }
    match self {
      ScoreSlot::NotYetComputed => true,
      ScoreSlot::Computed { score, .. } => score.value <= kind.confidence_threshold(),
    }
  }
}

/// One row of daily scores. Each slot is owned by its score kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyScore {
  pub date: NaiveDate,
  /// Link to the `DailyPhysio` row recovery/sleep scoring reads
  pub physio: Option<NaiveDate>,
  pub recovery: ScoreSlot,
  pub sleep: ScoreSlot,
  pub strain: ScoreSlot,
  pub last_updated: Option<DateTime<Utc>>,
}

impl DailyScore {
  pub fn placeholder(date: NaiveDate) -> Self {
    Self {
      date,
      physio: None,
      recovery: ScoreSlot::NotYetComputed,
      sleep: ScoreSlot::NotYetComputed,
      strain: ScoreSlot::NotYetComputed,
      last_updated: None,
    }
  }

  pub fn slot(&self, kind: ScoreKind) -> &ScoreSlot {
    match kind {
      ScoreKind::Recovery => &self.recovery,
      ScoreKind::Sleep => &self.sleep,
      ScoreKind::Strain => &self.strain,
    }
  }

  pub fn recovery_band(&self) -> Option<Band> {
    self.recovery.band()
  }
}
