//! Recovery, sleep and strain scoring
//!
//! Pure functions from a day's physiology and load to a clamped 0-100 score.
//! Insufficient input yields None rather than a made-up midpoint.

use crate::baseline::percent_deviation;
use crate::models::{DailyLoad, DailyPhysio, MetricKind, Score, ScoreKind};

/// ---------------------------------------------------------------------------
/// Component Scores
/// ---------------------------------------------------------------------------

/// Score of a day sitting exactly on its baseline.
const AT_BASELINE: f64 = 70.0;

/// Points per percent of HRV above/below baseline.
const HRV_POINTS_PER_PCT: f64 = 2.0;
/// Points per percent of resting HR above/below baseline; inverted.
const RHR_POINTS_PER_PCT: f64 = 4.0;

const OPTIMAL_SLEEP_HOURS: f64 = 8.0;
const SHORT_SLEEP_HOURS: f64 = 6.0;

// Component weights with everything present
const HRV_WEIGHT: f64 = 0.4;
const RHR_WEIGHT: f64 = 0.2;
const SLEEP_WEIGHT: f64 = 0.2;
const TSB_WEIGHT: f64 = 0.2;

/// Daily TSS that maps to a full strain score.
const STRAIN_ANCHOR_TSS: f64 = 400.0;

fn component(deviation_pct: f64, points_per_pct: f64) -> f64 {
  (AT_BASELINE + deviation_pct * points_per_pct).clamp(0.0, 100.0)
}

pub fn hrv_component(physio: &DailyPhysio) -> Option<f64> {
  let pct = percent_deviation(physio.value(MetricKind::Hrv), physio.baseline(MetricKind::Hrv))?;
  Some(component(pct, HRV_POINTS_PER_PCT))
}

pub fn resting_hr_component(physio: &DailyPhysio) -> Option<f64> {
  let pct = percent_deviation(
    physio.value(MetricKind::RestingHr),
    physio.baseline(MetricKind::RestingHr),
  )?;
  Some(component(-pct, RHR_POINTS_PER_PCT))
}

/// Hours against an 8h target. Below 6h the penalty steepens.
pub fn sleep_duration_component(hours: f64) -> f64 {
  if hours >= OPTIMAL_SLEEP_HOURS {
    return 100.0;
  }
  if hours >= SHORT_SLEEP_HOURS {
    let span = OPTIMAL_SLEEP_HOURS - SHORT_SLEEP_HOURS;
    return 70.0 + (hours - SHORT_SLEEP_HOURS) / span * 30.0;
  }
  (hours / SHORT_SLEEP_HOURS * 70.0).clamp(0.0, 70.0)
}

/// Form mapped onto 0-100. Fresh (TSB 5..=15) is best; deep fatigue falls off.
pub fn tsb_component(tsb: f64) -> f64 {
  let score = if (5.0..=15.0).contains(&tsb) {
    100.0
  } else if tsb > 25.0 {
    // Long layoff, detraining
    (90.0 - (tsb - 25.0) * 2.0).max(70.0)
  } else if tsb > 15.0 {
    100.0 - (tsb - 15.0)
  } else if tsb >= 0.0 {
    85.0 + tsb / 5.0 * 15.0
  } else if tsb >= -10.0 {
    60.0 + (tsb + 10.0) / 10.0 * 25.0
  } else if tsb >= -30.0 {
    30.0 + (tsb + 30.0) / 20.0 * 30.0
  } else {
    (30.0 + (tsb + 30.0)).max(0.0)
  };
  score.clamp(0.0, 100.0)
}

fn weighted(parts: &[(f64, f64)]) -> Option<f64> {
  let total_weight: f64 = parts.iter().map(|(_, w)| w).sum();
  if total_weight <= 0.0 {
    return None;
  }
  Some(parts.iter().map(|(v, w)| v * w).sum::<f64>() / total_weight)
}

/// ---------------------------------------------------------------------------
/// Scores
/// ---------------------------------------------------------------------------

/// Needs HRV or resting HR against a baseline; sleep and form refine it.
pub fn recovery_score(physio: &DailyPhysio, load: Option<&DailyLoad>) -> Option<Score> {
  let hrv = hrv_component(physio);
  let rhr = resting_hr_component(physio);
  if hrv.is_none() && rhr.is_none() {
    return None;
  }

  let mut parts = Vec::with_capacity(4);
  if let Some(v) = hrv {
    parts.push((v, HRV_WEIGHT));
  }
  if let Some(v) = rhr {
    parts.push((v, RHR_WEIGHT));
  }
  if let Some(hours) = physio.sleep_hours {
    parts.push((sleep_duration_component(hours), SLEEP_WEIGHT));
  }
  if let Some(load) = load {
    parts.push((tsb_component(load.tsb()), TSB_WEIGHT));
  }

  weighted(&parts).map(|raw| Score::new(ScoreKind::Recovery, raw))
}

/// Duration against target, blended with consistency against the sleep
/// baseline when one exists. Elevated breathing rate overnight costs points.
pub fn sleep_score(physio: &DailyPhysio) -> Option<Score> {
  let hours = physio.sleep_hours.filter(|h| h.is_finite() && *h > 0.0)?;
  let duration = sleep_duration_component(hours);

  let mut raw = match percent_deviation(Some(hours), physio.sleep_baseline) {
    Some(pct) => {
      let consistency = (100.0 - pct.abs() * 2.0).clamp(0.0, 100.0);
      duration * 0.7 + consistency * 0.3
    }
    None => duration,
  };

  if let Some(pct) = percent_deviation(physio.respiratory_rate, physio.respiratory_baseline) {
    if pct > 5.0 {
      raw -= (pct - 5.0).min(10.0);
    }
  }

  Some(Score::new(ScoreKind::Sleep, raw))
}

/// Log-scaled day stress: 0 TSS is 0, the anchor day is 100.
pub fn strain_score(load: &DailyLoad) -> Option<Score> {
  if !load.tss.is_finite() {
    return None;
  }
  let raw = 100.0 * (load.tss.max(0.0) + 1.0).ln() / (STRAIN_ANCHOR_TSS + 1.0).ln();
  Some(Score::new(ScoreKind::Strain, raw))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_utils::{day, mock_physio};

  fn load(tss: f64, ctl: f64, atl: f64) -> DailyLoad {
    DailyLoad {
      date: day(10),
      tss,
      ctl,
      atl,
    }
  }

  #[test]
  fn test_recovery_requires_a_baseline() {
    let mut physio = mock_physio(day(10));
    physio.hrv_baseline = None;
    physio.resting_hr_baseline = None;
    assert!(recovery_score(&physio, None).is_none());
  }

  #[test]
  fn test_recovery_at_baseline_is_mid_high() {
    let physio = mock_physio(day(10));
    let score = recovery_score(&physio, None).unwrap();
    assert!(score.value > 60.0 && score.value < 90.0);
    assert!(score.band.is_some());
  }

  #[test]
  fn test_recovery_drops_with_suppressed_hrv_and_fatigue() {
    let fresh = mock_physio(day(10));
    let mut stressed = mock_physio(day(10));
    stressed.hrv = stressed.hrv_baseline.map(|b| b * 0.7);
    stressed.resting_hr = stressed.resting_hr_baseline.map(|b| b * 1.1);

    let good = recovery_score(&fresh, Some(&load(0.0, 50.0, 40.0))).unwrap();
    let bad = recovery_score(&stressed, Some(&load(0.0, 50.0, 90.0))).unwrap();
    assert!(bad.value < good.value);
  }

  #[test]
  fn test_scores_stay_in_range_for_extremes() {
    let mut physio = mock_physio(day(10));
    physio.hrv = Some(10_000.0);
    physio.resting_hr = Some(1.0);
    physio.sleep_hours = Some(20.0);
    let high = recovery_score(&physio, Some(&load(0.0, 100.0, 0.0))).unwrap();
    assert!((0.0..=100.0).contains(&high.value));

    physio.hrv = Some(0.1);
    physio.resting_hr = Some(220.0);
    physio.sleep_hours = Some(0.5);
    let low = recovery_score(&physio, Some(&load(0.0, 0.0, 300.0))).unwrap();
    assert!((0.0..=100.0).contains(&low.value));

    let strain = strain_score(&load(5_000.0, 0.0, 0.0)).unwrap();
    assert_eq!(strain.value, 100.0);
  }

  #[test]
  fn test_sleep_needs_hours() {
    let mut physio = mock_physio(day(10));
    physio.sleep_hours = None;
    assert!(sleep_score(&physio).is_none());
  }

  #[test]
  fn test_sleep_rewards_duration() {
    let mut physio = mock_physio(day(10));
    physio.sleep_baseline = None;
    physio.sleep_hours = Some(8.5);
    assert_eq!(sleep_score(&physio).unwrap().value, 100.0);

    physio.sleep_hours = Some(5.0);
    assert!(sleep_score(&physio).unwrap().value < 60.0);
  }

  #[test]
  fn test_strain_is_log_scaled_without_band() {
    let rest = strain_score(&load(0.0, 40.0, 40.0)).unwrap();
    let moderate = strain_score(&load(60.0, 40.0, 40.0)).unwrap();
    let hard = strain_score(&load(200.0, 40.0, 40.0)).unwrap();

    assert_eq!(rest.value, 0.0);
    assert!(moderate.value > 60.0);
    assert!(hard.value > moderate.value);
    assert!(hard.band.is_none());
  }

  #[test]
  fn test_tsb_component_shape() {
    assert_eq!(tsb_component(10.0), 100.0);
    assert!(tsb_component(-5.0) > tsb_component(-20.0));
    assert!(tsb_component(-60.0) >= 0.0);
    assert!(tsb_component(40.0) < tsb_component(10.0));
  }
}
