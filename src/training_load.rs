//! Chronic / acute training load
//!
//! Daily stress folds into two exponential moving averages, CTL over 42 days
//! and ATL over 7, computed strictly oldest to newest.

use chrono::{Duration, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::clock::local_date;
use crate::config::AthleteProfile;
use crate::models::{Activity, DailyLoad};
use crate::trimp::{band_weight, hr_reserve_fraction};

pub const CTL_DAYS: f64 = 42.0;
pub const ATL_DAYS: f64 = 7.0;

/// Days averaged for the cold-start seed.
pub const SEED_WINDOW_DAYS: usize = 14;

// Cold-start seed as a share of early mean TSS. An approximation, not a model.
const CTL_SEED_FACTOR: f64 = 0.7;
const ATL_SEED_FACTOR: f64 = 0.4;

const TSS_PER_HOUR_AT_THRESHOLD: f64 = 100.0;

/// Intensity factor assumed when nothing but duration is known.
const MODERATE_INTENSITY_FACTOR: f64 = 0.75;

pub fn ctl_alpha() -> f64 {
  2.0 / (CTL_DAYS + 1.0)
}

pub fn atl_alpha() -> f64 {
  2.0 / (ATL_DAYS + 1.0)
}

/// ---------------------------------------------------------------------------
/// Per-Activity Stress
/// ---------------------------------------------------------------------------

/// Where an activity's stress figure came from, in fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TssSource {
  Provider,
  Power,
  HeartRate,
  Duration,
}

/// `hours x IF^2 x 100` where IF is power over FTP.
pub fn power_tss(hours: f64, power: f64, ftp: f64) -> Option<f64> {
  if ftp <= 0.0 || !power.is_finite() || power <= 0.0 {
    return None;
  }
  let intensity_factor = power / ftp;
  Some(hours * intensity_factor * intensity_factor * TSS_PER_HOUR_AT_THRESHOLD)
}

/// Reserve-weighted estimate from an average heart rate held for the whole activity.
pub fn heart_rate_tss(minutes: f64, average_hr: f64, profile: &AthleteProfile) -> Option<f64> {
  let fraction = hr_reserve_fraction(average_hr, profile)?;
  Some(minutes * fraction * band_weight(fraction))
}

pub fn duration_tss(hours: f64) -> f64 {
  hours * MODERATE_INTENSITY_FACTOR * MODERATE_INTENSITY_FACTOR * TSS_PER_HOUR_AT_THRESHOLD
}

/// Stress for one activity using the first source that applies.
pub fn activity_tss(activity: &Activity, profile: &AthleteProfile) -> (f64, TssSource) {
  if let Some(tss) = activity.precomputed_tss.filter(|t| t.is_finite() && *t >= 0.0) {
    return (tss, TssSource::Provider);
  }

  let hours = activity.duration_hours();

  if let (Some(power), Some(ftp)) = (activity.effective_power(), profile.ftp) {
    if let Some(tss) = power_tss(hours, power, ftp) {
      return (tss, TssSource::Power);
    }
  }

  if let Some(hr) = activity.average_heart_rate.filter(|hr| *hr > 0.0) {
    if let Some(tss) = heart_rate_tss(hours * 60.0, hr, profile) {
      return (tss, TssSource::HeartRate);
    }
  }

  (duration_tss(hours), TssSource::Duration)
}

/// Sum per-entry stress into one value per day.
pub fn fold_daily<I>(entries: I) -> BTreeMap<NaiveDate, f64>
where
  I: IntoIterator<Item = (NaiveDate, f64)>,
{
  let mut daily = BTreeMap::new();
  for (date, tss) in entries {
    *daily.entry(date).or_insert(0.0) += tss.max(0.0);
  }
  daily
}

/// Daily TSS totals keyed by the local calendar day each activity started on.
pub fn daily_tss(
  activities: &[Activity],
  profile: &AthleteProfile,
  offset: FixedOffset,
) -> BTreeMap<NaiveDate, f64> {
  fold_daily(
    activities
      .iter()
      .map(|a| (local_date(a.start_time, offset), activity_tss(a, profile).0)),
  )
}

/// ---------------------------------------------------------------------------
/// Seeding
/// ---------------------------------------------------------------------------

/// CTL/ATL assumed for the day before the series starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadSeed {
  pub ctl: f64,
  pub atl: f64,
}

impl LoadSeed {
  /// Mean of the first <= 14 calendar days (rest days count as zero), scaled
  /// by 0.7 for CTL and 0.4 for ATL.
  pub fn from_history(daily: &BTreeMap<NaiveDate, f64>, through: NaiveDate) -> Self {
    let first = match daily.keys().next() {
      Some(first) if *first <= through => *first,
      _ => return Self { ctl: 0.0, atl: 0.0 },
    };

    let days: Vec<f64> = first
      .iter_days()
      .take_while(|d| *d <= through)
      .take(SEED_WINDOW_DAYS)
      .map(|d| daily.get(&d).copied().unwrap_or(0.0))
      .collect();

    let mean = days.iter().sum::<f64>() / days.len() as f64;
    Self {
      ctl: CTL_SEED_FACTOR * mean,
      atl: ATL_SEED_FACTOR * mean,
    }
  }

  /// Provider figures on the earliest activity, when it carries both.
  pub fn from_provider(activities: &[Activity]) -> Option<Self> {
    let earliest = activities.iter().min_by_key(|a| a.start_time)?;
    match (earliest.precomputed_ctl, earliest.precomputed_atl) {
      (Some(ctl), Some(atl)) if ctl.is_finite() && atl.is_finite() => Some(Self {
        ctl: ctl.max(0.0),
        atl: atl.max(0.0),
      }),
      _ => None,
    }
  }
}

/// ---------------------------------------------------------------------------
/// Engine
/// ---------------------------------------------------------------------------

/// One pass over `[first day with stress, through]`. Days without an entry
/// contribute zero. Deterministic for identical input.
pub fn compute_load(
  daily: &BTreeMap<NaiveDate, f64>,
  through: NaiveDate,
  seed: Option<LoadSeed>,
) -> Vec<DailyLoad> {
  let first = match daily.keys().next() {
    Some(first) if *first <= through => *first,
    _ => return Vec::new(),
  };

  let seed = seed.unwrap_or_else(|| LoadSeed::from_history(daily, through));
  ema_pass(daily, first, through, seed)
}

/// Carry a stored day forward over `(previous.date, through]`. Entries on or
/// before `previous.date` are already folded into it and are ignored.
pub fn continue_load(
  daily: &BTreeMap<NaiveDate, f64>,
  previous: &DailyLoad,
  through: NaiveDate,
) -> Vec<DailyLoad> {
  let seed = LoadSeed {
    ctl: previous.ctl,
    atl: previous.atl,
  };
  ema_pass(daily, previous.date + Duration::days(1), through, seed)
}

fn ema_pass(
  daily: &BTreeMap<NaiveDate, f64>,
  first: NaiveDate,
  through: NaiveDate,
  seed: LoadSeed,
) -> Vec<DailyLoad> {
  let (ctl_a, atl_a) = (ctl_alpha(), atl_alpha());
  let mut ctl = seed.ctl.max(0.0);
  let mut atl = seed.atl.max(0.0);

  first
    .iter_days()
    .take_while(|d| *d <= through)
    .map(|date| {
      let tss = daily.get(&date).copied().unwrap_or(0.0).max(0.0);
      ctl = (tss * ctl_a + ctl * (1.0 - ctl_a)).max(0.0);
      atl = (tss * atl_a + atl * (1.0 - atl_a)).max(0.0);
      DailyLoad { date, tss, ctl, atl }
    })
    .collect()
}

#[derive(Debug, Clone)]
pub struct TrainingLoadEngine {
  profile: AthleteProfile,
}

impl TrainingLoadEngine {
  pub fn new(profile: AthleteProfile) -> Self {
    Self { profile }
  }

  /// Daily TSS of provider activities on calendar days in `offset`.
  pub fn daily_stress(&self, activities: &[Activity], offset: FixedOffset) -> BTreeMap<NaiveDate, f64> {
    daily_tss(activities, &self.profile, offset)
  }

  /// Load series from provider activities, seeded by the provider when it can.
  pub fn from_activities(
    &self,
    activities: &[Activity],
    offset: FixedOffset,
    through: NaiveDate,
  ) -> Vec<DailyLoad> {
    let daily = self.daily_stress(activities, offset);
    self.series(&daily, None, LoadSeed::from_provider(activities), through)
  }

  /// Continue from `previous` when the day before the window is already
  /// stored; only a series with no stored predecessor is cold-started.
  pub fn series(
    &self,
    daily: &BTreeMap<NaiveDate, f64>,
    previous: Option<&DailyLoad>,
    seed: Option<LoadSeed>,
    through: NaiveDate,
  ) -> Vec<DailyLoad> {
    match previous {
      Some(previous) => continue_load(daily, previous, through),
      None => compute_load(daily, through, seed),
    }
  }

  /// Range of days a backfill over `days_back` should cover.
  pub fn window(through: NaiveDate, days_back: i64) -> (NaiveDate, NaiveDate) {
    (through - Duration::days(days_back.max(0)), through)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::assert_approx_eq;
  use crate::test_utils::{day, mock_activity};
  use chrono::Offset;

  fn flat(days: u32, tss: f64) -> BTreeMap<NaiveDate, f64> {
    (1..=days).map(|d| (day(d), tss)).collect()
  }

  fn profile(ftp: Option<f64>) -> AthleteProfile {
    AthleteProfile {
      resting_hr: Some(60.0),
      max_hr: Some(190.0),
      ftp,
    }
  }

  #[test]
  fn test_scenario_fourteen_days_of_fifty() {
    let daily = flat(14, 50.0);
    let seed = LoadSeed::from_history(&daily, day(14));
    assert_approx_eq!(seed.ctl, 35.0, 1e-9);
    assert_approx_eq!(seed.atl, 20.0, 1e-9);

    let series = compute_load(&daily, day(14), None);
    assert_eq!(series.len(), 14);
    assert!(series[0].ctl > 35.0 && series[0].ctl < 36.0);
    assert!(series.windows(2).all(|w| w[1].ctl > w[0].ctl && w[1].ctl < 50.0));
    assert!(series[6].atl > 45.0);
    assert!(series[13].atl > series[13].ctl);
  }

  #[test]
  fn test_recomputation_is_bit_identical() {
    let mut daily = flat(20, 40.0);
    daily.insert(day(5), 180.0);
    daily.remove(&day(9));

    let first = compute_load(&daily, day(25), None);
    let second = compute_load(&daily, day(25), None);
    assert_eq!(first, second);
    assert_eq!(first.len(), 25);
  }

  #[test]
  fn test_missing_days_decay_and_never_go_negative() {
    let mut daily = BTreeMap::new();
    daily.insert(day(1), 100.0);
    let series = compute_load(&daily, day(30), None);

    assert!(series.windows(2).skip(1).all(|w| w[1].atl < w[0].atl));
    assert!(series.iter().all(|l| l.ctl >= 0.0 && l.atl >= 0.0));
    assert_eq!(series[10].tss, 0.0);
  }

  #[test]
  fn test_seed_counts_rest_days_as_zero() {
    let mut daily = BTreeMap::new();
    daily.insert(day(1), 140.0);
    daily.insert(day(20), 50.0);
    let seed = LoadSeed::from_history(&daily, day(20));
    assert_approx_eq!(seed.ctl, 0.7 * 10.0, 1e-9);
  }

  #[test]
  fn test_empty_history_yields_nothing() {
    assert!(compute_load(&BTreeMap::new(), day(10), None).is_empty());
  }

  #[test]
  fn test_tss_fallback_order() {
    let p = profile(Some(250.0));

    let provider = mock_activity("a", 1, Some(77.0));
    assert_eq!(activity_tss(&provider, &p), (77.0, TssSource::Provider));

    let mut powered = mock_activity("b", 1, None);
    powered.normalized_power = Some(200.0);
    let (tss, source) = activity_tss(&powered, &p);
    assert_eq!(source, TssSource::Power);
    assert_approx_eq!(tss, 1.0 * 0.8 * 0.8 * 100.0, 1e-9);

    // No FTP: power cannot be used, heart rate takes over
    let mut hr_only = powered.clone();
    hr_only.average_heart_rate = Some(125.0);
    let (tss, source) = activity_tss(&hr_only, &profile(None));
    assert_eq!(source, TssSource::HeartRate);
    assert_approx_eq!(tss, 60.0 * 0.5 * 2.0, 1e-9);

    let bare = mock_activity("c", 1, None);
    let (tss, source) = activity_tss(&bare, &profile(None));
    assert_eq!(source, TssSource::Duration);
    assert_approx_eq!(tss, 56.25, 1e-9);
  }

  #[test]
  fn test_same_day_activities_are_summed() {
    let p = profile(None);
    let activities = vec![
      mock_activity("a", 2, Some(30.0)),
      mock_activity("b", 2, Some(45.0)),
      mock_activity("c", 3, Some(10.0)),
    ];
    let daily = daily_tss(&activities, &p, chrono::Utc.fix());
    assert_eq!(daily.len(), 2);
    assert!(daily.values().any(|v| (*v - 75.0).abs() < 1e-9));
  }

  #[test]
  fn test_provider_seed_wins_over_heuristic() {
    let mut earliest = mock_activity("old", 10, Some(60.0));
    earliest.precomputed_ctl = Some(55.0);
    earliest.precomputed_atl = Some(70.0);
    let recent = mock_activity("new", 1, Some(60.0));

    let engine = TrainingLoadEngine::new(profile(None));
    let through = crate::test_utils::test_now().date_naive();
    let series = engine.from_activities(&[recent, earliest], chrono::Utc.fix(), through);

    let expected_first = 60.0 * ctl_alpha() + 55.0 * (1.0 - ctl_alpha());
    assert_approx_eq!(series[0].ctl, expected_first, 1e-9);
    assert_eq!(series.last().map(|l| l.date), Some(through));
  }

  #[test]
  fn test_continuing_from_stored_day_matches_full_pass() {
    let daily = flat(30, 50.0);
    let full = compute_load(&daily, day(30), None);

    let stored = full[22].clone();
    let tail = continue_load(&daily, &stored, day(30));
    assert_eq!(tail.len(), 7);
    assert_eq!(tail[0].date, day(24));
    assert_eq!(tail.as_slice(), &full[23..]);

    let engine = TrainingLoadEngine::new(profile(None));
    let restarted = engine.series(&daily, None, None, day(30));
    let continued = engine.series(&daily, Some(&stored), None, day(30));
    assert_eq!(restarted, full);
    assert_eq!(continued, tail);
  }
}
