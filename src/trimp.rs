//! Training impulse (TRIMP)
//!
//! Zone-weighted integration of a heart-rate stream over heart-rate reserve.
//! Without a stream, calories scaled by an activity-family multiplier stand in.

use std::sync::Arc;

use crate::cache::{trimp_key, CacheOrchestrator, Ttl};
use crate::config::AthleteProfile;
use crate::models::{HeartRateSample, Workout};

/// Duration credited to the final sample of a stream.
const LAST_SAMPLE_MINUTES: f64 = 1.0;

/// TRIMP per minute at moderate effort (60% reserve in the 60-70% band),
/// used when a workout has neither heart rate nor calories.
const MODERATE_TRIMP_PER_MINUTE: f64 = 0.6 * 3.0;

/// Fraction of heart-rate reserve, clamped to `[0, 1]`.
pub fn hr_reserve_fraction(bpm: f64, profile: &AthleteProfile) -> Option<f64> {
  let reserve = profile.hr_reserve()?;
  if !bpm.is_finite() {
    return None;
  }
  Some(((bpm - profile.effective_resting_hr()) / reserve).clamp(0.0, 1.0))
}

/// Band weight for a reserve fraction: <50% is 1 up to >=80% is 5.
pub fn band_weight(fraction: f64) -> f64 {
  match fraction {
    f if f < 0.5 => 1.0,
    f if f < 0.6 => 2.0,
    f if f < 0.7 => 3.0,
    f if f < 0.8 => 4.0,
    _ => 5.0,
  }
}

/// Sum of `minutes x fraction x weight` over the stream. Each sample lasts
/// until the next one; the last gets a flat minute.
pub fn trimp_from_heart_rate(samples: &[HeartRateSample], profile: &AthleteProfile) -> Option<f64> {
  if samples.is_empty() {
    return None;
  }
  profile.hr_reserve()?;

  let mut ordered: Vec<&HeartRateSample> = samples.iter().collect();
  ordered.sort_by_key(|s| s.at);

  let mut total = 0.0;
  for (i, sample) in ordered.iter().enumerate() {
    let minutes = match ordered.get(i + 1) {
      Some(next) => (next.at - sample.at).num_milliseconds().max(0) as f64 / 60_000.0,
      None => LAST_SAMPLE_MINUTES,
    };
    if let Some(fraction) = hr_reserve_fraction(sample.bpm, profile) {
      total += minutes * fraction * band_weight(fraction);
    }
  }

  Some(total)
}

/// Estimate for workouts without a heart-rate stream.
pub fn estimated_trimp(workout: &Workout) -> f64 {
  let multiplier = workout.activity_kind.trimp_multiplier();
  match workout.calories_burned.filter(|c| c.is_finite() && *c > 0.0) {
    Some(calories) => calories * multiplier,
    None => workout.duration_minutes() * MODERATE_TRIMP_PER_MINUTE * multiplier,
  }
}

/// TRIMP for one workout, preferring the heart-rate stream.
pub fn trimp(workout: &Workout, profile: &AthleteProfile) -> f64 {
  trimp_from_heart_rate(&workout.heart_rate_samples, profile)
    .unwrap_or_else(|| estimated_trimp(workout))
    .max(0.0)
}

/// TRIMP with permanent per-workout caching.
pub struct TrimpEngine {
  cache: Arc<CacheOrchestrator>,
  profile: AthleteProfile,
}

impl TrimpEngine {
  pub fn new(cache: Arc<CacheOrchestrator>, profile: AthleteProfile) -> Self {
    Self { cache, profile }
  }

  pub async fn trimp(&self, workout: &Workout) -> f64 {
    let profile = &self.profile;
    self
      .cache
      .fetch(&trimp_key(&workout.id), Ttl::Forever, || async move { trimp(workout, profile) })
      .await
  }
}
