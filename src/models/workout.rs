use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
  Running,
  Cycling,
  Swimming,
  Rowing,
  Hiking,
  Walking,
  StrengthTraining,
  HighIntensityInterval,
  Yoga,
  Other,
}

impl ActivityKind {
  /// Calorie-to-TRIMP multiplier used when no heart-rate stream exists.
  ///
  /// Resistance work is weighted up for muscular stress that calories miss,
  /// low-impact movement is weighted down.
  pub fn trimp_multiplier(&self) -> f64 {
    match self {
      ActivityKind::StrengthTraining => 1.5,
      ActivityKind::HighIntensityInterval => 1.3,
      ActivityKind::Running | ActivityKind::Rowing => 1.0,
      ActivityKind::Cycling | ActivityKind::Swimming => 0.9,
      ActivityKind::Hiking => 0.7,
      ActivityKind::Walking => 0.5,
      ActivityKind::Yoga => 0.4,
      ActivityKind::Other => 0.8,
    }
  }

  /// Loose mapping from provider activity labels.
  pub fn from_label(label: &str) -> Self {
    match label.to_lowercase().as_str() {
      "run" | "running" | "trail_run" | "trailrun" => ActivityKind::Running,
      "ride" | "cycling" | "virtualride" | "virtual_ride" => ActivityKind::Cycling,
      "swim" | "swimming" => ActivityKind::Swimming,
      "rowing" | "row" => ActivityKind::Rowing,
      "hike" | "hiking" => ActivityKind::Hiking,
      "walk" | "walking" => ActivityKind::Walking,
      "weighttraining" | "weight_training" | "strength" | "strength_training" => {
        ActivityKind::StrengthTraining
      }
      "hiit" | "crossfit" => ActivityKind::HighIntensityInterval,
      "yoga" | "pilates" => ActivityKind::Yoga,
      _ => ActivityKind::Other,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateSample {
  pub at: DateTime<Utc>,
  pub bpm: f64,
}

/// Workout as reported by the physiological data provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workout {
  /// Stable identity; completed workouts never change
  pub id: String,
  pub activity_kind: ActivityKind,
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
  pub calories_burned: Option<f64>,
  #[serde(default)]
  pub heart_rate_samples: Vec<HeartRateSample>,
}

impl Workout {
  pub fn duration_minutes(&self) -> f64 {
    ((self.end - self.start).num_seconds().max(0)) as f64 / 60.0
  }

  pub fn has_heart_rate(&self) -> bool {
    !self.heart_rate_samples.is_empty()
  }
}

/// Activity summary from an activity-history provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
  pub id: String,
  pub activity_kind: ActivityKind,
  pub start_time: DateTime<Utc>,
  pub duration_seconds: i64,
  #[serde(default)]
  pub average_power: Option<f64>,
  #[serde(default)]
  pub normalized_power: Option<f64>,
  #[serde(default)]
  pub average_heart_rate: Option<f64>,
  #[serde(default)]
  pub precomputed_tss: Option<f64>,
  #[serde(default)]
  pub precomputed_ctl: Option<f64>,
  #[serde(default)]
  pub precomputed_atl: Option<f64>,
}

impl Activity {
  pub fn duration_hours(&self) -> f64 {
    self.duration_seconds.max(0) as f64 / 3600.0
  }

  /// Normalized power when present, otherwise average power.
  pub fn effective_power(&self) -> Option<f64> {
    self
      .normalized_power
      .or(self.average_power)
      .filter(|p| p.is_finite() && *p > 0.0)
  }
}

impl From<&Workout> for Activity {
  /// Workouts from the physiological provider carry no power or provider TSS;
  /// the mean of the HR stream stands in for average heart rate.
  fn from(workout: &Workout) -> Self {
    let average_heart_rate = if workout.heart_rate_samples.is_empty() {
      None
    } else {
      let sum: f64 = workout.heart_rate_samples.iter().map(|s| s.bpm).sum();
      Some(sum / workout.heart_rate_samples.len() as f64)
    };

    Self {
      id: workout.id.clone(),
      activity_kind: workout.activity_kind,
      start_time: workout.start,
      duration_seconds: (workout.end - workout.start).num_seconds().max(0),
      average_power: None,
      normalized_power: None,
      average_heart_rate,
      precomputed_tss: None,
      precomputed_ctl: None,
      precomputed_atl: None,
    }
  }
}
