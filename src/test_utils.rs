//! Test utilities and helpers for integration and unit testing
//!
//! This module provides common test infrastructure including:
//! - Database setup/teardown
//! - In-memory stores and fake providers
//! - Mock data factories
//! - Helper assertions

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{ProviderError, WellnessError};
use crate::models::{
  Activity, ActivityKind, DailyPhysio, DailySample, HeartRateSample, MetricKind, Workout,
};
use crate::providers::{ActivityHistoryProvider, PhysioDataProvider};
use crate::store::{KeyValueStore, StoredValue};

/// ---------------------------------------------------------------------------
/// Database Test Utilities
/// ---------------------------------------------------------------------------

/// Create an in-memory SQLite database for testing
/// Runs all migrations and returns a ready-to-use pool
///
/// Uses max_connections(1) to prevent multiple pool connections from creating
/// isolated in-memory databases, which would cause intermittent test failures
pub async fn setup_test_db() -> SqlitePool {
  let pool = sqlx::sqlite::SqlitePoolOptions::new()
    .max_connections(1)
    .connect("sqlite::memory:")
    .await
    .expect("Failed to create in-memory database");

  // Run migrations
  sqlx::migrate!("./migrations")
    .run(&pool)
    .await
    .expect("Failed to run migrations");

  pool
}

/// Close a test database pool
pub async fn teardown_test_db(pool: SqlitePool) {
  pool.close().await;
}

/// ---------------------------------------------------------------------------
/// Time Helpers
/// ---------------------------------------------------------------------------

/// Fixed "now" every test clock starts from: 2024-06-15 12:00 UTC
pub fn test_now() -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).unwrap()
}

/// Day of June 2024
pub fn day(d: u32) -> NaiveDate {
  NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
}

/// ---------------------------------------------------------------------------
/// In-Memory Stores
/// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
  entries: Mutex<HashMap<String, StoredValue>>,
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
  async fn get(&self, key: &str) -> Result<Option<StoredValue>, WellnessError> {
    Ok(self.entries.lock().unwrap().get(key).cloned())
  }

  async fn set(
    &self,
    key: &str,
    value: &str,
    stored_at: DateTime<Utc>,
  ) -> Result<(), WellnessError> {
    self.entries.lock().unwrap().insert(
      key.to_string(),
      StoredValue {
        value: value.to_string(),
        stored_at,
      },
    );
    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<(), WellnessError> {
    self.entries.lock().unwrap().remove(key);
    Ok(())
  }
}

/// ---------------------------------------------------------------------------
/// Fake Providers
/// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FakePhysioProvider {
  samples: Vec<DailySample>,
  workouts: Vec<Workout>,
  failing: bool,
  delay: Option<std::time::Duration>,
  pub sample_calls: AtomicUsize,
}

impl FakePhysioProvider {
  /// `days` consecutive days from `start`; `f` gets the day offset.
  pub fn with_daily<F>(start: NaiveDate, days: u32, f: F) -> Self
  where
    F: Fn(u32) -> Vec<(MetricKind, f64)>,
  {
    let samples = (0..days)
      .flat_map(|d| {
        let date = start + Duration::days(i64::from(d));
        f(d)
          .into_iter()
          .map(move |(metric, value)| DailySample::new(date, metric, value))
      })
      .collect();

    Self {
      samples,
      ..Self::default()
    }
  }

  pub fn failing() -> Self {
    Self {
      failing: true,
      ..Self::default()
    }
  }

  pub fn with_workouts(mut self, workouts: Vec<Workout>) -> Self {
    self.workouts = workouts;
    self
  }

  /// Every call sleeps this long first
  pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
    self.delay = Some(delay);
    self
  }
}

#[async_trait]
impl PhysioDataProvider for FakePhysioProvider {
  fn name(&self) -> &str {
    "fake-physio"
  }

  async fn samples(
    &self,
    metric: MetricKind,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<DailySample>, ProviderError> {
    self.sample_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }
    if self.failing {
      return Err(ProviderError::Request("connection refused".into()));
    }
    Ok(
      self
        .samples
        .iter()
        .filter(|s| s.metric == metric && s.date >= from && s.date <= to)
        .cloned()
        .collect(),
    )
  }

  async fn workouts(
    &self,
    from: NaiveDate,
    to: NaiveDate,
    kinds: &[ActivityKind],
  ) -> Result<Vec<Workout>, ProviderError> {
    if self.failing {
      return Err(ProviderError::Request("connection refused".into()));
    }
    Ok(
      self
        .workouts
        .iter()
        .filter(|w| {
          let date = w.start.date_naive();
          date >= from && date <= to && (kinds.is_empty() || kinds.contains(&w.activity_kind))
        })
        .cloned()
        .collect(),
    )
  }
}

#[derive(Debug)]
pub struct FakeActivityProvider {
  name: String,
  activities: Vec<Activity>,
  failing: bool,
  calls: AtomicUsize,
}

impl FakeActivityProvider {
  pub fn new(name: &str, activities: Vec<Activity>) -> Self {
    Self {
      name: name.to_string(),
      activities,
      failing: false,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn failing(name: &str) -> Self {
    Self {
      failing: true,
      ..Self::new(name, Vec::new())
    }
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl ActivityHistoryProvider for FakeActivityProvider {
  fn name(&self) -> &str {
    &self.name
  }

  async fn recent_activities(
    &self,
    limit: usize,
    days_back: i64,
  ) -> Result<Vec<Activity>, ProviderError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if self.failing {
      return Err(ProviderError::NotAuthenticated(self.name.clone()));
    }
    let since = test_now() - Duration::days(days_back);
    Ok(
      self
        .activities
        .iter()
        .filter(|a| a.start_time >= since)
        .take(limit)
        .cloned()
        .collect(),
    )
  }
}

/// ---------------------------------------------------------------------------
/// Mock Data Factories
/// ---------------------------------------------------------------------------

/// One-hour run starting `days_ago` days before `test_now()`
pub fn mock_activity(id: &str, days_ago: i64, tss: Option<f64>) -> Activity {
  Activity {
    id: id.to_string(),
    activity_kind: ActivityKind::Running,
    start_time: test_now() - Duration::days(days_ago),
    duration_seconds: 3600,
    average_power: None,
    normalized_power: None,
    average_heart_rate: None,
    precomputed_tss: tss,
    precomputed_ctl: None,
    precomputed_atl: None,
  }
}

/// Workout without heart rate or calories, ending at `test_now()`
pub fn mock_workout(id: &str, kind: ActivityKind, minutes: i64) -> Workout {
  let end = test_now();
  Workout {
    id: id.to_string(),
    activity_kind: kind,
    start: end - Duration::minutes(minutes),
    end,
    calories_burned: None,
    heart_rate_samples: Vec::new(),
  }
}

/// 45-minute run `days_ago` days back with a calorie figure
pub fn mock_workout_days_ago(id: &str, days_ago: i64, calories: f64) -> Workout {
  let start = test_now() - Duration::days(days_ago);
  Workout {
    id: id.to_string(),
    activity_kind: ActivityKind::Running,
    start,
    end: start + Duration::minutes(45),
    calories_burned: Some(calories),
    heart_rate_samples: Vec::new(),
  }
}

/// `count` evenly spaced samples at a constant heart rate
pub fn hr_stream(start: DateTime<Utc>, count: usize, step: Duration, bpm: f64) -> Vec<HeartRateSample> {
  (0..count)
    .map(|i| HeartRateSample {
      at: start + step * i as i32,
      bpm,
    })
    .collect()
}

/// A day sitting exactly on its baselines
pub fn mock_physio(date: NaiveDate) -> DailyPhysio {
  DailyPhysio {
    date,
    hrv: Some(60.0),
    resting_hr: Some(52.0),
    sleep_hours: Some(7.5),
    respiratory_rate: Some(14.0),
    hrv_baseline: Some(60.0),
    resting_hr_baseline: Some(52.0),
    sleep_baseline: Some(7.5),
    respiratory_baseline: Some(14.0),
  }
}

/// ---------------------------------------------------------------------------
/// Test Macros
/// ---------------------------------------------------------------------------

/// Assert two floats are approximately equal within a tolerance
#[macro_export]
macro_rules! assert_approx_eq {
  ($left:expr, $right:expr, $tolerance:expr) => {
    let diff = ($left - $right).abs();
    assert!(
      diff < $tolerance,
      "Values not approximately equal: {} vs {} (diff: {}, tolerance: {})",
      $left,
      $right,
      diff,
      $tolerance
    );
  };
}

/// ---------------------------------------------------------------------------
/// Tests for Test Utilities
/// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_setup_db_creates_schema() {
    let pool = setup_test_db().await;

    // Verify key tables exist
    let tables: Vec<(String,)> = sqlx::query_as(
      "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('daily_physio', 'daily_load', 'daily_score', 'kv_store')"
    )
    .fetch_all(&pool)
    .await
    .expect("Failed to query tables");

    assert_eq!(tables.len(), 4, "Expected 4 tables, got {}", tables.len());

    teardown_test_db(pool).await;
  }

  #[tokio::test]
  async fn test_fake_physio_filters_by_range() {
    let provider = FakePhysioProvider::with_daily(day(1), 10, |d| {
      vec![(MetricKind::Hrv, 50.0 + d as f64)]
    });

    let samples = provider.samples(MetricKind::Hrv, day(3), day(5)).await.unwrap();
    assert_eq!(samples.len(), 3);
    assert!(provider.samples(MetricKind::RestingHr, day(1), day(10)).await.unwrap().is_empty());
    assert_eq!(provider.sample_calls.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_mock_factories_create_valid_data() {
    let activity = mock_activity("a1", 2, Some(40.0));
    assert_eq!(activity.duration_hours(), 1.0);
    assert_eq!(activity.start_time, test_now() - Duration::days(2));

    let stream = hr_stream(test_now(), 3, Duration::seconds(30), 120.0);
    assert_eq!(stream[2].at - stream[0].at, Duration::minutes(1));

    assert!(mock_physio(day(1)).has_data());
  }
}
