//! External data providers
//!
//! The network clients behind these traits live outside this crate. The
//! engines only see the contracts below.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ProviderError, WellnessError};
use crate::models::{Activity, ActivityKind, DailySample, MetricKind, Workout};

/// Wearable / health-store source of raw physiology and workouts.
#[async_trait]
pub trait PhysioDataProvider: Send + Sync {
  fn name(&self) -> &str;

  /// Samples for `metric` with dates in `[from, to]`.
  async fn samples(
    &self,
    metric: MetricKind,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<DailySample>, ProviderError>;

  /// Workouts starting in `[from, to]`; an empty `kinds` slice means all kinds.
  async fn workouts(
    &self,
    from: NaiveDate,
    to: NaiveDate,
    kinds: &[ActivityKind],
  ) -> Result<Vec<Workout>, ProviderError>;
}

/// Third-party training log (e.g. a cycling/running platform).
#[async_trait]
pub trait ActivityHistoryProvider: Send + Sync {
  fn name(&self) -> &str;

  async fn recent_activities(
    &self,
    limit: usize,
    days_back: i64,
  ) -> Result<Vec<Activity>, ProviderError>;
}

/// ---------------------------------------------------------------------------
/// Prioritized Activity Sources
/// ---------------------------------------------------------------------------

/// Which source ended up supplying activity history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityOrigin {
  Provider(String),
  None,
}

/// Activity providers queried in priority order.
///
/// A provider that fails or returns nothing hands over to the next one.
#[derive(Clone, Default)]
pub struct ActivitySourceChain {
  providers: Vec<Arc<dyn ActivityHistoryProvider>>,
}

impl ActivitySourceChain {
  pub fn new(providers: Vec<Arc<dyn ActivityHistoryProvider>>) -> Self {
    Self { providers }
  }

  /// First non-empty result in priority order, plus every failure seen on the way.
  pub async fn recent_activities(
    &self,
    limit: usize,
    days_back: i64,
  ) -> (Vec<Activity>, ActivityOrigin, Vec<WellnessError>) {
    let mut failures = Vec::new();

    for provider in &self.providers {
      match provider.recent_activities(limit, days_back).await {
        Ok(activities) if !activities.is_empty() => {
          debug!(source = provider.name(), count = activities.len(), "activity history loaded");
          return (activities, ActivityOrigin::Provider(provider.name().to_string()), failures);
        }
        Ok(_) => {
          debug!(source = provider.name(), "activity source returned nothing, trying next");
        }
        Err(e) => {
          warn!(source = provider.name(), error = %e, "activity source unavailable, trying next");
          failures.push(e.into_unavailable(provider.name()));
        }
      }
    }

    (Vec::new(), ActivityOrigin::None, failures)
  }
}
