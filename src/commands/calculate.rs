//! On-demand score calculation
//!
//! Live calculation for a single day. At most one calculation per score kind
//! runs at a time, and each is bounded by the configured timeout. The bound
//! covers the write too, so an expired calculation leaves no partial rows.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use super::WellnessService;
use crate::baseline::BaselineEngine;
use crate::clock::Clock;
use crate::error::WellnessError;
use crate::models::{aggregate_daily, DailyPhysio, MetricKind, Score, ScoreKind, ScoreSlot};
use crate::providers::PhysioDataProvider;
use crate::scores::{recovery_score, sleep_score, strain_score};
use crate::store::{RecordBatch, RecordStore, RecordWrite};
use crate::trend::TrendAlert;

/// Removes its kind from the in-flight set when dropped, including on timeout.
struct InFlightGuard<'a> {
  running: &'a Mutex<HashSet<ScoreKind>>,
  kind: ScoreKind,
}

impl Drop for InFlightGuard<'_> {
  fn drop(&mut self) {
    if let Ok(mut running) = self.running.lock() {
      running.remove(&self.kind);
    }
  }
}

struct Computed {
  score: Score,
  physio: Option<DailyPhysio>,
}

pub struct ScoreCalculator {
  records: Arc<dyn RecordStore>,
  physio: Arc<dyn PhysioDataProvider>,
  baselines: Arc<BaselineEngine>,
  clock: Arc<dyn Clock>,
  timeout: Duration,
  running: Mutex<HashSet<ScoreKind>>,
}

impl ScoreCalculator {
  pub fn new(
    records: Arc<dyn RecordStore>,
    physio: Arc<dyn PhysioDataProvider>,
    baselines: Arc<BaselineEngine>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
  ) -> Self {
    Self {
      records,
      physio,
      baselines,
      clock,
      timeout,
      running: Mutex::new(HashSet::new()),
    }
  }

  pub fn is_running(&self, kind: ScoreKind) -> bool {
    self
      .running
      .lock()
      .map(|running| running.contains(&kind))
      .unwrap_or(false)
  }

  fn claim(&self, kind: ScoreKind) -> Result<InFlightGuard<'_>, WellnessError> {
    let mut running = self
      .running
      .lock()
      .map_err(|_| WellnessError::CalculationInFlight(kind.to_string()))?;
    if !running.insert(kind) {
      return Err(WellnessError::CalculationInFlight(kind.to_string()));
    }
    Ok(InFlightGuard {
      running: &self.running,
      kind,
    })
  }

  /// Compute and persist one score for `date`.
  pub async fn calculate(&self, kind: ScoreKind, date: NaiveDate) -> Result<Score, WellnessError> {
    let _guard = self.claim(kind)?;

    let work = async {
      let computed = self.compute(kind, date).await?;
      self.persist(kind, date, &computed).await?;
      Ok::<_, WellnessError>(computed.score)
    };

    let score = match tokio::time::timeout(self.timeout, work).await {
      Ok(result) => result?,
      Err(_) => {
        warn!(kind = %kind, date = %date, "score calculation timed out");
        return Err(WellnessError::Timeout {
          kind: kind.to_string(),
          seconds: self.timeout.as_secs(),
        });
      }
    };

    info!(kind = %kind, date = %date, score = score.value, "score calculated");
    Ok(score)
  }

  async fn compute(&self, kind: ScoreKind, date: NaiveDate) -> Result<Computed, WellnessError> {
    match kind {
      ScoreKind::Strain => {
        let load = self
          .records
          .load(date)
          .await?
          .ok_or_else(|| WellnessError::MissingData(format!("training load for {}", date)))?;
        let score = strain_score(&load)
          .ok_or_else(|| WellnessError::MissingData(format!("usable TSS for {}", date)))?;
        Ok(Computed { score, physio: None })
      }
      ScoreKind::Recovery | ScoreKind::Sleep => {
        let physio = self.physio_for(date).await?;
        let score = if kind == ScoreKind::Recovery {
          let load = self.records.load(date).await?;
          recovery_score(&physio, load.as_ref())
        } else {
          sleep_score(&physio)
        };
        let score = score.ok_or_else(|| {
          WellnessError::MissingData(format!("{} inputs for {}", kind, date))
        })?;
        Ok(Computed {
          score,
          physio: Some(physio),
        })
      }
    }
  }

  /// Stored row refreshed with today's provider readings and cached baselines.
  async fn physio_for(&self, date: NaiveDate) -> Result<DailyPhysio, WellnessError> {
    let mut physio = self
      .records
      .physio(date)
      .await?
      .unwrap_or_else(|| DailyPhysio::placeholder(date));

    for metric in MetricKind::ALL {
      match self.physio.samples(metric, date, date).await {
        Ok(samples) => {
          if let Some(value) = aggregate_daily(&samples, metric).get(&date) {
            physio.set_value(metric, Some(*value));
          }
        }
        Err(e) => {
          let e = e.into_unavailable(self.physio.name());
          warn!(metric = %metric, error = %e, "using stored reading");
        }
      }
    }

    if let Some(set) = self.baselines.baselines(date).await {
      for metric in MetricKind::ALL {
        if let Some(baseline) = set.get(metric) {
          physio.set_baseline(metric, Some(baseline));
        }
      }
    }

    if !physio.has_data() {
      return Err(WellnessError::MissingData(format!("physiology for {}", date)));
    }
    Ok(physio)
  }

  async fn persist(&self, kind: ScoreKind, date: NaiveDate, computed: &Computed) -> Result<(), WellnessError> {
    let now = self.clock.now();
    let mut batch = RecordBatch::new(format!("calculate.{}", kind), now);

    if let Some(physio) = &computed.physio {
      batch.push(RecordWrite::Physio(physio.clone()));
      batch.push(RecordWrite::LinkPhysio {
        date,
        physio_date: physio.date,
      });
    }
    batch.push(RecordWrite::Score {
      date,
      kind,
      slot: ScoreSlot::Computed {
        score: computed.score,
        computed_at: now,
      },
    });

    self.records.save_batch(&batch).await?;
    Ok(())
  }
}

impl WellnessService {
  /// Live calculation of one score kind for `date`.
  pub async fn calculate_score(&self, kind: ScoreKind, date: NaiveDate) -> Result<Score, WellnessError> {
    self.calculator.calculate(kind, date).await
  }

  /// Trend alert over the detector window ending at `as_of`.
  pub async fn trend_alert(&self, as_of: NaiveDate) -> Result<Option<TrendAlert>, WellnessError> {
    let window = u32::try_from(self.trend.window_days).unwrap_or(u32::MAX);
    let deviations = self.baselines.deviations(as_of, window).await?;
    Ok(self.trend.detect(&deviations))
  }

  pub async fn todays_trend_alert(&self) -> Result<Option<TrendAlert>, WellnessError> {
    self.trend_alert(self.clock.today()).await
  }

  /// Time of the last write to any score row, if any
  pub async fn last_scored_at(&self, date: NaiveDate) -> Result<Option<DateTime<Utc>>, WellnessError> {
    Ok(self.records.score(date).await?.and_then(|row| row.last_updated))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheOrchestrator;
  use crate::clock::ManualClock;
  use crate::commands::Providers;
  use crate::config::EngineConfig;
  use crate::db::SqliteStore;
  use crate::models::{DailyLoad, DailyScore};
  use crate::test_utils::{setup_test_db, test_now, FakePhysioProvider};
  use crate::trend::{Severity, TrendMetric};
  use async_trait::async_trait;

  /// Delegates to SQLite but sleeps before every batch write.
  struct SlowSaveStore {
    inner: Arc<SqliteStore>,
    delay: Duration,
  }

  #[async_trait]
  impl RecordStore for SlowSaveStore {
    async fn physio(&self, date: NaiveDate) -> Result<Option<DailyPhysio>, WellnessError> {
      self.inner.physio(date).await
    }

    async fn physio_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyPhysio>, WellnessError> {
      self.inner.physio_range(from, to).await
    }

    async fn load(&self, date: NaiveDate) -> Result<Option<DailyLoad>, WellnessError> {
      self.inner.load(date).await
    }

    async fn load_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyLoad>, WellnessError> {
      self.inner.load_range(from, to).await
    }

    async fn score(&self, date: NaiveDate) -> Result<Option<DailyScore>, WellnessError> {
      self.inner.score(date).await
    }

    async fn score_range(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyScore>, WellnessError> {
      self.inner.score_range(from, to).await
    }

    async fn save_batch(&self, batch: &RecordBatch) -> Result<usize, WellnessError> {
      tokio::time::sleep(self.delay).await;
      self.inner.save_batch(batch).await
    }
  }

  fn steady_physio() -> FakePhysioProvider {
    let start = test_now().date_naive() - chrono::Duration::days(10);
    FakePhysioProvider::with_daily(start, 11, |_| {
      vec![
        (MetricKind::Hrv, 60.0),
        (MetricKind::RestingHr, 50.0),
        (MetricKind::SleepDuration, 7.5),
        (MetricKind::RespiratoryRate, 14.0),
      ]
    })
  }

  async fn calculator(physio: FakePhysioProvider) -> (Arc<ScoreCalculator>, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::new(setup_test_db().await));
    let calculator = calculator_over(store.clone(), store.clone(), physio, EngineConfig::default().calculation_timeout);
    (calculator, store)
  }

  fn calculator_over(
    records: Arc<dyn RecordStore>,
    cache_store: Arc<SqliteStore>,
    physio: FakePhysioProvider,
    timeout: Duration,
  ) -> Arc<ScoreCalculator> {
    let clock = Arc::new(ManualClock::new(test_now()));
    let config = EngineConfig::default();
    let physio: Arc<dyn PhysioDataProvider> = Arc::new(physio);
    let cache = Arc::new(CacheOrchestrator::new(cache_store, clock.clone()));
    let baselines = Arc::new(BaselineEngine::new(physio.clone(), cache, config.baseline_ttl));

    Arc::new(ScoreCalculator::new(records, physio, baselines, clock, timeout))
  }

  #[tokio::test]
  async fn test_recovery_is_computed_and_persisted() {
    let (calc, store) = calculator(steady_physio()).await;
    let today = test_now().date_naive();

    let score = calc.calculate(ScoreKind::Recovery, today).await.unwrap();
    assert!((0.0..=100.0).contains(&score.value));

    let row = store.score(today).await.unwrap().unwrap();
    assert_eq!(row.recovery.value(), Some(score.value));
    assert_eq!(row.physio, Some(today));
    assert!(row.sleep.value().is_none());

    let physio = store.physio(today).await.unwrap().unwrap();
    assert_eq!(physio.hrv_baseline, Some(60.0));
    assert!(!calc.is_running(ScoreKind::Recovery));
  }

  #[tokio::test]
  async fn test_strain_without_load_is_missing_data() {
    let (calc, store) = calculator(steady_physio()).await;
    let today = test_now().date_naive();

    let err = calc.calculate(ScoreKind::Strain, today).await.unwrap_err();
    assert!(matches!(err, WellnessError::MissingData(_)));

    let mut batch = RecordBatch::new("seed", test_now());
    batch.push(RecordWrite::Load(DailyLoad {
      date: today,
      tss: 80.0,
      ctl: 40.0,
      atl: 55.0,
    }));
    store.save_batch(&batch).await.unwrap();

    let score = calc.calculate(ScoreKind::Strain, today).await.unwrap();
    assert!(score.value > 0.0);
    assert!(score.band.is_none());
  }

  // Real time throughout: with paused time the clock auto-advances while the
  // SQLite worker thread runs, which fires pool acquire timeouts.
  #[tokio::test]
  async fn test_second_request_for_same_kind_is_rejected() {
    let physio = steady_physio().with_delay(Duration::from_millis(100));
    let (calc, _store) = calculator(physio).await;
    let today = test_now().date_naive();

    let (first, second, other_kind) = tokio::join!(
      calc.calculate(ScoreKind::Recovery, today),
      async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        calc.calculate(ScoreKind::Recovery, today).await
      },
      async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        calc.calculate(ScoreKind::Sleep, today).await
      },
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(WellnessError::CalculationInFlight(_))));
    assert!(other_kind.is_ok());
    assert!(!calc.is_running(ScoreKind::Recovery));
  }

  #[tokio::test]
  async fn test_timeout_releases_guard_and_writes_nothing() {
    let store = Arc::new(SqliteStore::new(setup_test_db().await));
    let physio = steady_physio().with_delay(Duration::from_secs(2));
    let calc = calculator_over(store.clone(), store.clone(), physio, Duration::from_millis(50));
    let today = test_now().date_naive();

    let err = calc.calculate(ScoreKind::Sleep, today).await.unwrap_err();
    assert!(matches!(err, WellnessError::Timeout { .. }));
    assert!(err.is_transient());
    assert!(!calc.is_running(ScoreKind::Sleep));
    assert!(store.score(today).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_timeout_during_write_leaves_no_rows() {
    let store = Arc::new(SqliteStore::new(setup_test_db().await));
    let today = test_now().date_naive();
    let mut batch = RecordBatch::new("seed", test_now());
    batch.push(RecordWrite::Load(DailyLoad {
      date: today,
      tss: 80.0,
      ctl: 40.0,
      atl: 55.0,
    }));
    store.save_batch(&batch).await.unwrap();

    let slow: Arc<dyn RecordStore> = Arc::new(SlowSaveStore {
      inner: store.clone(),
      delay: Duration::from_secs(2),
    });
    let calc = calculator_over(slow, store.clone(), steady_physio(), Duration::from_millis(200));

    let err = calc.calculate(ScoreKind::Strain, today).await.unwrap_err();
    assert!(matches!(err, WellnessError::Timeout { .. }));
    assert!(!calc.is_running(ScoreKind::Strain));
    assert!(store.score(today).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_trend_alert_from_service() {
    let start = test_now().date_naive() - chrono::Duration::days(12);
    let physio = Arc::new(FakePhysioProvider::with_daily(start, 13, |d| {
      let unwell = d >= 10;
      vec![
        (MetricKind::Hrv, if unwell { 45.0 } else { 60.0 }),
        (MetricKind::RestingHr, if unwell { 56.0 } else { 50.0 }),
        (MetricKind::SleepDuration, 7.5),
        (MetricKind::RespiratoryRate, 14.0),
      ]
    }));
    let store = Arc::new(SqliteStore::new(setup_test_db().await));
    let clock = Arc::new(ManualClock::new(test_now()));
    let service = WellnessService::new(
      EngineConfig::default(),
      clock,
      store.clone(),
      store,
      Providers {
        physio,
        activities: Vec::new(),
      },
    );

    let alert = service.todays_trend_alert().await.unwrap().unwrap();
    let metrics: Vec<TrendMetric> = alert.flags.iter().map(|f| f.metric).collect();
    assert_eq!(metrics, vec![TrendMetric::Hrv, TrendMetric::RestingHr]);
    assert_eq!(alert.max_streak, 3);
    assert_eq!(alert.severity, Severity::Amber);

    let quiet = service.trend_alert(start + chrono::Duration::days(9)).await.unwrap();
    assert!(quiet.is_none());
  }
}
