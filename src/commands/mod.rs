pub mod backfill;
pub mod calculate;

pub use calculate::ScoreCalculator;

use chrono::NaiveDate;
use std::sync::Arc;

use crate::backfill::BackfillOrchestrator;
use crate::baseline::BaselineEngine;
use crate::cache::CacheOrchestrator;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::WellnessError;
use crate::models::{DailyLoad, DailyScore};
use crate::providers::{ActivityHistoryProvider, ActivitySourceChain, PhysioDataProvider};
use crate::store::{KeyValueStore, RecordStore};
use crate::trend::TrendDetector;
use crate::trimp::TrimpEngine;

/// External data sources handed to the service at start-up.
#[derive(Clone)]
pub struct Providers {
  pub physio: Arc<dyn PhysioDataProvider>,
  /// Activity-history sources, highest priority first
  pub activities: Vec<Arc<dyn ActivityHistoryProvider>>,
}

/// Every engine wired together once and passed around by handle.
pub struct WellnessService {
  clock: Arc<dyn Clock>,
  records: Arc<dyn RecordStore>,
  cache: Arc<CacheOrchestrator>,
  baselines: Arc<BaselineEngine>,
  backfill: BackfillOrchestrator,
  calculator: ScoreCalculator,
  trend: TrendDetector,
}

impl WellnessService {
  pub fn new(
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    records: Arc<dyn RecordStore>,
    kv: Arc<dyn KeyValueStore>,
    providers: Providers,
  ) -> Self {
    let cache = Arc::new(CacheOrchestrator::new(kv.clone(), clock.clone()));
    let baselines = Arc::new(BaselineEngine::new(
      providers.physio.clone(),
      cache.clone(),
      config.baseline_ttl,
    ));
    let trimp = Arc::new(TrimpEngine::new(cache.clone(), config.profile.clone()));

    let backfill = BackfillOrchestrator::new(
      &config,
      records.clone(),
      kv,
      providers.physio.clone(),
      ActivitySourceChain::new(providers.activities),
      trimp,
      clock.clone(),
    );
    let calculator = ScoreCalculator::new(
      records.clone(),
      providers.physio,
      baselines.clone(),
      clock.clone(),
      config.calculation_timeout,
    );

    Self {
      clock,
      records,
      cache,
      baselines,
      backfill,
      calculator,
      trend: TrendDetector::default(),
    }
  }

  pub fn baselines(&self) -> &BaselineEngine {
    &self.baselines
  }

  pub fn cache(&self) -> &CacheOrchestrator {
    &self.cache
  }

  pub fn calculator(&self) -> &ScoreCalculator {
    &self.calculator
  }

  pub async fn daily_scores(
    &self,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<DailyScore>, WellnessError> {
    self.records.score_range(from, to).await
  }

  pub async fn training_load(
    &self,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<DailyLoad>, WellnessError> {
    self.records.load_range(from, to).await
  }
}
