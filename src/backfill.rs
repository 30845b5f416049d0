//! Historical backfill
//!
//! The only writer of historical records. Each operation kind is throttled
//! on its own marker, builds one [`RecordBatch`] and saves it in one
//! transaction. The full pipeline runs physio, then load, then the three
//! score kinds side by side.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::baseline::{baseline_from_daily, BASELINE_WINDOW_DAYS};
use crate::clock::{local_date, Clock};
use crate::config::EngineConfig;
use crate::error::WellnessError;
use crate::models::{
  aggregate_daily, DailyLoad, DailyPhysio, DailyScore, MetricKind, ScoreKind, ScoreSlot,
};
use crate::providers::{ActivityOrigin, ActivitySourceChain, PhysioDataProvider};
use crate::scores::{recovery_score, sleep_score, strain_score};
use crate::store::{KeyValueStore, RecordBatch, RecordStore, RecordWrite};
use crate::training_load::{fold_daily, LoadSeed, TrainingLoadEngine};
use crate::trimp::TrimpEngine;

/// ---------------------------------------------------------------------------
/// Operations and Reports
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
  PhysioData,
  TrainingLoad,
  RecoveryScore,
  SleepScore,
  StrainScore,
}

impl OperationKind {
  pub const ALL: [OperationKind; 5] = [
    OperationKind::PhysioData,
    OperationKind::TrainingLoad,
    OperationKind::RecoveryScore,
    OperationKind::SleepScore,
    OperationKind::StrainScore,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      OperationKind::PhysioData => "physio_data",
      OperationKind::TrainingLoad => "training_load",
      OperationKind::RecoveryScore => "recovery_score",
      OperationKind::SleepScore => "sleep_score",
      OperationKind::StrainScore => "strain_score",
    }
  }

  /// Key of the throttle marker in the key-value store.
  pub fn marker_key(&self) -> String {
    format!("backfill.last_run.{}", self.as_str())
  }

  pub fn for_score(kind: ScoreKind) -> Self {
    match kind {
      ScoreKind::Recovery => OperationKind::RecoveryScore,
      ScoreKind::Sleep => OperationKind::SleepScore,
      ScoreKind::Strain => OperationKind::StrainScore,
    }
  }
}

impl fmt::Display for OperationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
  /// Ran too recently; nothing was read or written
  Throttled,
  Persisted,
  Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillReport {
  pub kind: OperationKind,
  pub outcome: Outcome,
  pub created: usize,
  pub updated: usize,
  pub skipped: usize,
}

impl BackfillReport {
  fn throttled(kind: OperationKind) -> Self {
    Self {
      kind,
      outcome: Outcome::Throttled,
      created: 0,
      updated: 0,
      skipped: 0,
    }
  }

  pub fn writes(&self) -> usize {
    self.created + self.updated
  }

  pub fn is_failed(&self) -> bool {
    matches!(self.outcome, Outcome::Failed { .. })
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
  pub reports: Vec<BackfillReport>,
}

impl PipelineReport {
  pub fn get(&self, kind: OperationKind) -> Option<&BackfillReport> {
    self.reports.iter().find(|r| r.kind == kind)
  }

  pub fn failures(&self) -> impl Iterator<Item = &BackfillReport> {
    self.reports.iter().filter(|r| r.is_failed())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BackfillEvent {
  /// All score kinds have finished for this run
  ScoresComplete {
    through: NaiveDate,
    reports: Vec<BackfillReport>,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillRequest {
  pub days_back: i64,
  pub force: bool,
}

/// Batch plus bookkeeping built by one operation.
struct Plan {
  batch: RecordBatch,
  created: usize,
  updated: usize,
  skipped: usize,
}

impl Plan {
  fn new(kind: OperationKind, stamped_at: DateTime<Utc>) -> Self {
    Self {
      batch: RecordBatch::new(kind.as_str(), stamped_at),
      created: 0,
      updated: 0,
      skipped: 0,
    }
  }

  fn record(&mut self, existed: bool) {
    if existed {
      self.updated += 1;
    } else {
      self.created += 1;
    }
  }
}

/// ---------------------------------------------------------------------------
/// Orchestrator
/// ---------------------------------------------------------------------------

pub struct BackfillOrchestrator {
  records: Arc<dyn RecordStore>,
  markers: Arc<dyn KeyValueStore>,
  physio: Arc<dyn PhysioDataProvider>,
  activities: ActivitySourceChain,
  trimp: Arc<TrimpEngine>,
  load_engine: TrainingLoadEngine,
  clock: Arc<dyn Clock>,
  throttle_interval: Duration,
  activity_limit: usize,
  events: broadcast::Sender<BackfillEvent>,
}

impl BackfillOrchestrator {
  pub fn new(
    config: &EngineConfig,
    records: Arc<dyn RecordStore>,
    markers: Arc<dyn KeyValueStore>,
    physio: Arc<dyn PhysioDataProvider>,
    activities: ActivitySourceChain,
    trimp: Arc<TrimpEngine>,
    clock: Arc<dyn Clock>,
  ) -> Self {
    let (events, _) = broadcast::channel(16);
    Self {
      records,
      markers,
      physio,
      activities,
      trimp,
      load_engine: TrainingLoadEngine::new(config.profile.clone()),
      clock,
      throttle_interval: config.throttle_interval,
      activity_limit: config.activity_limit,
      events,
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<BackfillEvent> {
    self.events.subscribe()
  }

  /// Physio, then load, then all three scores.
  pub async fn recompute_all(&self, request: BackfillRequest) -> PipelineReport {
    info!(days_back = request.days_back, force = request.force, "full backfill starting");

    let mut reports = vec![
      self.run(OperationKind::PhysioData, request).await,
      self.run(OperationKind::TrainingLoad, request).await,
    ];
    reports.extend(self.recompute_scores(request).await.reports);

    PipelineReport { reports }
  }

  /// The three score kinds in parallel; the completion event fires after all finish.
  pub async fn recompute_scores(&self, request: BackfillRequest) -> PipelineReport {
    let (recovery, sleep, strain) = tokio::join!(
      self.run(OperationKind::RecoveryScore, request),
      self.run(OperationKind::SleepScore, request),
      self.run(OperationKind::StrainScore, request),
    );
    let reports = vec![recovery, sleep, strain];

    let event = BackfillEvent::ScoresComplete {
      through: self.clock.today(),
      reports: reports.clone(),
    };
    if self.events.send(event).is_err() {
      debug!("no subscribers for score completion");
    }

    PipelineReport { reports }
  }

  /// Run one operation kind, honoring its throttle marker.
  pub async fn run(&self, kind: OperationKind, request: BackfillRequest) -> BackfillReport {
    if !self.should_run(kind, request.force).await {
      info!(kind = %kind, "backfill throttled");
      return BackfillReport::throttled(kind);
    }

    let started_at = self.clock.now();
    let (from, today) = TrainingLoadEngine::window(self.clock.today(), request.days_back);

    let force = request.force;
    let planned = match kind {
      OperationKind::PhysioData => self.plan_physio(from, today, started_at).await,
      OperationKind::TrainingLoad => self.plan_load(from, today, request.days_back, started_at).await,
      OperationKind::RecoveryScore => {
        self.plan_scores(ScoreKind::Recovery, from, today, force, started_at).await
      }
      OperationKind::SleepScore => {
        self.plan_scores(ScoreKind::Sleep, from, today, force, started_at).await
      }
      OperationKind::StrainScore => {
        self.plan_scores(ScoreKind::Strain, from, today, force, started_at).await
      }
    };

    let report = match planned {
      Ok(plan) => self.persist(kind, plan).await,
      Err(e) => {
        error!(kind = %kind, error = %e, "backfill could not be planned");
        BackfillReport {
          kind,
          outcome: Outcome::Failed { message: e.to_string() },
          created: 0,
          updated: 0,
          skipped: 0,
        }
      }
    };

    // Time-based, not success-based
    self.stamp(kind).await;
    report
  }

  async fn persist(&self, kind: OperationKind, plan: Plan) -> BackfillReport {
    let Plan { batch, created, updated, skipped } = plan;

    if !batch.has_changes() {
      debug!(kind = %kind, skipped, "nothing to write");
      return BackfillReport {
        kind,
        outcome: Outcome::Persisted,
        created: 0,
        updated: 0,
        skipped,
      };
    }

    match self.records.save_batch(&batch).await {
      Ok(writes) => {
        info!(kind = %kind, writes, created, updated, skipped, "backfill persisted");
        BackfillReport {
          kind,
          outcome: Outcome::Persisted,
          created,
          updated,
          skipped,
        }
      }
      Err(e) => {
        error!(kind = %kind, error = %e, "backfill batch save failed");
        BackfillReport {
          kind,
          outcome: Outcome::Failed { message: e.to_string() },
          created: 0,
          updated: 0,
          skipped,
        }
      }
    }
  }

  // ---------------------------------------------------------------------------
  // Throttling
  // ---------------------------------------------------------------------------

  async fn should_run(&self, kind: OperationKind, force: bool) -> bool {
    if force {
      return true;
    }
    match self.markers.get(&kind.marker_key()).await {
      Ok(Some(marker)) => self.clock.now() - marker.stored_at >= self.throttle_interval,
      Ok(None) => true,
      Err(e) => {
        warn!(kind = %kind, error = %e, "throttle marker unreadable, running");
        true
      }
    }
  }

  async fn stamp(&self, kind: OperationKind) {
    let now = self.clock.now();
    if let Err(e) = self.markers.set(&kind.marker_key(), &now.to_rfc3339(), now).await {
      warn!(kind = %kind, error = %e, "failed to stamp throttle marker");
    }
  }

  // ---------------------------------------------------------------------------
  // Physiology
  // ---------------------------------------------------------------------------

  async fn plan_physio(
    &self,
    from: NaiveDate,
    to: NaiveDate,
    stamped_at: DateTime<Utc>,
  ) -> Result<Plan, WellnessError> {
    let mut plan = Plan::new(OperationKind::PhysioData, stamped_at);
    let fetch_from = from - Duration::days(BASELINE_WINDOW_DAYS);

    let mut daily: HashMap<MetricKind, BTreeMap<NaiveDate, f64>> = HashMap::new();
    for metric in MetricKind::ALL {
      match self.physio.samples(metric, fetch_from, to).await {
        Ok(samples) => {
          daily.insert(metric, aggregate_daily(&samples, metric));
        }
        Err(e) => {
          let e = e.into_unavailable(self.physio.name());
          warn!(metric = %metric, error = %e, "physio samples unavailable");
          daily.insert(metric, BTreeMap::new());
        }
      }
    }

    let existing: HashMap<NaiveDate, DailyPhysio> = self
      .records
      .physio_range(from, to)
      .await?
      .into_iter()
      .map(|p| (p.date, p))
      .collect();
    let scores: HashMap<NaiveDate, DailyScore> = self
      .records
      .score_range(from, to)
      .await?
      .into_iter()
      .map(|s| (s.date, s))
      .collect();

    for date in from.iter_days().take_while(|d| *d <= to) {
      let previous = existing.get(&date);
      let mut row = previous.cloned().unwrap_or_else(|| DailyPhysio::placeholder(date));

      for metric in MetricKind::ALL {
        let Some(series) = daily.get(&metric) else { continue };
        if let Some(value) = series.get(&date) {
          row.set_value(metric, Some(*value));
        }
        if let Some(baseline) = baseline_from_daily(series, date) {
          row.set_baseline(metric, Some(baseline));
        }
      }

      if !row.has_data() {
        plan.skipped += 1;
        continue;
      }

      if previous != Some(&row) {
        plan.record(previous.is_some());
        plan.batch.push(RecordWrite::Physio(row));
      }

      let linked = scores.get(&date).and_then(|s| s.physio);
      if linked != Some(date) {
        plan.batch.push(RecordWrite::LinkPhysio { date, physio_date: date });
      }
    }

    Ok(plan)
  }

  // ---------------------------------------------------------------------------
  // Training Load
  // ---------------------------------------------------------------------------

  async fn plan_load(
    &self,
    from: NaiveDate,
    to: NaiveDate,
    days_back: i64,
    stamped_at: DateTime<Utc>,
  ) -> Result<Plan, WellnessError> {
    let mut plan = Plan::new(OperationKind::TrainingLoad, stamped_at);

    let (activities, origin, failures) = self
      .activities
      .recent_activities(self.activity_limit, days_back)
      .await;
    if !failures.is_empty() {
      debug!(failures = failures.len(), "activity sources failed over");
    }

    let (daily, provider_seed) = match origin {
      ActivityOrigin::Provider(source) => {
        info!(source = %source, activities = activities.len(), "training load from activity history");
        (
          self.load_engine.daily_stress(&activities, self.clock.local_offset()),
          LoadSeed::from_provider(&activities),
        )
      }
      ActivityOrigin::None => (self.stress_from_workouts(from, to).await, None),
    };

    if daily.is_empty() {
      plan.skipped = from.iter_days().take_while(|d| *d <= to).count();
      info!(skipped = plan.skipped, "no activity data for training load");
      return Ok(plan);
    }

    // CTL/ATL carry over from the stored day before the window
    let previous = self.records.load(from - Duration::days(1)).await?;
    if let Some(previous) = &previous {
      debug!(date = %previous.date, ctl = previous.ctl, atl = previous.atl, "continuing stored load");
    }
    let series = self.load_engine.series(&daily, previous.as_ref(), provider_seed, to);

    let first = series.first().map(|l| l.date).unwrap_or(from);
    let existing: HashMap<NaiveDate, DailyLoad> = self
      .records
      .load_range(first, to)
      .await?
      .into_iter()
      .map(|l| (l.date, l))
      .collect();
    let scored: HashMap<NaiveDate, DailyScore> = self
      .records
      .score_range(first, to)
      .await?
      .into_iter()
      .map(|s| (s.date, s))
      .collect();

    for load in series {
      let previous = existing.get(&load.date);
      if previous != Some(&load) {
        plan.record(previous.is_some());
        plan.batch.push(RecordWrite::Load(load));
      }
      if load.tss > 0.0 && !scored.contains_key(&load.date) {
        plan.batch.push(RecordWrite::EnsureScoreRow(load.date));
      }
    }

    Ok(plan)
  }

  /// Fallback when no activity-history provider delivered anything.
  async fn stress_from_workouts(&self, from: NaiveDate, to: NaiveDate) -> BTreeMap<NaiveDate, f64> {
    let workouts = match self.physio.workouts(from, to, &[]).await {
      Ok(workouts) => workouts,
      Err(e) => {
        let e = e.into_unavailable(self.physio.name());
        warn!(error = %e, "workouts unavailable, no training load source left");
        return BTreeMap::new();
      }
    };

    info!(workouts = workouts.len(), "training load from physio workouts");
    let offset = self.clock.local_offset();
    let mut entries = Vec::with_capacity(workouts.len());
    for workout in &workouts {
      entries.push((local_date(workout.start, offset), self.trimp.trimp(workout).await));
    }

    fold_daily(entries)
  }

  // ---------------------------------------------------------------------------
  // Scores
  // ---------------------------------------------------------------------------

  async fn plan_scores(
    &self,
    kind: ScoreKind,
    from: NaiveDate,
    to: NaiveDate,
    force: bool,
    stamped_at: DateTime<Utc>,
  ) -> Result<Plan, WellnessError> {
    let mut plan = Plan::new(OperationKind::for_score(kind), stamped_at);

    let scores: HashMap<NaiveDate, DailyScore> = self
      .records
      .score_range(from, to)
      .await?
      .into_iter()
      .map(|s| (s.date, s))
      .collect();
    let loads: HashMap<NaiveDate, DailyLoad> = self
      .records
      .load_range(from, to)
      .await?
      .into_iter()
      .map(|l| (l.date, l))
      .collect();
    let physio_rows: HashMap<NaiveDate, DailyPhysio> = match kind {
      ScoreKind::Strain => HashMap::new(),
      _ => {
        // Links may point before the window
        let earliest = scores.values().filter_map(|s| s.physio).min().unwrap_or(from);
        self
          .records
          .physio_range(earliest.min(from), to)
          .await?
          .into_iter()
          .map(|p| (p.date, p))
          .collect()
      }
    };

    for date in from.iter_days().take_while(|d| *d <= to) {
      let row = scores.get(&date).cloned().unwrap_or_else(|| DailyScore::placeholder(date));
      let slot = row.slot(kind);

      if !slot.accepts_backfill(kind, force) {
        plan.skipped += 1;
        continue;
      }

      let load = loads.get(&date);
      let score = match kind {
        ScoreKind::Recovery | ScoreKind::Sleep => {
          let Some(physio) = row.physio.and_then(|d| physio_rows.get(&d)) else {
            plan.skipped += 1;
            continue;
          };
          if kind == ScoreKind::Recovery {
            recovery_score(physio, load)
          } else {
            sleep_score(physio)
          }
        }
        ScoreKind::Strain => load.and_then(strain_score),
      };

      let Some(score) = score else {
        plan.skipped += 1;
        continue;
      };

      if slot.value() == Some(score.value) {
        continue;
      }

      plan.record(matches!(slot, ScoreSlot::Computed { .. }));
      plan.batch.push(RecordWrite::Score {
        date,
        kind,
        slot: ScoreSlot::Computed { score, computed_at: stamped_at },
      });
    }

    Ok(plan)
  }
}
