//! Persistence contracts
//!
//! [`RecordStore`] holds the derived daily records, [`KeyValueStore`] holds
//! throttle markers and cache entries. Writes to the record store always go
//! through a [`RecordBatch`] so one backfill operation lands in one
//! transaction.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::WellnessError;
use crate::models::{DailyLoad, DailyPhysio, DailyScore, ScoreKind, ScoreSlot};

#[async_trait]
pub trait RecordStore: Send + Sync {
  async fn physio(&self, date: NaiveDate) -> Result<Option<DailyPhysio>, WellnessError>;

  /// Rows with dates in `[from, to]`, oldest first.
  async fn physio_range(
    &self,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<DailyPhysio>, WellnessError>;

  async fn load(&self, date: NaiveDate) -> Result<Option<DailyLoad>, WellnessError>;

  async fn load_range(&self, from: NaiveDate, to: NaiveDate)
    -> Result<Vec<DailyLoad>, WellnessError>;

  async fn score(&self, date: NaiveDate) -> Result<Option<DailyScore>, WellnessError>;

  async fn score_range(
    &self,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<DailyScore>, WellnessError>;

  /// Apply every write in one transaction. Returns the number of writes applied.
  async fn save_batch(&self, batch: &RecordBatch) -> Result<usize, WellnessError>;
}

/// A stored string plus the instant it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredValue {
  pub value: String,
  pub stored_at: DateTime<Utc>,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
  async fn get(&self, key: &str) -> Result<Option<StoredValue>, WellnessError>;

  async fn set(&self, key: &str, value: &str, stored_at: DateTime<Utc>)
    -> Result<(), WellnessError>;

  async fn remove(&self, key: &str) -> Result<(), WellnessError>;
}

/// ---------------------------------------------------------------------------
/// Batched Writes
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RecordWrite {
  Physio(DailyPhysio),
  Load(DailyLoad),
  /// Create an empty score row if none exists
  EnsureScoreRow(NaiveDate),
  LinkPhysio {
    date: NaiveDate,
    physio_date: NaiveDate,
  },
  /// Overwrite only the columns owned by `kind`
  Score {
    date: NaiveDate,
    kind: ScoreKind,
    slot: ScoreSlot,
  },
}

#[derive(Debug, Clone)]
pub struct RecordBatch {
  pub label: String,
  pub stamped_at: DateTime<Utc>,
  writes: Vec<RecordWrite>,
}

impl RecordBatch {
  pub fn new(label: impl Into<String>, stamped_at: DateTime<Utc>) -> Self {
    Self {
      label: label.into(),
      stamped_at,
      writes: Vec::new(),
    }
  }

  pub fn push(&mut self, write: RecordWrite) {
    self.writes.push(write);
  }

  pub fn has_changes(&self) -> bool {
    !self.writes.is_empty()
  }

  pub fn len(&self) -> usize {
    self.writes.len()
  }

  pub fn writes(&self) -> &[RecordWrite] {
    &self.writes
  }
}
