use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::WellnessError;
use crate::models::{Band, DailyLoad, DailyPhysio, DailyScore, Score, ScoreKind, ScoreSlot};
use crate::store::{KeyValueStore, RecordBatch, RecordStore, RecordWrite, StoredValue};

pub type DbPool = SqlitePool;

/// Initialize the database connection pool and run migrations
pub async fn initialize_db(db_path: &Path) -> Result<DbPool, WellnessError> {
  // Create directory if it doesn't exist
  if let Some(parent) = db_path.parent() {
    fs::create_dir_all(parent)
      .map_err(|e| WellnessError::Persistence(format!("Failed to create data dir: {}", e)))?;
  }

  let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
  info!(path = %db_path.display(), "initializing database");

  let pool = SqlitePoolOptions::new()
    .max_connections(5)
    .connect(&db_url)
    .await?;

  sqlx::migrate!("./migrations").run(&pool).await?;

  info!("database initialized");
  Ok(pool)
}

/// SQLite-backed record and key-value store.
#[derive(Debug, Clone)]
pub struct SqliteStore {
  pool: DbPool,
}

impl SqliteStore {
  pub fn new(pool: DbPool) -> Self {
    Self { pool }
  }
}

/// ---------------------------------------------------------------------------
/// Score Row Mapping
/// ---------------------------------------------------------------------------

#[derive(Debug, sqlx::FromRow)]
struct ScoreRow {
  date: NaiveDate,
  physio_date: Option<NaiveDate>,
  recovery_score: Option<f64>,
  recovery_band: Option<String>,
  recovery_computed_at: Option<DateTime<Utc>>,
  sleep_score: Option<f64>,
  sleep_band: Option<String>,
  sleep_computed_at: Option<DateTime<Utc>>,
  strain_score: Option<f64>,
  strain_band: Option<String>,
  strain_computed_at: Option<DateTime<Utc>>,
  last_updated: Option<DateTime<Utc>>,
}

fn slot_from_columns(
  score: Option<f64>,
  band: Option<String>,
  computed_at: Option<DateTime<Utc>>,
  fallback_at: Option<DateTime<Utc>>,
) -> ScoreSlot {
  match score {
    Some(value) => ScoreSlot::Computed {
      score: Score {
        value,
        band: band.and_then(|b| b.parse::<Band>().ok()),
      },
      computed_at: computed_at.or(fallback_at).unwrap_or(DateTime::<Utc>::MIN_UTC),
    },
    None => ScoreSlot::NotYetComputed,
  }
}

impl From<ScoreRow> for DailyScore {
  fn from(row: ScoreRow) -> Self {
    Self {
      date: row.date,
      physio: row.physio_date,
      recovery: slot_from_columns(
        row.recovery_score,
        row.recovery_band,
        row.recovery_computed_at,
        row.last_updated,
      ),
      sleep: slot_from_columns(
        row.sleep_score,
        row.sleep_band,
        row.sleep_computed_at,
        row.last_updated,
      ),
      strain: slot_from_columns(
        row.strain_score,
        row.strain_band,
        row.strain_computed_at,
        row.last_updated,
      ),
      last_updated: row.last_updated,
    }
  }
}

const PHYSIO_COLUMNS: &str = "date, hrv, resting_hr, sleep_hours, respiratory_rate, \
  hrv_baseline, resting_hr_baseline, sleep_baseline, respiratory_baseline";

const SCORE_COLUMNS: &str = "date, physio_date, \
  recovery_score, recovery_band, recovery_computed_at, \
  sleep_score, sleep_band, sleep_computed_at, \
  strain_score, strain_band, strain_computed_at, last_updated";

/// Column names owned by one score kind.
fn score_columns(kind: ScoreKind) -> (&'static str, &'static str, &'static str) {
  match kind {
    ScoreKind::Recovery => ("recovery_score", "recovery_band", "recovery_computed_at"),
    ScoreKind::Sleep => ("sleep_score", "sleep_band", "sleep_computed_at"),
    ScoreKind::Strain => ("strain_score", "strain_band", "strain_computed_at"),
  }
}

/// ---------------------------------------------------------------------------
/// Record Store
/// ---------------------------------------------------------------------------

#[async_trait]
impl RecordStore for SqliteStore {
  async fn physio(&self, date: NaiveDate) -> Result<Option<DailyPhysio>, WellnessError> {
    let row = sqlx::query_as::<_, DailyPhysio>(&format!(
      "SELECT {} FROM daily_physio WHERE date = ?1",
      PHYSIO_COLUMNS
    ))
    .bind(date)
    .fetch_optional(&self.pool)
    .await?;
    Ok(row)
  }

  async fn physio_range(
    &self,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<DailyPhysio>, WellnessError> {
    let rows = sqlx::query_as::<_, DailyPhysio>(&format!(
      "SELECT {} FROM daily_physio WHERE date >= ?1 AND date <= ?2 ORDER BY date ASC",
      PHYSIO_COLUMNS
    ))
    .bind(from)
    .bind(to)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows)
  }

  async fn load(&self, date: NaiveDate) -> Result<Option<DailyLoad>, WellnessError> {
    let row = sqlx::query_as::<_, DailyLoad>(
      "SELECT date, tss, ctl, atl FROM daily_load WHERE date = ?1",
    )
    .bind(date)
    .fetch_optional(&self.pool)
    .await?;
    Ok(row)
  }

  async fn load_range(
    &self,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<DailyLoad>, WellnessError> {
    let rows = sqlx::query_as::<_, DailyLoad>(
      "SELECT date, tss, ctl, atl FROM daily_load WHERE date >= ?1 AND date <= ?2 ORDER BY date ASC",
    )
    .bind(from)
    .bind(to)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows)
  }

  async fn score(&self, date: NaiveDate) -> Result<Option<DailyScore>, WellnessError> {
    let row = sqlx::query_as::<_, ScoreRow>(&format!(
      "SELECT {} FROM daily_score WHERE date = ?1",
      SCORE_COLUMNS
    ))
    .bind(date)
    .fetch_optional(&self.pool)
    .await?;
    Ok(row.map(DailyScore::from))
  }

  async fn score_range(
    &self,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<Vec<DailyScore>, WellnessError> {
    let rows = sqlx::query_as::<_, ScoreRow>(&format!(
      "SELECT {} FROM daily_score WHERE date >= ?1 AND date <= ?2 ORDER BY date ASC",
      SCORE_COLUMNS
    ))
    .bind(from)
    .bind(to)
    .fetch_all(&self.pool)
    .await?;
    Ok(rows.into_iter().map(DailyScore::from).collect())
  }

  async fn save_batch(&self, batch: &RecordBatch) -> Result<usize, WellnessError> {
    let mut tx = self.pool.begin().await?;
    let stamped_at = batch.stamped_at;

    for write in batch.writes() {
      match write {
        RecordWrite::Physio(p) => {
          sqlx::query(
            r#"
            INSERT INTO daily_physio (
              date, hrv, resting_hr, sleep_hours, respiratory_rate,
              hrv_baseline, resting_hr_baseline, sleep_baseline, respiratory_baseline,
              updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(date) DO UPDATE SET
              hrv = excluded.hrv,
              resting_hr = excluded.resting_hr,
              sleep_hours = excluded.sleep_hours,
              respiratory_rate = excluded.respiratory_rate,
              hrv_baseline = excluded.hrv_baseline,
              resting_hr_baseline = excluded.resting_hr_baseline,
              sleep_baseline = excluded.sleep_baseline,
              respiratory_baseline = excluded.respiratory_baseline,
              updated_at = excluded.updated_at
            "#,
          )
          .bind(p.date)
          .bind(p.hrv)
          .bind(p.resting_hr)
          .bind(p.sleep_hours)
          .bind(p.respiratory_rate)
          .bind(p.hrv_baseline)
          .bind(p.resting_hr_baseline)
          .bind(p.sleep_baseline)
          .bind(p.respiratory_baseline)
          .bind(stamped_at)
          .execute(&mut *tx)
          .await?;
        }
        RecordWrite::Load(l) => {
          sqlx::query(
            r#"
            INSERT INTO daily_load (date, tss, ctl, atl, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(date) DO UPDATE SET
              tss = excluded.tss,
              ctl = excluded.ctl,
              atl = excluded.atl,
              updated_at = excluded.updated_at
            "#,
          )
          .bind(l.date)
          .bind(l.tss)
          .bind(l.ctl)
          .bind(l.atl)
          .bind(stamped_at)
          .execute(&mut *tx)
          .await?;
        }
        RecordWrite::EnsureScoreRow(date) => {
          sqlx::query("INSERT INTO daily_score (date) VALUES (?1) ON CONFLICT(date) DO NOTHING")
            .bind(date)
            .execute(&mut *tx)
            .await?;
        }
        RecordWrite::LinkPhysio { date, physio_date } => {
          sqlx::query("INSERT INTO daily_score (date) VALUES (?1) ON CONFLICT(date) DO NOTHING")
            .bind(date)
            .execute(&mut *tx)
            .await?;
          sqlx::query("UPDATE daily_score SET physio_date = ?2, last_updated = ?3 WHERE date = ?1")
            .bind(date)
            .bind(physio_date)
            .bind(stamped_at)
            .execute(&mut *tx)
            .await?;
        }
        RecordWrite::Score { date, kind, slot } => {
          let (score_col, band_col, at_col) = score_columns(*kind);
          let (value, band, computed_at) = match slot {
            ScoreSlot::NotYetComputed => (None, None, None),
            ScoreSlot::Computed { score, computed_at } => (
              Some(score.value),
              score.band.map(|b| b.as_str()),
              Some(*computed_at),
            ),
          };

          sqlx::query("INSERT INTO daily_score (date) VALUES (?1) ON CONFLICT(date) DO NOTHING")
            .bind(date)
            .execute(&mut *tx)
            .await?;
          sqlx::query(&format!(
            "UPDATE daily_score SET {} = ?2, {} = ?3, {} = ?4, last_updated = ?5 WHERE date = ?1",
            score_col, band_col, at_col
          ))
          .bind(date)
          .bind(value)
          .bind(band)
          .bind(computed_at)
          .bind(stamped_at)
          .execute(&mut *tx)
          .await?;
        }
      }
    }

    tx.commit().await?;
    debug!(batch = %batch.label, writes = batch.len(), "batch committed");
    Ok(batch.len())
  }
}

/// ---------------------------------------------------------------------------
/// Key-Value Store
/// ---------------------------------------------------------------------------

#[async_trait]
impl KeyValueStore for SqliteStore {
  async fn get(&self, key: &str) -> Result<Option<StoredValue>, WellnessError> {
    let row: Option<(String, DateTime<Utc>)> =
      sqlx::query_as("SELECT value, stored_at FROM kv_store WHERE key = ?1")
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

    Ok(row.map(|(value, stored_at)| StoredValue { value, stored_at }))
  }

  async fn set(
    &self,
    key: &str,
    value: &str,
    stored_at: DateTime<Utc>,
  ) -> Result<(), WellnessError> {
    sqlx::query(
      r#"
      INSERT INTO kv_store (key, value, stored_at)
      VALUES (?1, ?2, ?3)
      ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        stored_at = excluded.stored_at
      "#,
    )
    .bind(key)
    .bind(value)
    .bind(stored_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn remove(&self, key: &str) -> Result<(), WellnessError> {
    sqlx::query("DELETE FROM kv_store WHERE key = ?1")
      .bind(key)
      .execute(&self.pool)
      .await?;
    Ok(())
  }
}
