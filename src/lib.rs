//! Daily wellness signals for an endurance training assistant
//!
//! Personal baselines, training load (CTL/ATL/TSB), recovery/sleep/strain
//! scores and multi-day trend alerts, computed from injected data providers
//! and persisted to SQLite.

pub mod backfill;
pub mod baseline;
pub mod cache;
pub mod clock;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod providers;
pub mod scores;
pub mod store;
pub mod training_load;
pub mod trend;
pub mod trimp;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;
use tracing::info;

pub use backfill::{BackfillEvent, BackfillReport, OperationKind, Outcome, PipelineReport};
pub use clock::{Clock, SystemClock};
pub use commands::{Providers, WellnessService};
pub use config::{AthleteProfile, EngineConfig};
pub use error::{ProviderError, Result, WellnessError};
pub use providers::{ActivityHistoryProvider, PhysioDataProvider};
pub use trend::{Severity, TrendAlert};

/// Open the database at the configured path and wire up every engine.
pub async fn initialize(config: EngineConfig, providers: Providers) -> Result<WellnessService> {
  let db_path = config.require_db_path()?.clone();
  let pool = db::initialize_db(&db_path).await?;
  let store = Arc::new(db::SqliteStore::new(pool));

  info!(
    activity_sources = providers.activities.len(),
    physio_source = providers.physio.name(),
    "wellness service ready"
  );
  Ok(WellnessService::new(
    config,
    Arc::new(SystemClock::local()),
    store.clone(),
    store,
    providers,
  ))
}

/// [`initialize`] with configuration read from the environment.
pub async fn initialize_from_env(providers: Providers) -> Result<WellnessService> {
  initialize(EngineConfig::from_env()?, providers).await
}
