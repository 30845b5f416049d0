//! Error taxonomy for the wellness engines
//!
//! Only `Persistence`, `Timeout`, `CalculationInFlight` and `Config` ever reach a
//! caller. Missing data and unavailable sources are absorbed by the pipeline
//! and show up as skipped counts in reports instead.

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum WellnessError {
  #[error("No data: {0}")]
  MissingData(String),

  #[error("Source unavailable ({source_name}): {message}")]
  SourceUnavailable { source_name: String, message: String },

  #[error("Persistence failure: {0}")]
  Persistence(String),

  #[error("{kind} calculation timed out after {seconds}s")]
  Timeout { kind: String, seconds: u64 },

  #[error("Failed to decode stored value: {0}")]
  Decode(#[from] serde_json::Error),

  #[error("A {0} calculation is already running")]
  CalculationInFlight(String),

  #[error("Invalid configuration: {0}")]
  Config(String),
}

impl WellnessError {
  /// Transient errors are safe to retry as-is.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      WellnessError::Timeout { .. }
        | WellnessError::CalculationInFlight(_)
        | WellnessError::SourceUnavailable { .. }
    )
  }
}

impl From<sqlx::Error> for WellnessError {
  fn from(e: sqlx::Error) -> Self {
    WellnessError::Persistence(e.to_string())
  }
}

impl From<sqlx::migrate::MigrateError> for WellnessError {
  fn from(e: sqlx::migrate::MigrateError) -> Self {
    WellnessError::Persistence(format!("migration failed: {}", e))
  }
}

impl Serialize for WellnessError {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&self.to_string())
  }
}

/// Errors raised by external data providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
  #[error("Request failed: {0}")]
  Request(String),

  #[error("Not authenticated with {0}")]
  NotAuthenticated(String),

  #[error("API error: {0}")]
  Api(String),
}

impl ProviderError {
  pub fn into_unavailable(self, source_name: &str) -> WellnessError {
    WellnessError::SourceUnavailable {
      source_name: source_name.to_string(),
      message: self.to_string(),
    }
  }
}

pub type Result<T, E = WellnessError> = std::result::Result<T, E>;
