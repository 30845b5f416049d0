//! Engine configuration
//!
//! Values come from the environment (optionally seeded from a `.env` file).
//! Everything except the database path has a default.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::WellnessError;

/// ---------------------------------------------------------------------------
/// Defaults
/// ---------------------------------------------------------------------------

const DEFAULT_RESTING_HR: f64 = 60.0;
const DEFAULT_MAX_HR: f64 = 190.0;
const DEFAULT_BASELINE_TTL_MINUTES: i64 = 90;
const DEFAULT_CALCULATION_TIMEOUT_SECS: u64 = 10;
const DEFAULT_THROTTLE_HOURS: i64 = 24;
const DEFAULT_ACTIVITY_LIMIT: usize = 200;

/// ---------------------------------------------------------------------------
/// Athlete Profile
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AthleteProfile {
  pub resting_hr: Option<f64>,
  pub max_hr: Option<f64>,
  /// Functional threshold power in watts
  pub ftp: Option<f64>,
}

impl AthleteProfile {
  pub fn effective_resting_hr(&self) -> f64 {
    self.resting_hr.unwrap_or(DEFAULT_RESTING_HR)
  }

  pub fn effective_max_hr(&self) -> f64 {
    self.max_hr.unwrap_or(DEFAULT_MAX_HR)
  }

  /// Heart-rate reserve in bpm, None when the profile is inconsistent
  pub fn hr_reserve(&self) -> Option<f64> {
    let reserve = self.effective_max_hr() - self.effective_resting_hr();
    if reserve > 0.0 {
      Some(reserve)
    } else {
      None
    }
  }
}

/// ---------------------------------------------------------------------------
/// Engine Configuration
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub db_path: Option<PathBuf>,
  pub profile: AthleteProfile,
  pub baseline_ttl: Duration,
  pub calculation_timeout: std::time::Duration,
  pub throttle_interval: Duration,
  pub activity_limit: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      db_path: None,
      profile: AthleteProfile::default(),
      baseline_ttl: Duration::minutes(DEFAULT_BASELINE_TTL_MINUTES),
      calculation_timeout: std::time::Duration::from_secs(DEFAULT_CALCULATION_TIMEOUT_SECS),
      throttle_interval: Duration::hours(DEFAULT_THROTTLE_HOURS),
      activity_limit: DEFAULT_ACTIVITY_LIMIT,
    }
  }
}

impl EngineConfig {
  pub fn from_env() -> Result<Self, WellnessError> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let baseline_ttl_minutes: i64 =
      parse_var("WELLNESS_BASELINE_TTL_MINUTES")?.unwrap_or(DEFAULT_BASELINE_TTL_MINUTES);
    let timeout_secs: u64 =
      parse_var("WELLNESS_CALCULATION_TIMEOUT_SECS")?.unwrap_or(DEFAULT_CALCULATION_TIMEOUT_SECS);
    let throttle_hours: i64 =
      parse_var("WELLNESS_THROTTLE_HOURS")?.unwrap_or(DEFAULT_THROTTLE_HOURS);

    if throttle_hours < 0 {
      return Err(WellnessError::Config(
        "WELLNESS_THROTTLE_HOURS must not be negative".into(),
      ));
    }

    Ok(Self {
      db_path: env::var("WELLNESS_DB_PATH").ok().map(PathBuf::from),
      profile: AthleteProfile {
        resting_hr: parse_var("WELLNESS_RESTING_HR")?,
        max_hr: parse_var("WELLNESS_MAX_HR")?,
        ftp: parse_var("WELLNESS_FTP")?,
      },
      baseline_ttl: Duration::minutes(baseline_ttl_minutes.clamp(60, 120)),
      calculation_timeout: std::time::Duration::from_secs(timeout_secs.clamp(8, 15)),
      throttle_interval: Duration::hours(throttle_hours),
      activity_limit: parse_var("WELLNESS_ACTIVITY_LIMIT")?.unwrap_or(DEFAULT_ACTIVITY_LIMIT),
    })
  }

  pub fn require_db_path(&self) -> Result<&PathBuf, WellnessError> {
    self
      .db_path
      .as_ref()
      .ok_or_else(|| WellnessError::Config("WELLNESS_DB_PATH is not set".into()))
  }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, WellnessError> {
  match env::var(name) {
    Ok(raw) if raw.trim().is_empty() => Ok(None),
    Ok(raw) => raw
      .trim()
      .parse::<T>()
      .map(Some)
      .map_err(|_| WellnessError::Config(format!("{} has an invalid value: {}", name, raw))),
    Err(_) => Ok(None),
  }
}
