//! Time source abstraction
//!
//! Throttle markers, cache expiry and "today" all go through a [`Clock`] so the
//! engines can be driven deterministically in tests.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use std::fmt;
use std::sync::Mutex;

pub trait Clock: Send + Sync + fmt::Debug {
  fn now(&self) -> DateTime<Utc>;

  /// Offset used to map instants onto calendar days.
  fn local_offset(&self) -> FixedOffset;

  /// Today's calendar date in the local offset.
  fn today(&self) -> NaiveDate {
    local_date(self.now(), self.local_offset())
  }
}

/// Map an instant onto the calendar day it belongs to in `offset`.
pub fn local_date(at: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
  at.with_timezone(&offset).date_naive()
}

/// Wall clock. Without a pinned offset it follows the host zone, so day
/// boundaries move with DST changes in a long-running process.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
  offset: Option<FixedOffset>,
}

impl SystemClock {
  pub fn new(offset: FixedOffset) -> Self {
    Self { offset: Some(offset) }
  }

  pub fn local() -> Self {
    Self { offset: None }
  }
}

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }

  fn local_offset(&self) -> FixedOffset {
    self.offset.unwrap_or_else(|| *chrono::Local::now().offset())
  }
}

/// Clock whose time only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
  now: Mutex<DateTime<Utc>>,
  offset: FixedOffset,
}

impl ManualClock {
  pub fn new(now: DateTime<Utc>) -> Self {
    Self {
      now: Mutex::new(now),
      offset: Utc.fix(),
    }
  }

  pub fn set(&self, now: DateTime<Utc>) {
    if let Ok(mut guard) = self.now.lock() {
      *guard = now;
    }
  }

  pub fn advance(&self, by: chrono::Duration) {
    if let Ok(mut guard) = self.now.lock() {
      *guard += by;
    }
  }
}

impl Clock for ManualClock {
  fn now(&self) -> DateTime<Utc> {
    self.now.lock().map(|guard| *guard).unwrap_or_else(|e| *e.into_inner())
  }

  fn local_offset(&self) -> FixedOffset {
    self.offset
  }
}
