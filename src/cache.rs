//! Compute-or-fetch cache with durable TTL tracking
//!
//! Entries live in the [`KeyValueStore`] as JSON envelopes carrying their own
//! expiry. Concurrent callers for one key queue on a per-key async mutex, so a
//! miss runs `compute` once and everyone behind it reads the stored result.
//! A key's slot is dropped once its last caller is done.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::WellnessError;
use crate::store::KeyValueStore;

/// Cache key for the four-metric baseline set of one day.
pub fn baseline_key(as_of: NaiveDate) -> String {
  format!("baseline:{}", as_of)
}

/// Cache key for a workout's TRIMP.
pub fn trimp_key(workout_id: &str) -> String {
  format!("trimp:{}", workout_id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
  For(Duration),
  /// Never expires; only `invalidate` removes it
  Forever,
}

impl Ttl {
  fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match self {
      Ttl::For(ttl) => Some(now + *ttl),
      Ttl::Forever => None,
    }
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry<T> {
  expires_at: Option<DateTime<Utc>>,
  value: T,
}

fn is_fresh(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
  expires_at.map_or(true, |at| now < at)
}

/// Encoded entry held in memory by the key's slot.
#[derive(Debug, Clone)]
struct Resident {
  json: String,
  expires_at: Option<DateTime<Utc>>,
}

type Slot = Arc<Mutex<Option<Resident>>>;

/// A caller's hold on one key's slot. Dropping the last lease evicts the slot.
struct SlotLease<'a> {
  cache: &'a CacheOrchestrator,
  key: &'a str,
  slot: Slot,
}

impl Drop for SlotLease<'_> {
  fn drop(&mut self) {
    let mut slots = self.cache.slots.lock().unwrap_or_else(|e| e.into_inner());
    // One reference in the map, one here
    let idle = slots
      .get(self.key)
      .is_some_and(|held| Arc::ptr_eq(held, &self.slot) && Arc::strong_count(&self.slot) == 2);
    if idle {
      slots.remove(self.key);
    }
  }
}

pub struct CacheOrchestrator {
  store: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
  slots: StdMutex<HashMap<String, Slot>>,
}

impl CacheOrchestrator {
  pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
    Self {
      store,
      clock,
      slots: StdMutex::new(HashMap::new()),
    }
  }

  fn lease<'a>(&'a self, key: &'a str) -> SlotLease<'a> {
    let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
    let slot = slots
      .entry(key.to_string())
      .or_insert_with(|| Arc::new(Mutex::new(None)))
      .clone();
    SlotLease { cache: self, key, slot }
  }

  #[cfg(test)]
  fn resident_slots(&self) -> usize {
    self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  /// Return the cached value for `key` or compute and store it.
  pub async fn fetch<T, F, Fut>(&self, key: &str, ttl: Ttl, compute: F) -> T
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
  {
    let result = self
      .try_fetch(key, ttl, || async move { Ok::<T, Infallible>(compute().await) })
      .await;
    match result {
      Ok(value) => value,
      Err(never) => match never {},
    }
  }

  /// Like [`fetch`](Self::fetch) for fallible computations. Errors are
  /// returned to the caller and never cached.
  pub async fn try_fetch<T, E, F, Fut>(&self, key: &str, ttl: Ttl, compute: F) -> Result<T, E>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    let lease = self.lease(key);
    let mut resident = lease.slot.lock().await;
    let now = self.clock.now();

    if let Some(entry) = resident.as_ref() {
      if is_fresh(entry.expires_at, now) {
        if let Some(value) = decode::<T>(key, &entry.json) {
          return Ok(value);
        }
      }
    }

    match self.store.get(key).await {
      Ok(Some(stored)) => match serde_json::from_str::<CacheEntry<T>>(&stored.value) {
        Ok(entry) if is_fresh(entry.expires_at, now) => {
          debug!(key, "cache hit (durable)");
          *resident = Some(Resident {
            json: stored.value,
            expires_at: entry.expires_at,
          });
          return Ok(entry.value);
        }
        Ok(_) => debug!(key, "cache entry expired"),
        Err(e) => debug!(key, error = %e, "undecodable cache entry, recomputing"),
      },
      Ok(None) => {}
      Err(e) => warn!(key, error = %e, "cache read failed, recomputing"),
    }

    let value = compute().await?;

    let stored_at = self.clock.now();
    let expires_at = ttl.expires_at(stored_at);
    match serde_json::to_string(&CacheEntry { expires_at, value: &value }) {
      Ok(json) => {
        if let Err(e) = self.store.set(key, &json, stored_at).await {
          warn!(key, error = %e, "cache write failed");
        }
        *resident = Some(Resident { json, expires_at });
      }
      Err(e) => warn!(key, error = %e, "cache value not serializable"),
    }

    Ok(value)
  }

  /// Purge one entry from memory and the durable store.
  pub async fn invalidate(&self, key: &str) -> Result<(), WellnessError> {
    let lease = self.lease(key);
    let mut resident = lease.slot.lock().await;
    *resident = None;
    self.store.remove(key).await?;
    debug!(key, "cache entry invalidated");
    Ok(())
  }
}

fn decode<T: DeserializeOwned>(key: &str, json: &str) -> Option<T> {
  match serde_json::from_str::<CacheEntry<T>>(json) {
    Ok(entry) => Some(entry.value),
    Err(e) => {
      debug!(key, error = %e, "resident entry has a different shape, ignoring");
      None
    }
  }
}
