use tokio::sync::broadcast;

use super::WellnessService;
use crate::backfill::{BackfillEvent, BackfillRequest, PipelineReport};

impl WellnessService {
  /// Physio, load and score backfill over the last `days_back` days.
  pub async fn recompute_all(&self, days_back: i64, force_refresh: bool) -> PipelineReport {
    self
      .backfill
      .recompute_all(BackfillRequest { days_back, force: force_refresh })
      .await
  }

  /// Recovery, sleep and strain backfill only.
  pub async fn recompute_scores(&self, days_back: i64, force_refresh: bool) -> PipelineReport {
    self
      .backfill
      .recompute_scores(BackfillRequest { days_back, force: force_refresh })
      .await
  }

  /// Fires once per score backfill run, after all three kinds finish.
  pub fn subscribe(&self) -> broadcast::Receiver<BackfillEvent> {
    self.backfill.subscribe()
  }
}
