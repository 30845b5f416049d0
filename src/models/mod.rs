pub mod records;
pub mod sample;
pub mod workout;

pub use records::{Band, DailyLoad, DailyPhysio, DailyScore, Score, ScoreKind, ScoreSlot};
pub use sample::{aggregate_daily, DailySample, MetricKind};
pub use workout::{Activity, ActivityKind, HeartRateSample, Workout};
