//! # Scrumbot Scheduler
//!
//! Timing and run lifecycle for recurring scrums.
//!
//! ## Architecture
//! ```text
//! SweepLoop (top of every UTC hour, plus once at startup)
//!   └── query_active_by_bucket({h-1 .. h+2}) → OccurrenceScheduler::arm(job)
//!
//! OccurrenceScheduler (one timer per job)
//!   └── next local start time → sleep → DispatchPipeline::run
//!                                         ├── close open runs, refresh their summary
//!                                         ├── persist new run
//!                                         └── post start message (retry, channel fallback)
//!
//! ArchivalScheduler (last day of month)
//!   └── delete runs older than the retention window
//! ```

pub mod archival;
pub mod bucket;
pub mod clock;
pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod render;
pub mod retry;
pub mod sweep;

#[cfg(test)]
mod testing;

pub use archival::ArchivalScheduler;
pub use bucket::{candidate_buckets, compute_utc_hour_bucket, refresh_bucket, sweep_buckets};
pub use clock::{Clock, SystemClock};
pub use cron::CronRule;
pub use dispatch::{DispatchOutcome, DispatchPipeline};
pub use engine::{OccurrenceScheduler, TimerState, next_occurrence};
pub use retry::RetryPolicy;
pub use sweep::{SweepLoop, SweepReport};
