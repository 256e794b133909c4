//! Hourly sweep: find jobs due around the current UTC hour and arm them.
//!
//! The sweep is the only path by which jobs get armed after startup, so it
//! runs once immediately and then at the top of every hour.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use scrumbot_core::config::SweepConfig;
use scrumbot_core::error::Result;
use scrumbot_core::traits::JobStore;
use tokio::sync::watch;

use crate::bucket::sweep_buckets;
use crate::clock::Clock;
use crate::engine::OccurrenceScheduler;

/// Result of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub buckets: Vec<u8>,
    pub found: usize,
    pub armed: usize,
    /// Jobs that could not be armed (bad zone, bad start time).
    pub failed: usize,
}

pub struct SweepLoop {
    store: Arc<dyn JobStore>,
    scheduler: OccurrenceScheduler,
    clock: Arc<dyn Clock>,
    config: SweepConfig,
}

impl SweepLoop {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: OccurrenceScheduler,
        clock: Arc<dyn Clock>,
        config: SweepConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            clock,
            config,
        }
    }

    /// Arm every active job whose bucket is near the current UTC hour.
    /// One job failing to arm does not stop the others.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let hour = self.clock.now().hour() as u8;
        let buckets = sweep_buckets(hour);
        let jobs = self.store.query_active_by_bucket(&buckets).await?;

        let mut report = SweepReport {
            buckets,
            found: jobs.len(),
            ..Default::default()
        };
        for job in &jobs {
            match self.scheduler.arm(job).await {
                Ok(Some(_)) => report.armed += 1,
                Ok(None) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("⚠️ Could not arm scrum '{}/{}': {e}", job.group_id, job.job_id);
                }
            }
        }
        tracing::info!(
            "🧹 Sweep at {:02}:00 UTC, buckets {:?}: {} found, {} armed, {} failed",
            hour,
            report.buckets,
            report.found,
            report.armed,
            report.failed
        );
        Ok(report)
    }

    /// Time until the next sweep.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Duration {
        if !self.config.align_to_hour {
            return Duration::from_secs(self.config.interval_secs.max(1));
        }
        let into_hour = u64::from(now.minute()) * 60 + u64::from(now.second());
        Duration::from_secs(3600 - into_hour)
    }

    /// Sweep now, then on every tick until `shutdown` turns true.
    /// Store failures are logged and retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "⏰ Sweep loop started ({})",
            if self.config.align_to_hour {
                "top of every UTC hour".to_string()
            } else {
                format!("every {}s", self.config.interval_secs)
            }
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.sweep_once().await {
                tracing::error!("❌ Sweep failed: {e}");
            }

            let delay = self.next_delay(self.clock.now());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("🛑 Sweep loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::compute_utc_hour_bucket_on;
    use crate::testing::TokioClock;
    use crate::testing::{Harness, harness, job};
    use chrono::TimeZone;
    use scrumbot_core::types::JobConfig;

    fn setup(start: DateTime<Utc>) -> (Harness, OccurrenceScheduler, SweepLoop) {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(start));
        let h = harness(clock.clone());
        let store = h.store.clone() as Arc<dyn JobStore>;
        let scheduler = OccurrenceScheduler::new(h.pipeline.clone(), store.clone(), clock.clone());
        let sweep = SweepLoop::new(store, scheduler.clone(), clock, SweepConfig::default());
        (h, scheduler, sweep)
    }

    fn with_bucket(mut job: JobConfig, bucket: u8) -> JobConfig {
        job.utc_hour_bucket = bucket;
        job
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_arms_jobs_near_current_hour() {
        let (h, scheduler, sweep) = setup(Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap());
        h.store.save_job(&with_bucket(job("due", "09:00"), 9)).await.unwrap();
        h.store.save_job(&with_bucket(job("now", "08:30"), 8)).await.unwrap();
        h.store.save_job(&with_bucket(job("later", "15:00"), 15)).await.unwrap();
        let mut off = with_bucket(job("off", "08:00"), 8);
        off.active = false;
        h.store.save_job(&off).await.unwrap();

        let report = sweep.sweep_once().await.unwrap();
        assert_eq!(report.buckets, vec![7, 8, 9, 10]);
        assert_eq!(report.found, 2);
        assert_eq!(report.armed, 2);
        assert_eq!(scheduler.armed_count().await, 2);
        assert!(scheduler.state("g1", "later").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_job_does_not_block_others() {
        let (h, scheduler, sweep) = setup(Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap());
        let mut broken = with_bucket(job("broken", "09:00"), 8);
        broken.time_zone_id = "Nowhere/Special".into();
        h.store.save_job(&broken).await.unwrap();
        h.store.save_job(&with_bucket(job("fine", "08:30"), 8)).await.unwrap();

        let report = sweep.sweep_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.armed, 1);
        assert_eq!(scheduler.armed_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_bucket_after_spring_forward_still_fires() {
        // Bucket saved in winter (14 UTC); on 2026-03-09 09:00 New York is 13:00 UTC.
        let start = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        let (h, _scheduler, sweep) = setup(start);
        let mut j = job("nyc", "09:00");
        j.time_zone_id = "America/New_York".into();
        j.utc_hour_bucket =
            compute_utc_hour_bucket_on(chrono::NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(), "09:00", "America/New_York")
                .unwrap();
        assert_eq!(j.utc_hour_bucket, 14);
        h.store.save_job(&j).await.unwrap();

        let report = sweep.sweep_once().await.unwrap();
        assert_eq!(report.armed, 1);
        tokio::time::sleep(Duration::from_secs(3600 + 1)).await;
        let posts = h.sink.posts();
        assert_eq!(posts.len(), 1);
        let open = h.store.get_open_runs("g1", "nyc").await.unwrap();
        assert_eq!(open[0].started_at, Utc.with_ymd_and_hms(2026, 3, 9, 13, 0, 0).unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_delay_aligns_to_hour() {
        let (_h, _scheduler, sweep) = setup(Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap());
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 8, 45, 30).unwrap();
        assert_eq!(sweep.next_delay(now), Duration::from_secs(14 * 60 + 30));
        let top = Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap();
        assert_eq!(sweep.next_delay(top), Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_sweeps_immediately_and_hourly_until_shutdown() {
        let (h, scheduler, sweep) = setup(Utc.with_ymd_and_hms(2026, 10, 16, 7, 30, 0).unwrap());
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(sweep.run(rx));

        // Added after the startup sweep; picked up at 08:00.
        tokio::time::sleep(Duration::from_secs(60)).await;
        h.store.save_job(&with_bucket(job("late", "09:00"), 9)).await.unwrap();
        assert_eq!(scheduler.armed_count().await, 0);

        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(scheduler.armed_count().await, 1);

        tx.send(true).unwrap();
        task.await.unwrap();
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_due_on_the_hour_fires_despite_rearm_by_sweep() {
        // The 09:00 sweep re-arms the job at the instant its timer is due.
        for _ in 0..20 {
            let (h, scheduler, sweep) = setup(Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap());
            h.store.save_job(&with_bucket(job("standup", "09:00"), 9)).await.unwrap();
            let (tx, rx) = watch::channel(false);
            let task = tokio::spawn(sweep.run(rx));

            tokio::time::sleep(Duration::from_secs(62 * 60)).await;
            assert_eq!(h.sink.posts().len(), 1);
            let open = h.store.get_open_runs("g1", "standup").await.unwrap();
            assert_eq!(open.len(), 1);
            assert_eq!(open[0].started_at, Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap());

            tx.send(true).unwrap();
            task.await.unwrap();
            scheduler.shutdown().await;
        }
    }
}
