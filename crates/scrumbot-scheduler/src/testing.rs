//! Test doubles shared by the scheduler's unit tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scrumbot_core::error::{Result, ScrumError};
use scrumbot_core::traits::{JobStore, NotificationSink};
use scrumbot_core::types::{ChannelRef, JobConfig, MemberResponse, MessageId, Payload, RunRecord};
use scrumbot_store::MemoryStore;
use tokio::sync::Notify;

use crate::clock::Clock;
use crate::dispatch::DispatchPipeline;
use crate::retry::RetryPolicy;

/// Wall clock anchored at a fixed UTC instant that advances with
/// `tokio::time`. Under a paused runtime it moves only when tokio's clock does.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn starting_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.started.elapsed();
        self.anchor + chrono::Duration::from_std(elapsed).unwrap_or(chrono::Duration::zero())
    }
}

/// Store that can hold `add_response_if_open` calls until released.
pub struct GatedStore {
    pub inner: Arc<MemoryStore>,
    holding: AtomicBool,
    /// Signalled when a held call is waiting.
    pub entered: Notify,
    release: Notify,
}

impl GatedStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            holding: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }

    pub fn hold_responses(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    pub fn release_responses(&self) {
        self.holding.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }
}

#[async_trait]
impl JobStore for GatedStore {
    async fn query_active_by_bucket(&self, buckets: &[u8]) -> Result<Vec<JobConfig>> {
        self.inner.query_active_by_bucket(buckets).await
    }

    async fn list_jobs(&self, group_id: &str) -> Result<Vec<JobConfig>> {
        self.inner.list_jobs(group_id).await
    }

    async fn get_job(&self, group_id: &str, job_id: &str) -> Result<Option<JobConfig>> {
        self.inner.get_job(group_id, job_id).await
    }

    async fn save_job(&self, job: &JobConfig) -> Result<()> {
        self.inner.save_job(job).await
    }

    async fn delete_job(&self, group_id: &str, job_id: &str) -> Result<bool> {
        self.inner.delete_job(group_id, job_id).await
    }

    async fn get_open_runs(&self, group_id: &str, job_id: &str) -> Result<Vec<RunRecord>> {
        self.inner.get_open_runs(group_id, job_id).await
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.inner.get_run(run_id).await
    }

    async fn save_run(&self, run: &RunRecord) -> Result<()> {
        self.inner.save_run(run).await
    }

    async fn close_run_if_open(&self, run_id: &str, closed_at: DateTime<Utc>) -> Result<Option<RunRecord>> {
        self.inner.close_run_if_open(run_id, closed_at).await
    }

    async fn add_response_if_open(&self, run_id: &str, response: &MemberResponse) -> Result<RunRecord> {
        if self.holding.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.add_response_if_open(run_id, response).await
    }

    async fn set_run_delivery(
        &self,
        run_id: &str,
        channel: &ChannelRef,
        message_id: Option<&str>,
    ) -> Result<()> {
        self.inner.set_run_delivery(run_id, channel, message_id).await
    }

    async fn delete_runs_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.inner.delete_runs_before(cutoff).await
    }
}

/// Sink that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingSink {
    posts: Mutex<Vec<(ChannelRef, Payload)>>,
    updates: Mutex<Vec<(ChannelRef, String, Payload)>>,
    failing_posts: AtomicU32,
    gone: Mutex<Vec<ChannelRef>>,
    next_id: AtomicU64,
}

impl RecordingSink {
    /// Fail the next `n` posts with a transient error.
    pub fn fail_next_posts(&self, n: u32) {
        self.failing_posts.store(n, Ordering::SeqCst);
    }

    /// Report `channel` as deleted from now on.
    pub fn mark_gone(&self, channel: ChannelRef) {
        self.gone.lock().unwrap().push(channel);
    }

    pub fn posts(&self) -> Vec<(ChannelRef, Payload)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(ChannelRef, String, Payload)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn post_new(&self, channel: &ChannelRef, payload: &Payload) -> Result<MessageId> {
        if self.gone.lock().unwrap().contains(channel) {
            return Err(ScrumError::ChannelNotFound(channel.to_string()));
        }
        let failing = self.failing_posts.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_posts.store(failing - 1, Ordering::SeqCst);
            return Err(ScrumError::Notify("503 Service Unavailable".into()));
        }
        self.posts.lock().unwrap().push((channel.clone(), payload.clone()));
        Ok(format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn update_existing(&self, channel: &ChannelRef, message_id: &str, payload: &Payload) -> Result<()> {
        self.updates
            .lock()
            .unwrap()
            .push((channel.clone(), message_id.to_string(), payload.clone()));
        Ok(())
    }
}

/// Active daily job in the UTC zone.
pub fn job(job_id: &str, start: &str) -> JobConfig {
    let mut job = JobConfig::new("g1", job_id, "Platform", start, "UTC", ChannelRef::Telegram {
        chat_id: "-100".into(),
    });
    job.members = vec!["ana".into(), "ben".into()];
    job
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub sink: Arc<RecordingSink>,
    pub pipeline: Arc<DispatchPipeline>,
}

pub fn harness(clock: Arc<dyn Clock>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let sink = Arc::new(RecordingSink::default());
    let pipeline = Arc::new(DispatchPipeline::new(
        store.clone() as Arc<dyn JobStore>,
        sink.clone() as Arc<dyn NotificationSink>,
        clock,
        RetryPolicy::default(),
    ));
    Harness {
        store,
        sink,
        pipeline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let anchor = Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap();
        let clock = TokioClock::starting_at(anchor);
        assert_eq!(clock.now(), anchor);
        tokio::time::sleep(std::time::Duration::from_secs(90)).await;
        assert_eq!(clock.now(), anchor + chrono::Duration::seconds(90));
    }
}
