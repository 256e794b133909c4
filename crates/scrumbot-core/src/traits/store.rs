//! Persistence trait — job configurations and run records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{ChannelRef, JobConfig, MemberResponse, RunRecord};

/// Storage for jobs and runs.
///
/// Implementations provide per-entity atomic writes; the scheduler never
/// needs cross-entity transactions. Once a run exists, it is only changed
/// through the narrow updates below, so a stale copy held by one caller
/// can never undo another caller's close.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Active jobs whose `utc_hour_bucket` is in `buckets`.
    async fn query_active_by_bucket(&self, buckets: &[u8]) -> Result<Vec<JobConfig>>;

    /// All jobs of a group, active or not.
    async fn list_jobs(&self, group_id: &str) -> Result<Vec<JobConfig>>;

    async fn get_job(&self, group_id: &str, job_id: &str) -> Result<Option<JobConfig>>;

    /// Insert or replace.
    async fn save_job(&self, job: &JobConfig) -> Result<()>;

    /// Returns false when nothing was deleted.
    async fn delete_job(&self, group_id: &str, job_id: &str) -> Result<bool>;

    /// Runs of a job that are not yet completed, oldest first.
    async fn get_open_runs(&self, group_id: &str, job_id: &str) -> Result<Vec<RunRecord>>;

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// Insert a new run (or replace it wholesale).
    async fn save_run(&self, run: &RunRecord) -> Result<()>;

    /// Mark a run completed if it is still open. Returns the closed record,
    /// `None` if it was already closed, `NotFound` if there is no such run.
    async fn close_run_if_open(&self, run_id: &str, closed_at: DateTime<Utc>) -> Result<Option<RunRecord>>;

    /// Add or replace a member's response on an open run, atomically with
    /// respect to closing. Fails with `RunClosed` or `NotFound`.
    async fn add_response_if_open(&self, run_id: &str, response: &MemberResponse) -> Result<RunRecord>;

    /// Set where a run was posted. Leaves status and responses untouched.
    async fn set_run_delivery(
        &self,
        run_id: &str,
        channel: &ChannelRef,
        message_id: Option<&str>,
    ) -> Result<()>;

    /// Delete runs started before `cutoff`. Returns the number removed.
    async fn delete_runs_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}
