//! In-memory job store. Nothing survives the process.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scrumbot_core::error::{Result, ScrumError};
use scrumbot_core::traits::JobStore;
use scrumbot_core::types::{ChannelRef, JobConfig, MemberResponse, RunRecord};
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<(String, String), JobConfig>>,
    runs: RwLock<HashMap<String, RunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs, open or closed.
    pub async fn run_count(&self) -> usize {
        self.runs.read().await.len()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn query_active_by_bucket(&self, buckets: &[u8]) -> Result<Vec<JobConfig>> {
        let jobs = self.jobs.read().await;
        let mut hits: Vec<JobConfig> = jobs
            .values()
            .filter(|j| j.active && buckets.contains(&j.utc_hour_bucket))
            .cloned()
            .collect();
        hits.sort_by(|a, b| (&a.group_id, &a.job_id).cmp(&(&b.group_id, &b.job_id)));
        Ok(hits)
    }

    async fn list_jobs(&self, group_id: &str) -> Result<Vec<JobConfig>> {
        let jobs = self.jobs.read().await;
        let mut list: Vec<JobConfig> = jobs
            .values()
            .filter(|j| j.group_id == group_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        Ok(list)
    }

    async fn get_job(&self, group_id: &str, job_id: &str) -> Result<Option<JobConfig>> {
        let key = (group_id.to_string(), job_id.to_string());
        Ok(self.jobs.read().await.get(&key).cloned())
    }

    async fn save_job(&self, job: &JobConfig) -> Result<()> {
        let key = (job.group_id.clone(), job.job_id.clone());
        self.jobs.write().await.insert(key, job.clone());
        Ok(())
    }

    async fn delete_job(&self, group_id: &str, job_id: &str) -> Result<bool> {
        let key = (group_id.to_string(), job_id.to_string());
        Ok(self.jobs.write().await.remove(&key).is_some())
    }

    async fn get_open_runs(&self, group_id: &str, job_id: &str) -> Result<Vec<RunRecord>> {
        let runs = self.runs.read().await;
        let mut open: Vec<RunRecord> = runs
            .values()
            .filter(|r| r.group_id == group_id && r.job_id == job_id && !r.completed)
            .cloned()
            .collect();
        open.sort_by_key(|r| r.started_at);
        Ok(open)
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn save_run(&self, run: &RunRecord) -> Result<()> {
        self.runs.write().await.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn close_run_if_open(&self, run_id: &str, closed_at: DateTime<Utc>) -> Result<Option<RunRecord>> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| ScrumError::NotFound(format!("run {run_id}")))?;
        Ok(run.close(closed_at).then(|| run.clone()))
    }

    async fn add_response_if_open(&self, run_id: &str, response: &MemberResponse) -> Result<RunRecord> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| ScrumError::NotFound(format!("run {run_id}")))?;
        if run.completed {
            return Err(ScrumError::RunClosed(run_id.to_string()));
        }
        run.responses.insert(response.member.clone(), response.clone());
        Ok(run.clone())
    }

    async fn set_run_delivery(
        &self,
        run_id: &str,
        channel: &ChannelRef,
        message_id: Option<&str>,
    ) -> Result<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| ScrumError::NotFound(format!("run {run_id}")))?;
        run.channel = channel.clone();
        run.message_id = message_id.map(str::to_string);
        Ok(())
    }

    async fn delete_runs_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, r| r.started_at >= cutoff);
        Ok(before - runs.len())
    }
}
