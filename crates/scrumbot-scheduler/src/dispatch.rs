//! Run lifecycle: close what is still open, start a fresh run, post the
//! start message. Also the member-facing operations on a run (submit, end).
//!
//! Runs are written whole only when created. Closing, responses and
//! delivery details go through the store's narrow updates, so a caller
//! holding an old copy of a run cannot reopen it.
//!
//! Each step has its own failure policy. Closing stale runs and refreshing
//! their summaries are best effort; persisting the new run is required;
//! posting the start message is retried and, failing that, leaves the run
//! open without a message id.

use std::sync::Arc;

use scrumbot_core::error::{Result, ScrumError};
use scrumbot_core::traits::{JobStore, NotificationSink};
use scrumbot_core::types::{JobConfig, MemberResponse, MessageId, Payload, RunId, RunRecord};

use crate::clock::Clock;
use crate::render;
use crate::retry::RetryPolicy;

/// What one pipeline invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Job deleted or inactive at fire time.
    Skipped,
    Started {
        run_id: RunId,
        /// None when the start message could not be posted.
        message_id: Option<MessageId>,
        /// Stale runs closed before starting.
        closed: usize,
    },
}

pub struct DispatchPipeline {
    store: Arc<dyn JobStore>,
    sink: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl DispatchPipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        sink: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            sink,
            clock,
            retry,
        }
    }

    /// Start the next run of a job.
    ///
    /// Invoking this twice for the same occurrence closes the first run and
    /// starts a second one; it never leaves two open runs behind.
    pub async fn run(&self, group_id: &str, job_id: &str) -> Result<DispatchOutcome> {
        let mut job = match self.store.get_job(group_id, job_id).await? {
            Some(job) if job.active => job,
            Some(_) => {
                tracing::info!("⏸️ Scrum '{group_id}/{job_id}' is inactive, skipping");
                return Ok(DispatchOutcome::Skipped);
            }
            None => {
                tracing::info!("🗑️ Scrum '{group_id}/{job_id}' no longer exists, skipping");
                return Ok(DispatchOutcome::Skipped);
            }
        };

        let closed = self.close_open_runs(&job).await;

        let mut run = RunRecord::start(&job, self.clock.now());
        self.store.save_run(&run).await?;

        let message_id = match self.post_start(&mut job, &mut run).await {
            Ok(id) => {
                run.message_id = Some(id.clone());
                if let Err(e) = self
                    .store
                    .set_run_delivery(&run.run_id, &run.channel, Some(&id))
                    .await
                {
                    tracing::warn!("⚠️ Run {} posted but message id not saved: {e}", run.run_id);
                }
                Some(id)
            }
            Err(e) => {
                tracing::error!(
                    "❌ Start message for '{}/{}' not delivered via {}, run {} stays open without a message: {e}",
                    job.group_id,
                    job.job_id,
                    self.sink.name(),
                    run.run_id
                );
                None
            }
        };

        tracing::info!(
            "🚀 Scrum started for '{}' (run {}, closed {} stale)",
            job.team_name,
            run.run_id,
            closed
        );
        Ok(DispatchOutcome::Started {
            run_id: run.run_id,
            message_id,
            closed,
        })
    }

    /// Close every open run of `job` and refresh its message. Failures are
    /// logged and skipped. Returns how many runs were closed.
    async fn close_open_runs(&self, job: &JobConfig) -> usize {
        let open = match self.store.get_open_runs(&job.group_id, &job.job_id).await {
            Ok(runs) => runs,
            Err(e) => {
                tracing::warn!("⚠️ Could not load open runs of '{}': {e}", job.job_id);
                return 0;
            }
        };

        let now = self.clock.now();
        let mut closed = 0;
        for run in open {
            match self.store.close_run_if_open(&run.run_id, now).await {
                Ok(Some(run)) => {
                    closed += 1;
                    self.refresh_message(&job.team_name, &run).await;
                }
                Ok(None) => {}
                Err(e) => tracing::warn!("⚠️ Could not close run {}: {e}", run.run_id),
            }
        }
        closed
    }

    /// Post the start message with retries. A channel reported gone is
    /// replaced by the job's fallback channel, which is persisted.
    async fn post_start(&self, job: &mut JobConfig, run: &mut RunRecord) -> Result<MessageId> {
        let payload = render::start_payload(job, run);
        match self.post_with_retry(run, &payload).await {
            Err(ScrumError::ChannelNotFound(gone)) => {
                let fallback = match &job.fallback_channel {
                    Some(fb) if *fb != job.channel => fb.clone(),
                    _ => return Err(ScrumError::ChannelNotFound(gone)),
                };
                tracing::warn!(
                    "🔀 Channel {} of '{}' is gone, falling back to {}",
                    job.channel,
                    job.job_id,
                    fallback
                );
                job.channel = fallback.clone();
                job.updated_at = self.clock.now();
                if let Err(e) = self.store.save_job(job).await {
                    tracing::warn!("⚠️ Could not save fallback channel for '{}': {e}", job.job_id);
                }
                run.channel = fallback;
                if let Err(e) = self.store.set_run_delivery(&run.run_id, &run.channel, None).await {
                    tracing::warn!("⚠️ Could not save channel of run {}: {e}", run.run_id);
                }
                self.post_with_retry(run, &payload).await
            }
            other => other,
        }
    }

    async fn post_with_retry(&self, run: &RunRecord, payload: &Payload) -> Result<MessageId> {
        let sink = &self.sink;
        let channel = &run.channel;
        self.retry
            .run("post start message", move || sink.post_new(channel, payload))
            .await
    }

    /// Replace a run's message with its current summary. Best effort.
    async fn refresh_message(&self, team_name: &str, run: &RunRecord) {
        let Some(message_id) = run.message_id.as_deref() else {
            return;
        };
        let payload = render::summary_payload(team_name, run);
        if let Err(e) = self.sink.update_existing(&run.channel, message_id, &payload).await {
            tracing::warn!("⚠️ Could not update message of run {}: {e}", run.run_id);
        }
    }

    async fn team_name(&self, run: &RunRecord) -> String {
        match self.store.get_job(&run.group_id, &run.job_id).await {
            Ok(Some(job)) => job.team_name,
            _ => run.job_id.clone(),
        }
    }

    /// Record a member's update on an open run and refresh the summary.
    pub async fn submit_response(&self, run_id: &str, response: MemberResponse) -> Result<RunRecord> {
        let run = self.store.add_response_if_open(run_id, &response).await?;
        tracing::info!("📝 {} responded to run {}", response.member, run_id);
        let team = self.team_name(&run).await;
        self.refresh_message(&team, &run).await;
        Ok(run)
    }

    /// End a run early. Returns false if it was already closed.
    pub async fn close_run(&self, run_id: &str) -> Result<bool> {
        let Some(run) = self.store.close_run_if_open(run_id, self.clock.now()).await? else {
            return Ok(false);
        };
        let team = self.team_name(&run).await;
        self.refresh_message(&team, &run).await;
        tracing::info!("🏁 Run {run_id} closed");
        Ok(true)
    }
}
