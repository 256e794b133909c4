//! Occurrence scheduler — one timer per job, keyed by (group, job).
//!
//! Each armed job gets a driver task that sleeps until the next occurrence,
//! runs the dispatch pipeline, re-reads the job and re-arms itself. Arming a
//! job that already has a driver hands it the new schedule instead of
//! starting a second timer, so at most one timer exists per job.
//!
//! ```text
//! Idle ──arm──▶ Armed(t) ──t reached──▶ Firing ──pipeline done──▶ Armed(t')
//!                 │  ▲                                │
//!                 │  └──── arm (new schedule) ────────┤ (applied after firing)
//!                 └─cancel / no next occurrence──▶ Terminated ◀──job gone/inactive
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use scrumbot_core::error::Result;
use scrumbot_core::traits::JobStore;
use scrumbot_core::types::{GroupId, JobConfig, JobId};
use scrumbot_core::zone::{parse_start_time, resolve_zone};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::cron::CronRule;
use crate::dispatch::DispatchPipeline;

type JobKey = (GroupId, JobId);

/// Timer state of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed(DateTime<Utc>),
    Firing,
    Terminated,
}

/// The schedule-relevant part of a job, captured at arm time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArmSpec {
    pub group_id: GroupId,
    pub job_id: JobId,
    pub local_start_time: String,
    pub time_zone_id: String,
    pub weekdays_only: bool,
}

impl From<&JobConfig> for ArmSpec {
    fn from(job: &JobConfig) -> Self {
        Self {
            group_id: job.group_id.clone(),
            job_id: job.job_id.clone(),
            local_start_time: job.local_start_time.clone(),
            time_zone_id: job.time_zone_id.clone(),
            weekdays_only: job.weekdays_only,
        }
    }
}

impl ArmSpec {
    fn rule(&self) -> Result<(CronRule, Tz)> {
        let tz = resolve_zone(&self.time_zone_id)?;
        let start = parse_start_time(&self.local_start_time)?;
        Ok((CronRule::daily_at(start, self.weekdays_only), tz))
    }

    /// First occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        let (rule, tz) = self.rule()?;
        Ok(rule.next_after(after, &tz))
    }
}

/// Next occurrence of a daily (or weekday) start time strictly after `after`.
pub fn next_occurrence(
    after: DateTime<Utc>,
    local_start_time: &str,
    time_zone_id: &str,
    weekdays_only: bool,
) -> Result<Option<DateTime<Utc>>> {
    let tz = resolve_zone(time_zone_id)?;
    let start = parse_start_time(local_start_time)?;
    Ok(CronRule::daily_at(start, weekdays_only).next_after(after, &tz))
}

enum Command {
    Arm(ArmSpec),
    Cancel,
}

struct Slot {
    commands: watch::Sender<Command>,
    state: watch::Receiver<TimerState>,
    epoch: u64,
    handle: JoinHandle<()>,
}

/// Keeps one timer per job and fires the dispatch pipeline on each occurrence.
#[derive(Clone)]
pub struct OccurrenceScheduler {
    pipeline: Arc<DispatchPipeline>,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    slots: Arc<Mutex<HashMap<JobKey, Slot>>>,
    epochs: Arc<AtomicU64>,
}

impl OccurrenceScheduler {
    pub fn new(pipeline: Arc<DispatchPipeline>, store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pipeline,
            store,
            clock,
            slots: Arc::new(Mutex::new(HashMap::new())),
            epochs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Ensure exactly one timer exists for `job`, due at its next occurrence.
    ///
    /// Idempotent: arming an armed job replaces its schedule. A job that is
    /// firing picks up the new schedule when the pipeline returns. Returns
    /// the next fire instant, or `None` when the job has no future
    /// occurrence (or is inactive) and was left unarmed.
    pub async fn arm(&self, job: &JobConfig) -> Result<Option<DateTime<Utc>>> {
        let spec = ArmSpec::from(job);
        let key: JobKey = (spec.group_id.clone(), spec.job_id.clone());
        let next = spec.next_after(self.clock.now())?;

        if !job.active || next.is_none() {
            if next.is_none() {
                tracing::warn!("⚠️ Scrum '{}/{}' has no future occurrence", key.0, key.1);
            }
            self.cancel(&key.0, &key.1).await;
            return Ok(None);
        }

        let mut slots = self.slots.lock().await;
        if let Some(slot) = slots.get(&key) {
            if !slot.handle.is_finished() {
                slot.commands.send_replace(Command::Arm(spec));
                tracing::debug!("🔁 Scrum '{}/{}' re-armed", key.0, key.1);
                return Ok(next);
            }
        }

        let epoch = self.epochs.fetch_add(1, Ordering::Relaxed);
        let (commands, command_rx) = watch::channel(Command::Arm(spec.clone()));
        let (state_tx, state) = watch::channel(TimerState::Idle);
        let driver = self.clone();
        let driver_key = key.clone();
        let handle = tokio::spawn(async move {
            driver.drive(driver_key, spec, command_rx, state_tx, epoch).await;
        });
        slots.insert(
            key.clone(),
            Slot {
                commands,
                state,
                epoch,
                handle,
            },
        );
        if let Some(at) = next {
            tracing::info!("⏰ Scrum '{}/{}' armed for {}", key.0, key.1, at.to_rfc3339());
        }
        Ok(next)
    }

    /// Stop a job's timer. A run already firing completes. Returns false if
    /// no timer existed.
    pub async fn cancel(&self, group_id: &str, job_id: &str) -> bool {
        let key: JobKey = (group_id.to_string(), job_id.to_string());
        let slot = self.slots.lock().await.remove(&key);
        match slot {
            Some(slot) => {
                slot.commands.send_replace(Command::Cancel);
                tracing::info!("🛑 Scrum '{group_id}/{job_id}' timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Current timer state of a job; `None` if it has no timer.
    pub async fn state(&self, group_id: &str, job_id: &str) -> Option<TimerState> {
        let key: JobKey = (group_id.to_string(), job_id.to_string());
        self.slots.lock().await.get(&key).map(|slot| *slot.state.borrow())
    }

    /// Instant a job is armed for, if it is waiting.
    pub async fn next_fire(&self, group_id: &str, job_id: &str) -> Option<DateTime<Utc>> {
        match self.state(group_id, job_id).await? {
            TimerState::Armed(at) => Some(at),
            _ => None,
        }
    }

    /// Number of live timers.
    pub async fn armed_count(&self) -> usize {
        self.slots
            .lock()
            .await
            .values()
            .filter(|slot| !slot.handle.is_finished())
            .count()
    }

    /// Cancel every timer and wait for in-flight runs to finish.
    pub async fn shutdown(&self) {
        let slots: Vec<Slot> = self.slots.lock().await.drain().map(|(_, slot)| slot).collect();
        tracing::info!("🛑 Stopping {} scrum timer(s)", slots.len());
        let mut handles = Vec::with_capacity(slots.len());
        for slot in slots {
            slot.commands.send_replace(Command::Cancel);
            handles.push(slot.handle);
        }
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::warn!("⚠️ Scrum timer task ended abnormally: {e}");
            }
        }
    }

    async fn drive(
        self,
        key: JobKey,
        mut spec: ArmSpec,
        mut commands: watch::Receiver<Command>,
        state: watch::Sender<TimerState>,
        epoch: u64,
    ) {
        let mut last_fired: Option<DateTime<Utc>> = None;

        loop {
            self.run_timer(&key, &mut spec, &mut commands, &state, &mut last_fired)
                .await;

            // An arm that raced with the timer stopping restarts it.
            let mut slots = self.slots.lock().await;
            if let Ok(true) = commands.has_changed() {
                if let Command::Arm(new_spec) = &*commands.borrow_and_update() {
                    spec = new_spec.clone();
                    continue;
                }
            }
            state.send_replace(TimerState::Terminated);
            if slots.get(&key).is_some_and(|slot| slot.epoch == epoch) {
                slots.remove(&key);
            }
            break;
        }
    }

    /// Wait, fire, re-arm until cancelled or the job has no next occurrence.
    async fn run_timer(
        &self,
        key: &JobKey,
        spec: &mut ArmSpec,
        commands: &mut watch::Receiver<Command>,
        state: &watch::Sender<TimerState>,
        last_fired: &mut Option<DateTime<Utc>>,
    ) {
        loop {
            let now = self.clock.now();
            // Strictly after the occurrence just fired, even if the clock lags.
            let after = last_fired.map_or(now, |fired| fired.max(now));
            let next = match spec.next_after(after) {
                Ok(Some(at)) => at,
                Ok(None) => {
                    tracing::warn!("⚠️ Scrum '{}/{}' has no future occurrence", key.0, key.1);
                    return;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Scrum '{}/{}' cannot be scheduled: {e}", key.0, key.1);
                    return;
                }
            };
            state.send_replace(TimerState::Armed(next));

            let delay = (next - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
            // A due occurrence always fires; a re-arm only replaces one still pending.
            tokio::select! {
                biased;
                _ = tokio::time::sleep(delay) => {}
                changed = commands.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    let due = self.clock.now() >= next;
                    match &*commands.borrow_and_update() {
                        Command::Arm(new_spec) => *spec = new_spec.clone(),
                        Command::Cancel => return,
                    }
                    if !due {
                        continue;
                    }
                }
            }

            state.send_replace(TimerState::Firing);
            tracing::info!("🔔 Scrum '{}/{}' firing (due {})", key.0, key.1, next.to_rfc3339());
            if let Err(e) = self.pipeline.run(&spec.group_id, &spec.job_id).await {
                tracing::error!("❌ Scrum '{}/{}' run failed: {e}", key.0, key.1);
            }
            *last_fired = Some(next);

            if matches!(&*commands.borrow_and_update(), Command::Cancel) {
                return;
            }

            // Edits and deactivation take effect from the next occurrence.
            match self.store.get_job(&spec.group_id, &spec.job_id).await {
                Ok(Some(job)) if job.active => *spec = ArmSpec::from(&job),
                Ok(_) => {
                    tracing::info!("⏹️ Scrum '{}/{}' removed or inactive, timer stopped", key.0, key.1);
                    return;
                }
                Err(e) => {
                    tracing::warn!("⚠️ Re-reading scrum '{}/{}' failed, keeping schedule: {e}", key.0, key.1);
                }
            }
        }
    }
}
