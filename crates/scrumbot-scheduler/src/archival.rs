//! Monthly purge of old run records.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use scrumbot_core::config::ArchivalConfig;
use scrumbot_core::error::Result;
use scrumbot_core::traits::JobStore;
use scrumbot_core::zone::resolve_zone;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::cron::CronRule;

pub struct ArchivalScheduler {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    rule: CronRule,
    tz: Tz,
    retention: chrono::Duration,
}

impl ArchivalScheduler {
    pub fn from_config(config: &ArchivalConfig, store: Arc<dyn JobStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self {
            store,
            clock,
            rule: CronRule::parse(&config.cron)?,
            tz: resolve_zone(&config.time_zone)?,
            retention: chrono::Duration::days(i64::from(config.retention_days)),
        })
    }

    /// Runs started before this instant are purged.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.retention
    }

    pub fn next_run(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.rule.next_after(after, &self.tz)
    }

    /// Delete runs older than the retention window. Returns how many.
    pub async fn archive_once(&self) -> Result<usize> {
        let cutoff = self.cutoff(self.clock.now());
        let removed = self.store.delete_runs_before(cutoff).await?;
        tracing::info!("🗄️ Archived {removed} scrum run(s) started before {}", cutoff.to_rfc3339());
        Ok(removed)
    }

    /// Purge on every rule occurrence until `shutdown` turns true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("⏰ Archival scheduled on '{}' ({})", self.rule, self.tz);
        let mut last: Option<DateTime<Utc>> = None;
        loop {
            let now = self.clock.now();
            let after = last.map_or(now, |t| t.max(now));
            let Some(next) = self.next_run(after) else {
                tracing::warn!("⚠️ Archival rule '{}' never fires, archival stopped", self.rule);
                return;
            };
            let delay = (next - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            last = Some(next);
            if let Err(e) = self.archive_once().await {
                tracing::error!("❌ Archival failed: {e}");
            }
        }
        tracing::info!("🛑 Archival stopped");
    }
}
