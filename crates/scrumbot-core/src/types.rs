//! Job, run and payload records — the data model the scheduler works on.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = String;
pub type GroupId = String;
pub type RunId = String;
pub type MessageId = String;

/// Where a job's messages go. Addressing is owned by the notification sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelRef {
    /// Telegram chat (group or channel) addressed through the Bot API.
    Telegram { chat_id: String },
    /// Generic HTTP webhook receiving JSON payloads.
    Webhook { url: String },
    /// Writes payloads to the log only. Useful for dry runs.
    Log { name: String },
}

impl std::fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelRef::Telegram { chat_id } => write!(f, "telegram:{chat_id}"),
            ChannelRef::Webhook { url } => write!(f, "webhook:{url}"),
            ChannelRef::Log { name } => write!(f, "log:{name}"),
        }
    }
}

impl std::str::FromStr for ChannelRef {
    type Err = String;

    /// Parse the `kind:address` form used on the command line.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s
            .split_once(':')
            .ok_or_else(|| format!("expected kind:address, got '{s}'"))?;
        if rest.is_empty() {
            return Err(format!("empty address in '{s}'"));
        }
        match kind {
            "telegram" => Ok(ChannelRef::Telegram { chat_id: rest.to_string() }),
            "webhook" => Ok(ChannelRef::Webhook { url: rest.to_string() }),
            "log" => Ok(ChannelRef::Log { name: rest.to_string() }),
            other => Err(format!("unknown channel kind: {other}")),
        }
    }
}

/// A recurring scrum definition for one team/channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Unique within `group_id`.
    pub job_id: JobId,
    /// Tenant partition key; every query is scoped by it.
    pub group_id: GroupId,
    /// Display name of the team.
    pub team_name: String,
    /// Local wall-clock start, e.g. "09:00".
    pub local_start_time: String,
    /// IANA or Windows zone id.
    pub time_zone_id: String,
    /// UTC hour of `local_start_time` at last save; the sweep index.
    pub utc_hour_bucket: u8,
    /// Skip Saturdays and Sundays.
    pub weekdays_only: bool,
    pub active: bool,
    pub channel: ChannelRef,
    /// Substituted for `channel` when the sink reports it gone.
    #[serde(default)]
    pub fallback_channel: Option<ChannelRef>,
    /// Member ids expected to respond.
    #[serde(default)]
    pub members: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobConfig {
    /// New active job with an unset bucket. Callers refresh the bucket
    /// before saving.
    pub fn new(
        group_id: &str,
        job_id: &str,
        team_name: &str,
        local_start_time: &str,
        time_zone_id: &str,
        channel: ChannelRef,
    ) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.to_string(),
            group_id: group_id.to_string(),
            team_name: team_name.to_string(),
            local_start_time: local_start_time.to_string(),
            time_zone_id: time_zone_id.to_string(),
            utc_hour_bucket: 0,
            weekdays_only: false,
            active: true,
            channel,
            fallback_channel: None,
            members: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One member's status update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberResponse {
    pub member: String,
    pub yesterday: String,
    pub today: String,
    #[serde(default)]
    pub blockers: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl MemberResponse {
    pub fn has_blocker(&self) -> bool {
        self.blockers.as_deref().is_some_and(|b| !b.trim().is_empty())
    }
}

/// One occurrence of a job, from start message to close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    /// Lookup-only reference; the job may since be deleted.
    pub job_id: JobId,
    pub group_id: GroupId,
    pub started_at: DateTime<Utc>,
    pub completed: bool,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Set once the start message is posted.
    #[serde(default)]
    pub message_id: Option<MessageId>,
    /// Channel the run was posted to.
    pub channel: ChannelRef,
    /// Members expected to respond, snapshotted at start.
    #[serde(default)]
    pub members: Vec<String>,
    /// member → submission. Only grows while the run is open.
    #[serde(default)]
    pub responses: BTreeMap<String, MemberResponse>,
}

impl RunRecord {
    /// Open a fresh run for `job` starting at `started_at`.
    pub fn start(job: &JobConfig, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            job_id: job.job_id.clone(),
            group_id: job.group_id.clone(),
            started_at,
            completed: false,
            closed_at: None,
            message_id: None,
            channel: job.channel.clone(),
            members: job.members.clone(),
            responses: BTreeMap::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        !self.completed
    }

    /// Mark closed. Returns false if it already was.
    pub fn close(&mut self, at: DateTime<Utc>) -> bool {
        if self.completed {
            return false;
        }
        self.completed = true;
        self.closed_at = Some(at);
        true
    }

    /// Expected members who have not submitted yet.
    pub fn missing_members(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| !self.responses.contains_key(m.as_str()))
            .map(String::as_str)
            .collect()
    }
}

/// Rendered message handed to the notification sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub title: String,
    pub body: String,
    /// Structured extras for sinks that render cards (webhooks).
    #[serde(default)]
    pub fields: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobConfig {
        let mut job = JobConfig::new(
            "g1",
            "daily-standup",
            "Platform",
            "09:00",
            "UTC",
            ChannelRef::Log { name: "platform".into() },
        );
        job.members = vec!["alice".into(), "bob".into()];
        job
    }

    #[test]
    fn test_channel_ref_parse_and_display() {
        let c: ChannelRef = "telegram:-100123".parse().unwrap();
        assert_eq!(c, ChannelRef::Telegram { chat_id: "-100123".into() });
        assert_eq!(c.to_string(), "telegram:-100123");

        let w: ChannelRef = "webhook:https://example.com/hook".parse().unwrap();
        assert_eq!(w, ChannelRef::Webhook { url: "https://example.com/hook".into() });

        assert!("carrier-pigeon:1".parse::<ChannelRef>().is_err());
        assert!("telegram:".parse::<ChannelRef>().is_err());
        assert!("nocolon".parse::<ChannelRef>().is_err());
    }

    #[test]
    fn test_run_start_snapshots_job() {
        let run = RunRecord::start(&job(), Utc::now());
        assert!(run.is_open());
        assert_eq!(run.job_id, "daily-standup");
        assert_eq!(run.members.len(), 2);
        assert!(run.message_id.is_none());
        assert_ne!(run.run_id, RunRecord::start(&job(), Utc::now()).run_id);
    }

    #[test]
    fn test_close_only_once() {
        let mut run = RunRecord::start(&job(), Utc::now());
        let at = Utc::now();
        assert!(run.close(at));
        assert!(!run.close(Utc::now()));
        assert_eq!(run.closed_at, Some(at));
    }

    #[test]
    fn test_missing_members() {
        let mut run = RunRecord::start(&job(), Utc::now());
        run.responses.insert(
            "alice".into(),
            MemberResponse {
                member: "alice".into(),
                yesterday: "reviews".into(),
                today: "release".into(),
                blockers: Some("  ".into()),
                submitted_at: Utc::now(),
            },
        );
        assert_eq!(run.missing_members(), vec!["bob"]);
        assert!(!run.responses["alice"].has_blocker());
    }

    #[test]
    fn test_channel_ref_serde_tagged() {
        let json = serde_json::to_string(&ChannelRef::Webhook { url: "u".into() }).unwrap();
        assert_eq!(json, r#"{"kind":"webhook","url":"u"}"#);
    }
}
