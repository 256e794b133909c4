//! Message rendering for run start and run summary.

use scrumbot_core::types::{JobConfig, Payload, RunRecord};
use serde_json::json;

/// Start message posted when a run opens.
pub fn start_payload(job: &JobConfig, run: &RunRecord) -> Payload {
    let mut body = format!(
        "Good morning {}! Time for the daily scrum.\nPlease share: what you did yesterday, what you plan today, any blockers.",
        job.team_name
    );
    if !run.members.is_empty() {
        body.push_str(&format!("\nExpected: {}", run.members.join(", ")));
    }
    Payload {
        title: format!("📋 Scrum: {}", job.team_name),
        body,
        fields: json!({
            "run_id": run.run_id,
            "job_id": run.job_id,
            "started_at": run.started_at.to_rfc3339(),
            "members": run.members,
        }),
    }
}

/// Summary card for a run; replaces the start message as responses arrive
/// and once more when the run closes.
pub fn summary_payload(team_name: &str, run: &RunRecord) -> Payload {
    let mut lines = Vec::new();
    for response in run.responses.values() {
        lines.push(format!("• {}", response.member));
        lines.push(format!("  Yesterday: {}", response.yesterday));
        lines.push(format!("  Today: {}", response.today));
        if response.has_blocker() {
            lines.push(format!("  🚧 Blockers: {}", response.blockers.as_deref().unwrap_or_default()));
        }
    }
    let missing = run.missing_members();
    if !missing.is_empty() {
        lines.push(format!("Waiting on: {}", missing.join(", ")));
    }
    if lines.is_empty() {
        lines.push("No updates yet.".into());
    }

    let status = if run.completed { "closed" } else { "open" };
    let blocked: Vec<&str> = run
        .responses
        .values()
        .filter(|r| r.has_blocker())
        .map(|r| r.member.as_str())
        .collect();

    Payload {
        title: if run.completed {
            format!("✅ Scrum ended: {team_name}")
        } else {
            format!("📋 Scrum: {team_name}")
        },
        body: lines.join("\n"),
        fields: json!({
            "run_id": run.run_id,
            "status": status,
            "responses": run.responses.len(),
            "missing": missing,
            "blocked": blocked,
            "closed_at": run.closed_at.map(|t| t.to_rfc3339()),
        }),
    }
}
