//! UTC hour bucket index.
//!
//! A job's bucket is the UTC hour its local start time falls in, computed on
//! the day the job was last saved. The offset may have changed since (DST),
//! so lookups widen to neighbouring hours instead of trusting the stored value.

use chrono::{NaiveDate, Timelike, Utc};
use scrumbot_core::error::{Result, ScrumError};
use scrumbot_core::types::JobConfig;
use scrumbot_core::zone::{local_to_utc, parse_start_time, resolve_zone};

/// UTC hour of `local_start_time` in `time_zone_id`, using today's offset.
pub fn compute_utc_hour_bucket(local_start_time: &str, time_zone_id: &str) -> Result<u8> {
    let tz = resolve_zone(time_zone_id)?;
    let today = Utc::now().with_timezone(&tz).date_naive();
    compute_utc_hour_bucket_on(today, local_start_time, time_zone_id)
}

/// UTC hour of `local_start_time` on a given local date.
pub fn compute_utc_hour_bucket_on(
    date: NaiveDate,
    local_start_time: &str,
    time_zone_id: &str,
) -> Result<u8> {
    let tz = resolve_zone(time_zone_id)?;
    let start = parse_start_time(local_start_time)?;
    let utc = local_to_utc(&tz, date.and_time(start)).ok_or_else(|| {
        ScrumError::InvalidStartTime(format!("{local_start_time} on {date} in {tz}"))
    })?;
    Ok(utc.hour() as u8)
}

/// Buckets a job due at `now_utc_hour` may be stored under: the hour itself
/// and the hour before (bucket computed while the offset was one hour larger).
pub fn candidate_buckets(now_utc_hour: u8) -> [u8; 2] {
    let h = now_utc_hour % 24;
    [h, (h + 23) % 24]
}

/// Buckets queried by one sweep at `now_utc_hour`.
///
/// Jobs due this hour or the next, stored under any bucket a one-hour
/// offset change may have left them in. A job starting on the hour is thus
/// armed by the sweep an hour ahead, not the one racing its start. Sorted,
/// no duplicates.
pub fn sweep_buckets(now_utc_hour: u8) -> Vec<u8> {
    let h = now_utc_hour % 24;
    let mut buckets: Vec<u8> = [h, (h + 1) % 24]
        .into_iter()
        .flat_map(|due| [(due + 23) % 24, due, (due + 1) % 24])
        .collect();
    buckets.sort_unstable();
    buckets.dedup();
    buckets
}

/// Recompute `job.utc_hour_bucket` from its start time and zone. Call
/// before every save that touches either field.
pub fn refresh_bucket(job: &mut JobConfig) -> Result<()> {
    job.utc_hour_bucket = compute_utc_hour_bucket(&job.local_start_time, &job.time_zone_id)?;
    job.updated_at = Utc::now();
    Ok(())
}
