use std::str::FromStr;

use chrono::{TimeZone, Utc};
use serde::Serialize;

use agentmesh_core::{Error, Result};

const HOUR_MS: i64 = 3_600_000;
const DAY_MS: i64 = 24 * HOUR_MS;

/// A parsed agent schedule: one of the shortcut words or a full cron
/// expression (the `cron` crate's 6/7-field syntax with seconds).
pub enum ScheduleSpec {
    Hourly,
    Daily,
    Weekly,
    Expr(Box<cron::Schedule>),
}

impl ScheduleSpec {
    pub fn parse(schedule: &str) -> Result<Self> {
        match schedule {
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            expr => cron::Schedule::from_str(expr)
                .map(|s| Self::Expr(Box::new(s)))
                .map_err(|e| Error::Validation(format!("bad cron schedule '{}': {}", expr, e))),
        }
    }

    /// The next firing time, strictly after `now_ms`. `None` means the
    /// schedule will never fire again.
    pub fn next_run_after(&self, now_ms: i64, timezone: Option<&str>) -> Option<i64> {
        match self {
            Self::Hourly => Some(now_ms + HOUR_MS),
            Self::Daily => Some(now_ms + DAY_MS),
            Self::Weekly => Some(now_ms + 7 * DAY_MS),
            Self::Expr(schedule) => match timezone.and_then(|tz| tz.parse::<chrono_tz::Tz>().ok()) {
                Some(tz) => {
                    let now = tz.timestamp_millis_opt(now_ms).single()?;
                    schedule.after(&now).next().map(|t| t.timestamp_millis())
                }
                None => {
                    let now = Utc.timestamp_millis_opt(now_ms).single()?;
                    schedule.after(&now).next().map(|t| t.timestamp_millis())
                }
            },
        }
    }
}

/// Scheduler-owned view of one agent's cron trigger.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub agent_id: String,
    pub schedule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Invariant: strictly in the future relative to when it was computed.
    pub next_run_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_ms: Option<i64>,
    pub enabled: bool,
}
