// Recurring task definitions (cron)

use super::error::{DomainError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Parsed cron expression.
///
/// Accepts classic 5-field expressions (`min hour dom mon dow`) as well as
/// the 6/7-field form with leading seconds and trailing year. A 5-field
/// expression fires at second zero and numbers days of the week 0-7 with
/// Sunday as 0 or 7. The 6/7-field form numbers them 1-7 with Sunday as 1.
#[derive(Debug, Clone)]
pub struct CronExpression {
    source: String,
    schedule: cron::Schedule,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let invalid = |reason: String| DomainError::InvalidSchedule {
            expression: expression.to_string(),
            reason,
        };
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        let normalized = match fields.len() {
            5 => {
                let day_of_week = classic_day_of_week(fields[4]).map_err(invalid)?;
                format!("0 {} {day_of_week}", fields[..4].join(" "))
            }
            6 | 7 => trimmed.to_string(),
            n => return Err(invalid(format!("expected 5, 6 or 7 fields, got {n}"))),
        };

        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            source: trimmed.to_string(),
            schedule,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First fire time strictly after `after_millis`, if any remain
    pub fn next_after(&self, after_millis: i64) -> Option<i64> {
        let after = DateTime::<Utc>::from_timestamp_millis(after_millis)?;
        self.schedule
            .after(&after)
            .next()
            .map(|at| at.timestamp_millis())
    }
}

/// Rewrites a classic day-of-week field (0-7 or SUN-SAT, Sunday = 0 or 7)
/// into an explicit list in cron crate numbering (1-7, Sunday = 1).
fn classic_day_of_week(field: &str) -> std::result::Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<usize>()
                    .ok()
                    .filter(|step| *step > 0)
                    .ok_or_else(|| format!("invalid day-of-week step '{step}'"))?;
                (range, Some(step))
            }
            None => (part, None),
        };
        let (start, end) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((start, end)) => (day_number(start)?, day_number(end)?),
            // `n/step` runs to the end of the week
            None if step.is_some() => (day_number(range)?, 6),
            None => {
                let day = day_number(range)?;
                (day, day)
            }
        };
        if start > end {
            return Err(format!("day-of-week range '{range}' runs backwards"));
        }
        for day in (start..=end).step_by(step.unwrap_or(1)) {
            days.insert(day % 7);
        }
    }

    Ok(days
        .iter()
        .map(|day| (day + 1).to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn day_number(token: &str) -> std::result::Result<u8, String> {
    if let Ok(day) = token.parse::<u8>() {
        return if day <= 7 {
            Ok(day)
        } else {
            Err(format!("day of week {day} out of range 0-7"))
        };
    }
    DAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
        .map(|day| day as u8)
        .ok_or_else(|| format!("invalid day of week '{token}'"))
}

/// Definition that periodically enqueues task instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringSchedule {
    pub id: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub expression: String,
    pub max_attempts: u32,
    pub next_run_at: i64,
    pub enabled: bool,
    pub last_enqueued_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl RecurringSchedule {
    /// Returns `None` when the expression never fires after `now_millis`
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        payload: serde_json::Value,
        expression: &CronExpression,
        max_attempts: u32,
        now_millis: i64,
    ) -> Option<Self> {
        let next_run_at = expression.next_after(now_millis)?;
        Some(Self {
            id: id.into(),
            name: name.into(),
            payload,
            expression: expression.as_str().to_string(),
            max_attempts,
            next_run_at,
            enabled: true,
            last_enqueued_at: None,
            created_at: now_millis,
            updated_at: now_millis,
        })
    }

    pub fn is_due(&self, now_millis: i64) -> bool {
        self.enabled && self.next_run_at <= now_millis
    }
}
