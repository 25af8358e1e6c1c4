//! Schedule expressions
//!
//! Accepted forms:
//! - `@every <duration>` with units `ms`, `s`, `m`, `h`, e.g. `@every 1m30s`
//! - descriptors such as `@hourly` or `@daily`
//! - standard 5-field cron (minute granularity, Sunday as 0 or 7)
//! - 6 or 7-field cron with seconds and optional year

use chrono::{DateTime, Utc};
use std::str::FromStr;
use std::time::Duration;

use crate::error::JobManagerError;

#[derive(Debug, Clone)]
pub enum CronSpec {
    Every(Duration),
    Cron(Box<cron::Schedule>),
}

impl CronSpec {
    pub fn parse(spec: &str) -> Result<Self, JobManagerError> {
        let trimmed = spec.trim();
        let invalid = |reason: String| JobManagerError::InvalidSchedule {
            spec: spec.to_string(),
            reason,
        };

        if let Some(every) = trimmed.strip_prefix("@every") {
            return parse_every(every).map(CronSpec::Every).map_err(invalid);
        }

        let expression = if trimmed.starts_with('@') {
            trimmed.to_string()
        } else {
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            match fields.as_slice() {
                [minute, hour, day, month, day_of_week] => {
                    let day_of_week = translate_weekdays(day_of_week).map_err(invalid)?;
                    format!("0 {} {} {} {} {}", minute, hour, day, month, day_of_week)
                }
                fields if fields.len() == 6 || fields.len() == 7 => trimmed.to_string(),
                fields => {
                    return Err(invalid(format!(
                        "expected 5 to 7 fields, got {}",
                        fields.len()
                    )));
                }
            }
        };

        cron::Schedule::from_str(&expression)
            .map(|schedule| CronSpec::Cron(Box::new(schedule)))
            .map_err(|e| invalid(e.to_string()))
    }

    /// First fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            CronSpec::Every(interval) => {
                let step = chrono::Duration::from_std(*interval).ok()?;
                after.checked_add_signed(step)
            }
            CronSpec::Cron(schedule) => schedule.after(&after).next(),
        }
    }
}

impl FromStr for CronSpec {
    type Err = JobManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronSpec::parse(s)
    }
}

/// Rewrites a standard day-of-week field (0-7, Sunday as 0 or 7) into the
/// 1-7 numbering of `cron::Schedule`, where Sunday is 1
///
/// Numeric items are expanded to explicit days; named items pass through.
fn translate_weekdays(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }

    let mut days: Vec<String> = Vec::new();
    for item in field.split(',') {
        if item.chars().any(|c| c.is_ascii_alphabetic()) {
            days.push(item.to_string());
            continue;
        }

        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: usize = step
                    .parse()
                    .map_err(|_| format!("bad step in weekday '{}'", item))?;
                (range, step)
            }
            None => (item, 1),
        };
        if step == 0 {
            return Err(format!("zero step in weekday '{}'", item));
        }

        let (start, end) = match (range, range.split_once('-')) {
            ("*", _) => (0, 6),
            (_, Some((start, end))) => (weekday(start)?, weekday(end)?),
            // `n/step` runs from n to the end of the week
            (single, None) if item.contains('/') => (weekday(single)?, 6),
            (single, None) => {
                let day = weekday(single)?;
                (day, day)
            }
        };
        if start > end {
            return Err(format!("descending weekday range '{}'", item));
        }

        for day in (start..=end).step_by(step) {
            let day = (day % 7 + 1).to_string();
            if !days.contains(&day) {
                days.push(day);
            }
        }
    }

    Ok(days.join(","))
}

fn weekday(raw: &str) -> Result<u32, String> {
    match raw.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("weekday '{}' is not in 0-7", raw)),
    }
}

fn parse_every(raw: &str) -> Result<Duration, String> {
    let mut rest = raw.trim();
    if rest.is_empty() {
        return Err("missing interval".to_string());
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return Err(format!("expected a number at '{}'", rest));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|e| format!("bad number '{}': {}", &rest[..digits], e))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        total += match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            "" => return Err(format!("missing unit after {}", value)),
            other => return Err(format!("unknown unit '{}'", other)),
        };
    }

    if total.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(total)
}
