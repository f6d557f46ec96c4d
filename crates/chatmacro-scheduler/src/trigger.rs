//! Cron trigger evaluation with time zone normalization.
//!
//! The cron engine works on naive, local-feeling timestamps, so a UTC
//! instant is shifted into the trigger's zone by that zone's *base* UTC
//! offset, evaluated, and shifted back by the same offset.
//!
//! Expressions: 5 fields (MIN HOUR DOM MON DOW), 6 fields (with leading
//! seconds) or 7 fields (with trailing year). Five-field expressions use the
//! usual crontab day-of-week numbering (0-7, 0 and 7 = Sunday); 6 and 7 field
//! expressions are handed to the `cron` crate unchanged (1-7, 1 = Sunday).

use std::collections::HashSet;
use std::str::FromStr;

use chatmacro_core::config::SchedulerTriggerConfig;
use chatmacro_core::error::{MacroError, Result};
use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz};
use cron::Schedule;

/// Parse a cron expression. Invalid syntax is a reported condition.
pub fn try_parse(expression: &str) -> Result<Schedule> {
    let invalid = |reason: String| MacroError::InvalidSchedule {
        expression: expression.to_string(),
        reason,
    };
    let fields: Vec<&str> = expression.split_whitespace().collect();
    let normalized = match fields.len() {
        5 => {
            let day_of_week = crontab_day_of_week(fields[4]).map_err(invalid)?;
            format!("0 {} {day_of_week}", fields[..4].join(" "))
        }
        6 | 7 => fields.join(" "),
        n => return Err(invalid(format!("expected 5, 6 or 7 fields, found {n}"))),
    };
    Schedule::from_str(&normalized).map_err(|e| invalid(e.to_string()))
}

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Rewrite a crontab day-of-week field (0-7, 0 and 7 = Sunday) as day names.
///
/// Numeric items, ranges and steps are expanded; named items pass through.
fn crontab_day_of_week(field: &str) -> std::result::Result<String, String> {
    if field == "*" || field == "?" {
        return Ok(field.to_string());
    }
    let mut days = Vec::new();
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(step)),
            None => (item, None),
        };
        let bounds = if base == "*" {
            Some((0, 6))
        } else {
            match base.split_once('-') {
                Some((from, to)) => from.parse::<usize>().ok().zip(to.parse::<usize>().ok()),
                None => base.parse::<usize>().ok().map(|d| (d, if step.is_some() { 6 } else { d })),
            }
        };
        let Some((from, to)) = bounds else {
            days.push(item.to_string());
            continue;
        };
        if from > 7 || to > 7 || from > to {
            return Err(format!("invalid day of week '{item}' (expected 0-7)"));
        }
        let step = match step {
            Some(s) => s
                .parse::<usize>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| format!("invalid step in day of week '{item}'"))?,
            None => 1,
        };
        days.extend((from..=to).step_by(step).map(|d| DAY_NAMES[d % 7].to_string()));
    }
    let mut seen = HashSet::new();
    days.retain(|d| seen.insert(d.clone()));
    Ok(days.join(","))
}

/// Time zone a trigger is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TriggerZone {
    Fixed(FixedOffset),
    Named(Tz),
}

impl TriggerZone {
    /// Accepts `UTC`, `UTC+2`, `GMT-03:00`, `+05:30`, `+0530` or an IANA name.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if let Some(offset) = parse_fixed_offset(trimmed) {
            return Ok(TriggerZone::Fixed(offset));
        }
        trimmed
            .parse::<Tz>()
            .map(TriggerZone::Named)
            .map_err(|_| MacroError::InvalidTimeZone(input.to_string()))
    }

    /// Standard-time offset of the zone at `at` (daylight saving ignored).
    pub fn base_offset(&self, at: DateTime<Utc>) -> Duration {
        match self {
            TriggerZone::Fixed(offset) => Duration::seconds(offset.local_minus_utc() as i64),
            TriggerZone::Named(tz) => tz.offset_from_utc_datetime(&at.naive_utc()).base_utc_offset(),
        }
    }
}

fn parse_fixed_offset(input: &str) -> Option<FixedOffset> {
    let upper = input.to_ascii_uppercase();
    let rest = upper
        .strip_prefix("UTC")
        .or_else(|| upper.strip_prefix("GMT"))
        .unwrap_or(&upper)
        .trim();
    if rest.is_empty() {
        // Bare "UTC"/"GMT"; an empty input is not a zone.
        return (!upper.is_empty()).then(|| Utc.fix());
    }

    let (sign, digits) = match rest.as_bytes()[0] {
        b'+' => (1, &rest[1..]),
        b'-' => (-1, &rest[1..]),
        _ => return None,
    };
    if !digits.is_ascii() {
        return None;
    }
    let (hours, minutes) = match digits.split_once(':') {
        Some((h, m)) => (h.parse::<i32>().ok()?, m.parse::<i32>().ok()?),
        None if digits.len() == 4 => (digits.get(..2)?.parse().ok()?, digits.get(2..)?.parse().ok()?),
        None => (digits.parse().ok()?, 0),
    };
    if !(0..=14).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// A compiled trigger: schedule + zone + outbound command.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    schedule: Schedule,
    zone: TriggerZone,
    expression: String,
    command: String,
}

impl CronTrigger {
    pub fn new(expression: &str, time_zone: &str, command: &str) -> Result<Self> {
        Ok(Self {
            schedule: try_parse(expression)?,
            zone: TriggerZone::parse(time_zone)?,
            expression: expression.to_string(),
            command: command.to_string(),
        })
    }

    pub fn compile(config: &SchedulerTriggerConfig) -> Result<Self> {
        Self::new(&config.time_expression, &config.time_zone, &config.command)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn zone(&self) -> TriggerZone {
        self.zone
    }

    /// First occurrence strictly after `from_utc`.
    pub fn next_occurrence(&self, from_utc: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let offset = self.zone.base_offset(from_utc);
        let shifted = from_utc + offset;
        self.schedule.after(&shifted).next().map(|local| local - offset)
    }

    /// Every occurrence in `[from_utc, to_utc)`.
    pub fn occurrences(&self, from_utc: DateTime<Utc>, to_utc: DateTime<Utc>) -> Vec<DateTime<Utc>> {
        if to_utc <= from_utc {
            return Vec::new();
        }
        let offset = self.zone.base_offset(from_utc);
        let start = from_utc + offset;
        let end = to_utc + offset;
        // `after` is exclusive; step back a second so `from_utc` itself can match.
        self.schedule
            .after(&(start - Duration::seconds(1)))
            .skip_while(|t| *t < start)
            .take_while(|t| *t < end)
            .map(|local| local - offset)
            .collect()
    }
}
