//! Cron expression parsing and next-fire computation.

use std::str::FromStr;

use {
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
    cron::Schedule,
};

use crate::{Error, Result};

/// A parsed five-field (minute-granularity) cron expression.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expr: String,
    schedule: Schedule,
    tz: Option<Tz>,
}

impl CronTrigger {
    /// Parse `min hour dom month dow`.
    ///
    /// The `cron` crate wants seconds and year as well, so the expression is
    /// padded to `0 {expr} *` before parsing.
    pub fn parse(expr: &str, tz: Option<Tz>) -> Result<Self> {
        let fields = expr.split_whitespace().count();
        if fields != 5 {
            return Err(Error::message(format!(
                "cron expression '{expr}' must have 5 fields, found {fields}"
            )));
        }
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let padded = format!(
            "0 {} {} {} {} {} *",
            parts[0],
            parts[1],
            parts[2],
            parts[3],
            normalize_day_of_week(parts[4])
        );
        let schedule = Schedule::from_str(&padded)?;
        Ok(Self {
            expr: expr.trim().to_string(),
            schedule,
            tz,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// Next fire time strictly after `now_ms`, in epoch millis.
    pub fn next_after(&self, now_ms: u64) -> Option<u64> {
        let now = DateTime::<Utc>::from_timestamp_millis(now_ms as i64)?;
        let next = match self.tz {
            Some(tz) => self
                .schedule
                .after(&now.with_timezone(&tz))
                .next()
                .map(|dt| dt.timestamp_millis()),
            None => self
                .schedule
                .after(&now)
                .next()
                .map(|dt| dt.timestamp_millis()),
        }?;
        u64::try_from(next).ok()
    }
}

const DAY_NAMES: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Rewrite numeric day-of-week items (`0`-`7`, Sunday is `0` or `7`) as an
/// explicit list of names, since the `cron` crate numbers Sunday as `1` and
/// does not wrap ranges. Named and unrecognised items pass through as-is.
fn normalize_day_of_week(field: &str) -> String {
    let mut names: Vec<String> = Vec::new();
    for item in field.split(',') {
        let tokens = match expand_numeric_days(item) {
            Some(days) => days
                .into_iter()
                .filter_map(|d| DAY_NAMES.get(d))
                .map(|name| (*name).to_string())
                .collect(),
            None => vec![item.to_string()],
        };
        for token in tokens {
            if !names.contains(&token) {
                names.push(token);
            }
        }
    }
    names.join(",")
}

/// Day numbers covered by a numeric item such as `3`, `1-5`, `*/2` or
/// `1-7/2`. `None` for anything else.
fn expand_numeric_days(item: &str) -> Option<Vec<usize>> {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, Some(step.parse::<usize>().ok().filter(|s| *s > 0)?)),
        None => (item, None),
    };
    let day = |token: &str| token.parse::<usize>().ok().filter(|n| *n <= 7);
    let (start, end) = match (base, base.split_once('-')) {
        // A bare `*` is already understood by the `cron` crate.
        ("*", _) if step.is_some() => (0, 6),
        (_, Some((start, end))) => (day(start)?, day(end)?),
        (_, None) => {
            let start = day(base)?;
            // `n/step` runs to the end of the week.
            (start, if step.is_some() { start.max(6) } else { start })
        },
    };
    if start > end {
        return None;
    }
    Some((start..=end).step_by(step.unwrap_or(1)).collect())
}

/// Resolve an optional IANA timezone name.
pub fn parse_timezone(name: Option<&str>) -> Result<Option<Tz>> {
    match name {
        None => Ok(None),
        Some(name) if name.eq_ignore_ascii_case("utc") => Ok(None),
        Some(name) => name
            .parse::<Tz>()
            .map(Some)
            .map_err(|_| Error::unknown_timezone(name)),
    }
}
