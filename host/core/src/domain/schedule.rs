// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cron Expressions
//!
//! Policy documents carry classic five-field crontab expressions
//! (`minute hour day month weekday`). The `cron` crate expects a leading
//! seconds field, so five-field input is normalised by prepending `0`.
//! Six and seven field expressions are passed through untouched.
//!
//! Fire times are evaluated in the process-local timezone.

use chrono::{DateTime, Local, Utc};
use cron::Schedule;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid cron expression '{expression}': {reason}")]
pub struct CronError {
    pub expression: String,
    pub reason: String,
}

/// A parsed cron expression, remembered together with its source text.
#[derive(Clone)]
pub struct CronExpression {
    source: String,
    schedule: Schedule,
}

impl CronExpression {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let trimmed = expression.trim();
        let normalized = match trimmed.split_whitespace().count() {
            5 => format!("0 {}", trimmed),
            _ => trimmed.to_string(),
        };

        let schedule = Schedule::from_str(&normalized).map_err(|e| CronError {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            source: trimmed.to_string(),
            schedule,
        })
    }

    /// Expression as written in the policy document
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First fire strictly after `after`, if the expression ever fires again
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&Local))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Spacing between the next two fires after `after`.
    ///
    /// Irregular expressions (e.g. "at 9 and 17") report the gap that is
    /// coming up next, not a global minimum.
    pub fn period_after(&self, after: DateTime<Utc>) -> Option<Duration> {
        let mut upcoming = self.schedule.after(&after.with_timezone(&Local));
        let first = upcoming.next()?;
        let second = upcoming.next()?;
        (second - first).to_std().ok()
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CronExpression {}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronExpression").field(&self.source).finish()
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
