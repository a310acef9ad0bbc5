use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WindowError {
    #[error("Report window start {start} is not before end {end}")]
    Empty {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("Report window length must be positive, got {0} hours")]
    NonPositiveLength(i64),
    #[error("Report window of {0} hours is out of range")]
    OutOfRange(i64),
}

/// Closed-open `[start, end)` reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ReportWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if start >= end {
            return Err(WindowError::Empty { start, end });
        }
        Ok(Self { start, end })
    }

    /// The `hours` leading up to `end`.
    pub fn last_hours(end: DateTime<Utc>, hours: i64) -> Result<Self, WindowError> {
        if hours <= 0 {
            return Err(WindowError::NonPositiveLength(hours));
        }
        let length = Duration::try_hours(hours).ok_or(WindowError::OutOfRange(hours))?;
        let start = end
            .checked_sub_signed(length)
            .ok_or(WindowError::OutOfRange(hours))?;
        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    /// Human wording of the window length, e.g. "24 hours" or "90 minutes".
    pub fn describe_length(&self) -> String {
        let length = self.length();
        let plural = |n: i64, unit: &str| {
            if n == 1 {
                format!("{n} {unit}")
            } else {
                format!("{n} {unit}s")
            }
        };
        if length.num_seconds() % 60 != 0 {
            plural(length.num_seconds(), "second")
        } else if length.num_minutes() % 60 == 0 && length.num_hours() > 0 {
            plural(length.num_hours(), "hour")
        } else if length.num_minutes() > 0 {
            plural(length.num_minutes(), "minute")
        } else {
            plural(length.num_seconds(), "second")
        }
    }
}
