//! Relative lookback windows used to decide which videos are eligible for
//! ranking.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScoringError;

/// Named trailing window ending at the evaluation instant.
///
/// Windows are fixed durations rather than calendar periods, so `Today`
/// means "the last 24 hours" regardless of the wall-clock date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeWindow {
    Hour,
    #[default]
    Today,
    Week,
    Month,
    Year,
}

impl TimeWindow {
    pub const ALL: [TimeWindow; 5] = [
        TimeWindow::Hour,
        TimeWindow::Today,
        TimeWindow::Week,
        TimeWindow::Month,
        TimeWindow::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    pub fn lookback(&self) -> Duration {
        match self {
            Self::Hour => Duration::hours(1),
            Self::Today => Duration::days(1),
            Self::Week => Duration::days(7),
            Self::Month => Duration::days(30),
            Self::Year => Duration::days(365),
        }
    }

    /// Oldest publish instant that still falls inside the window.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.lookback()
    }

    /// Inclusive on both ends: `now - lookback <= published_at <= now`.
    pub fn contains(&self, published_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        published_at >= self.start(now) && published_at <= now
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeWindow {
    type Err = ScoringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" => Ok(Self::Hour),
            "today" => Ok(Self::Today),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            _ => Err(ScoringError::InvalidFilter(s.to_string())),
        }
    }
}
