//! Execution metrics reported by the metrics aggregator.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::TimeRangeError;

/// Look-back window for metrics queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "6h")]
    SixHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "7d")]
    SevenDays,
    #[serde(rename = "30d")]
    ThirtyDays,
}

impl TimeRange {
    pub fn duration(&self) -> Duration {
        match self {
            TimeRange::OneHour => Duration::hours(1),
            TimeRange::SixHours => Duration::hours(6),
            TimeRange::TwelveHours => Duration::hours(12),
            TimeRange::SevenDays => Duration::days(7),
            TimeRange::ThirtyDays => Duration::days(30),
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TimeRange::OneHour => "1h",
            TimeRange::SixHours => "6h",
            TimeRange::TwelveHours => "12h",
            TimeRange::SevenDays => "7d",
            TimeRange::ThirtyDays => "30d",
        };
        f.write_str(s)
    }
}

impl FromStr for TimeRange {
    type Err = TimeRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1h" => Ok(TimeRange::OneHour),
            "6h" => Ok(TimeRange::SixHours),
            "12h" => Ok(TimeRange::TwelveHours),
            "7d" => Ok(TimeRange::SevenDays),
            "30d" => Ok(TimeRange::ThirtyDays),
            other => Err(TimeRangeError::Unknown(other.to_string())),
        }
    }
}

/// Aggregate statistics over the executions of one template.
///
/// Rates are percentages (0-100). Averages cover completed executions only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_executions: u64,
    pub completed_executions: u64,
    pub failed_executions: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub average_duration_ms: f64,
    pub average_cost: f64,
    pub average_tokens: f64,
    pub cache_hit_rate: f64,
    pub top_errors: Vec<ErrorFrequency>,
    pub step_performance: Vec<StepPerformance>,
    pub daily_trends: Vec<DailyTrend>,
}

/// How often an error message occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrequency {
    pub message: String,
    pub count: u64,
}

/// Per-step-name performance across executions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepPerformance {
    pub step_name: String,
    pub executions: u64,
    pub average_duration_ms: f64,
    pub success_rate: f64,
    pub average_cost: f64,
}

/// One calendar-day bucket keyed by execution start date (UTC).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyTrend {
    pub date: NaiveDate,
    pub executions: u64,
    pub average_duration_ms: f64,
    pub average_cost: f64,
    pub success_rate: f64,
}
