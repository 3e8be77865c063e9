//! Evaluation windows and metric query filters

use crate::error::{Result, WatchdogError};
use chrono::{DateTime, Duration, Timelike, Utc};
use std::fmt;

/// Metric sampled for consumption
pub const MAX_RU_PER_SECOND_METRIC: &str = "Max RUs Per Second";

/// Minute granularity, ISO 8601 duration
pub const MINUTE_GRAIN: &str = "PT1M";

/// Number of trailing windows sampled per collection
pub const WINDOW_COUNT: i64 = 3;

/// Length of one window in minutes
pub const WINDOW_MINUTES: i64 = 5;

/// How far behind "now" the newest window ends, so the metric
/// pipeline has materialized every sample in it
pub const INGESTION_LAG_MINUTES: i64 = 10;

/// A closed time range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The trailing windows for one evaluation, newest first
///
/// Window `i` (1-based) spans `[now - 10 - 5i, now - 10 - 5(i-1)]` minutes.
pub fn evaluation_windows(now: DateTime<Utc>) -> Vec<TimeWindow> {
    let lagged = now - Duration::minutes(INGESTION_LAG_MINUTES);
    (1..=WINDOW_COUNT)
        .map(|i| TimeWindow {
            start: lagged - Duration::minutes(WINDOW_MINUTES * i),
            end: lagged - Duration::minutes(WINDOW_MINUTES * (i - 1)),
        })
        .collect()
}

/// Structured metric query; renders to the provider's filter expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricFilter {
    pub metric_name: String,
    pub time_grain: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MetricFilter {
    pub fn new(
        metric_name: impl Into<String>,
        time_grain: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Self> {
        let metric_name = metric_name.into();
        let time_grain = time_grain.into();

        if metric_name.trim().is_empty() {
            return Err(WatchdogError::InvalidInput("metric name is blank".into()));
        }
        if time_grain.trim().is_empty() {
            return Err(WatchdogError::InvalidInput("time grain is blank".into()));
        }

        Ok(Self {
            metric_name,
            time_grain,
            start,
            end,
        })
    }

    /// Max RU/s per minute over one window
    pub fn max_ru_per_second(window: &TimeWindow) -> Result<Self> {
        Self::new(
            MAX_RU_PER_SECOND_METRIC,
            MINUTE_GRAIN,
            window.start,
            window.end,
        )
    }

    /// Whether a sample timestamp falls in the query range
    ///
    /// Start inclusive, end exclusive, so adjacent windows never return the
    /// same minute twice.
    pub fn covers(&self, timestamp: DateTime<Utc>) -> bool {
        let start = truncate_to_minute(self.start);
        let end = truncate_to_minute(self.end);
        timestamp >= start && timestamp < end
    }

    pub fn to_expression(&self) -> String {
        format!(
            "name.value eq '{}' and timeGrain eq duration'{}' and startTime eq {} and endTime eq {}",
            self.metric_name,
            self.time_grain,
            format_minute(self.start),
            format_minute(self.end),
        )
    }
}

impl fmt::Display for MetricFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_expression())
    }
}

fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(ts)
}

/// `yyyy-MM-ddTHH:mm:00.000Z`
fn format_minute(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:00.000Z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_three_non_overlapping_windows() {
        let windows = evaluation_windows(at(12, 30, 0));
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0], TimeWindow { start: at(12, 15, 0), end: at(12, 20, 0) });
        assert_eq!(windows[1], TimeWindow { start: at(12, 10, 0), end: at(12, 15, 0) });
        assert_eq!(windows[2], TimeWindow { start: at(12, 5, 0), end: at(12, 10, 0) });
    }

    #[test]
    fn test_filter_expression() {
        let filter = MetricFilter::new(MAX_RU_PER_SECOND_METRIC, MINUTE_GRAIN, at(12, 5, 42), at(12, 10, 42))
            .unwrap();
        assert_eq!(
            filter.to_expression(),
            "name.value eq 'Max RUs Per Second' and timeGrain eq duration'PT1M' \
             and startTime eq 2024-03-01T12:05:00.000Z and endTime eq 2024-03-01T12:10:00.000Z"
        );
    }

    #[test]
    fn test_blank_inputs_rejected() {
        assert!(matches!(
            MetricFilter::new(" ", MINUTE_GRAIN, at(1, 0, 0), at(1, 5, 0)),
            Err(WatchdogError::InvalidInput(_))
        ));
        assert!(matches!(
            MetricFilter::new(MAX_RU_PER_SECOND_METRIC, "", at(1, 0, 0), at(1, 5, 0)),
            Err(WatchdogError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_covers_is_half_open() {
        let filter = MetricFilter::new("m", "PT1M", at(1, 0, 30), at(1, 5, 30)).unwrap();
        assert!(filter.covers(at(1, 0, 0)));
        assert!(filter.covers(at(1, 4, 0)));
        assert!(!filter.covers(at(1, 5, 0)));
        assert!(!filter.covers(at(0, 59, 0)));
    }
}
