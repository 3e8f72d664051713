//! Interfaces to the collaborators that supply records.
//!
//! The engine never talks to a backend directly. It drains pages from a
//! [`TelemetrySource`] and fetches whole traces through a [`TraceFetcher`];
//! pagination, transport and retries live behind these traits.

use crate::filter::AttributeFilter;
use anyhow::Result;
use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::{logs::v1::ResourceLogs, trace::v1::ResourceSpans};

/// Inclusive time window; open ends are unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    /// Whether a Unix-epoch nanosecond timestamp falls inside the window.
    pub fn contains_nanos(&self, unix_nano: u64) -> bool {
        let ts = DateTime::<Utc>::from_timestamp_nanos(unix_nano as i64);
        self.from.map_or(true, |from| ts >= from) && self.to.map_or(true, |to| ts <= to)
    }
}

/// A log or span query.
#[derive(Debug, Clone, Default)]
pub struct RecordQuery {
    pub filters: Option<Vec<AttributeFilter>>,
    pub time_range: TimeRange,
    /// Maximum number of records the caller will consume; 0 means no limit.
    pub limit: usize,
}

/// Successive pages of resource-scoped records, ending on the first error.
pub type Pages<'a, T> = Box<dyn Iterator<Item = Result<Vec<T>>> + 'a>;

/// Source of span and log pages.
pub trait TelemetrySource {
    fn query_spans(&self, query: &RecordQuery) -> Result<Pages<'_, ResourceSpans>>;
    fn query_logs(&self, query: &RecordQuery) -> Result<Pages<'_, ResourceLogs>>;
}

/// Fetches every span of one trace.
pub trait TraceFetcher {
    fn fetch_trace(&mut self, trace_id: &str, time_range: &TimeRange) -> Result<Vec<ResourceSpans>>;
}
