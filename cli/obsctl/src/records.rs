//! Denormalized views of OTLP spans and log records.
//!
//! OTLP nests records under resource and scope envelopes. The engine works on
//! flat projections instead: one [`FlatSpan`] or [`FlatLog`] per record, with
//! resource, scope and record attributes merged (record level wins).

use crate::attributes::{find_attribute, merge_attributes, AttrValue, Attribute};
use chrono::{TimeZone, Utc};
use opentelemetry_proto::tonic::{
    common::v1::KeyValue,
    logs::v1::{LogRecord, ResourceLogs},
    trace::v1::{span::Link, ResourceSpans, Span},
};
use std::collections::HashMap;

/// Canonical keys of the structural fields.
pub mod keys {
    pub const LOG_TIME: &str = "otel.log.time";
    pub const LOG_SEVERITY: &str = "otel.log.severity.range";
    pub const LOG_BODY: &str = "otel.log.body";
    pub const SERVICE_NAME: &str = "service.name";
    pub const TRACE_ID: &str = "otel.trace.id";
    pub const SPAN_ID: &str = "otel.span.id";
    pub const PARENT_ID: &str = "otel.parent.id";
    pub const SCOPE_NAME: &str = "otel.scope.name";
    pub const SPAN_START_TIME: &str = "otel.span.start_time";
    pub const SPAN_DURATION: &str = "otel.span.duration";
    pub const SPAN_NAME: &str = "otel.span.name";
    pub const SPAN_KIND: &str = "otel.span.kind";
    pub const SPAN_STATUS: &str = "otel.span.status.code";
    pub const SPAN_LINKS: &str = "otel.span.links";
}

/// Span attribute the backend fills with links pointing *at* this span from
/// other traces. An array of key/value lists holding `trace_id` and `span_id`.
pub const FORWARD_LINKS_ATTRIBUTE: &str = "otel.span.forward_links";

/// Per-record structural values keyed by canonical column key.
pub type RowValues = HashMap<String, String>;

/// A reference to another span, possibly in another trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanLinkRef {
    pub trace_id: String,
    pub span_id: String,
}

impl From<&Link> for SpanLinkRef {
    fn from(link: &Link) -> Self {
        SpanLinkRef {
            trace_id: hex::encode(&link.trace_id),
            span_id: hex::encode(&link.span_id),
        }
    }
}

/// A span flattened out of its resource/scope envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatSpan {
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    pub trace_id: String,
    pub span_id: String,
    /// Empty when the span has no parent.
    pub parent_span_id: String,
    pub name: String,
    pub kind: i32,
    pub status_code: i32,
    pub status_message: String,
    pub scope_name: String,
    pub scope_version: String,
    pub links: Vec<SpanLinkRef>,
    pub forward_links: Vec<SpanLinkRef>,
    pub attributes: Vec<Attribute>,
}

impl FlatSpan {
    pub fn duration_ns(&self) -> u64 {
        self.end_time_unix_nano
            .saturating_sub(self.start_time_unix_nano)
    }

    pub fn parent_id(&self) -> Option<&str> {
        if self.parent_span_id.is_empty() {
            None
        } else {
            Some(&self.parent_span_id)
        }
    }

    pub fn service_name(&self) -> String {
        service_name_of(&self.attributes)
    }

    pub fn is_error(&self) -> bool {
        self.status_code == 2
    }

    /// Structural fields as display strings.
    pub fn predefined_values(&self) -> RowValues {
        let mut values = RowValues::new();
        values.insert(
            keys::SPAN_START_TIME.to_string(),
            format_timestamp(self.start_time_unix_nano),
        );
        values.insert(
            keys::SPAN_DURATION.to_string(),
            format_duration(self.duration_ns()),
        );
        values.insert(keys::TRACE_ID.to_string(), self.trace_id.clone());
        values.insert(keys::SPAN_ID.to_string(), self.span_id.clone());
        values.insert(keys::PARENT_ID.to_string(), self.parent_span_id.clone());
        values.insert(keys::SPAN_NAME.to_string(), self.name.clone());
        values.insert(keys::SPAN_KIND.to_string(), format_span_kind(self.kind).to_string());
        values.insert(
            keys::SPAN_STATUS.to_string(),
            format_status_code(self.status_code).to_string(),
        );
        values.insert(keys::SERVICE_NAME.to_string(), self.service_name());
        values.insert(keys::SCOPE_NAME.to_string(), self.scope_name.clone());
        values.insert(
            keys::SPAN_LINKS.to_string(),
            (self.links.len() + self.forward_links.len()).to_string(),
        );
        values
    }

    /// Field lookup for local filter evaluation; `None` when absent.
    pub fn field(&self, key: &str) -> Option<String> {
        match key {
            keys::SPAN_NAME => Some(self.name.clone()),
            keys::TRACE_ID => Some(self.trace_id.clone()),
            keys::SPAN_ID => Some(self.span_id.clone()),
            keys::PARENT_ID => self.parent_id().map(str::to_string),
            keys::SPAN_KIND => Some(format_span_kind(self.kind).to_string()),
            keys::SPAN_STATUS => Some(format_status_code(self.status_code).to_string()),
            keys::SPAN_START_TIME => Some(self.start_time_unix_nano.to_string()),
            keys::SPAN_DURATION => Some(self.duration_ns().to_string()),
            keys::SCOPE_NAME => Some(self.scope_name.clone()),
            _ => find_attribute(&self.attributes, key).map(AttrValue::to_display_string),
        }
    }
}

/// A log record flattened out of its resource/scope envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatLog {
    pub time_unix_nano: u64,
    pub severity_number: i32,
    pub severity_text: String,
    pub body: AttrValue,
    pub trace_id: String,
    pub span_id: String,
    pub scope_name: String,
    pub attributes: Vec<Attribute>,
}

impl FlatLog {
    pub fn service_name(&self) -> String {
        service_name_of(&self.attributes)
    }

    pub fn severity_range(&self) -> String {
        severity_range(self.severity_number, &self.severity_text)
    }

    pub fn predefined_values(&self) -> RowValues {
        let mut values = RowValues::new();
        values.insert(keys::LOG_TIME.to_string(), format_timestamp(self.time_unix_nano));
        values.insert(keys::LOG_SEVERITY.to_string(), self.severity_range());
        values.insert(keys::LOG_BODY.to_string(), self.body.to_display_string());
        values.insert(keys::SERVICE_NAME.to_string(), self.service_name());
        values.insert(keys::TRACE_ID.to_string(), self.trace_id.clone());
        values.insert(keys::SPAN_ID.to_string(), self.span_id.clone());
        values.insert(keys::SCOPE_NAME.to_string(), self.scope_name.clone());
        values
    }

    pub fn field(&self, key: &str) -> Option<String> {
        match key {
            keys::LOG_TIME => Some(self.time_unix_nano.to_string()),
            keys::LOG_SEVERITY => Some(self.severity_range()),
            keys::LOG_BODY => Some(self.body.to_display_string()),
            keys::TRACE_ID => Some(self.trace_id.clone()),
            keys::SPAN_ID => Some(self.span_id.clone()),
            keys::SCOPE_NAME => Some(self.scope_name.clone()),
            _ => find_attribute(&self.attributes, key).map(AttrValue::to_display_string),
        }
    }
}

/// Flattens every span of every resource/scope envelope, in input order.
pub fn flatten_resource_spans(resource_spans: &[ResourceSpans]) -> Vec<FlatSpan> {
    let mut flat = Vec::new();
    for resource_span in resource_spans {
        let resource_attrs = resource_span
            .resource
            .as_ref()
            .map_or(&[][..], |r| &r.attributes[..]);
        for scope_span in &resource_span.scope_spans {
            let (scope_name, scope_version, scope_attrs) = match &scope_span.scope {
                Some(scope) => (
                    scope.name.clone(),
                    scope.version.clone(),
                    &scope.attributes[..],
                ),
                None => (String::new(), String::new(), &[][..]),
            };
            for span in &scope_span.spans {
                flat.push(flatten_span(
                    span,
                    &scope_name,
                    &scope_version,
                    scope_attrs,
                    resource_attrs,
                ));
            }
        }
    }
    flat
}

pub(crate) fn flatten_span(
    span: &Span,
    scope_name: &str,
    scope_version: &str,
    scope_attrs: &[KeyValue],
    resource_attrs: &[KeyValue],
) -> FlatSpan {
    let attributes = merge_attributes(&[&span.attributes, scope_attrs, resource_attrs]);
    let forward_links = find_attribute(&attributes, FORWARD_LINKS_ATTRIBUTE)
        .map(parse_forward_links)
        .unwrap_or_default();
    let (status_code, status_message) = span
        .status
        .as_ref()
        .map_or((0, String::new()), |s| (s.code, s.message.clone()));

    FlatSpan {
        start_time_unix_nano: span.start_time_unix_nano,
        end_time_unix_nano: span.end_time_unix_nano,
        trace_id: hex::encode(&span.trace_id),
        span_id: hex::encode(&span.span_id),
        parent_span_id: hex::encode(&span.parent_span_id),
        name: span.name.clone(),
        kind: span.kind,
        status_code,
        status_message,
        scope_name: scope_name.to_string(),
        scope_version: scope_version.to_string(),
        links: span.links.iter().map(SpanLinkRef::from).collect(),
        forward_links,
        attributes,
    }
}

fn parse_forward_links(value: &AttrValue) -> Vec<SpanLinkRef> {
    let AttrValue::Array(entries) = value else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            AttrValue::KvList(fields) => {
                let trace_id = find_attribute(fields, "trace_id")?.to_display_string();
                let span_id = find_attribute(fields, "span_id")
                    .map(AttrValue::to_display_string)
                    .unwrap_or_default();
                Some(SpanLinkRef { trace_id, span_id })
            }
            _ => None,
        })
        .collect()
}

/// Flattens every log record of every resource/scope envelope, in input order.
pub fn flatten_resource_logs(resource_logs: &[ResourceLogs]) -> Vec<FlatLog> {
    let mut flat = Vec::new();
    for resource_log in resource_logs {
        let resource_attrs = resource_log
            .resource
            .as_ref()
            .map_or(&[][..], |r| &r.attributes[..]);
        for scope_log in &resource_log.scope_logs {
            let (scope_name, scope_attrs) = match &scope_log.scope {
                Some(scope) => (scope.name.clone(), &scope.attributes[..]),
                None => (String::new(), &[][..]),
            };
            for record in &scope_log.log_records {
                flat.push(flatten_log(record, &scope_name, scope_attrs, resource_attrs));
            }
        }
    }
    flat
}

pub(crate) fn flatten_log(
    record: &LogRecord,
    scope_name: &str,
    scope_attrs: &[KeyValue],
    resource_attrs: &[KeyValue],
) -> FlatLog {
    let time_unix_nano = if record.time_unix_nano != 0 {
        record.time_unix_nano
    } else {
        record.observed_time_unix_nano
    };
    FlatLog {
        time_unix_nano,
        severity_number: record.severity_number,
        severity_text: record.severity_text.clone(),
        body: AttrValue::from(record.body.as_ref()),
        trace_id: hex::encode(&record.trace_id),
        span_id: hex::encode(&record.span_id),
        scope_name: scope_name.to_string(),
        attributes: merge_attributes(&[&record.attributes, scope_attrs, resource_attrs]),
    }
}

fn service_name_of(attrs: &[Attribute]) -> String {
    find_attribute(attrs, keys::SERVICE_NAME)
        .and_then(AttrValue::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "<unknown>".to_string())
}

pub fn format_timestamp(unix_nano: u64) -> String {
    if unix_nano == 0 {
        return String::new();
    }
    Utc.timestamp_nanos(unix_nano as i64)
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}

pub fn format_duration(duration_ns: u64) -> String {
    let ms = duration_ns as f64 / 1_000_000.0;
    if ms >= 1000.0 {
        format!("{:.2}s", ms / 1000.0)
    } else {
        format!("{:.2}ms", ms)
    }
}

pub fn format_span_kind(kind: i32) -> &'static str {
    match kind {
        1 => "INTERNAL",
        2 => "SERVER",
        3 => "CLIENT",
        4 => "PRODUCER",
        5 => "CONSUMER",
        _ => "UNSPECIFIED",
    }
}

pub fn format_status_code(code: i32) -> &'static str {
    match code {
        1 => "OK",
        2 => "ERROR",
        _ => "UNSET",
    }
}

/// Maps an OTLP severity number onto its range name.
pub fn severity_range(severity_number: i32, severity_text: &str) -> String {
    let range = match severity_number {
        1..=4 => "TRACE",
        5..=8 => "DEBUG",
        9..=12 => "INFO",
        13..=16 => "WARN",
        17..=20 => "ERROR",
        21..=24 => "FATAL",
        _ if !severity_text.is_empty() => return severity_text.to_uppercase(),
        _ => "UNKNOWN",
    };
    range.to_string()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::FlatSpan;

    /// A minimal span for tree and link tests.
    pub fn flat_span(trace_id: &str, span_id: &str, parent: &str) -> FlatSpan {
        FlatSpan {
            start_time_unix_nano: 0,
            end_time_unix_nano: 0,
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            parent_span_id: parent.to_string(),
            name: span_id.to_string(),
            kind: 0,
            status_code: 0,
            status_message: String::new(),
            scope_name: String::new(),
            scope_version: String::new(),
            links: Vec::new(),
            forward_links: Vec::new(),
            attributes: Vec::new(),
        }
    }
}
