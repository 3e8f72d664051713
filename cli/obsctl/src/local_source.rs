//! Reads OTLP exports from a local data directory.
//!
//! Layout: `<data-dir>/traces` holds span exports, `<data-dir>/logs` holds log
//! exports. Each file is one page, read lazily in file-name order. Supported
//! files:
//! - `.json`: an OTLP/JSON export request.
//! - `.pb` / `.binpb`: an OTLP protobuf export request.
//! - `.gz`: either of the above, gzip-compressed (`traces.json.gz`).
//! - `.jsonl` / `.ndjson`: one record per line, either an OTLP/JSON request or
//!   an `otlp-stdout` envelope carrying a (base64, possibly gzipped) payload.
//!
//! Filters and the time range are applied here, so envelopes left without
//! records are dropped from the page.

use crate::filter::CompiledFilter;
use crate::records::{flatten_log, flatten_span};
use crate::source::{Pages, RecordQuery, TelemetrySource, TimeRange, TraceFetcher};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine};
use flate2::read::GzDecoder;
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use prost::Message;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};

pub const TRACES_DIR: &str = "traces";
pub const LOGS_DIR: &str = "logs";

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";
const ENCODING_GZIP: &str = "gzip";

/// An OTLP export request carrying one signal's resource envelopes.
trait ExportRequest: Message + Default + DeserializeOwned {
    type Resource;
    fn into_resources(self) -> Vec<Self::Resource>;
}

impl ExportRequest for ExportTraceServiceRequest {
    type Resource = ResourceSpans;
    fn into_resources(self) -> Vec<ResourceSpans> {
        self.resource_spans
    }
}

impl ExportRequest for ExportLogsServiceRequest {
    type Resource = ResourceLogs;
    fn into_resources(self) -> Vec<ResourceLogs> {
        self.resource_logs
    }
}

/// One line of an `otlp-stdout` capture.
#[derive(Debug, Deserialize)]
struct StdoutEnvelope {
    #[serde(default)]
    source: Option<String>,
    payload: serde_json::Value,
    #[serde(rename = "content-type", default)]
    content_type: Option<String>,
    #[serde(rename = "content-encoding", default)]
    content_encoding: Option<String>,
    #[serde(default)]
    base64: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Json,
    Protobuf,
    JsonLines,
}

impl FileFormat {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pb" | "binpb" => Some(Self::Protobuf),
            "jsonl" | "ndjson" => Some(Self::JsonLines),
            _ => None,
        }
    }

    /// Format of `path` and whether it is gzip-compressed.
    fn detect(path: &Path) -> Option<(Self, bool)> {
        let ext = path.extension()?.to_str()?;
        if ext.eq_ignore_ascii_case("gz") {
            // `traces.json.gz` -> `traces.json`; a bare `.gz` is assumed JSON.
            let inner = path
                .file_stem()
                .map(Path::new)
                .and_then(|stem| stem.extension())
                .and_then(|e| e.to_str())
                .and_then(Self::from_extension)
                .unwrap_or(Self::Json);
            return Some((inner, true));
        }
        Self::from_extension(ext).map(|format| (format, false))
    }
}

/// Telemetry source backed by OTLP files on disk.
#[derive(Debug, Clone)]
pub struct LocalSource {
    data_dir: PathBuf,
}

impl LocalSource {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Supported files under `<data-dir>/<signal_dir>`, sorted by name.
    fn signal_files(&self, signal_dir: &str) -> Result<Vec<PathBuf>> {
        if !self.data_dir.is_dir() {
            return Err(anyhow!(
                "Data directory '{}' does not exist",
                self.data_dir.display()
            ));
        }
        let dir = self.data_dir.join(signal_dir);
        if !dir.is_dir() {
            tracing::debug!(path = %dir.display(), "Signal directory missing, no records");
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)
            .with_context(|| format!("Failed to list directory '{}'", dir.display()))?
        {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if FileFormat::detect(&path).is_some() {
                files.push(path);
            } else {
                tracing::debug!(path = %path.display(), "Skipping unsupported file");
            }
        }
        files.sort();
        tracing::debug!(count = files.len(), path = %dir.display(), "Found export files");
        Ok(files)
    }

    fn span_pages(&self, filters: Vec<CompiledFilter>, time_range: TimeRange) -> Result<Pages<'_, ResourceSpans>> {
        let files = self.signal_files(TRACES_DIR)?;
        Ok(Box::new(files.into_iter().map(move |path| {
            let mut resources = read_export_file::<ExportTraceServiceRequest>(&path)?;
            retain_spans(&mut resources, &filters, &time_range);
            Ok(resources)
        })))
    }
}

impl TelemetrySource for LocalSource {
    fn query_spans(&self, query: &RecordQuery) -> Result<Pages<'_, ResourceSpans>> {
        let filters = compile_filters(query)?;
        self.span_pages(filters, query.time_range)
    }

    fn query_logs(&self, query: &RecordQuery) -> Result<Pages<'_, ResourceLogs>> {
        let filters = compile_filters(query)?;
        let time_range = query.time_range;
        let files = self.signal_files(LOGS_DIR)?;
        Ok(Box::new(files.into_iter().map(move |path| {
            let mut resources = read_export_file::<ExportLogsServiceRequest>(&path)?;
            retain_logs(&mut resources, &filters, &time_range);
            Ok(resources)
        })))
    }
}

impl TraceFetcher for LocalSource {
    fn fetch_trace(&mut self, trace_id: &str, time_range: &TimeRange) -> Result<Vec<ResourceSpans>> {
        let wanted = trace_id.to_ascii_lowercase();
        let mut found = Vec::new();
        for page in self.span_pages(Vec::new(), *time_range)? {
            let mut resources = page?;
            for resource in &mut resources {
                for scope in &mut resource.scope_spans {
                    scope.spans.retain(|span| hex::encode(&span.trace_id) == wanted);
                }
                resource.scope_spans.retain(|scope| !scope.spans.is_empty());
            }
            resources.retain(|resource| !resource.scope_spans.is_empty());
            found.extend(resources);
        }
        tracing::debug!(trace_id, envelopes = found.len(), "Fetched trace from local files");
        Ok(found)
    }
}

fn compile_filters(query: &RecordQuery) -> Result<Vec<CompiledFilter>> {
    query
        .filters
        .iter()
        .flatten()
        .map(|f| f.compile().map_err(anyhow::Error::from))
        .collect()
}

fn retain_spans(resources: &mut Vec<ResourceSpans>, filters: &[CompiledFilter], time_range: &TimeRange) {
    for resource in resources.iter_mut() {
        let resource_attrs = resource
            .resource
            .as_ref()
            .map(|r| r.attributes.clone())
            .unwrap_or_default();
        for scope in &mut resource.scope_spans {
            let (scope_name, scope_version, scope_attrs) = match &scope.scope {
                Some(s) => (s.name.clone(), s.version.clone(), s.attributes.clone()),
                None => Default::default(),
            };
            scope.spans.retain(|span| {
                if !time_range.contains_nanos(span.start_time_unix_nano) {
                    return false;
                }
                if filters.is_empty() {
                    return true;
                }
                let flat = flatten_span(span, &scope_name, &scope_version, &scope_attrs, &resource_attrs);
                filters.iter().all(|f| f.matches(|key| flat.field(key)))
            });
        }
        resource.scope_spans.retain(|scope| !scope.spans.is_empty());
    }
    resources.retain(|resource| !resource.scope_spans.is_empty());
}

fn retain_logs(resources: &mut Vec<ResourceLogs>, filters: &[CompiledFilter], time_range: &TimeRange) {
    for resource in resources.iter_mut() {
        let resource_attrs = resource
            .resource
            .as_ref()
            .map(|r| r.attributes.clone())
            .unwrap_or_default();
        for scope in &mut resource.scope_logs {
            let (scope_name, scope_attrs) = match &scope.scope {
                Some(s) => (s.name.clone(), s.attributes.clone()),
                None => Default::default(),
            };
            scope.log_records.retain(|record| {
                let flat = flatten_log(record, &scope_name, &scope_attrs, &resource_attrs);
                time_range.contains_nanos(flat.time_unix_nano)
                    && filters.iter().all(|f| f.matches(|key| flat.field(key)))
            });
        }
        resource.scope_logs.retain(|scope| !scope.log_records.is_empty());
    }
    resources.retain(|resource| !resource.scope_logs.is_empty());
}

fn read_export_file<R: ExportRequest>(path: &Path) -> Result<Vec<R::Resource>> {
    let (format, gzipped) = FileFormat::detect(path)
        .ok_or_else(|| anyhow!("Unsupported file type: {}", path.display()))?;
    let raw = std::fs::read(path).with_context(|| format!("Failed to read '{}'", path.display()))?;
    let bytes = if gzipped {
        gunzip(&raw).with_context(|| format!("Failed to decompress '{}'", path.display()))?
    } else {
        raw
    };
    tracing::trace!(path = %path.display(), ?format, size = bytes.len(), "Decoding export file");

    match format {
        FileFormat::Json => Ok(decode_json::<R>(&bytes)
            .with_context(|| format!("Failed to parse OTLP/JSON in '{}'", path.display()))?
            .into_resources()),
        FileFormat::Protobuf => Ok(R::decode(bytes.as_slice())
            .with_context(|| format!("Failed to decode OTLP protobuf in '{}'", path.display()))?
            .into_resources()),
        FileFormat::JsonLines => {
            let text = String::from_utf8(bytes)
                .with_context(|| format!("'{}' is not valid UTF-8", path.display()))?;
            let mut resources = Vec::new();
            for (idx, line) in text.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let request = decode_line::<R>(line).with_context(|| {
                    format!("Failed to decode line {} of '{}'", idx + 1, path.display())
                })?;
                resources.extend(request.into_resources());
            }
            Ok(resources)
        }
    }
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .context("Failed to decompress Gzip payload")?;
    Ok(out)
}

fn decode_json<R: ExportRequest>(bytes: &[u8]) -> Result<R> {
    Ok(serde_json::from_slice(bytes)?)
}

fn decode_line<R: ExportRequest>(line: &str) -> Result<R> {
    let value: serde_json::Value = serde_json::from_str(line).context("Line is not valid JSON")?;
    if value.get("payload").is_none() {
        return Ok(serde_json::from_value(value)?);
    }
    let envelope: StdoutEnvelope =
        serde_json::from_value(value).context("Malformed otlp-stdout envelope")?;
    tracing::trace!(source = ?envelope.source, "Decoding otlp-stdout envelope");
    decode_envelope(envelope)
}

fn decode_envelope<R: ExportRequest>(envelope: StdoutEnvelope) -> Result<R> {
    let content_type = envelope
        .content_type
        .as_deref()
        .unwrap_or(CONTENT_TYPE_JSON);

    let raw = match envelope.payload {
        serde_json::Value::String(payload) if envelope.base64.unwrap_or(false) => general_purpose::STANDARD
            .decode(payload.as_bytes())
            .context("Failed to decode base64 payload")?,
        serde_json::Value::String(payload) => payload.into_bytes(),
        other => serde_json::to_vec(&other)?,
    };

    let decompressed = if envelope.content_encoding.as_deref() == Some(ENCODING_GZIP) {
        gunzip(&raw)?
    } else {
        raw
    };

    match content_type {
        CONTENT_TYPE_JSON => decode_json(&decompressed),
        CONTENT_TYPE_PROTOBUF => R::decode(decompressed.as_slice())
            .map_err(|e| anyhow!("Payload has content-type protobuf but failed to decode: {}", e)),
        _ => {
            tracing::warn!(content_type, "Unsupported content type, attempting to treat as protobuf");
            R::decode(decompressed.as_slice()).map_err(|e| {
                anyhow!(
                    "Payload has unknown content-type '{}' and failed to decode as protobuf: {}",
                    content_type,
                    e
                )
            })
        }
    }
}
