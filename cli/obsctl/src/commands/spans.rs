use super::{effective_limit, output_columns, time_range, RowSink};
use crate::cli::{OutputFormat, QueryArgs};
use crate::columns::{build_row_values, RecordKind};
use crate::config::EffectiveConfig;
use crate::filter::parse_filters;
use crate::records::{flatten_resource_spans, RowValues};
use crate::source::{RecordQuery, TelemetrySource};
use anyhow::{Context, Result};
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use std::io::Write;

/// Runs `spans query`, returning the number of spans written.
pub fn run_spans_query<S, W>(
    source: &S,
    args: &QueryArgs,
    config: &EffectiveConfig,
    colorize: bool,
    out: &mut W,
) -> Result<usize>
where
    S: TelemetrySource + ?Sized,
    W: Write,
{
    let limit = args.limit.unwrap_or(config.limit);
    let query = RecordQuery {
        filters: parse_filters(&args.filters)?,
        time_range: time_range(&args.output)?,
        limit,
    };
    tracing::debug!(?query, "Querying spans");
    let columns = output_columns(&args.output.columns, config.span_columns.as_ref(), RecordKind::Span);
    let skip_header = args.output.skip_header;
    let mut sink = match args.output.output {
        OutputFormat::Json => return write_json(source, &query, out),
        OutputFormat::Table => RowSink::table(out, columns.clone(), colorize, skip_header),
        OutputFormat::Csv => RowSink::csv(out, columns.clone(), skip_header),
    };

    let mut remaining = effective_limit(limit);
    let mut written = 0usize;
    for page in source.query_spans(&query)? {
        let page = page.context("Failed to read span page")?;
        let rows: Vec<RowValues> = flatten_resource_spans(&page)
            .into_iter()
            .take(remaining)
            .map(|span| build_row_values(span.predefined_values(), &columns, &span.attributes))
            .collect();
        sink.write_rows(&rows)?;
        remaining -= rows.len();
        written += rows.len();
        if remaining == 0 {
            break;
        }
    }
    sink.finish()?;
    tracing::debug!(spans = written, "Finished spans query");
    Ok(written)
}

fn write_json<S, W>(source: &S, query: &RecordQuery, out: &mut W) -> Result<usize>
where
    S: TelemetrySource + ?Sized,
    W: Write,
{
    let mut remaining = effective_limit(query.limit);
    let mut resource_spans = Vec::new();
    for page in source.query_spans(query)? {
        let mut page = page.context("Failed to read span page")?;
        remaining -= truncate_resource_spans(&mut page, remaining);
        resource_spans.extend(page);
        if remaining == 0 {
            break;
        }
    }
    let written = effective_limit(query.limit) - remaining;
    let request = ExportTraceServiceRequest { resource_spans };
    serde_json::to_writer_pretty(&mut *out, &request).context("Failed to write JSON output")?;
    writeln!(out)?;
    Ok(written)
}

fn truncate_resource_spans(resources: &mut Vec<ResourceSpans>, max: usize) -> usize {
    let mut kept = 0usize;
    for resource in resources.iter_mut() {
        for scope in &mut resource.scope_spans {
            scope.spans.truncate(max - kept);
            kept += scope.spans.len();
        }
        resource.scope_spans.retain(|scope| !scope.spans.is_empty());
    }
    resources.retain(|resource| !resource.scope_spans.is_empty());
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_source::{LocalSource, TRACES_DIR};
    use opentelemetry_proto::tonic::common::v1::{any_value, AnyValue, KeyValue};
    use opentelemetry_proto::tonic::resource::v1::Resource;
    use opentelemetry_proto::tonic::trace::v1::{status::StatusCode, ScopeSpans, Span, Status};
    use prost::Message;

    fn request(service: &str, spans: &[(&str, u64, StatusCode)]) -> ExportTraceServiceRequest {
        ExportTraceServiceRequest {
            resource_spans: vec![ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![KeyValue {
                        key: "service.name".to_string(),
                        value: Some(AnyValue {
                            value: Some(any_value::Value::StringValue(service.to_string())),
                        }),
                    }],
                    ..Default::default()
                }),
                scope_spans: vec![ScopeSpans {
                    spans: spans
                        .iter()
                        .enumerate()
                        .map(|(i, (name, duration_ms, status))| Span {
                            trace_id: vec![0xab; 16],
                            span_id: vec![i as u8 + 1; 8],
                            name: name.to_string(),
                            start_time_unix_nano: 1_000,
                            end_time_unix_nano: 1_000 + duration_ms * 1_000_000,
                            status: Some(Status {
                                code: *status as i32,
                                ..Default::default()
                            }),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        }
    }

    fn query(argv: &[&str]) -> QueryArgs {
        use crate::cli::{CliArgs, Commands, SpansCommand};
        use clap::Parser;
        let mut full = vec!["obsctl", "spans", "query"];
        full.extend_from_slice(argv);
        match CliArgs::try_parse_from(full).unwrap().command {
            Some(Commands::Spans {
                action: SpansCommand::Query(query),
            }) => query,
            other => panic!("unexpected command: {:?}", other),
        }
    }

    fn source_with_spans() -> (tempfile::TempDir, LocalSource) {
        let dir = tempfile::tempdir().unwrap();
        let traces = dir.path().join(TRACES_DIR);
        std::fs::create_dir(&traces).unwrap();
        std::fs::write(
            traces.join("1.pb"),
            request(
                "checkout",
                &[("GET /cart", 12, StatusCode::Ok), ("POST /pay", 2_500, StatusCode::Error)],
            )
            .encode_to_vec(),
        )
        .unwrap();
        std::fs::write(
            traces.join("2.pb"),
            request("inventory", &[("reserve", 3, StatusCode::Unset)]).encode_to_vec(),
        )
        .unwrap();
        let source = LocalSource::new(dir.path());
        (dir, source)
    }

    #[test]
    fn test_filtered_table_from_local_files() {
        let (_dir, source) = source_with_spans();
        let mut out = Vec::new();
        let written = run_spans_query(
            &source,
            &query(&[
                "-f",
                "otel.span.status.code = ERROR",
                "-c",
                "service",
                "-c",
                "duration",
                "-c",
                "name",
            ]),
            &EffectiveConfig::default(),
            false,
            &mut out,
        )
        .unwrap();
        assert_eq!(written, 1);
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "SERVICE   DURATION  NAME\ncheckout  2.50s     POST /pay\n"
        );
    }

    #[test]
    fn test_limit_zero_means_unbounded() {
        let (_dir, source) = source_with_spans();
        let mut out = Vec::new();
        let written = run_spans_query(
            &source,
            &query(&["--limit", "0", "-o", "csv", "--skip-header", "-c", "name"]),
            &EffectiveConfig::default(),
            false,
            &mut out,
        )
        .unwrap();
        assert_eq!(written, 3);
        assert_eq!(String::from_utf8(out).unwrap(), "GET /cart\nPOST /pay\nreserve\n");
    }

    #[test]
    fn test_json_output_keeps_envelopes() {
        let (_dir, source) = source_with_spans();
        let mut out = Vec::new();
        let written = run_spans_query(
            &source,
            &query(&["-o", "json", "--limit", "2"]),
            &EffectiveConfig::default(),
            false,
            &mut out,
        )
        .unwrap();
        assert_eq!(written, 2);
        let request: ExportTraceServiceRequest = serde_json::from_slice(&out).unwrap();
        assert_eq!(request.resource_spans.len(), 1);
        assert_eq!(request.resource_spans[0].scope_spans[0].spans.len(), 2);
    }
}
