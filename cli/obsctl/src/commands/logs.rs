use super::{effective_limit, output_columns, time_range, RowSink};
use crate::cli::{OutputFormat, QueryArgs};
use crate::columns::{build_row_values, RecordKind};
use crate::config::EffectiveConfig;
use crate::filter::parse_filters;
use crate::records::{flatten_resource_logs, RowValues};
use crate::source::{RecordQuery, TelemetrySource};
use anyhow::{Context, Result};
use opentelemetry_proto::tonic::collector::logs::v1::ExportLogsServiceRequest;
use opentelemetry_proto::tonic::logs::v1::ResourceLogs;
use std::io::Write;

/// Runs `logs query`, returning the number of records written.
pub fn run_logs_query<S, W>(
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
    tracing::debug!(?query, "Querying logs");
    let columns = output_columns(&args.output.columns, config.log_columns.as_ref(), RecordKind::Log);
    let skip_header = args.output.skip_header;
    let mut sink = match args.output.output {
        OutputFormat::Json => return write_json(source, &query, out),
        OutputFormat::Table => RowSink::table(out, columns.clone(), colorize, skip_header),
        OutputFormat::Csv => RowSink::csv(out, columns.clone(), skip_header),
    };

    let mut remaining = effective_limit(limit);
    let mut written = 0usize;
    for page in source.query_logs(&query)? {
        let page = page.context("Failed to read log page")?;
        let rows: Vec<RowValues> = flatten_resource_logs(&page)
            .into_iter()
            .take(remaining)
            .map(|log| build_row_values(log.predefined_values(), &columns, &log.attributes))
            .collect();
        sink.write_rows(&rows)?;
        remaining -= rows.len();
        written += rows.len();
        if remaining == 0 {
            break;
        }
    }
    sink.finish()?;
    tracing::debug!(records = written, "Finished logs query");
    Ok(written)
}

fn write_json<S, W>(source: &S, query: &RecordQuery, out: &mut W) -> Result<usize>
where
    S: TelemetrySource + ?Sized,
    W: Write,
{
    let mut remaining = effective_limit(query.limit);
    let mut resource_logs = Vec::new();
    for page in source.query_logs(query)? {
        let mut page = page.context("Failed to read log page")?;
        remaining -= truncate_resource_logs(&mut page, remaining);
        resource_logs.extend(page);
        if remaining == 0 {
            break;
        }
    }
    let written = effective_limit(query.limit) - remaining;
    let request = ExportLogsServiceRequest { resource_logs };
    serde_json::to_writer_pretty(&mut *out, &request).context("Failed to write JSON output")?;
    writeln!(out)?;
    Ok(written)
}

/// Keeps at most `max` log records, dropping envelopes left empty. Returns the kept count.
fn truncate_resource_logs(resources: &mut Vec<ResourceLogs>, max: usize) -> usize {
    let mut kept = 0usize;
    for resource in resources.iter_mut() {
        for scope in &mut resource.scope_logs {
            let room = max - kept;
            scope.log_records.truncate(room);
            kept += scope.log_records.len();
        }
        resource.scope_logs.retain(|scope| !scope.log_records.is_empty());
    }
    resources.retain(|resource| !resource.scope_logs.is_empty());
    kept
}
