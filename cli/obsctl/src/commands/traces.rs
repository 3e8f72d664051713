use super::{output_columns, time_range, RowSink};
use crate::cli::{OutputFormat, TraceGetArgs};
use crate::columns::{build_row_values, RecordKind, ResolvedColumn};
use crate::config::EffectiveConfig;
use crate::links::{fetch_trace_group, follow_links, TraceGroup};
use crate::records::{keys, RowValues};
use crate::source::TraceFetcher;
use crate::tree::build_tree_entries;
use anyhow::{bail, Context, Result};
use colored::*;
use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use std::io::Write;

const HEADING_WIDTH: usize = 80;
const INDENT: &str = "  ";

/// Runs `traces get`, returning the number of trace groups written.
pub fn run_trace_get<F, W>(
    fetcher: &mut F,
    args: &TraceGetArgs,
    config: &EffectiveConfig,
    colorize: bool,
    out: &mut W,
) -> Result<usize>
where
    F: TraceFetcher + ?Sized,
    W: Write,
{
    let trace_id = normalize_trace_id(&args.trace_id)?;
    let range = time_range(&args.output)?;

    let root = fetch_trace_group(fetcher, &trace_id, &range)
        .with_context(|| format!("Failed to fetch trace {}", trace_id))?;
    if root.spans.is_empty() {
        bail!("Trace {} not found", trace_id);
    }
    let groups = if args.follow_links {
        follow_links(root, &range, fetcher)?
    } else {
        vec![root]
    };
    tracing::debug!(trace_id = %trace_id, groups = groups.len(), "Fetched trace groups");

    let columns = output_columns(
        &args.output.columns,
        config.trace_columns.as_ref(),
        RecordKind::TraceSpan,
    );
    let skip_header = args.output.skip_header;
    match args.output.output {
        OutputFormat::Json => write_json(&groups, out)?,
        OutputFormat::Table => {
            for group in &groups {
                if !skip_header {
                    writeln!(out, "{}", trace_heading(&group.trace_id, colorize))?;
                }
                // Widths are measured per trace.
                let mut sink = RowSink::table(&mut *out, columns.clone(), colorize, skip_header);
                sink.write_rows(&tree_rows(group, &columns))?;
                sink.finish()?;
            }
        }
        OutputFormat::Csv => {
            let mut sink = RowSink::csv(&mut *out, columns.clone(), skip_header);
            for group in &groups {
                sink.write_rows(&tree_rows(group, &columns))?;
            }
            sink.finish()?;
        }
    }
    Ok(groups.len())
}

fn normalize_trace_id(trace_id: &str) -> Result<String> {
    let trace_id = trace_id.trim().to_ascii_lowercase();
    if trace_id.is_empty() || hex::decode(&trace_id).is_err() {
        bail!("Invalid trace ID '{}': expected a hex string", trace_id);
    }
    Ok(trace_id)
}

/// Rows in tree order, span names indented by depth.
fn tree_rows(group: &TraceGroup, columns: &[ResolvedColumn]) -> Vec<RowValues> {
    build_tree_entries(group.spans.clone())
        .into_iter()
        .map(|entry| {
            let mut values = entry.span.predefined_values();
            values.insert(
                keys::SPAN_NAME.to_string(),
                format!("{}{}", INDENT.repeat(entry.depth), entry.span.name),
            );
            build_row_values(values, columns, &entry.span.attributes)
        })
        .collect()
}

fn trace_heading(trace_id: &str, colorize: bool) -> String {
    let heading = format!("Trace ID: {}", trace_id);
    let padding = HEADING_WIDTH.saturating_sub(heading.len() + 3);
    if colorize {
        format!(
            "{} {} {}",
            "─".dimmed(),
            heading.bold(),
            "─".repeat(padding).dimmed()
        )
    } else {
        format!("─ {} {}", heading, "─".repeat(padding))
    }
}

fn write_json<W: Write>(groups: &[TraceGroup], out: &mut W) -> Result<()> {
    let request = ExportTraceServiceRequest {
        resource_spans: groups
            .iter()
            .flat_map(|group| group.resource_spans.iter().cloned())
            .collect(),
    };
    serde_json::to_writer_pretty(&mut *out, &request).context("Failed to write JSON output")?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::TimeRange;
    use anyhow::anyhow;
    use opentelemetry_proto::tonic::trace::v1::{span::Link, ResourceSpans, ScopeSpans, Span};
    use std::collections::HashMap;

    fn span(trace: u8, id: u8, parent: Option<u8>, name: &str, links: &[u8]) -> Span {
        Span {
            trace_id: vec![trace; 16],
            span_id: vec![id; 8],
            parent_span_id: parent.map(|p| vec![p; 8]).unwrap_or_default(),
            name: name.to_string(),
            links: links
                .iter()
                .map(|t| Link {
                    trace_id: vec![*t; 16],
                    span_id: vec![1; 8],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn trace_id(byte: u8) -> String {
        hex::encode(vec![byte; 16])
    }

    #[derive(Default)]
    struct MapFetcher {
        traces: HashMap<String, Vec<Span>>,
        fetched: Vec<String>,
    }

    impl TraceFetcher for MapFetcher {
        fn fetch_trace(&mut self, trace_id: &str, _range: &TimeRange) -> Result<Vec<ResourceSpans>> {
            self.fetched.push(trace_id.to_string());
            let spans = self
                .traces
                .get(trace_id)
                .cloned()
                .ok_or_else(|| anyhow!("no such trace"))?;
            Ok(vec![ResourceSpans {
                scope_spans: vec![ScopeSpans {
                    spans,
                    ..Default::default()
                }],
                ..Default::default()
            }])
        }
    }

    fn fetcher() -> MapFetcher {
        let mut traces = HashMap::new();
        traces.insert(
            trace_id(0xaa),
            vec![
                span(0xaa, 3, Some(2), "db query", &[]),
                span(0xaa, 1, None, "GET /checkout", &[0xbb]),
                span(0xaa, 2, Some(1), "reserve stock", &[0xbb, 0xcc]),
            ],
        );
        traces.insert(trace_id(0xbb), vec![span(0xbb, 4, None, "async job", &[0xaa])]);
        traces.insert(trace_id(0xcc), vec![span(0xcc, 5, None, "audit", &[])]);
        MapFetcher {
            traces,
            fetched: Vec::new(),
        }
    }

    fn get_args(argv: &[&str]) -> TraceGetArgs {
        use crate::cli::{CliArgs, Commands, TracesCommand};
        use clap::Parser;
        let mut full = vec!["obsctl", "traces", "get"];
        full.extend_from_slice(argv);
        match CliArgs::try_parse_from(full).unwrap().command {
            Some(Commands::Traces {
                action: TracesCommand::Get(get),
            }) => get,
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_tree_is_indented_under_heading() {
        let mut fetcher = fetcher();
        let id = trace_id(0xaa);
        let mut out = Vec::new();
        let groups = run_trace_get(
            &mut fetcher,
            &get_args(&[&id, "-c", "name"]),
            &EffectiveConfig::default(),
            false,
            &mut out,
        )
        .unwrap();
        assert_eq!(groups, 1);
        let output = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert!(lines[0].starts_with(&format!("─ Trace ID: {} ─", id)));
        assert_eq!(lines[1], "NAME");
        assert_eq!(lines[2], "GET /checkout");
        assert_eq!(lines[3], "  reserve stock");
        assert_eq!(lines[4], "    db query");
    }

    #[test]
    fn test_follow_links_renders_every_group_once() {
        let mut fetcher = fetcher();
        let id = trace_id(0xaa).to_uppercase();
        let mut out = Vec::new();
        let groups = run_trace_get(
            &mut fetcher,
            &get_args(&[&id, "--follow-links", "-o", "csv", "-c", "trace", "-c", "name"]),
            &EffectiveConfig::default(),
            false,
            &mut out,
        )
        .unwrap();
        assert_eq!(groups, 3);
        assert_eq!(fetcher.fetched, vec![trace_id(0xaa), trace_id(0xbb), trace_id(0xcc)]);
        let output = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "otel.trace.id,otel.span.name");
        assert_eq!(lines.len(), 1 + 5);
        assert_eq!(lines[4], format!("{},async job", trace_id(0xbb)));
    }

    #[test]
    fn test_json_contains_all_groups() {
        let mut fetcher = fetcher();
        let mut out = Vec::new();
        run_trace_get(
            &mut fetcher,
            &get_args(&[&trace_id(0xaa), "--follow-links", "-o", "json"]),
            &EffectiveConfig::default(),
            false,
            &mut out,
        )
        .unwrap();
        let request: ExportTraceServiceRequest = serde_json::from_slice(&out).unwrap();
        assert_eq!(request.resource_spans.len(), 3);
    }

    #[test]
    fn test_missing_trace_and_bad_id_are_errors() {
        let mut fetcher = fetcher();
        fetcher.traces.insert(trace_id(0xdd), Vec::new());
        let config = EffectiveConfig::default();
        let mut out = Vec::new();
        let err = run_trace_get(&mut fetcher, &get_args(&[&trace_id(0xdd)]), &config, false, &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("not found"));

        let err = run_trace_get(&mut fetcher, &get_args(&["not-hex"]), &config, false, &mut out)
            .unwrap_err();
        assert!(err.to_string().contains("Invalid trace ID"));
        assert!(out.is_empty());
    }

    #[test]
    fn test_linked_fetch_failure_names_trace() {
        let mut fetcher = fetcher();
        fetcher.traces.remove(&trace_id(0xcc));
        let mut out = Vec::new();
        let err = run_trace_get(
            &mut fetcher,
            &get_args(&[&trace_id(0xaa), "--follow-links"]),
            &EffectiveConfig::default(),
            false,
            &mut out,
        )
        .unwrap_err();
        assert!(err.to_string().contains(&trace_id(0xcc)));
    }
}
