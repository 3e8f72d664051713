//! Subcommand implementations.
//!
//! Each command drains pages from a source, converts records to rows and
//! streams them through a [`RowSink`], or buffers them for JSON output.

pub mod logs;
pub mod spans;
pub mod traces;

use crate::cli::OutputArgs;
use crate::columns::{resolve_columns, RecordKind, ResolvedColumn};
use crate::error::EngineError;
use crate::records::RowValues;
use crate::source::TimeRange;
use crate::table::{CsvRenderer, TableRenderer};
use anyhow::{bail, Result};
use std::io::Write;

/// Resolves columns: CLI specs first, then configured ones, then catalog defaults.
pub(crate) fn output_columns(
    cli_columns: &[String],
    configured: Option<&Vec<String>>,
    kind: RecordKind,
) -> Vec<ResolvedColumn> {
    let specs: &[String] = if !cli_columns.is_empty() {
        cli_columns
    } else {
        configured.map(Vec::as_slice).unwrap_or_default()
    };
    resolve_columns(specs, kind.catalog())
}

pub(crate) fn time_range(output: &OutputArgs) -> Result<TimeRange> {
    if let (Some(from), Some(to)) = (output.from, output.to) {
        if from > to {
            bail!("--from ({}) is after --to ({})", from.to_rfc3339(), to.to_rfc3339());
        }
    }
    Ok(TimeRange::new(output.from, output.to))
}

/// 0 means no limit.
pub(crate) fn effective_limit(limit: usize) -> usize {
    if limit == 0 {
        usize::MAX
    } else {
        limit
    }
}

/// Streams rows as a table or as CSV.
pub(crate) enum RowSink<W: Write> {
    Table { renderer: TableRenderer, out: W },
    Csv(CsvRenderer<W>),
}

impl<W: Write> RowSink<W> {
    pub(crate) fn table(out: W, columns: Vec<ResolvedColumn>, colorize: bool, skip_header: bool) -> Self {
        RowSink::Table {
            renderer: TableRenderer::new(columns, colorize, skip_header),
            out,
        }
    }

    pub(crate) fn csv(out: W, columns: Vec<ResolvedColumn>, skip_header: bool) -> Self {
        RowSink::Csv(CsvRenderer::new(out, columns, skip_header))
    }

    pub(crate) fn write_rows(&mut self, rows: &[RowValues]) -> Result<(), EngineError> {
        match self {
            RowSink::Table { renderer, out } => renderer.render(out, rows),
            RowSink::Csv(csv) => csv.render(rows),
        }
    }

    pub(crate) fn finish(self) -> Result<W, EngineError> {
        match self {
            RowSink::Table { mut out, .. } => {
                out.flush()?;
                Ok(out)
            }
            RowSink::Csv(csv) => csv.into_inner(),
        }
    }
}
