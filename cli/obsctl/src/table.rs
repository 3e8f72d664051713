//! Aligned table and CSV output for resolved columns.
//!
//! Table output is measure-then-render: column widths are computed from the
//! (truncated) values first, then every row is padded to them. Bounded columns
//! never exceed their max width, the last column is written unpadded.

use crate::columns::ResolvedColumn;
use crate::error::EngineError;
use crate::records::RowValues;
use colored::*;
use std::borrow::Cow;
use std::io::Write;

const COLUMN_SEPARATOR: &str = "  ";
const ELLIPSIS: &str = "...";

/// Cuts `value` to at most `max_width` chars, ending in `...` when cut.
/// A `max_width` of 0 means unbounded.
pub fn truncate(value: &str, max_width: usize) -> Cow<'_, str> {
    let len = value.chars().count();
    if max_width == 0 || len <= max_width {
        return Cow::Borrowed(value);
    }
    if max_width <= ELLIPSIS.len() {
        return Cow::Owned(value.chars().take(max_width).collect());
    }
    let mut cut: String = value.chars().take(max_width - ELLIPSIS.len()).collect();
    cut.push_str(ELLIPSIS);
    Cow::Owned(cut)
}

fn cell<'a>(row: &'a RowValues, key: &str) -> &'a str {
    row.get(key).map(String::as_str).unwrap_or_default()
}

/// Per-column display widths for `rows`.
///
/// Bounded columns start at the header length (unless the header is skipped),
/// grow with the longest truncated value and are capped at their max width.
/// Unbounded columns take the longest untruncated value.
pub fn compute_effective_widths(
    columns: &[ResolvedColumn],
    rows: &[RowValues],
    skip_header: bool,
) -> Vec<usize> {
    columns
        .iter()
        .map(|col| {
            let header_len = if skip_header {
                0
            } else {
                col.header.chars().count()
            };
            let observed = rows
                .iter()
                .map(|row| truncate(cell(row, &col.key), col.max_width).chars().count())
                .fold(header_len, usize::max);
            if col.max_width > 0 {
                observed.min(col.max_width)
            } else {
                observed
            }
        })
        .collect()
}

/// Streams rows as an aligned table.
///
/// Widths are measured per batch and only ever grow, so later batches stay
/// aligned with earlier ones whenever their values fit.
pub struct TableRenderer {
    columns: Vec<ResolvedColumn>,
    colorize: bool,
    skip_header: bool,
    widths: Vec<usize>,
    header_written: bool,
}

impl TableRenderer {
    pub fn new(columns: Vec<ResolvedColumn>, colorize: bool, skip_header: bool) -> Self {
        let widths = vec![0; columns.len()];
        Self {
            columns,
            colorize,
            skip_header,
            widths,
            header_written: false,
        }
    }

    /// Renders one batch of rows, writing the header before the first batch.
    pub fn render<W: Write>(&mut self, out: &mut W, rows: &[RowValues]) -> Result<(), EngineError> {
        let measured = compute_effective_widths(&self.columns, rows, self.skip_header);
        for (width, new_width) in self.widths.iter_mut().zip(measured) {
            *width = (*width).max(new_width);
        }

        if !self.skip_header && !self.header_written {
            writeln!(out, "{}", self.header_line())?;
            self.header_written = true;
        }
        for row in rows {
            writeln!(out, "{}", self.row_line(row))?;
        }
        Ok(())
    }

    fn header_line(&self) -> String {
        let last = self.columns.len().saturating_sub(1);
        let cells: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let text = if i == last {
                    col.header.clone()
                } else {
                    format!("{:<width$}", col.header, width = self.widths[i])
                };
                if self.colorize {
                    text.bold().to_string()
                } else {
                    text
                }
            })
            .collect();
        cells.join(COLUMN_SEPARATOR)
    }

    fn row_line(&self, row: &RowValues) -> String {
        let last = self.columns.len().saturating_sub(1);
        let cells: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let value = truncate(cell(row, &col.key), col.max_width);
                let width = if i == last { 0 } else { self.widths[i] };
                match col.color {
                    Some(formatter) if self.colorize => formatter(&value, width),
                    _ if i == last => value.into_owned(),
                    _ => format!("{:<width$}", value, width = width),
                }
            })
            .collect();
        cells.join(COLUMN_SEPARATOR)
    }
}

/// Renders all rows in one pass.
pub fn render_table<W: Write>(
    out: &mut W,
    columns: &[ResolvedColumn],
    rows: &[RowValues],
    skip_header: bool,
    colorize: bool,
) -> Result<(), EngineError> {
    TableRenderer::new(columns.to_vec(), colorize, skip_header).render(out, rows)
}

/// Streams rows as CSV: canonical keys as header, raw untruncated values.
pub struct CsvRenderer<W: Write> {
    writer: csv::Writer<W>,
    columns: Vec<ResolvedColumn>,
    skip_header: bool,
    header_written: bool,
}

impl<W: Write> CsvRenderer<W> {
    pub fn new(out: W, columns: Vec<ResolvedColumn>, skip_header: bool) -> Self {
        Self {
            writer: csv::Writer::from_writer(out),
            columns,
            skip_header,
            header_written: false,
        }
    }

    pub fn render(&mut self, rows: &[RowValues]) -> Result<(), EngineError> {
        if !self.skip_header && !self.header_written {
            self.writer
                .write_record(self.columns.iter().map(|c| c.key.as_str()))?;
            self.header_written = true;
        }
        for row in rows {
            self.writer
                .write_record(self.columns.iter().map(|c| cell(row, &c.key)))?;
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W, EngineError> {
        self.writer
            .into_inner()
            .map_err(|e| EngineError::Render(e.into_error()))
    }
}
