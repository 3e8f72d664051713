//! Column catalogs, column resolution and per-record value assembly.
//!
//! Each record kind has a static catalog of known columns. Users pick columns
//! by alias (case-insensitive) or canonical key; anything else becomes an
//! arbitrary attribute column looked up against the record's merged attributes.

use crate::attributes::{lookup_attribute, Attribute};
use crate::records::{keys, RowValues};
use colored::*;
use std::fmt;

/// Width given to columns that name an arbitrary attribute.
pub const ATTRIBUTE_COLUMN_WIDTH: usize = 30;

/// Pads `value` to `width` and wraps it in terminal styling.
pub type ColorFormatter = fn(&str, usize) -> String;

/// A statically known column.
#[derive(Clone, Copy)]
pub struct ColumnDef {
    pub key: &'static str,
    pub aliases: &'static [&'static str],
    pub header: &'static str,
    /// 0 means unbounded; conventionally only the last column.
    pub max_width: usize,
    pub color: Option<ColorFormatter>,
}

impl fmt::Debug for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDef")
            .field("key", &self.key)
            .field("aliases", &self.aliases)
            .field("header", &self.header)
            .field("max_width", &self.max_width)
            .field("has_color", &self.color.is_some())
            .finish()
    }
}

/// A column after resolution against a catalog.
#[derive(Clone)]
pub struct ResolvedColumn {
    pub key: String,
    pub header: String,
    pub max_width: usize,
    pub color: Option<ColorFormatter>,
}

impl ResolvedColumn {
    fn from_def(def: &ColumnDef, header: String) -> Self {
        ResolvedColumn {
            key: def.key.to_string(),
            header,
            max_width: def.max_width,
            color: def.color,
        }
    }

    fn attribute(requested: &str) -> Self {
        ResolvedColumn {
            key: requested.to_string(),
            header: requested.to_string(),
            max_width: ATTRIBUTE_COLUMN_WIDTH,
            color: None,
        }
    }
}

impl fmt::Debug for ResolvedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedColumn")
            .field("key", &self.key)
            .field("header", &self.header)
            .field("max_width", &self.max_width)
            .field("has_color", &self.color.is_some())
            .finish()
    }
}

/// Known columns of one record kind plus the keys shown by default.
#[derive(Debug, Clone, Copy)]
pub struct ColumnCatalog {
    pub columns: &'static [ColumnDef],
    pub defaults: &'static [&'static str],
}

impl ColumnCatalog {
    /// The default columns, with their catalog headers and widths.
    pub fn default_columns(&self) -> Vec<ResolvedColumn> {
        self.defaults
            .iter()
            .filter_map(|key| self.columns.iter().find(|def| def.key == *key))
            .map(|def| ResolvedColumn::from_def(def, def.header.to_string()))
            .collect()
    }
}

/// The kinds of record the engine renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Log,
    Span,
    TraceSpan,
}

impl RecordKind {
    pub fn catalog(&self) -> &'static ColumnCatalog {
        match self {
            RecordKind::Log => &LOG_CATALOG,
            RecordKind::Span => &SPAN_CATALOG,
            RecordKind::TraceSpan => &TRACE_SPAN_CATALOG,
        }
    }
}

const LOG_COLUMNS: &[ColumnDef] = &[
    ColumnDef {
        key: keys::LOG_TIME,
        aliases: &["timestamp", "time"],
        header: "TIMESTAMP",
        max_width: 28,
        color: None,
    },
    ColumnDef {
        key: keys::LOG_SEVERITY,
        aliases: &["severity", "level"],
        header: "SEVERITY",
        max_width: 10,
        color: Some(color_severity),
    },
    ColumnDef {
        key: keys::SERVICE_NAME,
        aliases: &["service", "resource"],
        header: "SERVICE",
        max_width: 24,
        color: None,
    },
    ColumnDef {
        key: keys::TRACE_ID,
        aliases: &["trace id", "trace_id", "trace"],
        header: "TRACE ID",
        max_width: 32,
        color: None,
    },
    ColumnDef {
        key: keys::SPAN_ID,
        aliases: &["span id", "span_id"],
        header: "SPAN ID",
        max_width: 16,
        color: None,
    },
    ColumnDef {
        key: keys::SCOPE_NAME,
        aliases: &["scope"],
        header: "SCOPE",
        max_width: 24,
        color: None,
    },
    ColumnDef {
        key: keys::LOG_BODY,
        aliases: &["body", "message", "msg"],
        header: "BODY",
        max_width: 0,
        color: None,
    },
];

const SPAN_COLUMNS: &[ColumnDef] = &[
    ColumnDef {
        key: keys::SPAN_START_TIME,
        aliases: &["timestamp", "time", "start"],
        header: "TIMESTAMP",
        max_width: 28,
        color: None,
    },
    ColumnDef {
        key: keys::SPAN_DURATION,
        aliases: &["duration", "dur"],
        header: "DURATION",
        max_width: 10,
        color: None,
    },
    ColumnDef {
        key: keys::TRACE_ID,
        aliases: &["trace id", "trace_id", "trace"],
        header: "TRACE ID",
        max_width: 32,
        color: None,
    },
    ColumnDef {
        key: keys::SPAN_ID,
        aliases: &["span id", "span_id"],
        header: "SPAN ID",
        max_width: 16,
        color: None,
    },
    ColumnDef {
        key: keys::PARENT_ID,
        aliases: &["parent id", "parent", "parent_id"],
        header: "PARENT ID",
        max_width: 16,
        color: None,
    },
    ColumnDef {
        key: keys::SPAN_KIND,
        aliases: &["kind"],
        header: "KIND",
        max_width: 10,
        color: None,
    },
    ColumnDef {
        key: keys::SPAN_STATUS,
        aliases: &["status"],
        header: "STATUS",
        max_width: 8,
        color: Some(color_status),
    },
    ColumnDef {
        key: keys::SERVICE_NAME,
        aliases: &["service", "resource"],
        header: "SERVICE",
        max_width: 24,
        color: None,
    },
    ColumnDef {
        key: keys::SCOPE_NAME,
        aliases: &["scope"],
        header: "SCOPE",
        max_width: 24,
        color: None,
    },
    ColumnDef {
        key: keys::SPAN_LINKS,
        aliases: &["links"],
        header: "LINKS",
        max_width: 8,
        color: None,
    },
    ColumnDef {
        key: keys::SPAN_NAME,
        aliases: &["span name", "name"],
        header: "NAME",
        max_width: 0,
        color: None,
    },
];

pub static LOG_CATALOG: ColumnCatalog = ColumnCatalog {
    columns: LOG_COLUMNS,
    defaults: &[
        keys::LOG_TIME,
        keys::LOG_SEVERITY,
        keys::SERVICE_NAME,
        keys::LOG_BODY,
    ],
};

pub static SPAN_CATALOG: ColumnCatalog = ColumnCatalog {
    columns: SPAN_COLUMNS,
    defaults: &[
        keys::SPAN_START_TIME,
        keys::SPAN_DURATION,
        keys::TRACE_ID,
        keys::SERVICE_NAME,
        keys::SPAN_STATUS,
        keys::SPAN_NAME,
    ],
};

pub static TRACE_SPAN_CATALOG: ColumnCatalog = ColumnCatalog {
    columns: SPAN_COLUMNS,
    defaults: &[
        keys::SPAN_START_TIME,
        keys::SPAN_DURATION,
        keys::SPAN_ID,
        keys::SERVICE_NAME,
        keys::SPAN_STATUS,
        keys::SPAN_NAME,
    ],
};

/// Resolves user column specs against a catalog.
///
/// Alias matches take the uppercased alias as header, canonical key matches
/// take the key, and anything else becomes an attribute column. Bounded
/// columns are widened so their header always fits.
pub fn resolve_columns<S: AsRef<str>>(specs: &[S], catalog: &ColumnCatalog) -> Vec<ResolvedColumn> {
    if specs.is_empty() {
        return catalog.default_columns();
    }

    specs
        .iter()
        .map(|requested| {
            let requested = requested.as_ref();
            let mut column = resolve_one(requested, catalog.columns);
            if column.max_width > 0 {
                column.max_width = column.max_width.max(column.header.chars().count());
            }
            tracing::trace!(requested, key = %column.key, header = %column.header, "Resolved column");
            column
        })
        .collect()
}

fn resolve_one(requested: &str, columns: &[ColumnDef]) -> ResolvedColumn {
    for def in columns {
        if def.aliases.iter().any(|alias| alias.eq_ignore_ascii_case(requested)) {
            return ResolvedColumn::from_def(def, requested.to_uppercase());
        }
    }
    if let Some(def) = columns.iter().find(|def| def.key == requested) {
        return ResolvedColumn::from_def(def, def.key.to_string());
    }
    ResolvedColumn::attribute(requested)
}

/// Builds the value map for one record.
///
/// Structural values in `predefined` win; every other column key is looked up
/// in `attributes` (missing keys yield an empty string).
pub fn build_row_values(
    predefined: RowValues,
    columns: &[ResolvedColumn],
    attributes: &[Attribute],
) -> RowValues {
    let mut values = predefined;
    for column in columns {
        if !values.contains_key(&column.key) {
            values.insert(column.key.clone(), lookup_attribute(attributes, &column.key));
        }
    }
    values
}

fn color_severity(value: &str, width: usize) -> String {
    let padded = format!("{:<width$}", value, width = width);
    match value {
        "FATAL" | "ERROR" => padded.red().bold().to_string(),
        "WARN" | "WARNING" => padded.yellow().bold().to_string(),
        "INFO" => padded.green().to_string(),
        "DEBUG" | "TRACE" => padded.bright_black().to_string(),
        _ => padded,
    }
}

fn color_status(value: &str, width: usize) -> String {
    let padded = format!("{:<width$}", value, width = width);
    match value {
        "ERROR" => padded.red().bold().to_string(),
        "OK" => padded.green().to_string(),
        _ => padded.dimmed().to_string(),
    }
}
