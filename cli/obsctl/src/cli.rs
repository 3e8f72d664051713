use chrono::{DateTime, Duration, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell as ClapShell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_LIMIT: usize = 50;
pub const DEFAULT_DATA_DIR: &str = ".obsctl/data";

const USAGE_EXAMPLES: &str = "\
EXAMPLES:
    # Error logs from the checkout service
    obsctl logs query -f 'service.name = checkout' -f 'otel.log.severity.range is_one_of ERROR FATAL'

    # Slow spans with an extra attribute column, as CSV
    obsctl spans query -f 'otel.span.duration > 500000000' -c http.route -o csv

    # A trace and every trace linked from it
    obsctl traces get 0af7651916cd43dd8448eb211c80319c --follow-links

    # Generate shell completions for zsh
    obsctl generate-completions zsh";

/// When to emit ANSI colors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Color when stdout is a terminal (default)
    #[default]
    Auto,
    /// Always color
    Always,
    /// Never color
    Never,
}

/// Output format for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Aligned table
    #[default]
    Table,
    /// CSV with canonical column keys as header
    Csv,
    /// OTLP/JSON document
    Json,
}

/// obsctl: Query OTLP logs, spans and traces from the terminal.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, after_help = USAGE_EXAMPLES)]
pub struct CliArgs {
    /// Directory holding OTLP exports under `traces/` and `logs/`.
    #[arg(long, global = true, env = "OBSCTL_DATA_DIR", value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Load configuration from a specific profile in .obsctl.toml.
    #[arg(long, global = true, value_name = "NAME")]
    pub config_profile: Option<String>,

    /// Save the current options to the specified profile in .obsctl.toml and exit.
    #[arg(long, global = true, value_name = "PROFILE_NAME")]
    pub save_profile: Option<String>,

    /// When to color output.
    #[arg(long, global = true, value_enum)]
    pub color: Option<ColorMode>,

    /// Increase logging verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Query log records
    Logs {
        #[command(subcommand)]
        action: LogsCommand,
    },
    /// Query spans
    Spans {
        #[command(subcommand)]
        action: SpansCommand,
    },
    /// Fetch whole traces
    Traces {
        #[command(subcommand)]
        action: TracesCommand,
    },
    /// Generate shell completion script
    #[command(name = "generate-completions", hide = true)]
    GenerateCompletions {
        /// Shell for which to generate completions
        #[arg(value_enum)]
        shell: ClapShell,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum LogsCommand {
    /// List log records matching the filters
    Query(QueryArgs),
}

#[derive(Subcommand, Debug, Clone)]
pub enum SpansCommand {
    /// List spans matching the filters
    Query(QueryArgs),
}

#[derive(Subcommand, Debug, Clone)]
pub enum TracesCommand {
    /// Show every span of one trace as a tree
    Get(TraceGetArgs),
}

/// Options shared by every command that renders records.
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Column to display: a predefined key, an alias or any attribute key. Repeatable.
    #[arg(short = 'c', long = "column", value_name = "COLUMN")]
    pub columns: Vec<String>,

    /// Only include records at or after this time (RFC 3339, `now` or `now-<duration>`).
    #[arg(long, value_parser = parse_time)]
    pub from: Option<DateTime<Utc>>,

    /// Only include records at or before this time.
    #[arg(long, value_parser = parse_time)]
    pub to: Option<DateTime<Utc>>,

    /// Output format.
    #[arg(short = 'o', long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    /// Omit the header line.
    #[arg(long)]
    pub skip_header: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct QueryArgs {
    /// Filter expression, e.g. `service.name = api` or `http.status_code >= 500`. Repeatable, all must match.
    #[arg(short = 'f', long = "filter", value_name = "FILTER")]
    pub filters: Vec<String>,

    /// Maximum number of records to display [default: 50]
    #[arg(long)]
    pub limit: Option<usize>,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TraceGetArgs {
    /// Hex-encoded trace ID.
    pub trace_id: String,

    /// Also fetch every trace reachable through span links.
    #[arg(long)]
    pub follow_links: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Parses a duration like `500ms`, `30s`, `5m`, `2h` or `1d`. A bare number is seconds.
pub fn parse_duration_to_millis(input: &str) -> Result<u64, String> {
    let input = input.trim();
    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    if digits.is_empty() {
        return Err(format!("Invalid duration '{}': missing number", input));
    }
    let value: u64 = digits
        .parse()
        .map_err(|e| format!("Invalid duration '{}': {}", input, e))?;
    let multiplier = match unit {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" => 60 * 1_000,
        "h" => 60 * 60 * 1_000,
        "d" => 24 * 60 * 60 * 1_000,
        other => {
            return Err(format!(
                "Invalid duration unit '{}' in '{}' (expected ms, s, m, h or d)",
                other, input
            ))
        }
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("Duration '{}' is too large", input))
}

fn parse_time(input: &str) -> Result<DateTime<Utc>, String> {
    parse_time_at(input, Utc::now())
}

/// Parses RFC 3339, `now` or `now-<duration>` relative to `now`.
pub fn parse_time_at(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, String> {
    let input = input.trim();
    if input == "now" {
        return Ok(now);
    }
    if let Some(rest) = input.strip_prefix("now-") {
        let millis = parse_duration_to_millis(rest)?;
        return i64::try_from(millis)
            .ok()
            .and_then(Duration::try_milliseconds)
            .and_then(|delta| now.checked_sub_signed(delta))
            .ok_or_else(|| format!("Time '{}' is out of range", input));
    }
    DateTime::parse_from_rfc3339(input)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            format!(
                "Invalid time '{}': {} (expected RFC 3339, 'now' or 'now-<duration>')",
                input, e
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration_to_millis("250ms"), Ok(250));
        assert_eq!(parse_duration_to_millis("30s"), Ok(30_000));
        assert_eq!(parse_duration_to_millis("30"), Ok(30_000));
        assert_eq!(parse_duration_to_millis("5m"), Ok(300_000));
        assert_eq!(parse_duration_to_millis("2h"), Ok(7_200_000));
        assert_eq!(parse_duration_to_millis("1d"), Ok(86_400_000));
        assert!(parse_duration_to_millis("m").is_err());
        assert!(parse_duration_to_millis("5w").is_err());
        assert!(parse_duration_to_millis("").is_err());
    }

    #[test]
    fn test_parse_time() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_time_at("now", now), Ok(now));
        assert_eq!(
            parse_time_at("now-15m", now),
            Ok(Utc.with_ymd_and_hms(2024, 5, 1, 11, 45, 0).unwrap())
        );
        assert_eq!(
            parse_time_at("2024-05-01T10:00:00+02:00", now),
            Ok(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap())
        );
        assert!(parse_time_at("yesterday", now).is_err());
        assert!(parse_time_at("now-abc", now).is_err());
    }

    #[test]
    fn test_parse_query_command() {
        let args = CliArgs::try_parse_from([
            "obsctl",
            "--color",
            "never",
            "logs",
            "query",
            "-f",
            "service.name = api",
            "-c",
            "service",
            "-c",
            "http.route",
            "--limit",
            "10",
            "-o",
            "csv",
        ])
        .unwrap();
        assert_eq!(args.color, Some(ColorMode::Never));
        match args.command {
            Some(Commands::Logs {
                action: LogsCommand::Query(query),
            }) => {
                assert_eq!(query.filters, vec!["service.name = api"]);
                assert_eq!(query.output.columns, vec!["service", "http.route"]);
                assert_eq!(query.limit, Some(10));
                assert_eq!(query.output.output, OutputFormat::Csv);
                assert!(!query.output.skip_header);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_trace_get_with_global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "obsctl",
            "traces",
            "get",
            "abc123",
            "--follow-links",
            "--data-dir",
            "/tmp/otlp",
            "-vv",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/otlp")));
        match args.command {
            Some(Commands::Traces {
                action: TracesCommand::Get(get),
            }) => {
                assert_eq!(get.trace_id, "abc123");
                assert!(get.follow_links);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_time_is_rejected_by_parser() {
        let result = CliArgs::try_parse_from(["obsctl", "spans", "query", "--from", "soon"]);
        assert!(result.is_err());
    }
}
