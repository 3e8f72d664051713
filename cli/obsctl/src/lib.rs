#![doc = include_str!("../README.md")]
//! Core library for the `obsctl` CLI.
//!
//! The query engine (filter parsing, column resolution, table rendering, span
//! tree reconstruction and link following) works on OTLP records supplied by a
//! [`source::TelemetrySource`]; the command layer wires it to a local data
//! directory and to stdout.

pub mod attributes;
pub mod cli;
pub mod columns;
pub mod commands;
pub mod config;
pub mod error;
pub mod filter;
pub mod links;
pub mod local_source;
pub mod records;
pub mod source;
pub mod table;
pub mod tree;

use std::io::{IsTerminal, Write};

use anyhow::{bail, Result};
use clap::CommandFactory;
use clap_complete::generate;
use tracing::level_filters::LevelFilter;
use tracing::Subscriber;
use tracing_subscriber::{fmt, fmt::MakeWriter, prelude::*, EnvFilter};

pub use cli::{CliArgs, Commands};
use cli::{ColorMode, LogsCommand, SpansCommand, TracesCommand};
use config::{load_and_resolve_config, save_profile_config, ProfileConfig};
use local_source::LocalSource;

/// Main entry point for the obsctl application logic.
pub fn run(args: CliArgs) -> Result<()> {
    // Completions need neither logging nor configuration.
    if let Some(Commands::GenerateCompletions { shell }) = &args.command {
        let mut cmd = CliArgs::command();
        let bin_name = cmd.get_name().to_string();
        generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
        return Ok(());
    }

    // Config resolution may warn.
    init_logging(args.verbose);

    if let Some(profile_name) = args.save_profile.as_ref() {
        let profile = ProfileConfig::from_cli_args(&args);
        let path = save_profile_config(profile_name, &profile)?;
        println!(
            "Configuration profile '{}' updated in {}.",
            profile_name,
            path.display()
        );
        return Ok(());
    }

    let config = load_and_resolve_config(args.config_profile.clone(), &args)?;
    tracing::debug!(?config, "Resolved configuration");

    let colorize = resolve_colorize(config.color);
    let Some(command) = &args.command else {
        bail!("No command given. Run 'obsctl --help' for usage.");
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut source = LocalSource::new(config.data_dir.clone());
    tracing::debug!(data_dir = %source.data_dir().display(), "Using local data directory");

    match command {
        Commands::Logs {
            action: LogsCommand::Query(query),
        } => {
            commands::logs::run_logs_query(&source, query, &config, colorize, &mut out)?;
        }
        Commands::Spans {
            action: SpansCommand::Query(query),
        } => {
            commands::spans::run_spans_query(&source, query, &config, colorize, &mut out)?;
        }
        Commands::Traces {
            action: TracesCommand::Get(get),
        } => {
            commands::traces::run_trace_get(&mut source, get, &config, colorize, &mut out)?;
        }
        Commands::GenerateCompletions { .. } => {
            unreachable!("generate-completions is handled before configuration is loaded");
        }
    }
    out.flush()?;
    Ok(())
}

fn init_logging(verbose: u8) {
    log_subscriber(verbose, std::io::stderr).init();
}

fn log_subscriber<W>(verbose: u8, writer: W) -> impl Subscriber + Send + Sync + 'static
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let log_level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .parse_lossy(format!("{}={}", env!("CARGO_PKG_NAME"), log_level)),
        )
}

/// Decides whether output is colored and aligns the `colored` crate with it.
fn resolve_colorize(mode: ColorMode) -> bool {
    let colorize = match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => std::io::stdout().is_terminal(),
    };
    colored::control::set_override(colorize);
    colorize
}
