//! Configuration loading, merging and saving for `obsctl`.
//!
//! Settings come from the `.obsctl.toml` file in the working directory: an
//! optional `[global]` section and named `[profiles.<name>]` sections. The
//! precedence order is CLI arguments > profile > global > built-in defaults.

use crate::cli::{CliArgs, ColorMode, Commands, LogsCommand, SpansCommand, TracesCommand, DEFAULT_DATA_DIR, DEFAULT_LIMIT};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{fs, io::Write, path::Path, path::PathBuf};

const OBSCTL_TOML: &str = ".obsctl.toml";
const CONFIG_VERSION: f32 = 1.0;

/// The whole `.obsctl.toml` file.
#[derive(Debug, Deserialize, Serialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: f32,

    #[serde(default)]
    pub global: Option<ProfileConfig>,

    #[serde(default)]
    pub profiles: IndexMap<String, ProfileConfig>,
}

/// Settings of one profile (or the global section).
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ProfileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<ColorMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_columns: Option<Vec<String>>,
}

/// The merged configuration commands run with.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveConfig {
    pub data_dir: PathBuf,
    pub color: ColorMode,
    pub limit: usize,
    pub log_columns: Option<Vec<String>>,
    pub span_columns: Option<Vec<String>>,
    pub trace_columns: Option<Vec<String>>,
    pub verbose: u8,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            color: ColorMode::Auto,
            limit: DEFAULT_LIMIT,
            log_columns: None,
            span_columns: None,
            trace_columns: None,
            verbose: 0,
        }
    }
}

fn non_empty(columns: &[String]) -> Option<Vec<String>> {
    if columns.is_empty() {
        None
    } else {
        Some(columns.to_vec())
    }
}

impl ProfileConfig {
    /// Builds a profile from CLI arguments, keeping only values that differ from defaults.
    pub fn from_cli_args(args: &CliArgs) -> Self {
        let mut profile = ProfileConfig {
            data_dir: args.data_dir.clone(),
            color: args.color.filter(|&c| c != ColorMode::Auto),
            ..Default::default()
        };
        match &args.command {
            Some(Commands::Logs {
                action: LogsCommand::Query(query),
            }) => {
                profile.limit = query.limit.filter(|&l| l != DEFAULT_LIMIT);
                profile.log_columns = non_empty(&query.output.columns);
            }
            Some(Commands::Spans {
                action: SpansCommand::Query(query),
            }) => {
                profile.limit = query.limit.filter(|&l| l != DEFAULT_LIMIT);
                profile.span_columns = non_empty(&query.output.columns);
            }
            Some(Commands::Traces {
                action: TracesCommand::Get(get),
            }) => {
                profile.trace_columns = non_empty(&get.output.columns);
            }
            Some(Commands::GenerateCompletions { .. }) | None => {}
        }
        profile
    }
}

/// Resolves the effective configuration from `.obsctl.toml` in the working directory.
pub fn load_and_resolve_config(
    config_profile_name: Option<String>,
    cli_args: &CliArgs,
) -> Result<EffectiveConfig> {
    resolve_config_at(&get_config_path()?, config_profile_name, cli_args)
}

pub(crate) fn resolve_config_at(
    config_path: &Path,
    config_profile_name: Option<String>,
    cli_args: &CliArgs,
) -> Result<EffectiveConfig> {
    let mut effective = EffectiveConfig::default();

    if !config_path.exists() {
        if let Some(profile_name) = &config_profile_name {
            tracing::warn!(
                path = %config_path.display(),
                profile = %profile_name,
                "Config file not found while trying to load profile. Using CLI arguments only."
            );
        }
        apply_cli_args_to_effective(cli_args, &mut effective);
        return Ok(effective);
    }

    let config_file = load_config_file(config_path)?;
    if let Some(global_config) = &config_file.global {
        apply_profile_to_effective(global_config, &mut effective);
    }

    if let Some(profile_name) = config_profile_name {
        let profile_config = config_file.profiles.get(&profile_name).ok_or_else(|| {
            anyhow::anyhow!(
                "Configuration profile '{}' not found in config file '{}'",
                profile_name,
                config_path.display()
            )
        })?;
        apply_profile_to_effective(profile_config, &mut effective);
        tracing::info!(profile = %profile_name, "Loaded configuration from profile");
    }

    apply_cli_args_to_effective(cli_args, &mut effective);
    Ok(effective)
}

fn apply_profile_to_effective(profile: &ProfileConfig, effective: &mut EffectiveConfig) {
    if let Some(val) = &profile.data_dir {
        effective.data_dir = val.clone();
    }
    if let Some(val) = profile.color {
        effective.color = val;
    }
    if let Some(val) = profile.limit {
        effective.limit = val;
    }
    if profile.log_columns.is_some() {
        effective.log_columns = profile.log_columns.clone();
    }
    if profile.span_columns.is_some() {
        effective.span_columns = profile.span_columns.clone();
    }
    if profile.trace_columns.is_some() {
        effective.trace_columns = profile.trace_columns.clone();
    }
}

// Command-level options (limit, columns) are applied by each command.
fn apply_cli_args_to_effective(cli_args: &CliArgs, effective: &mut EffectiveConfig) {
    if let Some(val) = &cli_args.data_dir {
        effective.data_dir = val.clone();
    }
    if let Some(val) = cli_args.color {
        effective.color = val;
    }
    effective.verbose = cli_args.verbose;
}

pub fn get_config_path() -> Result<PathBuf> {
    Ok(PathBuf::from(OBSCTL_TOML))
}

fn load_or_default_config_file(path: &Path) -> Result<ConfigFile> {
    if path.exists() {
        load_config_file(path)
    } else {
        Ok(ConfigFile {
            version: CONFIG_VERSION,
            ..Default::default()
        })
    }
}

/// Stores `profile_data` under `profile_name` in `.obsctl.toml`, merging over an existing profile.
pub fn save_profile_config(profile_name: &str, profile_data: &ProfileConfig) -> Result<PathBuf> {
    let config_path = get_config_path()?;
    save_profile_config_at(&config_path, profile_name, profile_data)?;
    Ok(config_path)
}

fn save_profile_config_at(config_path: &Path, profile_name: &str, profile_data: &ProfileConfig) -> Result<()> {
    let mut config = load_or_default_config_file(config_path)?;
    let merged = match config.profiles.get(profile_name) {
        Some(existing) => merge_into_profile_config(existing, profile_data),
        None => profile_data.clone(),
    };
    config.profiles.insert(profile_name.to_string(), merged);
    let toml_string =
        toml::to_string_pretty(&config).context("Failed to serialize configuration to TOML")?;
    let mut file = fs::File::create(config_path).with_context(|| {
        format!(
            "Failed to create or open config file for writing: {}",
            config_path.display()
        )
    })?;
    file.write_all(toml_string.as_bytes())
        .with_context(|| format!("Failed to write to config file: {}", config_path.display()))?;
    Ok(())
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse TOML from config file: {}", path.display()))?;
    Ok(config)
}

pub fn merge_into_profile_config(base: &ProfileConfig, overrides: &ProfileConfig) -> ProfileConfig {
    ProfileConfig {
        data_dir: overrides.data_dir.clone().or_else(|| base.data_dir.clone()),
        color: overrides.color.or(base.color),
        limit: overrides.limit.or(base.limit),
        log_columns: overrides
            .log_columns
            .clone()
            .or_else(|| base.log_columns.clone()),
        span_columns: overrides
            .span_columns
            .clone()
            .or_else(|| base.span_columns.clone()),
        trace_columns: overrides
            .trace_columns
            .clone()
            .or_else(|| base.trace_columns.clone()),
    }
}
