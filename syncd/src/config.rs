// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use url::Url;

const APP_DIR_NAME: &str = "syncd";
const CONFIG_FILE_NAME: &str = "syncd.toml";
const CONFIG_ENV_VAR: &str = "SYNCD_CONFIG_PATH";
const DATABASE_FILE_NAME: &str = "syncd.sqlite";
const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    database_path: Option<String>,
    provider_id: Option<String>,
    orchestrator_url: Option<String>,
    refresh_token_path: Option<String>,
    reconcile_interval_secs: Option<u64>,
    launch_user_instances: Option<bool>,
    verbose: Option<bool>,
}

#[derive(Debug)]
pub struct Config {
    pub database_path: PathBuf,
    pub provider_id: String,
    pub orchestrator_url: String,
    pub refresh_token_path: Option<PathBuf>,
    pub reconcile_interval_secs: u64,
    pub launch_user_instances: bool,
    pub verbose: bool,
    pub config_path: Option<PathBuf>,
}

impl Config {
    /// Reads the provider refresh token; an unset path yields an empty token.
    pub fn read_refresh_token(&self) -> Result<String> {
        match &self.refresh_token_path {
            Some(path) => {
                let raw = fs::read_to_string(path).with_context(|| {
                    format!("failed to read refresh token from {}", path.display())
                })?;
                Ok(raw.trim().to_string())
            }
            None => Ok(String::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub database_path: ConfigValue<PathBuf>,
    pub provider_id: ConfigValue<String>,
    pub orchestrator_url: ConfigValue<String>,
    pub reconcile_interval_secs: ConfigValue<u64>,
    pub launch_user_instances: ConfigValue<bool>,
    pub verbose: ConfigValue<bool>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub database_path: Option<PathBuf>,
    pub reconcile_interval_secs: Option<u64>,
    pub verbose: Option<bool>,
}

pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let config_dir = config_path.as_deref().and_then(|path| path.parent());

    let (database_path, database_source) = match overrides.database_path {
        Some(path) => (expand_path(path), ConfigSource::Override),
        None => match file_config.database_path {
            Some(raw) => (resolve_path(&raw, config_dir), ConfigSource::ConfigFile),
            None => (
                default_database_path().with_context(|| {
                    "failed to resolve default database path; specify --database-path or set database_path in the config file"
                })?,
                ConfigSource::Default,
            ),
        },
    };

    let provider_id = file_config
        .provider_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .context("provider_id must be set in the config file")?;

    let orchestrator_url = file_config
        .orchestrator_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .context("orchestrator_url must be set in the config file")?;
    validate_orchestrator_url(&orchestrator_url)?;

    let refresh_token_path = file_config
        .refresh_token_path
        .map(|raw| resolve_path(&raw, config_dir));

    let (reconcile_interval_secs, reconcile_interval_source) =
        match overrides.reconcile_interval_secs {
            Some(secs) => (secs, ConfigSource::Override),
            None => match file_config.reconcile_interval_secs {
                Some(secs) => (secs, ConfigSource::ConfigFile),
                None => (DEFAULT_RECONCILE_INTERVAL_SECS, ConfigSource::Default),
            },
        };
    if reconcile_interval_secs == 0 {
        anyhow::bail!("reconcile_interval_secs must be at least 1");
    }

    let (launch_user_instances, launch_user_instances_source) =
        match file_config.launch_user_instances {
            Some(value) => (value, ConfigSource::ConfigFile),
            None => (false, ConfigSource::Default),
        };

    let (verbose, verbose_source) = match overrides.verbose {
        Some(verbose) => (verbose, ConfigSource::Override),
        None => match file_config.verbose {
            Some(verbose) => (verbose, ConfigSource::ConfigFile),
            None => (false, ConfigSource::Default),
        },
    };

    let config = Config {
        database_path,
        provider_id,
        orchestrator_url,
        refresh_token_path,
        reconcile_interval_secs,
        launch_user_instances,
        verbose,
        config_path: config_path.clone(),
    };

    let report = ConfigReport {
        config_path,
        config_path_source,
        config_file_present,
        database_path: ConfigValue {
            value: config.database_path.clone(),
            source: database_source,
        },
        provider_id: ConfigValue {
            value: config.provider_id.clone(),
            source: ConfigSource::ConfigFile,
        },
        orchestrator_url: ConfigValue {
            value: config.orchestrator_url.clone(),
            source: ConfigSource::ConfigFile,
        },
        reconcile_interval_secs: ConfigValue {
            value: config.reconcile_interval_secs,
            source: reconcile_interval_source,
        },
        launch_user_instances: ConfigValue {
            value: config.launch_user_instances,
            source: launch_user_instances_source,
        },
        verbose: ConfigValue {
            value: config.verbose,
            source: verbose_source,
        },
    };

    Ok(LoadResult { config, report })
}

fn validate_orchestrator_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw).with_context(|| format!("orchestrator_url {raw:?} is not a valid URL"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => anyhow::bail!("orchestrator_url must use http or https, got {other}"),
    }
}

pub fn ensure_database_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }
    Ok(())
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    Ok(default_config_dir()?.join(CONFIG_FILE_NAME))
}

fn default_database_path() -> Result<PathBuf> {
    Ok(default_data_dir()?.join(DATABASE_FILE_NAME))
}

fn default_config_dir() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME))
}

fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME))
}
