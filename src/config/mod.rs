//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::BTreeMap, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use reqwest::header::{HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::default_user_agent;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "fetchcache";
const ENV_PREFIX: &str = "FETCHCACHE";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_TIMEOUT_SECS: u64 = 3600;

/// Command-line arguments for the fetchcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "fetchcache",
    version,
    about = "Keyed fetch cache with request de-duplication"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "FETCHCACHE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the cache hash of a request, or `skip` when it would not be sent.
    Key(KeyArgs),
    /// Fetch URLs through one cache and print a JSON summary per URL.
    Get(GetArgs),
}

#[derive(Debug, Args, Clone)]
pub struct KeyArgs {
    /// Request key, usually a URL.
    #[arg(value_name = "KEY")]
    pub key: String,

    /// Request header, repeatable.
    #[arg(long = "header", value_name = "NAME=VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Extra cache-relevant option with a JSON value, repeatable.
    #[arg(long = "option", value_name = "NAME=JSON", value_parser = parse_option)]
    pub options: Vec<(String, Value)>,
}

#[derive(Debug, Args, Clone)]
pub struct GetArgs {
    /// URLs to fetch; repeated URLs are answered from the cache.
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<String>,

    /// Request header, repeatable.
    #[arg(long = "header", value_name = "NAME=VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the User-Agent sent with requests.
    #[arg(long = "client-user-agent", value_name = "AGENT", global = true)]
    pub client_user_agent: Option<String>,

    /// Override the request timeout; 0 disables it.
    #[arg(long = "client-timeout-seconds", value_name = "SECONDS", global = true)]
    pub client_timeout_seconds: Option<u64>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub client: ClientSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub user_agent: String,
    /// `Duration::ZERO` disables the timeout.
    pub timeout: Duration,
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    client: RawClientSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(agent) = overrides.client_user_agent.as_ref() {
            self.client.user_agent = Some(agent.clone());
        }
        if let Some(seconds) = overrides.client_timeout_seconds {
            self.client.timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            logging: build_logging_settings(raw.logging)?,
            client: build_client_settings(raw.client)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_client_settings(client: RawClientSettings) -> Result<ClientSettings, LoadError> {
    let user_agent = client
        .user_agent
        .unwrap_or_else(|| default_user_agent().to_string());
    if user_agent.trim().is_empty() {
        return Err(LoadError::invalid("client.user_agent", "must not be empty"));
    }
    HeaderValue::from_str(&user_agent)
        .map_err(|err| LoadError::invalid("client.user_agent", err.to_string()))?;

    let timeout_seconds = client.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_seconds > MAX_TIMEOUT_SECS {
        return Err(LoadError::invalid(
            "client.timeout_seconds",
            format!("must not exceed {MAX_TIMEOUT_SECS}"),
        ));
    }

    let mut headers = BTreeMap::new();
    for (name, value) in client.headers {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| LoadError::invalid("client.headers", format!("`{name}`: {err}")))?;
        HeaderValue::from_str(&value)
            .map_err(|err| LoadError::invalid("client.headers", format!("`{name}`: {err}")))?;
        headers.insert(name.to_ascii_lowercase(), value);
    }

    Ok(ClientSettings {
        user_agent,
        timeout: Duration::from_secs(timeout_seconds),
        headers,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawClientSettings {
    user_agent: Option<String>,
    timeout_seconds: Option<u64>,
    headers: BTreeMap<String, String>,
}

fn split_pair(raw: &str) -> Result<(&str, &str), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name in `{raw}`"));
    }
    Ok((name, value))
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = split_pair(raw)?;
    Ok((name.to_string(), value.trim().to_string()))
}

/// `NAME=JSON`; a value that is not valid JSON is taken as a plain string.
fn parse_option(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = split_pair(raw)?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}
