//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{CliArgs, Command, FetchArgs, FetchOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "relaycache";
const ENV_PREFIX: &str = "RELAYCACHE";
const DEFAULT_MAILBOX_CAPACITY: u64 = 256;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TASK_MAX_AGE_SECS: u64 = 300;
const DEFAULT_REPLY_TIMEOUT_SECS: u64 = 30;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub engine: EngineSettings,
    pub http: HttpSettings,
    pub tasks: TaskSettings,
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
pub struct EngineSettings {
    /// Bound of the engine's inbound mailbox.
    pub mailbox_capacity: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct TaskSettings {
    /// Pending caller tasks older than this are swept.
    pub max_age: Duration,
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub reply_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
            engine: EngineSettings {
                mailbox_capacity: NonZeroUsize::new(DEFAULT_MAILBOX_CAPACITY as usize)
                    .unwrap_or(NonZeroUsize::MIN),
            },
            http: HttpSettings::default(),
            tasks: TaskSettings {
                max_age: Duration::from_secs(DEFAULT_TASK_MAX_AGE_SECS),
            },
            client: ClientSettings {
                reply_timeout: Duration::from_secs(DEFAULT_REPLY_TIMEOUT_SECS),
            },
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            user_agent: default_user_agent(),
        }
    }
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

    match &cli.command {
        Command::Fetch(args) => raw.apply_fetch_overrides(&args.overrides),
    }

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
    engine: RawEngineSettings,
    http: RawHttpSettings,
    tasks: RawTaskSettings,
    client: RawClientSettings,
}

impl RawSettings {
    fn apply_fetch_overrides(&mut self, overrides: &FetchOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(seconds) = overrides.http_timeout_seconds {
            self.http.timeout_seconds = Some(seconds);
        }
        if let Some(agent) = overrides.http_user_agent.as_ref() {
            self.http.user_agent = Some(agent.clone());
        }
        if let Some(seconds) = overrides.reply_timeout_seconds {
            self.client.reply_timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            engine,
            http,
            tasks,
            client,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            engine: build_engine_settings(engine)?,
            http: build_http_settings(http)?,
            tasks: build_task_settings(tasks)?,
            client: build_client_settings(client)?,
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

fn build_engine_settings(engine: RawEngineSettings) -> Result<EngineSettings, LoadError> {
    let capacity = engine
        .mailbox_capacity
        .unwrap_or(DEFAULT_MAILBOX_CAPACITY);
    let capacity = usize::try_from(capacity).map_err(|_| {
        LoadError::invalid(
            "engine.mailbox_capacity",
            "value exceeds supported range for usize",
        )
    })?;
    let mailbox_capacity = NonZeroUsize::new(capacity)
        .ok_or_else(|| LoadError::invalid("engine.mailbox_capacity", "must be greater than zero"))?;

    Ok(EngineSettings { mailbox_capacity })
}

fn build_http_settings(http: RawHttpSettings) -> Result<HttpSettings, LoadError> {
    let timeout = seconds(
        http.timeout_seconds.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        "http.timeout_seconds",
    )?;

    let user_agent = match http.user_agent {
        Some(agent) => {
            let trimmed = agent.trim();
            if trimmed.is_empty() {
                return Err(LoadError::invalid("http.user_agent", "must not be empty"));
            }
            trimmed.to_string()
        }
        None => default_user_agent(),
    };

    Ok(HttpSettings {
        timeout,
        user_agent,
    })
}

fn build_task_settings(tasks: RawTaskSettings) -> Result<TaskSettings, LoadError> {
    let max_age = seconds(
        tasks.max_age_seconds.unwrap_or(DEFAULT_TASK_MAX_AGE_SECS),
        "tasks.max_age_seconds",
    )?;
    Ok(TaskSettings { max_age })
}

fn build_client_settings(client: RawClientSettings) -> Result<ClientSettings, LoadError> {
    let reply_timeout = seconds(
        client
            .reply_timeout_seconds
            .unwrap_or(DEFAULT_REPLY_TIMEOUT_SECS),
        "client.reply_timeout_seconds",
    )?;
    Ok(ClientSettings { reply_timeout })
}

fn seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn default_user_agent() -> String {
    format!("relaycache/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngineSettings {
    mailbox_capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    timeout_seconds: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTaskSettings {
    max_age_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawClientSettings {
    reply_timeout_seconds: Option<u64>,
}
