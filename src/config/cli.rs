use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use serde_json::Value;

/// Command-line arguments for the relaycache binary.
#[derive(Debug, Parser)]
#[command(name = "relaycache", version, about = "Actor-isolated request cache")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "RELAYCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Issue one request through the cache engine and print the reply.
    Fetch(Box<FetchArgs>),
}

#[derive(Debug, Args, Clone)]
pub struct FetchArgs {
    #[command(flatten)]
    pub overrides: FetchOverrides,

    /// Cache name; requests sharing a name share one cached value.
    #[arg(long = "cache-name", value_name = "NAME")]
    pub cache_name: String,

    /// Absolute URL to fetch.
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// HTTP method; defaults to GET when a URL is given.
    #[arg(long, value_name = "METHOD")]
    pub method: Option<String>,

    /// JSON request body.
    #[arg(long, value_name = "JSON", value_parser = parse_json)]
    pub body: Option<Value>,

    /// Inline JSON data to commit without a network request.
    #[arg(long, value_name = "JSON", value_parser = parse_json, conflicts_with = "url")]
    pub data: Option<Value>,

    /// Merge the new value into the cached one instead of replacing it.
    #[arg(long = "merge-existing", action = clap::ArgAction::SetTrue)]
    pub merge_existing: bool,

    /// Fetch only until the cache holds a value; later requests replay it.
    #[arg(long = "run-once", action = clap::ArgAction::SetTrue)]
    pub run_once: bool,

    /// Extra request header, as `Name: value`. May be repeated.
    #[arg(long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct FetchOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the HTTP request timeout.
    #[arg(long = "http-timeout-seconds", value_name = "SECONDS")]
    pub http_timeout_seconds: Option<u64>,

    /// Override the User-Agent sent with every request.
    #[arg(long = "http-user-agent", value_name = "AGENT")]
    pub http_user_agent: Option<String>,

    /// Override how long to wait for the engine's reply.
    #[arg(long = "reply-timeout-seconds", value_name = "SECONDS")]
    pub reply_timeout_seconds: Option<u64>,
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|err| format!("invalid JSON: {err}"))
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected `Name: value`, got `{raw}`"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("header name must not be empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}
