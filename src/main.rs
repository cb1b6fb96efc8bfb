use std::{process, sync::Arc};

use relaycache::{
    client::{CacheClient, CallSite},
    config::{self, Command, FetchArgs},
    engine::{Engine, EngineContext},
    error::AppError,
    infra::{http::HttpTransport, telemetry},
};
use relaycache_types::{CacheName, QueryConfig, RequestBody, RequestConfig};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;

    match cli_args.command {
        Command::Fetch(args) => run_fetch(settings, *args).await,
    }
}

async fn run_fetch(settings: config::Settings, args: FetchArgs) -> Result<(), AppError> {
    let (query, request) = build_request(&args)?;

    let transport = HttpTransport::new(&settings.http)?;
    let handle = Engine::spawn(
        EngineContext::new(Arc::new(transport)),
        settings.engine.mailbox_capacity,
    );
    let client = CacheClient::new(handle, &settings);
    let site = CallSite::new(client, query, request);

    info!(
        target = "relaycache::fetch",
        id = %site.id(),
        "Dispatching request"
    );
    let value = site.request().await?;

    let rendered = serde_json::to_string_pretty(&value)
        .map_err(|err| AppError::unexpected(format!("failed to render reply: {err}")))?;
    println!("{rendered}");
    Ok(())
}

fn build_request(args: &FetchArgs) -> Result<(QueryConfig, RequestConfig), AppError> {
    if args.url.is_none() && args.data.is_none() {
        return Err(AppError::validation(
            "fetch requires --url or --data",
        ));
    }
    if args.url.is_none() && args.method.is_some() {
        return Err(AppError::validation("--method requires --url"));
    }

    let mut query = QueryConfig::new(CacheName::from(args.cache_name.clone()));
    query.data = args.data.clone();
    query.merge_existing = args.merge_existing;
    query.run_once = args.run_once;

    let request = RequestConfig {
        method: args
            .url
            .as_ref()
            .map(|_| args.method.clone().unwrap_or_else(|| "GET".to_string())),
        url: args.url.clone(),
        body: args.body.clone().map(RequestBody::from),
        headers: args.headers.iter().cloned().collect(),
        ..RequestConfig::default()
    };

    Ok((query, request))
}
