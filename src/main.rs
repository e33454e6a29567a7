use std::{
    collections::HashSet,
    io::{self, Write},
    process,
};

use fetchcache::{
    cache::{
        CacheError, ClientConfig, FetchCache, FetchOptions, RequestKey, ServerFetchResult,
        compute_key, headers_to_map,
    },
    config::{self, Command, GetArgs, KeyArgs, LoadError, Settings},
    infra::{error::InfraError, telemetry},
};
use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[derive(Debug, Error)]
enum AppError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        Self::Infra(InfraError::from(err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Infra(InfraError::from(err))
    }
}

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
        .with_writer(io::stderr)
        .with_max_level(Level::ERROR)
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
        Command::Key(args) => run_key(args),
        Command::Get(args) => run_get(&settings, args).await,
    }
}

fn request_options(headers: &[(String, String)]) -> FetchOptions {
    let options = FetchOptions::new();
    if headers.is_empty() {
        return options;
    }
    options.headers(headers_to_map(headers.iter().cloned()))
}

fn run_key(args: KeyArgs) -> Result<(), AppError> {
    let options = args
        .options
        .into_iter()
        .fold(request_options(&args.headers), |options, (name, value)| {
            options.field(name, value)
        });
    let computed = compute_key(&RequestKey::from(args.key), &options)?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", computed.hash().unwrap_or("skip"))?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct Summary<'a> {
    url: &'a str,
    hash: Option<&'a str>,
    cached: bool,
    #[serde(flatten)]
    result: ServerFetchResult,
}

async fn run_get(settings: &Settings, args: GetArgs) -> Result<(), AppError> {
    let cache = FetchCache::builder()
        .client_config(ClientConfig::from(&settings.client))
        .build()?;
    let options = request_options(&args.headers);

    let mut seen = HashSet::new();
    let unique: Vec<RequestKey> = args
        .urls
        .iter()
        .filter(|url| seen.insert(url.as_str()))
        .map(|url| RequestKey::from(url.as_str()))
        .collect();

    let fetched = join_all(unique.iter().map(|key| cache.server_fetch(key, &options))).await;
    let mut fetched = fetched.into_iter();
    info!(urls = args.urls.len(), unique = unique.len(), "Requests settled");

    let mut answered = HashSet::new();
    let mut stdout = io::stdout().lock();
    for url in &args.urls {
        let key = RequestKey::from(url.as_str());
        let computed = compute_key(&key, &options)?;
        let first = answered.insert(url.as_str());
        let result = match first.then(|| fetched.next()).flatten() {
            Some(result) => result?,
            None => cache.server_fetch(&key, &options).await?,
        };

        let summary = Summary {
            url: url.as_str(),
            hash: computed.hash(),
            cached: !first,
            result,
        };
        writeln!(stdout, "{}", serde_json::to_string(&summary)?)?;
    }
    Ok(())
}
