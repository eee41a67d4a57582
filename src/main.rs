use std::{process, sync::Arc};

use serde::Serialize;
use serde_json::Value;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use vetrina::{
    application::{
        CacheWarmer, ExecutorStats, HealthStatus, RequestExecutor, RequestOptions, WarmReport,
        error::AppError,
    },
    config::{self, QueryArgs, Settings},
    infra::{graphql::GraphQlBackend, telemetry},
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
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
        config::Command::Query(args) => run_query(&settings, args).await,
        config::Command::Health => run_health(&settings).await,
        config::Command::Warm => run_warm(&settings).await,
        config::Command::Stats => run_stats(&settings).await,
    }
}

fn build_executor(settings: &Settings) -> Result<Arc<RequestExecutor>, AppError> {
    let backend = GraphQlBackend::from_settings(&settings.backend)?;
    info!(endpoint = %backend.endpoint(), "GraphQL backend configured");
    Ok(Arc::new(RequestExecutor::new(
        Arc::new(backend),
        settings.executor_config(),
    )))
}

#[derive(Serialize)]
struct QueryOutput {
    run: u32,
    from_cache: bool,
    execution_ms: f64,
    cache_key: Option<String>,
    data: Value,
}

async fn run_query(settings: &Settings, args: QueryArgs) -> Result<(), AppError> {
    let query = tokio::fs::read_to_string(&args.query_file)
        .await
        .map_err(|err| {
            AppError::validation(format!(
                "cannot read query file {}: {err}",
                args.query_file.display()
            ))
        })?;
    let variables = parse_variables(args.variables.as_deref())?;

    let mut options = RequestOptions::default();
    if args.no_cache {
        options = options.no_cache();
    }
    if args.force_refresh {
        options = options.force_refresh();
    }

    let executor = build_executor(settings)?;
    for run in 1..=args.repeat {
        let response = executor
            .request_value(&query, variables.clone(), options.clone())
            .await?;
        print_json(&QueryOutput {
            run,
            from_cache: response.from_cache,
            execution_ms: response.execution_time.as_secs_f64() * 1000.0,
            cache_key: response.cache_key,
            data: response.data,
        })?;
    }
    Ok(())
}

async fn run_health(settings: &Settings) -> Result<(), AppError> {
    let executor = build_executor(settings)?;
    let report = executor.health_check().await;
    print_json(&report)?;

    if report.status == HealthStatus::Unhealthy {
        return Err(AppError::unexpected(format!(
            "backend unhealthy: {}",
            report.backend_error.as_deref().unwrap_or("unknown error")
        )));
    }
    Ok(())
}

async fn run_warm(settings: &Settings) -> Result<(), AppError> {
    let executor = build_executor(settings)?;
    let report = warm(executor).await;
    print_json(&report)
}

#[derive(Serialize)]
struct StatsOutput {
    warm: WarmReport,
    executor: ExecutorStats,
}

async fn run_stats(settings: &Settings) -> Result<(), AppError> {
    let executor = build_executor(settings)?;
    let warm = warm(executor.clone()).await;
    print_json(&StatsOutput {
        warm,
        executor: executor.stats(),
    })
}

async fn warm(executor: Arc<RequestExecutor>) -> WarmReport {
    CacheWarmer::new(executor)
        .warm(CacheWarmer::storefront_requests())
        .await
}

fn parse_variables(raw: Option<&str>) -> Result<Value, AppError> {
    let Some(raw) = raw else {
        return Ok(Value::Object(Default::default()));
    };
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| AppError::validation(format!("--variables is not valid JSON: {err}")))?;
    if !value.is_object() {
        return Err(AppError::validation("--variables must be a JSON object"));
    }
    Ok(value)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables_default_to_empty_object() {
        assert_eq!(
            parse_variables(None).expect("empty"),
            Value::Object(Default::default())
        );
    }

    #[test]
    fn variables_must_be_an_object() {
        assert!(parse_variables(Some("[1,2]")).is_err());
        assert!(parse_variables(Some("{not json")).is_err());
        let parsed = parse_variables(Some(r#"{"first":3}"#)).expect("object");
        assert_eq!(parsed["first"], 3);
    }
}
