//! Command line entry point for the measure evaluation engine.
//!
//! Reads a measure definition file, evaluates it against the FHIR server
//! named by the environment and writes the resulting report to stdout. The
//! process exits non-zero on any fatal failure; no partial report is ever
//! emitted.
//!
//! # Environment Variables
//! - `FHIR_SERVER`: base URL of the FHIR server (required)
//! - `FHIR_USER` / `FHIR_PASSWORD`: basic-auth credentials (optional)
//! - `FHIR_BEARER_TOKEN`: bearer token (optional)
//! - `FHIR_PAGE_COUNT`: page size requested from the server (default: 1000)
//! - `MAX_CONCURRENCY`: concurrently evaluated groups (default: core count)
//! - `FHIR_TIMEOUT_SECS`: per-request timeout in seconds (default: 300)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use mev_core::{DataStore, EvaluatorConfig, MeasureEvaluator, PathEngine};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mev")]
#[command(about = "Evaluates a FHIR Measure against the population of a FHIR server")]
struct Cli {
    /// Path of the measure definition file (JSON)
    #[arg(short = 'm', long = "measure-file")]
    measure_file: PathBuf,

    /// Also write the report to <DIR>/measure-report.json
    #[arg(long = "output-dir")]
    output_dir: Option<PathBuf>,

    /// Post the report to the FHIR server after evaluation
    #[arg(long = "post-report")]
    post_report: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mev_core=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = config_from_env()?;

    let measure_text = std::fs::read_to_string(&cli.measure_file).with_context(|| {
        format!("failed to read measure file '{}'", cli.measure_file.display())
    })?;
    let measure = fhir::Measure::from_json_str(&measure_text)?;

    let store = Arc::new(DataStore::new(&config)?);
    let engine = Arc::new(PathEngine::new());
    let evaluator = MeasureEvaluator::new(Arc::clone(&store), engine, config.max_concurrency);

    let start = Instant::now();
    let mut report = evaluator.evaluate_measure(&measure).await?;
    report
        .extension
        .push(eval_duration_extension(start.elapsed()));

    let report_text = report.to_json_string()?;
    println!("{report_text}");

    if let Some(dir) = &cli.output_dir {
        let path = dir.join("measure-report.json");
        std::fs::write(&path, &report_text)
            .with_context(|| format!("failed to write report to '{}'", path.display()))?;
    }

    if cli.post_report {
        store.post_report(report_text).await?;
        tracing::info!("report posted to server");
    }

    Ok(())
}

fn config_from_env() -> anyhow::Result<EvaluatorConfig> {
    let server = std::env::var("FHIR_SERVER").context("FHIR_SERVER is not set")?;
    let mut config = EvaluatorConfig::new(server)?;

    if let Some(page_count) = env_parsed::<u32>("FHIR_PAGE_COUNT")? {
        config = config.with_page_count(page_count)?;
    }
    if let Some(max_concurrency) = env_parsed::<usize>("MAX_CONCURRENCY")? {
        config = config.with_max_concurrency(max_concurrency)?;
    }
    if let Some(timeout_secs) = env_parsed::<u64>("FHIR_TIMEOUT_SECS")? {
        config = config.with_request_timeout(Duration::from_secs(timeout_secs));
    }

    if let Ok(token) = std::env::var("FHIR_BEARER_TOKEN") {
        if !token.is_empty() {
            config = config.with_bearer_token(token);
        }
    }

    let user = std::env::var("FHIR_USER").unwrap_or_default();
    let password = std::env::var("FHIR_PASSWORD").unwrap_or_default();
    if !user.is_empty() && !password.is_empty() {
        config = config.with_basic_auth(user, password);
    }

    Ok(config)
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => {
            let parsed = value
                .parse()
                .with_context(|| format!("failed to parse {name} value '{value}'"))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

fn eval_duration_extension(elapsed: Duration) -> fhir::Extension {
    fhir::Extension {
        url: "http://fhir-evaluator/StructureDefinition/eval-duration".into(),
        value_quantity: Some(fhir::Quantity {
            value: Some(elapsed.as_secs_f64()),
            unit: Some("s".into()),
            system: Some("http://unitsofmeasure.org".into()),
            code: Some("s".into()),
        }),
        ..fhir::Extension::default()
    }
}
