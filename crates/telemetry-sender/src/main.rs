//! Telemetry send CLI

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use telemetry_core::config::ObservabilityConfig;
use telemetry_core::prelude::*;
use telemetry_sender::EventDispatcher;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "telemetry-send")]
#[command(about = "Evaluate a telemetry event against its daily policy and send it")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(long, env = "TELEMETRY_CONFIG")]
    config: Option<String>,

    /// Event action identifier
    #[arg(long, required_unless_present = "site_edit")]
    action: Option<String>,

    /// Event field, `key=value`; JSON values are parsed, anything else is a string
    #[arg(long = "field", value_parser = parse_key_val)]
    fields: Vec<(String, String)>,

    /// Inbound request header, `name=value`; repeat a name for multiple values
    #[arg(long = "header", value_parser = parse_key_val)]
    headers: Vec<(String, String)>,

    /// Send the site edit event instead of `--action`
    #[arg(long, conflicts_with = "action")]
    site_edit: bool,
}

fn parse_key_val(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{}`", s))?;
    if key.trim().is_empty() {
        return Err(format!("empty key in `{}`", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn field_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn collect_headers(pairs: Vec<(String, String)>) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in pairs {
        let merged = match headers.remove(&name) {
            None => HeaderValue::Single(value),
            Some(HeaderValue::Single(first)) => HeaderValue::Multi(vec![first, value]),
            Some(HeaderValue::Multi(mut values)) => {
                values.push(value);
                HeaderValue::Multi(values)
            }
        };
        headers.insert(name, merged);
    }
    headers
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));

    // Logs go to stderr; stdout carries only the result
    if observability.log_format == "pretty" {
        tracing_subscriber::registry()
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

async fn run(args: Args, config: TelemetryConfig) -> anyhow::Result<EventResult> {
    let dispatcher =
        EventDispatcher::from_config(&config).context("Failed to initialize dispatcher")?;
    let headers = collect_headers(args.headers);

    if args.site_edit {
        return Ok(dispatcher.send_site_edit(&headers).await);
    }

    let action = args.action.context("--action is required")?;
    let params = args
        .fields
        .iter()
        .fold(EventParams::new(action), |params, (key, value)| {
            params.with_field(key.clone(), field_value(value))
        });

    Ok(dispatcher.dispatch(params, &headers).await)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let loaded = TelemetryConfig::load(args.config.as_deref());
    let observability = loaded
        .as_ref()
        .map(|c| c.observability.clone())
        .unwrap_or_default();
    init_tracing(&observability);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting telemetry-send");

    let result = match loaded {
        Ok(config) => match run(args, config).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %format!("{:#}", e), "Telemetry send failed");
                EventResult::generic_error()
            }
        },
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            EventResult::generic_error()
        }
    };

    // Fire-and-forget: the outcome is reported, never signalled by exit code
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}
