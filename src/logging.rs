//! Tracing subscriber setup.
//!
//! Pretty output for development, JSON for production, written through a
//! non-blocking appender to stdout, stderr or a daily-rotated file. When an
//! OTLP endpoint is configured spans are also exported with OpenTelemetry.

use anyhow::{Context, Result};
use axum::http::Request;
use opentelemetry::{KeyValue, trace::TraceError};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    Resource,
    trace::{RandomIdGenerator, Sampler, Tracer},
};
use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const SERVICE_NAME: &str = "assetgraph";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub output: LogOutput,
    /// Directory for log files when `output` is [`LogOutput::File`]
    pub log_dir: PathBuf,
    pub log_file_prefix: String,
    pub service_version: String,
    /// e.g. "development", "production"
    pub environment: String,
    pub otlp_endpoint: Option<String>,
    /// Trace sampling ratio, 0.0 to 1.0
    pub otel_sampling_rate: f64,
    pub otlp_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    Stderr,
    /// Daily-rotated file under `log_dir`
    File,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let production = is_production(&environment);

        Self {
            format: if production {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            },
            output: LogOutput::Stderr,
            log_dir: PathBuf::from("logs"),
            log_file_prefix: SERVICE_NAME.to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment,
            otlp_endpoint: None,
            otel_sampling_rate: if production { 0.1 } else { 1.0 },
            otlp_timeout_secs: 10,
        }
    }
}

fn is_production(environment: &str) -> bool {
    matches!(environment, "production" | "prod")
}

impl LoggingConfig {
    /// Defaults overridden by `LOG_FORMAT`, `LOG_OUTPUT`, `LOG_DIR`,
    /// `OTEL_EXPORTER_OTLP_ENDPOINT` and `OTEL_SAMPLING_RATE`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(format) = env::var("LOG_FORMAT") {
            config.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                _ => config.format,
            };
        }

        if let Ok(output) = env::var("LOG_OUTPUT") {
            config.output = match output.to_lowercase().as_str() {
                "stdout" => LogOutput::Stdout,
                "stderr" => LogOutput::Stderr,
                "file" => LogOutput::File,
                _ => config.output,
            };
        }

        if let Ok(log_dir) = env::var("LOG_DIR") {
            config.log_dir = PathBuf::from(log_dir);
        }

        config.otlp_endpoint = env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .ok()
            .filter(|endpoint| !endpoint.trim().is_empty());

        if let Some(rate) = env::var("OTEL_SAMPLING_RATE")
            .ok()
            .and_then(|raw| raw.parse::<f64>().ok())
        {
            config.otel_sampling_rate = rate.clamp(0.0, 1.0);
        }

        config
    }

    fn resource(&self) -> Resource {
        Resource::new(vec![
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_NAME,
                SERVICE_NAME,
            ),
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                self.service_version.clone(),
            ),
            KeyValue::new("environment", self.environment.clone()),
        ])
    }

    fn sampler(&self) -> Sampler {
        if self.otel_sampling_rate >= 1.0 {
            Sampler::AlwaysOn
        } else if self.otel_sampling_rate <= 0.0 {
            Sampler::AlwaysOff
        } else {
            Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
                self.otel_sampling_rate,
            )))
        }
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes buffered lines on drop and must outlive the server.
pub fn init_logging(config: LoggingConfig) -> Result<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if is_production(&config.environment) {
            "info"
        } else {
            "debug"
        };
        EnvFilter::new(format!("{level},hyper=info,tower_http=info"))
    });

    let (writer, guard) = match config.output {
        LogOutput::Stdout => tracing_appender::non_blocking(io::stdout()),
        LogOutput::Stderr => tracing_appender::non_blocking(io::stderr()),
        LogOutput::File => {
            std::fs::create_dir_all(&config.log_dir).context("failed to create log directory")?;
            tracing_appender::non_blocking(tracing_appender::rolling::daily(
                &config.log_dir,
                &config.log_file_prefix,
            ))
        }
    };

    let otel_layer = match config.otlp_endpoint.as_deref() {
        Some(endpoint) => match init_tracer(&config, endpoint) {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(err) => {
                eprintln!("warning: OpenTelemetry exporter unavailable ({err}); continuing without it");
                None
            }
        },
        None => None,
    };

    let registry = tracing_subscriber::registry();
    match config.format {
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true)
                .with_span_events(FmtSpan::CLOSE)
                .with_filter(env_filter);
            registry.with(otel_layer).with(fmt_layer).init();
        }
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_writer(writer)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .with_ansi(config.output != LogOutput::File)
                .with_filter(env_filter);
            registry.with(otel_layer).with(fmt_layer).init();
        }
    }

    tracing::info!(
        service = SERVICE_NAME,
        version = %config.service_version,
        environment = %config.environment,
        format = ?config.format,
        output = ?config.output,
        otel = config.otlp_endpoint.is_some(),
        "logging initialized"
    );

    Ok(guard)
}

/// Install the global OTLP tracer provider and return its tracer
fn init_tracer(config: &LoggingConfig, endpoint: &str) -> Result<Tracer, TraceError> {
    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(config.otlp_timeout_secs));

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(config.sampler())
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(config.resource()),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
}

pub fn shutdown_telemetry() {
    tracing::info!("shutting down OpenTelemetry");
    opentelemetry::global::shutdown_tracer_provider();
}

/// Span for one HTTP request, used by the router's `TraceLayer`
pub fn request_span<B>(request: &Request<B>) -> tracing::Span {
    tracing::info_span!(
        "http_request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = tracing::field::Empty,
        user_id = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn env_overrides() {
        unsafe {
            env::set_var("LOG_FORMAT", "json");
            env::set_var("LOG_OUTPUT", "file");
            env::set_var("LOG_DIR", "/tmp/assetgraph-logs");
            env::set_var("OTEL_SAMPLING_RATE", "7");
        }

        let config = LoggingConfig::from_env();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.output, LogOutput::File);
        assert_eq!(config.log_dir, PathBuf::from("/tmp/assetgraph-logs"));
        assert_eq!(config.otel_sampling_rate, 1.0);

        unsafe {
            env::remove_var("LOG_FORMAT");
            env::remove_var("LOG_OUTPUT");
            env::remove_var("LOG_DIR");
            env::remove_var("OTEL_SAMPLING_RATE");
        }
    }

    #[test]
    #[serial]
    fn blank_endpoint_disables_otel() {
        unsafe { env::set_var("OTEL_EXPORTER_OTLP_ENDPOINT", "  ") };
        assert!(LoggingConfig::from_env().otlp_endpoint.is_none());
        unsafe { env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
    }

    #[tokio::test(flavor = "multi_thread")]
    #[serial]
    async fn otlp_layer_stacks_under_either_format() {
        let config = LoggingConfig::default();
        for format in [LogFormat::Json, LogFormat::Pretty] {
            // the exporter connects lazily, so no collector is needed
            let tracer = init_tracer(&config, "http://127.0.0.1:4317").unwrap();
            let registry = tracing_subscriber::registry().with(Some(tracing_opentelemetry::layer().with_tracer(tracer)));
            let dispatch = match format {
                LogFormat::Json => tracing::Dispatch::new(registry.with(fmt::layer().json().with_writer(io::sink))),
                LogFormat::Pretty => tracing::Dispatch::new(registry.with(fmt::layer().pretty().with_writer(io::sink))),
            };
            tracing::dispatcher::with_default(&dispatch, || {
                tracing::info_span!("export").in_scope(|| tracing::info!("traced"));
            });
        }
    }
}
