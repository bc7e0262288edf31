use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider},
};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, MetricExporter, Protocol, WithExportConfig};
use opentelemetry_sdk::{Resource, logs::SdkLoggerProvider, metrics::SdkMeterProvider};
use tracing::{Instrument, error, info, info_span};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

const SERVICE_NAME: &str = "botflow";

/// Installs the global subscriber and returns the request metrics.
///
/// With an OTLP endpoint, logs and metrics are exported there and mirrored on
/// stdout. Without one, logs go to stdout plus a daily-rolling text file under
/// `root`, and request events to a daily-rolling JSON file.
pub fn init_tracing(
    root: PathBuf,
    log_file: String,
    event_file: String,
    log_level: String,
    otel_endpoint: Option<String>,
) -> Result<Telemetry> {
    match otel_endpoint {
        Some(endpoint) => Telemetry::init_otlp(&log_level, &endpoint),
        None => Telemetry::init_files(&log_level, root.join(log_file), root.join(event_file)),
    }
}

static RESOURCE: OnceLock<Resource> = OnceLock::new();
fn get_resource() -> Resource {
    RESOURCE
        .get_or_init(|| Resource::builder().with_service_name(SERVICE_NAME).build())
        .clone()
}

fn init_logs(end_point: &str) -> Result<SdkLoggerProvider> {
    let exporter = LogExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(end_point)
        .build()
        .context("building OTLP log exporter")?;
    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

fn init_metrics(end_point: &str) -> Result<SdkMeterProvider> {
    let exporter = MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(end_point)
        .build()
        .context("building OTLP metric exporter")?;
    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(get_resource())
        .build())
}

fn rolling_appender(path: &Path) -> Result<RollingFileAppender> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("log path {} has no parent directory", path.display()))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("log path {} has no file name", path.display()))?;
    std::fs::create_dir_all(dir)?;
    Ok(RollingFileAppender::new(Rotation::DAILY, dir, file_name))
}

struct OtlpProviders {
    logger_provider: SdkLoggerProvider,
    meter_provider: SdkMeterProvider,
}

/// Request counters and latency, shared by every endpoint.
pub struct Telemetry {
    pub requests_started: Counter<u64>,
    pub requests_succeeded: Counter<u64>,
    pub requests_failed: Counter<u64>,
    pub request_latency_ms: Histogram<f64>,
    providers: Option<OtlpProviders>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("otlp", &self.providers.is_some())
            .finish()
    }
}

impl Telemetry {
    pub fn init_otlp(log_level: &str, endpoint: &str) -> Result<Self> {
        let logger_provider = init_logs(endpoint)?;
        let meter_provider = init_metrics(endpoint)?;

        let otel_logs_layer = {
            let filter = EnvFilter::new(log_level)
                .add_directive("hyper=off".parse()?)
                .add_directive("tonic=off".parse()?)
                .add_directive("h2=off".parse()?)
                .add_directive("reqwest=off".parse()?);
            OpenTelemetryTracingBridge::new(&logger_provider).with_filter(filter)
        };

        let fmt_layer = fmt::layer()
            .with_thread_names(true)
            .with_filter(EnvFilter::new(log_level));

        Registry::default()
            .with(otel_logs_layer)
            .with(fmt_layer)
            .try_init()?;

        global::set_meter_provider(meter_provider.clone());
        let meter = meter_provider.meter(SERVICE_NAME);

        Ok(Self::with_meter(
            &meter,
            Some(OtlpProviders {
                logger_provider,
                meter_provider,
            }),
        ))
    }

    /// `log_level` is an `EnvFilter` directive such as `"info"`.
    pub fn init_files(log_level: &str, log_file: PathBuf, event_file: PathBuf) -> Result<Self> {
        let stdout_layer = fmt::layer().with_filter(EnvFilter::new(log_level));

        let txt_layer = fmt::layer()
            .with_writer(rolling_appender(&log_file)?)
            .with_ansi(false)
            .with_filter(EnvFilter::new(log_level));

        // only `target: "request"` events end up in the JSON file
        let json_layer = fmt::layer()
            .json()
            .with_writer(rolling_appender(&event_file)?)
            .with_target(true)
            .with_filter(EnvFilter::new("request=info"));

        Registry::default()
            .with(stdout_layer)
            .with(txt_layer)
            .with(json_layer)
            .try_init()?;

        Ok(Self::with_meter(&global::meter("botflow-file-telemetry"), None))
    }

    /// Metrics backed by the global (no-op unless installed) meter provider,
    /// without touching the global subscriber.
    pub fn detached() -> Self {
        Self::with_meter(&global::meter(SERVICE_NAME), None)
    }

    fn with_meter(meter: &Meter, providers: Option<OtlpProviders>) -> Self {
        Telemetry {
            requests_started: meter
                .u64_counter("requests_started")
                .with_description("Total requests started")
                .build(),
            requests_succeeded: meter.u64_counter("requests_succeeded").build(),
            requests_failed: meter.u64_counter("requests_failed").build(),
            request_latency_ms: meter
                .f64_histogram("request_latency_ms")
                .with_description("Latency per request in ms")
                .with_unit("ms")
                .build(),
            providers,
        }
    }

    /// Wraps a request handler with a span, metrics and one JSON `request`
    /// event carrying name, latency and outcome.
    pub async fn instrument_request<F, Fut, T, E>(&self, name: &str, handler: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.requests_started.add(1, &[]);
        let start = Instant::now();

        let result = handler().instrument(info_span!("request", request = name)).await;

        let elapsed = start.elapsed().as_secs_f64() * 1_000.0;
        self.request_latency_ms.record(elapsed, &[]);

        match &result {
            Ok(_) => {
                self.requests_succeeded.add(1, &[]);
                info!("request `{}` succeeded in {} ms", name, elapsed);
            }
            Err(err) => {
                self.requests_failed.add(1, &[]);
                error!(error = %err, "request `{}` failed in {} ms", name, elapsed);
            }
        }

        tracing::event!(
            target: "request",
            tracing::Level::INFO,
            request = name,
            latency_ms = elapsed,
            status = match &result {
                Ok(_) => "ok",
                Err(_) => "error",
            },
        );

        result
    }

    /// Flushes and stops the OTLP exporters, if any.
    pub fn shutdown(&self) {
        if let Some(providers) = &self.providers {
            if let Err(e) = providers.logger_provider.shutdown() {
                eprintln!("failed to shut down log exporter: {e}");
            }
            if let Err(e) = providers.meter_provider.shutdown() {
                eprintln!("failed to shut down metric exporter: {e}");
            }
        }
    }
}
