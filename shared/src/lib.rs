pub mod vatsim;
pub mod vatusa;

use crate::error::{ConfigError, InitializationError};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporterBuilder, MetricExporterBuilder, WithTonicConfig};
use opentelemetry_resource_detectors::ProcessResourceDetector;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::resource::{
    EnvResourceDetector, ResourceDetector, SdkProvidedResourceDetector,
};
use opentelemetry_sdk::trace::SdkTracerProvider;
use serde::{Deserialize, Deserializer};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, registry};

pub const ENV_VAR_PREFIX: &str = "NETWORK_SYNC__";
pub const SETTINGS_FILE: &str = "Settings.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub postgres: PostgresConfig,
    pub feed: FeedConfig,
    #[serde(default)]
    pub boundaries: BoundariesConfig,
    #[serde(default)]
    pub facility: FacilityConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub traffic: TrafficConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default = "default_health_addr")]
    pub health_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
}

/// Upstream endpoints for the network datafeed, the VATSIM member API and the
/// VATUSA roster API.
#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_datafeed_url")]
    pub datafeed_url: String,
    #[serde(default = "default_vatsim_api_url")]
    pub vatsim_api_url: String,
    #[serde(default = "default_vatusa_api_url")]
    pub vatusa_api_url: String,
    pub vatusa_api_key: String,
    pub vatusa_facility: String,
    #[serde(default)]
    pub vatusa_test_mode: bool,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BoundariesConfig {
    pub path: PathBuf,
}

impl Default for BoundariesConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("boundaries.json"),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FacilityConfig {
    /// Callsign prefixes (e.g. `DEN`, `ZDV`) whose controllers are tracked.
    #[serde(default)]
    pub tracked_prefixes: Vec<String>,
    /// Certification names every new roster user starts with, all at `none`.
    #[serde(default)]
    pub certifications: Vec<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct FeaturesConfig {
    #[serde(default)]
    pub controller_online: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(
        default = "default_sweep_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub sweep_interval: Duration,
    #[serde(
        default = "default_roster_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub roster_interval: Duration,
    #[serde(
        default = "default_foreign_visitor_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub foreign_visitor_interval: Duration,
    #[serde(
        default = "default_traffic_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub traffic_interval: Duration,
    #[serde(default = "default_classifier_max_workers")]
    pub classifier_max_workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: default_sweep_interval(),
            roster_interval: default_roster_interval(),
            foreign_visitor_interval: default_foreign_visitor_interval(),
            traffic_interval: default_traffic_interval(),
            classifier_max_workers: default_classifier_max_workers(),
        }
    }
}

/// Discord webhook URLs keyed by channel name (`seniorstaff`, `online`,
/// `traffic`, `default`).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DiscordConfig {
    #[serde(default)]
    pub webhooks: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrafficConfig {
    /// Radius around an airport, in nautical miles, inside which a pilot counts
    /// towards that airport's traffic.
    #[serde(default = "default_max_distance_nm")]
    pub max_distance_nm: f64,
    #[serde(default)]
    pub airports: Vec<TrafficAlertEntry>,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            max_distance_nm: default_max_distance_nm(),
            airports: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrafficAlertEntry {
    pub icao: String,
    pub latitude: f64,
    pub longitude: f64,
    pub threshold: u32,
    /// Regular expressions matched against online controller callsigns.
    #[serde(default)]
    pub covered_by: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub otlp: bool,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp: false,
            service_name: default_service_name(),
        }
    }
}

fn default_datafeed_url() -> String {
    vatsim::DATAFEED_URL.to_string()
}

fn default_vatsim_api_url() -> String {
    vatsim::API_BASE.to_string()
}

fn default_vatusa_api_url() -> String {
    vatusa::API_BASE.to_string()
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

const fn default_roster_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

const fn default_foreign_visitor_interval() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

const fn default_traffic_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

const fn default_classifier_max_workers() -> usize {
    4
}

const fn default_max_distance_nm() -> f64 {
    5.0
}

fn default_service_name() -> String {
    "network_sync".to_string()
}

fn default_health_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

pub fn config_figment() -> Figment {
    Figment::new()
        .merge(Toml::file(SETTINGS_FILE))
        .merge(Env::prefixed(ENV_VAR_PREFIX).split("__"))
}

pub fn load_config() -> Result<Config, ConfigError> {
    Ok(config_figment().extract::<Config>()?)
}

pub mod error {
    use thiserror::Error;

    #[derive(Debug, Error)]
    pub enum ConfigError {
        #[error("failed to load configuration: {0}")]
        Figment(#[from] figment::Error),
    }

    #[derive(Debug, Error)]
    pub enum InitializationError {
        #[error(transparent)]
        Subscriber(#[from] tracing_subscriber::util::TryInitError),
        #[error(transparent)]
        Exporter(#[from] opentelemetry_otlp::ExporterBuildError),
        #[error(transparent)]
        Config(#[from] ConfigError),
        #[error(transparent)]
        Migration(#[from] sqlx::migrate::MigrateError),
        #[error(transparent)]
        Db(#[from] sqlx::Error),
        #[error(transparent)]
        HttpClient(#[from] reqwest::Error),
    }
}

#[instrument(skip(pg_config))]
pub async fn initialize_db(
    pg_config: &PostgresConfig,
    migrate: bool,
) -> Result<Pool<Postgres>, InitializationError> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&pg_config.connection_string)
        .await?;

    info!(name: "db.connected", "db pool created and connected");

    // Run any new migrations
    if migrate {
        sqlx::migrate!("./migrations").run(&pool).await?;
    }

    Ok(pool)
}

pub async fn shutdown_listener(token: Option<CancellationToken>) {
    let ctrl_c = signal::ctrl_c();
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(name: "signal.ctrlc.received", "received Ctrl+C signal, shutting down"),
        _ = terminate => info!(name: "signal.sigterm.received", "received SIGTERM signal, shutting down"),
    }

    if let Some(token) = token {
        token.cancel();
    }
}

/// Providers that must be flushed on shutdown when OTLP export is enabled.
pub struct TelemetryProviders {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: SdkLoggerProvider,
}

impl TelemetryProviders {
    pub fn shutdown(self) {
        if let Err(e) = self.tracer.shutdown() {
            warn!(error = ?e, "failed to shut down tracer provider");
        }
        if let Err(e) = self.meter.shutdown() {
            warn!(error = ?e, "failed to shut down meter provider");
        }
        if let Err(e) = self.logger.shutdown() {
            warn!(error = ?e, "failed to shut down logger provider");
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. With OTLP disabled only the console layer is
/// installed and the global meter stays a no-op.
pub fn init_tracing(
    telemetry: &TelemetryConfig,
) -> Result<Option<TelemetryProviders>, InitializationError> {
    if telemetry.otlp {
        init_tracing_and_otlp(&telemetry.service_name).map(Some)
    } else {
        let fmt_layer = Layer::new()
            .compact()
            .with_file(true)
            .with_line_number(true);
        registry().with(env_filter()).with(fmt_layer).try_init()?;
        Ok(None)
    }
}

fn init_tracing_and_otlp(name: &str) -> Result<TelemetryProviders, InitializationError> {
    // OpenTelemetry env vars that should be set at a minimum
    let env_vars = ["OTEL_EXPORTER_OTLP_ENDPOINT", "OTEL_EXPORTER_OTLP_HEADERS"];
    for var in env_vars {
        if std::env::var(var).is_err() {
            warn!(var, "OpenTelemetry environment variable is not set");
        }
    }

    // tracing_opentelemetry setup for spans
    let span_exporter = opentelemetry_otlp::SpanExporterBuilder::default()
        .with_tonic()
        .with_tls_config(tonic::transport::ClientTlsConfig::new().with_native_roots())
        .build()?;

    let detectors: Vec<Box<dyn ResourceDetector>> = vec![
        Box::new(SdkProvidedResourceDetector),
        Box::new(EnvResourceDetector::new()),
        Box::new(ProcessResourceDetector),
    ];
    let resource = Resource::builder()
        .with_detectors(&detectors)
        .with_service_name(name.to_string())
        .build();

    let tracer_provider = SdkTracerProvider::builder()
        .with_resource(resource.clone())
        .with_batch_exporter(span_exporter)
        .build();
    let tracer = tracer_provider.tracer(name.to_string());
    global::set_tracer_provider(tracer_provider.clone());

    let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    // opentelemetry_appender_tracing setup for logs
    let log_exporter = LogExporterBuilder::default()
        .with_tonic()
        .with_tls_config(tonic::transport::ClientTlsConfig::new().with_native_roots())
        .build()?;

    let logger_provider = SdkLoggerProvider::builder()
        .with_resource(resource.clone())
        .with_batch_exporter(log_exporter)
        .build();

    let otel_log_layer = OpenTelemetryTracingBridge::new(&logger_provider);

    // Setup for OTel Metrics
    let meter_exporter = MetricExporterBuilder::new()
        .with_tonic()
        .with_tls_config(tonic::transport::ClientTlsConfig::new().with_native_roots())
        .build()?;

    let meter_provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_periodic_exporter(meter_exporter)
        .build();
    global::set_meter_provider(meter_provider.clone());

    // Standard console format and env filter layers
    let fmt_layer = Layer::new()
        .compact()
        .with_file(true)
        .with_line_number(true);

    registry()
        .with(env_filter())
        .with(fmt_layer)
        .with(otel_log_layer)
        .with(telemetry_layer)
        .try_init()?;

    Ok(TelemetryProviders {
        tracer: tracer_provider,
        meter: meter_provider,
        logger: logger_provider,
    })
}
