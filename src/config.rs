use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const ENV_PREFIX: &str = "TICK_RECORDER_";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Binance,
    Replay,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default)]
    pub replay_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_price_jump")]
    pub max_price_jump: f64,
    #[serde(default = "default_qty_window_seconds")]
    pub qty_window_seconds: u64,
    #[serde(default = "default_run_seconds")]
    pub run_seconds: u64,
    /// Flush the partial batch on shutdown instead of discarding it.
    #[serde(default)]
    pub flush_on_cancel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Duckdb,
    Sqlite,
    Postgres,
    Parquet,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default = "default_sink_kind")]
    pub kind: SinkKind,
    #[serde(default = "default_sink_path")]
    pub path: String,
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub timescale: bool,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_source_kind() -> SourceKind {
    SourceKind::Binance
}
fn default_ws_base_url() -> String {
    "wss://fstream.binance.com/ws".to_string()
}
fn default_symbol() -> String {
    "btcusdt".to_string()
}
fn default_channel_capacity() -> usize {
    10_000
}
fn default_batch_size() -> usize {
    1_000
}
fn default_max_price_jump() -> f64 {
    0.05
}
fn default_qty_window_seconds() -> u64 {
    300
}
fn default_run_seconds() -> u64 {
    300
}
fn default_sink_kind() -> SinkKind {
    SinkKind::Duckdb
}
fn default_sink_path() -> String {
    "data/market_ticks.duckdb".to_string()
}
fn default_retry_initial_ms() -> u64 {
    200
}
fn default_retry_max_ms() -> u64 {
    5_000
}
fn default_true() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    8001
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            ws_base_url: default_ws_base_url(),
            symbol: default_symbol(),
            replay_path: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            batch_size: default_batch_size(),
            max_price_jump: default_max_price_jump(),
            qty_window_seconds: default_qty_window_seconds(),
            run_seconds: default_run_seconds(),
            flush_on_cancel: false,
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: default_sink_kind(),
            path: default_sink_path(),
            postgres_url: None,
            timescale: false,
            max_retries: 0,
            retry_initial_ms: default_retry_initial_ms(),
            retry_max_ms: default_retry_max_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl SourceConfig {
    /// Stream path for the Binance trade channel, e.g. `btcusdt@trade`.
    pub fn trade_stream(&self) -> String {
        format!("{}@trade", self.symbol.trim().to_ascii_lowercase())
    }
}

impl PipelineConfig {
    pub fn run_duration(&self) -> Duration {
        Duration::from_secs(self.run_seconds)
    }
}

impl SinkConfig {
    pub fn retry_initial(&self) -> Duration {
        Duration::from_millis(self.retry_initial_ms)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_millis(self.retry_max_ms)
    }
}

impl Config {
    /// Load `.env`, the TOML file at `path` (defaults when absent), then apply
    /// `TICK_RECORDER_*` environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = if path.exists() {
            let config_str = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<Config>(&config_str)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (keys without the env prefix).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CHANNEL_CAPACITY") {
            self.pipeline.channel_capacity = parse_override("CHANNEL_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("BATCH_SIZE") {
            self.pipeline.batch_size = parse_override("BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("MAX_PRICE_JUMP") {
            self.pipeline.max_price_jump = parse_override("MAX_PRICE_JUMP", &v)?;
        }
        if let Some(v) = lookup("QTY_WINDOW_SECONDS") {
            self.pipeline.qty_window_seconds = parse_override("QTY_WINDOW_SECONDS", &v)?;
        }
        if let Some(v) = lookup("RUN_SECONDS") {
            self.pipeline.run_seconds = parse_override("RUN_SECONDS", &v)?;
        }
        if let Some(v) = lookup("SINK") {
            self.sink.kind = match v.trim().to_ascii_lowercase().as_str() {
                "duckdb" => SinkKind::Duckdb,
                "sqlite" => SinkKind::Sqlite,
                "postgres" => SinkKind::Postgres,
                "parquet" => SinkKind::Parquet,
                "memory" => SinkKind::Memory,
                other => bail!(
                    "invalid {ENV_PREFIX}SINK '{}': expected one of duckdb/sqlite/postgres/parquet/memory",
                    other
                ),
            };
        }
        if let Some(v) = lookup("POSTGRES_URL") {
            self.sink.postgres_url = Some(v);
        }
        if let Some(v) = lookup("METRICS_PORT") {
            self.metrics.port = parse_override("METRICS_PORT", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.channel_capacity == 0 {
            bail!("pipeline.channel_capacity must be > 0");
        }
        if p.batch_size == 0 {
            bail!("pipeline.batch_size must be > 0");
        }
        if !p.max_price_jump.is_finite() || p.max_price_jump <= 0.0 {
            bail!(
                "pipeline.max_price_jump must be a positive fraction, got {}",
                p.max_price_jump
            );
        }
        if p.run_seconds == 0 {
            bail!("pipeline.run_seconds must be > 0");
        }
        if self.source.kind == SourceKind::Replay && self.source.replay_path.is_none() {
            bail!("source.replay_path is required when source.kind = \"replay\"");
        }
        if self.source.kind == SourceKind::Binance {
            url::Url::parse(&self.source.ws_base_url)
                .with_context(|| format!("invalid source.ws_base_url '{}'", self.source.ws_base_url))?;
        }
        if self.sink.kind == SinkKind::Postgres && self.sink.postgres_url.is_none() {
            bail!("sink.postgres_url is required when sink.kind = \"postgres\"");
        }
        Ok(())
    }
}

fn parse_override<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("invalid {ENV_PREFIX}{key} '{}'", value))
}
