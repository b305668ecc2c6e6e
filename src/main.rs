use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use tick_recorder::binance::ws::BinanceTradeStream;
use tick_recorder::config::{
    Config, SinkConfig, SinkKind, SourceConfig, SourceKind, DEFAULT_CONFIG_PATH,
};
use tick_recorder::metrics::{self, PipelineMetrics};
use tick_recorder::pipeline::{RetryPolicy, RunReport, Supervisor};
use tick_recorder::sink::{
    BatchSink, DuckDbSink, MemorySink, ParquetSink, PostgresSink, SqliteSink,
};
use tick_recorder::source::{ReplaySource, TickSource};

async fn build_source(cfg: &SourceConfig) -> Result<Box<dyn TickSource>> {
    let source: Box<dyn TickSource> = match cfg.kind {
        SourceKind::Binance => {
            Box::new(BinanceTradeStream::connect(&cfg.ws_base_url, &cfg.trade_stream()).await?)
        }
        SourceKind::Replay => {
            let path = cfg
                .replay_path
                .as_deref()
                .context("source.replay_path is not set")?;
            Box::new(ReplaySource::open(Path::new(path)).await?)
        }
    };
    Ok(source)
}

async fn build_sink(cfg: &SinkConfig) -> Result<Box<dyn BatchSink>> {
    let sink: Box<dyn BatchSink> = match cfg.kind {
        SinkKind::Duckdb => Box::new(DuckDbSink::open(Path::new(&cfg.path))?),
        SinkKind::Sqlite => Box::new(SqliteSink::open(Path::new(&cfg.path))?),
        SinkKind::Postgres => {
            let url = cfg
                .postgres_url
                .as_deref()
                .context("sink.postgres_url is not set")?;
            Box::new(PostgresSink::connect(url, cfg.timescale).await?)
        }
        SinkKind::Parquet => Box::new(ParquetSink::open(Path::new(&cfg.path))?),
        SinkKind::Memory => {
            tracing::warn!("Memory sink selected, ticks will not be persisted");
            Box::new(MemorySink::new())
        }
    };
    Ok(sink)
}

async fn run(config: Config) -> Result<RunReport> {
    let metrics = PipelineMetrics::new();
    let metrics_shutdown = CancellationToken::new();
    if config.metrics.enabled {
        let server = metrics::serve(
            metrics.clone(),
            config.metrics.port,
            metrics_shutdown.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::warn!(error = %format!("{:#}", e), "Metrics server stopped");
            }
        });
    }

    let sink = build_sink(&config.sink).await.context("failed to open sink")?;
    let source = build_source(&config.source)
        .await
        .context("failed to open tick source")?;

    let supervisor = Supervisor::new(config.pipeline.clone(), metrics)
        .with_retry(RetryPolicy::from(&config.sink));

    // Ctrl+C handler
    let ctrl_c_cancel = supervisor.cancel_token();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Ctrl+C received");
        ctrl_c_cancel.cancel();
    });

    let report = supervisor.run(source, sink).await;
    metrics_shutdown.cancel();
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required by rustls 0.23+)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config
            .logging
            .level
            .parse()
            .unwrap_or_else(|_| "info".parse().unwrap())
    });
    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = ?config.source.kind,
        symbol = %config.source.symbol,
        sink = ?config.sink.kind,
        run_seconds = config.pipeline.run_seconds,
        "Starting tick-recorder"
    );

    let report = run(config).await?;
    println!("Pipeline {}", report);
    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
