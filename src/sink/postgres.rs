use ::postgres::{Client, NoTls};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::{BatchSink, TICK_COLUMNS};
use crate::model::tick::Tick;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS market_ticks (
    ts TIMESTAMP NOT NULL,
    price DOUBLE PRECISION NOT NULL,
    qty DOUBLE PRECISION NOT NULL,
    side TEXT NOT NULL,
    ofi DOUBLE PRECISION NOT NULL
);
"#;

/// PostgreSQL / TimescaleDB store.
///
/// The synchronous client owns an internal runtime, so every call (including
/// the final drop) happens off the async executor.
pub struct PostgresSink {
    client: Option<Arc<Mutex<Client>>>,
}

impl PostgresSink {
    /// Connect and create the table; with `timescale` the table is turned
    /// into a hypertable on `ts`.
    pub async fn connect(url: &str, timescale: bool) -> Result<Self> {
        let url = url.to_string();
        let client = tokio::task::spawn_blocking(move || -> Result<Client> {
            let mut client = Client::connect(&url, NoTls).context("postgres connect failed")?;
            client
                .batch_execute(SCHEMA)
                .context("failed to create market_ticks table")?;
            if timescale {
                client
                    .batch_execute(
                        "SELECT create_hypertable('market_ticks', 'ts', if_not_exists => TRUE);",
                    )
                    .context("create_hypertable failed (is the timescaledb extension installed?)")?;
            }
            Ok(client)
        })
        .await
        .context("postgres connect task panicked")??;

        tracing::info!(timescale, "Postgres ready");
        Ok(Self {
            client: Some(Arc::new(Mutex::new(client))),
        })
    }
}

fn insert_rows(client: &mut Client, rows: &[Tick]) -> Result<()> {
    let mut tx = client.transaction()?;
    let stmt = tx.prepare(&format!(
        "INSERT INTO market_ticks ({TICK_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
    ))?;
    for r in rows {
        let ts = r.ts.naive_utc();
        tx.execute(&stmt, &[&ts, &r.price, &r.qty, &r.side.as_str(), &r.ofi])?;
    }
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl BatchSink for PostgresSink {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn insert_batch(&mut self, rows: &[Tick]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let client = self
            .client
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| anyhow!("postgres sink already closed"))?;
        let rows = rows.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut client = client
                .lock()
                .map_err(|_| anyhow!("postgres client mutex poisoned"))?;
            insert_rows(&mut client, &rows)
        })
        .await
        .context("postgres insert task panicked")?
        .context("postgres insert_batch failed")
    }
}

impl Drop for PostgresSink {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            // Dropping the client inside the async runtime would panic.
            std::thread::spawn(move || drop(client));
        }
    }
}
