use ::duckdb::{params, Connection};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{BatchSink, TICK_COLUMNS};
use crate::model::tick::{Side, Tick};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS market_ticks (
    ts TIMESTAMP,
    price DOUBLE,
    qty DOUBLE,
    side VARCHAR,
    ofi DOUBLE
);

CREATE OR REPLACE VIEW ofi_per_min AS
SELECT
    date_trunc('minute', ts) AS minute,
    sum(ofi) AS ofi_sum
FROM market_ticks
GROUP BY minute;
"#;

/// Per-minute OFI aggregate read from the `ofi_per_min` view.
#[derive(Debug, Clone, PartialEq)]
pub struct OfiMinute {
    pub minute_epoch_s: i64,
    pub ofi_sum: f64,
}

/// Embedded analytical store. Inserts run on the blocking pool.
pub struct DuckDbSink {
    conn: Arc<Mutex<Connection>>,
    label: String,
}

impl DuckDbSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open duckdb at {}", path.display()))?;
        Self::init(conn, format!("duckdb:{}", path.display()))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory duckdb")?;
        Self::init(conn, "duckdb::memory:".to_string())
    }

    fn init(conn: Connection, label: String) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to create market_ticks schema")?;
        tracing::info!(sink = %label, "DuckDB ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            label,
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> Result<T>) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("duckdb connection mutex poisoned"))?;
        f(&mut conn)
    }

    pub fn row_count(&self) -> Result<u64> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row("SELECT count(*) FROM market_ticks", [], |row| row.get(0))?;
            Ok(n as u64)
        })
    }

    /// All stored ticks in insertion order.
    pub fn load_ticks(&self) -> Result<Vec<Tick>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT epoch_ms(ts), price, qty, side, ofi FROM market_ticks ORDER BY rowid",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, f64>(4)?,
                ))
            })?;

            let mut ticks = Vec::new();
            for row in rows {
                let (ts_ms, price, qty, side, ofi) = row?;
                ticks.push(Tick {
                    ts: Utc
                        .timestamp_millis_opt(ts_ms)
                        .single()
                        .ok_or_else(|| anyhow!("stored timestamp {} out of range", ts_ms))?,
                    price,
                    qty,
                    side: if side == Side::Sell.as_str() {
                        Side::Sell
                    } else {
                        Side::Buy
                    },
                    ofi,
                });
            }
            Ok(ticks)
        })
    }

    pub fn ofi_per_minute(&self) -> Result<Vec<OfiMinute>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT epoch_ms(minute), ofi_sum FROM ofi_per_min ORDER BY minute",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(OfiMinute {
                    minute_epoch_s: row.get::<_, i64>(0)? / 1000,
                    ofi_sum: row.get(1)?,
                })
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }
}

fn insert_rows(conn: &mut Connection, rows: &[Tick]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO market_ticks ({TICK_COLUMNS}) VALUES (epoch_ms(CAST(? AS BIGINT)), ?, ?, ?, ?)"
        ))?;
        for r in rows {
            stmt.execute(params![
                r.ts.timestamp_millis(),
                r.price,
                r.qty,
                r.side.as_str(),
                r.ofi
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl BatchSink for DuckDbSink {
    fn name(&self) -> &str {
        &self.label
    }

    async fn insert_batch(&mut self, rows: &[Tick]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let conn = Arc::clone(&self.conn);
        let rows = rows.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| anyhow!("duckdb connection mutex poisoned"))?;
            insert_rows(&mut conn, &rows)
        })
        .await
        .context("duckdb insert task panicked")?
        .context("duckdb insert_batch failed")
    }
}
