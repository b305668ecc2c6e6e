use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{BatchSink, TICK_COLUMNS};
use crate::model::tick::{Side, Tick};

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Single-file store. Timestamps are stored as `YYYY-MM-DD HH:MM:SS` UTC text.
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
    label: String,
}

impl SqliteSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite at {}", path.display()))?;
        Self::init(conn, format!("sqlite:{}", path.display()))
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?, "sqlite::memory:".to_string())
    }

    fn init(conn: Connection, label: String) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS market_ticks (
                ts TIMESTAMP NOT NULL,
                price REAL NOT NULL,
                qty REAL NOT NULL,
                side TEXT NOT NULL,
                ofi REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS market_ticks_ts ON market_ticks (ts);
            "#,
        )
        .context("failed to create market_ticks schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            label,
        })
    }

    pub fn load_ticks(&self) -> Result<Vec<Tick>> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("sqlite connection mutex poisoned"))?;
        let mut stmt = conn.prepare(
            r#"
            SELECT ts, price, qty, side, ofi
            FROM market_ticks
            ORDER BY rowid ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
            ))
        })?;

        let mut ticks = Vec::new();
        for row in rows {
            let (ts, price, qty, side, ofi) = row?;
            let ts = NaiveDateTime::parse_from_str(&ts, TS_FORMAT)
                .with_context(|| format!("bad stored timestamp '{}'", ts))?
                .and_utc();
            ticks.push(Tick {
                ts,
                price,
                qty,
                side: if side.eq_ignore_ascii_case("sell") {
                    Side::Sell
                } else {
                    Side::Buy
                },
                ofi,
            });
        }
        Ok(ticks)
    }
}

fn insert_rows(conn: &mut Connection, rows: &[Tick]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO market_ticks ({TICK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"
        ))?;
        for r in rows {
            stmt.execute(params![
                r.ts.format(TS_FORMAT).to_string(),
                r.price,
                r.qty,
                r.side.as_str(),
                r.ofi,
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl BatchSink for SqliteSink {
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
                .map_err(|_| anyhow!("sqlite connection mutex poisoned"))?;
            insert_rows(&mut conn, &rows)
        })
        .await
        .context("sqlite insert task panicked")?
        .context("sqlite insert_batch failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn persists_batches_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ticks.sqlite");
        let rows: Vec<Tick> = (0..5)
            .map(|i| Tick {
                ts: Utc.timestamp_opt(1_700_000_000 + i, 0).unwrap(),
                price: 100.0 + i as f64,
                qty: 1.0,
                side: if i % 2 == 0 { Side::Buy } else { Side::Sell },
                ofi: if i == 0 { 0.0 } else { 1.0 },
            })
            .collect();

        let mut sink = SqliteSink::open(&path).unwrap();
        sink.insert_batch(&rows[..3]).await.unwrap();
        sink.insert_batch(&rows[3..]).await.unwrap();
        drop(sink);

        let reopened = SqliteSink::open(&path).unwrap();
        assert_eq!(reopened.load_ticks().unwrap(), rows);
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let mut sink = SqliteSink::open_in_memory().unwrap();
        sink.insert_batch(&[]).await.unwrap();
        assert!(sink.load_ticks().unwrap().is_empty());
    }
}
