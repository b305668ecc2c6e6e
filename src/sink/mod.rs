pub mod duckdb;
pub mod memory;
pub mod parquet;
pub mod postgres;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::model::tick::Tick;

pub use self::duckdb::DuckDbSink;
pub use self::memory::MemorySink;
pub use self::parquet::ParquetSink;
pub use self::postgres::PostgresSink;
pub use self::sqlite::SqliteSink;

/// Columns shared by every backend, in insert order.
pub const TICK_COLUMNS: &str = "ts, price, qty, side, ofi";

/// Persistence target for ordered tick batches.
///
/// `insert_batch` is all-or-nothing per call and a no-op for an empty slice.
#[async_trait]
pub trait BatchSink: Send {
    fn name(&self) -> &str;

    async fn insert_batch(&mut self, rows: &[Tick]) -> Result<()>;
}

#[async_trait]
impl BatchSink for Box<dyn BatchSink> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn insert_batch(&mut self, rows: &[Tick]) -> Result<()> {
        (**self).insert_batch(rows).await
    }
}
