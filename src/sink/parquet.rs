use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, Float64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use ::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use ::parquet::arrow::ArrowWriter;
use ::parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::BatchSink;
use crate::model::tick::{Side, Tick};

const PART_PREFIX: &str = "part-";
const PART_SUFFIX: &str = ".parquet";

/// Columnar file store: a directory holding one `part-NNNNNN.parquet` file
/// per batch. Parts are written under a temporary name and renamed once
/// complete, so a reader never sees a half-written part.
pub struct ParquetSink {
    dir: PathBuf,
    next_part: u64,
    label: String,
}

impl ParquetSink {
    /// Opens (or creates) the part directory. Numbering continues after the
    /// highest existing part.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let next_part = part_files(dir)?
            .iter()
            .filter_map(|p| part_index(p))
            .max()
            .map_or(0, |n| n + 1);
        let label = format!("parquet:{}", dir.display());
        tracing::info!(sink = %label, next_part, "Parquet directory ready");
        Ok(Self {
            dir: dir.to_path_buf(),
            next_part,
            label,
        })
    }

    /// All stored ticks, parts in write order.
    pub fn load_ticks(&self) -> Result<Vec<Tick>> {
        let mut ticks = Vec::new();
        for path in part_files(&self.dir)? {
            read_part(&path, &mut ticks)
                .with_context(|| format!("failed to read {}", path.display()))?;
        }
        Ok(ticks)
    }
}

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(
            "ts",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new("price", DataType::Float64, false),
        Field::new("qty", DataType::Float64, false),
        Field::new("side", DataType::Utf8, false),
        Field::new("ofi", DataType::Float64, false),
    ]))
}

fn part_index(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(PART_PREFIX)?
        .strip_suffix(PART_SUFFIX)?
        .parse()
        .ok()
}

/// Completed part files sorted by index.
fn part_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut parts: Vec<(u64, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let path = entry?.path();
        if let Some(n) = part_index(&path) {
            parts.push((n, path));
        }
    }
    parts.sort_by_key(|(n, _)| *n);
    Ok(parts.into_iter().map(|(_, p)| p).collect())
}

fn write_part(dir: &Path, index: u64, rows: &[Tick]) -> Result<()> {
    let schema = schema();
    let ts = TimestampMillisecondArray::from(
        rows.iter().map(|r| r.ts.timestamp_millis()).collect::<Vec<_>>(),
    )
    .with_timezone("UTC");
    let price = Float64Array::from(rows.iter().map(|r| r.price).collect::<Vec<_>>());
    let qty = Float64Array::from(rows.iter().map(|r| r.qty).collect::<Vec<_>>());
    let side = StringArray::from(rows.iter().map(|r| r.side.as_str()).collect::<Vec<_>>());
    let ofi = Float64Array::from(rows.iter().map(|r| r.ofi).collect::<Vec<_>>());

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(ts) as ArrayRef,
            Arc::new(price) as ArrayRef,
            Arc::new(qty) as ArrayRef,
            Arc::new(side) as ArrayRef,
            Arc::new(ofi) as ArrayRef,
        ],
    )?;

    let final_path = dir.join(format!("{PART_PREFIX}{index:06}{PART_SUFFIX}"));
    let tmp_path = final_path.with_extension("parquet.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(::parquet::basic::Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    std::fs::rename(&tmp_path, &final_path)
        .with_context(|| format!("failed to publish {}", final_path.display()))?;
    Ok(())
}

fn read_part(path: &Path, out: &mut Vec<Tick>) -> Result<()> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    for batch in reader {
        let batch = batch?;
        let ts = batch
            .column(0)
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .context("ts column is not timestamp(ms)")?;
        let price = float_column(&batch, 1, "price")?;
        let qty = float_column(&batch, 2, "qty")?;
        let side = batch
            .column(3)
            .as_any()
            .downcast_ref::<StringArray>()
            .context("side column is not utf8")?;
        let ofi = float_column(&batch, 4, "ofi")?;

        for i in 0..batch.num_rows() {
            let ts_ms = ts.value(i);
            out.push(Tick {
                ts: Utc
                    .timestamp_millis_opt(ts_ms)
                    .single()
                    .with_context(|| format!("stored timestamp {} out of range", ts_ms))?,
                price: price.value(i),
                qty: qty.value(i),
                side: if side.value(i) == Side::Sell.as_str() {
                    Side::Sell
                } else {
                    Side::Buy
                },
                ofi: ofi.value(i),
            });
        }
    }
    Ok(())
}

fn float_column<'a>(batch: &'a RecordBatch, index: usize, name: &str) -> Result<&'a Float64Array> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<Float64Array>()
        .with_context(|| format!("{} column is not float64", name))
}

#[async_trait]
impl BatchSink for ParquetSink {
    fn name(&self) -> &str {
        &self.label
    }

    async fn insert_batch(&mut self, rows: &[Tick]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let dir = self.dir.clone();
        let index = self.next_part;
        let rows = rows.to_vec();
        tokio::task::spawn_blocking(move || write_part(&dir, index, &rows))
            .await
            .context("parquet write task panicked")?
            .with_context(|| format!("parquet insert_batch into part {} failed", index))?;
        self.next_part += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(secs: i64, price: f64, side: Side, ofi: f64) -> Tick {
        Tick {
            ts: Utc.timestamp_opt(secs, 0).unwrap(),
            price,
            qty: ofi.abs(),
            side,
            ofi,
        }
    }

    #[tokio::test]
    async fn round_trips_batches_as_ordered_parts() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ParquetSink::open(dir.path()).unwrap();
        let first = vec![
            tick(1_700_000_000, 100.0, Side::Buy, 0.0),
            tick(1_700_000_001, 101.0, Side::Sell, -2.0),
        ];
        let second = vec![tick(1_700_000_002, 102.0, Side::Buy, 3.0)];
        sink.insert_batch(&first).await.unwrap();
        sink.insert_batch(&[]).await.unwrap();
        sink.insert_batch(&second).await.unwrap();

        assert_eq!(part_files(dir.path()).unwrap().len(), 2);
        let expected: Vec<Tick> = first.into_iter().chain(second).collect();
        assert_eq!(sink.load_ticks().unwrap(), expected);
    }

    #[tokio::test]
    async fn reopen_continues_part_numbering() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ParquetSink::open(dir.path()).unwrap();
        sink.insert_batch(&[tick(1_700_000_000, 100.0, Side::Buy, 0.0)])
            .await
            .unwrap();
        drop(sink);

        let mut reopened = ParquetSink::open(dir.path()).unwrap();
        assert_eq!(reopened.next_part, 1);
        reopened
            .insert_batch(&[tick(1_700_000_060, 99.0, Side::Sell, -1.0)])
            .await
            .unwrap();

        let prices: Vec<f64> = reopened.load_ticks().unwrap().iter().map(|t| t.price).collect();
        assert_eq!(prices, vec![100.0, 99.0]);
    }

    #[test]
    fn ignores_unrelated_and_temporary_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("part-000007.parquet.tmp"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        let sink = ParquetSink::open(dir.path()).unwrap();
        assert_eq!(sink.next_part, 0);
        assert!(sink.load_ticks().unwrap().is_empty());
    }
}
