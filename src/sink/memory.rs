use anyhow::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};

use super::BatchSink;
use crate::model::tick::Tick;

/// Keeps every batch in memory. Clones share storage, so a handle kept by the
/// caller sees what the writer task inserted.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<Vec<Tick>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Vec<Tick>>> {
        self.batches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn batches(&self) -> Vec<Vec<Tick>> {
        self.lock().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.lock().len()
    }

    pub fn rows(&self) -> Vec<Tick> {
        self.lock().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl BatchSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert_batch(&mut self, rows: &[Tick]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.lock().push(rows.to_vec());
        Ok(())
    }
}
