use std::collections::HashSet;
use std::sync::Arc;

use crate::error::StorageError;
use crate::record::WarehouseRow;

use super::{LoadResult, WarehouseStore};

/// Idempotent bulk loader keyed by natural key.
#[derive(Clone)]
pub struct WarehouseSink {
    store: Arc<dyn WarehouseStore>,
    batch_size: Option<usize>,
}

impl WarehouseSink {
    /// `batch_size` of `None` loads everything in a single transaction.
    pub fn new(store: Arc<dyn WarehouseStore>, batch_size: Option<usize>) -> Self {
        Self {
            store,
            batch_size: batch_size.filter(|n| *n > 0),
        }
    }

    pub fn store(&self) -> &Arc<dyn WarehouseStore> {
        &self.store
    }

    /// Load `rows`. Safe to call again with the same or overlapping rows.
    pub async fn load(&self, rows: &[WarehouseRow]) -> Result<LoadResult, StorageError> {
        let mut seen = HashSet::with_capacity(rows.len());
        let unique: Vec<WarehouseRow> = rows
            .iter()
            .filter(|row| seen.insert(row.natural_key()))
            .cloned()
            .collect();
        let mut result = LoadResult {
            skipped: (rows.len() - unique.len()) as u64,
            ..LoadResult::default()
        };

        let chunk_size = self.batch_size.unwrap_or(unique.len()).max(1);
        for chunk in unique.chunks(chunk_size) {
            result += self.load_chunk(chunk).await?;
        }

        tracing::info!(
            store = self.store.name(),
            inserted = result.inserted,
            updated = result.updated,
            skipped = result.skipped,
            "warehouse load committed"
        );
        Ok(result)
    }

    /// Apply one transaction. A unique-key conflict from another writer marks
    /// that row as already loaded and the rest of the chunk is re-applied.
    async fn load_chunk(&self, chunk: &[WarehouseRow]) -> Result<LoadResult, StorageError> {
        let mut pending = chunk.to_vec();
        let mut conflicted = 0u64;

        loop {
            if pending.is_empty() {
                return Ok(LoadResult {
                    skipped: conflicted,
                    ..LoadResult::default()
                });
            }
            match self.store.upsert_batch(&pending).await {
                Ok(mut result) => {
                    result.skipped += conflicted;
                    return Ok(result);
                }
                Err(StorageError::Conflict(key)) => {
                    let before = pending.len();
                    pending.retain(|row| row.natural_key() != key);
                    if pending.len() == before {
                        return Err(StorageError::Conflict(key));
                    }
                    tracing::warn!(key = %key, "row written concurrently, treating as loaded");
                    conflicted += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
