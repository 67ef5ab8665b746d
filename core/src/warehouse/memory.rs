use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::json;

use crate::error::StorageError;
use crate::record::WarehouseRow;

use super::{AggregateQuery, LoadResult, QueryResult, WarehouseStore};

/// Process-local warehouse used by dry runs and tests.
///
/// Each upsert works on a copy of the table that is swapped in only when the
/// whole batch succeeded. Faults can be injected to exercise retry paths.
#[derive(Debug, Default)]
pub struct InMemoryWarehouse {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    schema_created: bool,
    rows: BTreeMap<String, WarehouseRow>,
    fail_upserts: u32,
    conflicts: HashSet<String>,
    upsert_calls: usize,
}

impl InMemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` upserts with a recoverable I/O error.
    pub fn fail_next_upserts(&self, n: u32) {
        self.with(|s| s.fail_upserts = n);
    }

    /// Report a unique-key conflict the next time `key` would be inserted,
    /// as if another writer had committed it first.
    pub fn conflict_on(&self, key: &str) {
        self.with(|s| {
            s.conflicts.insert(key.to_string());
        });
    }

    pub fn upsert_calls(&self) -> usize {
        self.with(|s| s.upsert_calls)
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl MemoryState {
    fn require_schema(&self) -> Result<(), StorageError> {
        if self.schema_created {
            Ok(())
        } else {
            Err(StorageError::Schema("table transactions does not exist".into()))
        }
    }
}

#[async_trait]
impl WarehouseStore for InMemoryWarehouse {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_schema(&self) -> Result<(), StorageError> {
        self.with(|s| s.schema_created = true);
        Ok(())
    }

    async fn upsert_batch(&self, rows: &[WarehouseRow]) -> Result<LoadResult, StorageError> {
        self.with(|s| {
            s.upsert_calls += 1;
            s.require_schema()?;
            if s.fail_upserts > 0 {
                s.fail_upserts -= 1;
                return Err(StorageError::Unavailable("injected upsert failure".into()));
            }

            let mut staged = s.rows.clone();
            let mut result = LoadResult::default();
            for row in rows {
                match staged.get(row.natural_key()) {
                    Some(existing) if existing.same_content(row) => result.skipped += 1,
                    Some(_) => {
                        staged.insert(row.natural_key().to_string(), row.clone());
                        result.updated += 1;
                    }
                    None => {
                        if s.conflicts.remove(row.natural_key()) {
                            return Err(StorageError::Conflict(row.natural_key().to_string()));
                        }
                        staged.insert(row.natural_key().to_string(), row.clone());
                        result.inserted += 1;
                    }
                }
            }

            s.rows = staged;
            Ok(result)
        })
    }

    async fn run_query(&self, query: AggregateQuery) -> Result<QueryResult, StorageError> {
        self.with(|s| {
            s.require_schema()?;
            let mut groups: BTreeMap<String, (u64, i64, i64)> = BTreeMap::new();
            for row in s.rows.values() {
                let entry = groups.entry(query.group_key(row)).or_default();
                entry.0 += 1;
                entry.1 += row.amount_cents;
                entry.2 += row.quantity;
            }

            Ok(QueryResult {
                name: query.name().to_string(),
                columns: query.columns(),
                rows: groups
                    .into_iter()
                    .map(|(key, (count, amount, qty))| vec![json!(key), json!(count), json!(amount), json!(qty)])
                    .collect(),
            })
        })
    }

    async fn row_count(&self) -> Result<u64, StorageError> {
        self.with(|s| {
            s.require_schema()?;
            Ok(s.rows.len() as u64)
        })
    }

    async fn fetch_all(&self) -> Result<Vec<WarehouseRow>, StorageError> {
        self.with(|s| {
            s.require_schema()?;
            Ok(s.rows.values().cloned().collect())
        })
    }
}
