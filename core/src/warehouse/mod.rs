//! Warehouse storage contract and the idempotent sink built on top of it.

mod memory;
mod sink;

use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::record::WarehouseRow;

pub use memory::InMemoryWarehouse;
pub use sink::WarehouseSink;

/// Outcome of loading one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
}

impl LoadResult {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated + self.skipped
    }
}

impl AddAssign for LoadResult {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
        self.skipped += rhs.skipped;
    }
}

/// The fixed set of aggregations the query stage can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateQuery {
    SalesByCategory,
    SalesByStore,
    DailyTotals,
}

impl AggregateQuery {
    pub const ALL: [AggregateQuery; 3] = [
        AggregateQuery::SalesByCategory,
        AggregateQuery::SalesByStore,
        AggregateQuery::DailyTotals,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::SalesByCategory => "sales_by_category",
            Self::SalesByStore => "sales_by_store",
            Self::DailyTotals => "daily_totals",
        }
    }

    /// Column holding the grouping key.
    pub fn group_column(&self) -> &'static str {
        match self {
            Self::SalesByCategory => "category",
            Self::SalesByStore => "store_id",
            Self::DailyTotals => "business_date",
        }
    }

    pub fn group_key(&self, row: &WarehouseRow) -> String {
        match self {
            Self::SalesByCategory => row.category.clone(),
            Self::SalesByStore => row.store_id.clone(),
            Self::DailyTotals => row.business_date.to_string(),
        }
    }

    pub fn columns(&self) -> Vec<String> {
        vec![
            self.group_column().to_string(),
            "transactions".to_string(),
            "total_amount_cents".to_string(),
            "total_quantity".to_string(),
        ]
    }
}

impl fmt::Display for AggregateQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AggregateQuery {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|q| q.name() == s.trim())
            .ok_or_else(|| StorageError::UnknownQuery(s.to_string()))
    }
}

/// Result set of an aggregation, ordered by group key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// Storage collaborator. Every operation must be safe to call repeatedly.
#[async_trait]
pub trait WarehouseStore: Send + Sync {
    fn name(&self) -> &str;

    /// Create the warehouse table if it does not exist.
    async fn create_schema(&self) -> Result<(), StorageError>;

    /// Upsert `rows` by natural key inside one transaction.
    ///
    /// Absent keys are inserted, keys with different content are updated,
    /// identical rows are skipped. Either every row is applied or none is.
    async fn upsert_batch(&self, rows: &[WarehouseRow]) -> Result<LoadResult, StorageError>;

    async fn run_query(&self, query: AggregateQuery) -> Result<QueryResult, StorageError>;

    async fn row_count(&self) -> Result<u64, StorageError>;

    /// All rows ordered by natural key.
    async fn fetch_all(&self) -> Result<Vec<WarehouseRow>, StorageError>;
}
