use std::str::FromStr;

use async_trait::async_trait;
use batchflow_core::error::StorageError;
use batchflow_core::record::WarehouseRow;
use batchflow_core::warehouse::{AggregateQuery, LoadResult, QueryResult, WarehouseStore};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Warehouse table in SQLite.
pub struct SqliteWarehouse {
    pool: SqlitePool,
    table: String,
}

#[derive(sqlx::FromRow)]
struct StoredRow {
    transaction_id: String,
    store_id: String,
    category: String,
    amount_cents: i64,
    quantity: i64,
    occurred_at_utc: String,
    business_date: String,
    payment_method: String,
    customer_id: Option<String>,
}

impl StoredRow {
    fn into_row(self) -> Result<WarehouseRow, StorageError> {
        let occurred_at_utc = DateTime::parse_from_rfc3339(&self.occurred_at_utc)
            .map_err(|e| StorageError::Backend(format!("bad stored timestamp: {e}")))?
            .with_timezone(&Utc);
        let business_date = NaiveDate::parse_from_str(&self.business_date, "%Y-%m-%d")
            .map_err(|e| StorageError::Backend(format!("bad stored date: {e}")))?;
        Ok(WarehouseRow {
            transaction_id: self.transaction_id,
            store_id: self.store_id,
            category: self.category,
            amount_cents: self.amount_cents,
            quantity: self.quantity,
            occurred_at_utc,
            business_date,
            payment_method: self.payment_method,
            customer_id: self.customer_id,
        })
    }
}

fn storage_err(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StorageError::Unavailable(err.to_string())
        }
        sqlx::Error::Database(db) if db.message().contains("no such table") => {
            StorageError::Schema(db.message().to_string())
        }
        _ => StorageError::Backend(err.to_string()),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

impl SqliteWarehouse {
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Result<Self, StorageError> {
        let table = table.into();
        if !valid_identifier(&table) {
            return Err(StorageError::Schema(format!("invalid table name '{table}'")));
        }
        Ok(Self { pool, table })
    }

    /// Open a pool for `url` (`sqlite://file.db` or `sqlite::memory:`).
    ///
    /// In-memory databases live as long as their connection, so they get a
    /// single connection that is never recycled.
    pub async fn connect(url: &str, table: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(storage_err)?
            .create_if_missing(true);

        let in_memory = url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory { 1 } else { 4 });
        if in_memory {
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await.map_err(storage_err)?;
        tracing::debug!(url = %url, table = %table, "connected sqlite warehouse");
        Self::new(pool, table)
    }

    fn select_columns(&self) -> String {
        format!(
            "SELECT transaction_id, store_id, category, amount_cents, quantity, \
             occurred_at_utc, business_date, payment_method, customer_id FROM {}",
            self.table
        )
    }
}

#[async_trait]
impl WarehouseStore for SqliteWarehouse {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn create_schema(&self) -> Result<(), StorageError> {
        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                transaction_id  TEXT PRIMARY KEY NOT NULL,
                store_id        TEXT NOT NULL,
                category        TEXT NOT NULL,
                amount_cents    INTEGER NOT NULL CHECK (amount_cents >= 0),
                quantity        INTEGER NOT NULL CHECK (quantity >= 0),
                occurred_at_utc TEXT NOT NULL,
                business_date   TEXT NOT NULL,
                payment_method  TEXT NOT NULL,
                customer_id     TEXT
            )
            "#,
            self.table
        );
        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn upsert_batch(&self, rows: &[WarehouseRow]) -> Result<LoadResult, StorageError> {
        let select = format!("{} WHERE transaction_id = ?", self.select_columns());
        let insert = format!(
            r#"
            INSERT INTO {} (transaction_id, store_id, category, amount_cents, quantity,
                            occurred_at_utc, business_date, payment_method, customer_id)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            self.table
        );
        let update = format!(
            r#"
            UPDATE {}
            SET store_id = ?, category = ?, amount_cents = ?, quantity = ?,
                occurred_at_utc = ?, business_date = ?, payment_method = ?, customer_id = ?
            WHERE transaction_id = ?
            "#,
            self.table
        );

        // Dropping the transaction without commit rolls everything back.
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let mut result = LoadResult::default();

        for row in rows {
            let existing: Option<StoredRow> = sqlx::query_as(&select)
                .bind(&row.transaction_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage_err)?;
            let existing = existing.map(StoredRow::into_row).transpose()?;

            let occurred_at = row.occurred_at_utc.to_rfc3339();
            let business_date = row.business_date.format("%Y-%m-%d").to_string();

            match existing {
                Some(stored) if stored.same_content(row) => result.skipped += 1,
                Some(_) => {
                    sqlx::query(&update)
                        .bind(&row.store_id)
                        .bind(&row.category)
                        .bind(row.amount_cents)
                        .bind(row.quantity)
                        .bind(&occurred_at)
                        .bind(&business_date)
                        .bind(&row.payment_method)
                        .bind(&row.customer_id)
                        .bind(&row.transaction_id)
                        .execute(&mut *tx)
                        .await
                        .map_err(storage_err)?;
                    result.updated += 1;
                }
                None => {
                    let inserted = sqlx::query(&insert)
                        .bind(&row.transaction_id)
                        .bind(&row.store_id)
                        .bind(&row.category)
                        .bind(row.amount_cents)
                        .bind(row.quantity)
                        .bind(&occurred_at)
                        .bind(&business_date)
                        .bind(&row.payment_method)
                        .bind(&row.customer_id)
                        .execute(&mut *tx)
                        .await;
                    match inserted {
                        Ok(_) => result.inserted += 1,
                        Err(e) if is_unique_violation(&e) => {
                            return Err(StorageError::Conflict(row.transaction_id.clone()));
                        }
                        Err(e) => return Err(storage_err(e)),
                    }
                }
            }
        }

        tx.commit().await.map_err(storage_err)?;
        Ok(result)
    }

    async fn run_query(&self, query: AggregateQuery) -> Result<QueryResult, StorageError> {
        let column = query.group_column();
        let sql = format!(
            r#"
            SELECT CAST({column} AS TEXT), COUNT(*), SUM(amount_cents), SUM(quantity)
            FROM {table}
            GROUP BY {column}
            ORDER BY {column}
            "#,
            table = self.table,
        );

        let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(QueryResult {
            name: query.name().to_string(),
            columns: query.columns(),
            rows: rows
                .into_iter()
                .map(|(key, count, amount, qty)| vec![json!(key), json!(count), json!(amount), json!(qty)])
                .collect(),
        })
    }

    async fn row_count(&self) -> Result<u64, StorageError> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", self.table))
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(count.max(0) as u64)
    }

    async fn fetch_all(&self) -> Result<Vec<WarehouseRow>, StorageError> {
        let sql = format!("{} ORDER BY transaction_id", self.select_columns());
        let stored: Vec<StoredRow> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        stored.into_iter().map(StoredRow::into_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use batchflow_core::warehouse::WarehouseSink;
    use chrono::TimeZone;

    use super::*;

    async fn store() -> SqliteWarehouse {
        let store = SqliteWarehouse::connect("sqlite::memory:", "transactions")
            .await
            .unwrap();
        store.create_schema().await.unwrap();
        store
    }

    fn row(id: &str, store: &str, category: &str, cents: i64) -> WarehouseRow {
        WarehouseRow {
            transaction_id: id.to_string(),
            store_id: store.to_string(),
            category: category.to_string(),
            amount_cents: cents,
            quantity: 1,
            occurred_at_utc: Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap(),
            business_date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            payment_method: "card".to_string(),
            customer_id: None,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = store().await;
        let rows = vec![row("t1", "s1", "food", 100), row("t2", "s2", "toys", 250)];

        let first = store.upsert_batch(&rows).await.unwrap();
        assert_eq!((first.inserted, first.updated, first.skipped), (2, 0, 0));

        let second = store.upsert_batch(&rows).await.unwrap();
        assert_eq!((second.inserted, second.updated, second.skipped), (0, 0, 2));

        assert_eq!(store.fetch_all().await.unwrap(), rows);
    }

    #[tokio::test]
    async fn changed_content_updates_in_place() {
        let store = store().await;
        store.upsert_batch(&[row("t1", "s1", "food", 100)]).await.unwrap();

        let result = store
            .upsert_batch(&[row("t1", "s1", "food", 175)])
            .await
            .unwrap();
        assert_eq!(result.updated, 1);
        assert_eq!(store.row_count().await.unwrap(), 1);
        assert_eq!(store.fetch_all().await.unwrap()[0].amount_cents, 175);
    }

    #[tokio::test]
    async fn aggregates_group_and_sort() {
        let store = store().await;
        store
            .upsert_batch(&[
                row("t1", "s2", "toys", 250),
                row("t2", "s1", "food", 100),
                row("t3", "s1", "food", 50),
            ])
            .await
            .unwrap();

        let by_category = store.run_query(AggregateQuery::SalesByCategory).await.unwrap();
        assert_eq!(by_category.name, "sales_by_category");
        assert_eq!(
            by_category.rows,
            vec![
                vec![json!("food"), json!(2), json!(150), json!(2)],
                vec![json!("toys"), json!(1), json!(250), json!(1)],
            ]
        );

        let daily = store.run_query(AggregateQuery::DailyTotals).await.unwrap();
        assert_eq!(daily.rows, vec![vec![json!("2024-03-10"), json!(3), json!(400), json!(3)]]);
    }

    #[tokio::test]
    async fn missing_schema_is_a_schema_error() {
        let store = SqliteWarehouse::connect("sqlite::memory:", "transactions")
            .await
            .unwrap();
        assert!(matches!(
            store.row_count().await,
            Err(StorageError::Schema(_))
        ));
    }

    #[tokio::test]
    async fn works_behind_the_sink() {
        let store: Arc<dyn WarehouseStore> = Arc::new(store().await);
        let sink = WarehouseSink::new(store.clone(), Some(1));
        let rows = vec![
            row("t1", "s1", "food", 100),
            row("t1", "s1", "food", 100),
            row("t2", "s1", "food", 200),
        ];

        let result = sink.load(&rows).await.unwrap();
        assert_eq!((result.inserted, result.skipped), (2, 1));
        assert_eq!(store.row_count().await.unwrap(), 2);
    }

    #[test]
    fn rejects_unsafe_table_names() {
        assert!(valid_identifier("transactions"));
        assert!(valid_identifier("sales_2024"));
        assert!(!valid_identifier("t; DROP TABLE x"));
        assert!(!valid_identifier("1abc"));
        assert!(!valid_identifier(""));
    }
}
