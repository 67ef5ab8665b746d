mod sqlite;

pub use sqlite::SqliteWarehouse;
