//! Record types flowing through the pipeline.
//!
//! ```text
//! RawRecord ── validate ──▶ CanonicalRecord ── transform ──▶ WarehouseRow
//!     │
//!     └──────────────────▶ Rejection (ledger only, never loaded)
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A record exactly as read from the source: field name -> raw string value.
///
/// Field names are normalised (trimmed, lowercased) on construction so lookups
/// are case-insensitive; values are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    fields: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.fields
            .insert(name.trim().to_ascii_lowercase(), value.into());
    }

    /// Look up the first present, non-blank value among `names`.
    pub fn get_any(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|n| self.fields.get(*n))
            .map(String::as_str)
            .find(|v| !v.trim().is_empty())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_any(&[name])
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (k, v) in iter {
            record.insert(k.as_ref(), v);
        }
        record
    }
}

/// A validated, typed transaction. Only the validator produces these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub transaction_id: String,
    pub store_id: String,
    pub category: String,
    /// Non-negative amount in cents.
    pub amount_cents: i64,
    pub quantity: i64,
    pub occurred_at: DateTime<FixedOffset>,
    pub payment_method: String,
    pub customer_id: Option<String>,
}

impl CanonicalRecord {
    /// The natural key used for deduplication and idempotent upserts.
    pub fn natural_key(&self) -> &str {
        &self.transaction_id
    }
}

/// A canonical record ready for the warehouse table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseRow {
    pub transaction_id: String,
    pub store_id: String,
    pub category: String,
    pub amount_cents: i64,
    pub quantity: i64,
    pub occurred_at_utc: DateTime<Utc>,
    pub business_date: NaiveDate,
    pub payment_method: String,
    pub customer_id: Option<String>,
}

impl WarehouseRow {
    pub fn natural_key(&self) -> &str {
        &self.transaction_id
    }

    /// Two rows with the same key and the same content are the same load.
    pub fn same_content(&self, other: &WarehouseRow) -> bool {
        self == other
    }
}

/// Format cents as a decimal string (`1234` -> `"12.34"`).
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_record_lookup_is_case_insensitive_and_skips_blank() {
        let record = RawRecord::new()
            .with(" Transaction_ID ", "T-1")
            .with("id", "   ")
            .with("Amount", "10");

        assert_eq!(record.get("transaction_id"), Some("T-1"));
        assert_eq!(record.get_any(&["id", "transaction_id"]), Some("T-1"));
        assert_eq!(record.get("amount"), Some("10"));
        assert_eq!(record.get("missing"), None);
    }

    #[test]
    fn cents_formatting() {
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(1234), "12.34");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(-250), "-2.50");
    }
}
