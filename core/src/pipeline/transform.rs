use chrono::{FixedOffset, Utc};

use crate::error::TaskError;
use crate::record::{CanonicalRecord, WarehouseRow};

/// Resolve the reporting offset from minutes east of UTC.
pub fn reporting_offset(minutes: i32) -> Result<FixedOffset, TaskError> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| TaskError::fatal(format!("invalid reporting offset: {minutes} minutes")))
}

/// Normalise a record's timestamp to UTC and derive its business date in `offset`.
pub fn to_warehouse_row(record: &CanonicalRecord, offset: FixedOffset) -> WarehouseRow {
    WarehouseRow {
        transaction_id: record.transaction_id.clone(),
        store_id: record.store_id.clone(),
        category: record.category.clone(),
        amount_cents: record.amount_cents,
        quantity: record.quantity,
        occurred_at_utc: record.occurred_at.with_timezone(&Utc),
        business_date: record.occurred_at.with_timezone(&offset).date_naive(),
        payment_method: record.payment_method.clone(),
        customer_id: record.customer_id.clone(),
    }
}

pub fn transform_batch(records: &[CanonicalRecord], offset: FixedOffset) -> Vec<WarehouseRow> {
    records
        .iter()
        .map(|r| to_warehouse_row(r, offset))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, NaiveDate};

    use super::*;

    fn record(ts: &str) -> CanonicalRecord {
        CanonicalRecord {
            transaction_id: "t1".into(),
            store_id: "s1".into(),
            category: "grocery".into(),
            amount_cents: 1250,
            quantity: 2,
            occurred_at: DateTime::parse_from_rfc3339(ts).unwrap(),
            payment_method: "card".into(),
            customer_id: None,
        }
    }

    #[test]
    fn normalises_to_utc_and_reporting_date() {
        // 23:30 at -05:00 is 04:30 UTC the next day
        let r = record("2024-03-15T23:30:00-05:00");

        let utc_row = to_warehouse_row(&r, reporting_offset(0).unwrap());
        assert_eq!(utc_row.occurred_at_utc.to_rfc3339(), "2024-03-16T04:30:00+00:00");
        assert_eq!(utc_row.business_date, NaiveDate::from_ymd_opt(2024, 3, 16).unwrap());

        let local_row = to_warehouse_row(&r, reporting_offset(-300).unwrap());
        assert_eq!(local_row.business_date, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(local_row.amount_cents, 1250);
    }

    #[test]
    fn rejects_out_of_range_offset() {
        assert!(reporting_offset(24 * 60).is_err());
        assert!(reporting_offset(330).is_ok());
    }
}
