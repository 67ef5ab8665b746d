use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::config::ValidationConfig;
use crate::record::{CanonicalRecord, RawRecord};

use super::ledger::QualityLedger;

const TRANSACTION_ID: &[&str] = &["transaction_id", "id"];
const STORE_ID: &[&str] = &["store_id"];
const CATEGORY: &[&str] = &["category"];
const AMOUNT: &[&str] = &["amount"];
const QUANTITY: &[&str] = &["quantity"];
const DATE: &[&str] = &["date", "transaction_date"];
const PAYMENT_METHOD: &[&str] = &["payment_method"];
const CUSTOMER_ID: &[&str] = &["customer_id"];

const DEFAULT_CATEGORY: &str = "uncategorized";
const DEFAULT_PAYMENT_METHOD: &str = "unknown";
const DEFAULT_QUANTITY: i64 = 1;

/// Rule identifiers, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    MissingField,
    BadFormat,
    ConstraintViolation,
}

impl RuleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingField => "missing_field",
            Self::BadFormat => "bad_format",
            Self::ConstraintViolation => "constraint_violation",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: RuleId,
    pub field: String,
}

impl Violation {
    fn new(rule: RuleId, field: &str) -> Self {
        Self {
            rule,
            field: field.to_string(),
        }
    }
}

/// A record that failed validation. Never reaches the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Position in the input batch, when validated as part of one.
    pub position: Option<usize>,
    pub record: RawRecord,
    pub violations: Vec<Violation>,
}

impl Rejection {
    pub fn first_rule(&self) -> Option<RuleId> {
        self.violations.first().map(|v| v.rule)
    }

    fn at(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }
}

/// Stateless record validator. Cheap to clone and share across threads.
#[derive(Debug, Clone)]
pub struct Validator {
    as_of: NaiveDate,
    retention_days: u32,
    future_tolerance_days: u32,
}

impl Validator {
    /// Build a validator evaluating the retention window against `as_of`.
    pub fn new(config: &ValidationConfig, as_of: NaiveDate) -> Self {
        Self {
            as_of,
            retention_days: config.retention_days,
            future_tolerance_days: config.future_tolerance_days,
        }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    /// Validate a single record.
    ///
    /// Rules run in phases (presence, format, constraints). The first phase
    /// with any violation produces the rejection; its violations are listed
    /// in field order, so the outcome is reproducible for the same input.
    pub fn validate(&self, raw: &RawRecord) -> Result<CanonicalRecord, Rejection> {
        self.check(raw).map_err(|violations| Rejection {
            position: None,
            record: raw.clone(),
            violations,
        })
    }

    fn check(&self, raw: &RawRecord) -> Result<CanonicalRecord, Vec<Violation>> {
        // Phase 1: presence
        let missing: Vec<Violation> = [
            ("transaction_id", TRANSACTION_ID),
            ("store_id", STORE_ID),
            ("amount", AMOUNT),
            ("date", DATE),
        ]
        .iter()
        .filter(|(_, names)| raw.get_any(names).is_none())
        .map(|(field, _)| Violation::new(RuleId::MissingField, field))
        .collect();
        if !missing.is_empty() {
            return Err(missing);
        }

        // Phase 2: coercion
        let mut bad = Vec::new();
        let transaction_id = normalize_id(raw.get_any(TRANSACTION_ID));
        if transaction_id.is_none() {
            bad.push(Violation::new(RuleId::BadFormat, "transaction_id"));
        }
        let store_id = normalize_id(raw.get_any(STORE_ID));
        if store_id.is_none() {
            bad.push(Violation::new(RuleId::BadFormat, "store_id"));
        }
        let amount_cents = raw.get_any(AMOUNT).and_then(parse_amount_cents);
        if amount_cents.is_none() {
            bad.push(Violation::new(RuleId::BadFormat, "amount"));
        }
        let quantity = match raw.get_any(QUANTITY) {
            None => Some(DEFAULT_QUANTITY),
            Some(v) => v.trim().parse::<i64>().ok(),
        };
        if quantity.is_none() {
            bad.push(Violation::new(RuleId::BadFormat, "quantity"));
        }
        let occurred_at = raw.get_any(DATE).and_then(parse_timestamp);
        if occurred_at.is_none() {
            bad.push(Violation::new(RuleId::BadFormat, "date"));
        }

        let (
            Some(transaction_id),
            Some(store_id),
            Some(amount_cents),
            Some(quantity),
            Some(occurred_at),
        ) = (transaction_id, store_id, amount_cents, quantity, occurred_at)
        else {
            return Err(bad);
        };

        // Phase 3: business constraints
        let mut violated = Vec::new();
        if amount_cents < 0 {
            violated.push(Violation::new(RuleId::ConstraintViolation, "amount"));
        }
        if quantity < 0 {
            violated.push(Violation::new(RuleId::ConstraintViolation, "quantity"));
        }
        if !self.within_retention(occurred_at.date_naive()) {
            violated.push(Violation::new(RuleId::ConstraintViolation, "date"));
        }
        if !violated.is_empty() {
            return Err(violated);
        }

        Ok(CanonicalRecord {
            transaction_id,
            store_id,
            category: normalize_label(raw.get_any(CATEGORY), DEFAULT_CATEGORY),
            amount_cents,
            quantity,
            occurred_at,
            payment_method: normalize_label(raw.get_any(PAYMENT_METHOD), DEFAULT_PAYMENT_METHOD),
            customer_id: normalize_id(raw.get_any(CUSTOMER_ID)),
        })
    }

    fn within_retention(&self, date: NaiveDate) -> bool {
        let earliest = self
            .as_of
            .checked_sub_days(Days::new(u64::from(self.retention_days)))
            .unwrap_or(NaiveDate::MIN);
        let latest = self
            .as_of
            .checked_add_days(Days::new(u64::from(self.future_tolerance_days)))
            .unwrap_or(NaiveDate::MAX);
        date >= earliest && date <= latest
    }

    /// Validate a whole batch, deduplicating by natural key.
    ///
    /// The first accepted occurrence of a key wins; later occurrences are
    /// counted as `transformed`. Every input record lands in exactly one
    /// ledger counter.
    pub fn clean_batch(
        &self,
        records: &[RawRecord],
        ledger: &mut QualityLedger,
    ) -> Vec<CanonicalRecord> {
        let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
        let mut accepted = Vec::with_capacity(records.len());

        for (position, raw) in records.iter().enumerate() {
            match self.validate(raw) {
                Ok(record) => {
                    if seen.insert(record.natural_key().to_string()) {
                        ledger.record_accepted();
                        accepted.push(record);
                    } else {
                        tracing::debug!(
                            key = record.natural_key(),
                            position,
                            "duplicate key in batch, keeping first occurrence"
                        );
                        ledger.record_transformed();
                    }
                }
                Err(rejection) => ledger.record_rejected(rejection.at(position)),
            }
        }

        accepted
    }
}

fn normalize_id(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim().to_lowercase();
    (!value.is_empty()).then_some(value)
}

fn normalize_label(raw: Option<&str>, default: &str) -> String {
    normalize_id(raw).unwrap_or_else(|| default.to_string())
}

/// Parse a decimal amount into cents. Tolerates a leading `$` and `,`
/// separators. Digits past the cent round half-up; exponents are rejected.
fn parse_amount_cents(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    let (negative, rest) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, trimmed),
    };
    let cleaned: String = rest
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();

    let (whole, fraction) = cleaned.split_once('.').unwrap_or((cleaned.as_str(), ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(fraction) {
        return None;
    }

    let units: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut digits = fraction.bytes().map(|b| i64::from(b - b'0'));
    let tenths = digits.next().unwrap_or(0);
    let hundredths = digits.next().unwrap_or(0);
    let round_up = digits.next().is_some_and(|d| d >= 5);

    let cents = units
        .checked_mul(100)?
        .checked_add(tenths * 10 + hundredths + i64::from(round_up))?;
    Some(if negative { -cents } else { cents })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let s = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().fixed_offset());
        }
    }
    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc().fixed_offset());
        }
    }
    None
}
