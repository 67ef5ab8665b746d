use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::warehouse::LoadResult;

use super::validator::{Rejection, RuleId};

/// Per-run audit of record-level outcomes.
#[derive(Debug, Clone, Default)]
pub struct QualityLedger {
    accepted: u64,
    transformed: u64,
    rejected: u64,
    by_rule: BTreeMap<RuleId, u64>,
    samples: Vec<Rejection>,
    sample_limit: usize,
    load: Option<LoadResult>,
}

/// Serializable view of a ledger, used in reports and events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub accepted: u64,
    pub transformed: u64,
    pub rejected: u64,
    pub rejected_by_rule: BTreeMap<RuleId, u64>,
    pub samples: Vec<Rejection>,
    pub load: Option<LoadResult>,
}

impl LedgerSummary {
    pub fn total(&self) -> u64 {
        self.accepted + self.transformed + self.rejected
    }
}

impl QualityLedger {
    pub fn new(sample_limit: usize) -> Self {
        Self {
            sample_limit,
            ..Self::default()
        }
    }

    pub fn record_accepted(&mut self) {
        self.accepted += 1;
    }

    pub fn record_transformed(&mut self) {
        self.transformed += 1;
    }

    pub fn record_rejected(&mut self, rejection: Rejection) {
        self.rejected += 1;
        if let Some(rule) = rejection.first_rule() {
            *self.by_rule.entry(rule).or_default() += 1;
        }
        if self.samples.len() < self.sample_limit {
            self.samples.push(rejection);
        }
    }

    pub fn record_load(&mut self, result: LoadResult) {
        self.load = Some(result);
    }

    pub fn total(&self) -> u64 {
        self.accepted + self.transformed + self.rejected
    }

    pub fn samples(&self) -> &[Rejection] {
        &self.samples
    }

    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            accepted: self.accepted,
            transformed: self.transformed,
            rejected: self.rejected,
            rejected_by_rule: self.by_rule.clone(),
            samples: self.samples.clone(),
            load: self.load,
        }
    }
}

/// Ledger handle shared between the stages of one run.
///
/// The clean stage builds a fresh ledger per attempt and swaps it in whole,
/// so a retried clean never double counts.
#[derive(Debug, Clone)]
pub struct SharedLedger {
    inner: Arc<Mutex<QualityLedger>>,
}

impl SharedLedger {
    pub fn new(sample_limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QualityLedger::new(sample_limit))),
        }
    }

    pub fn sample_limit(&self) -> usize {
        self.with(|l| l.sample_limit)
    }

    /// Replace the record counters, keeping any load result already recorded.
    pub fn replace_counts(&self, fresh: QualityLedger) {
        self.with(|l| {
            let load = l.load.take();
            *l = fresh;
            if l.load.is_none() {
                l.load = load;
            }
        });
    }

    pub fn record_load(&self, result: LoadResult) {
        self.with(|l| l.record_load(result));
    }

    pub fn summary(&self) -> LedgerSummary {
        self.with(|l| l.summary())
    }

    fn with<R>(&self, f: impl FnOnce(&mut QualityLedger) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::validator::Violation;
    use crate::record::RawRecord;

    fn rejection(rule: RuleId) -> Rejection {
        Rejection {
            position: None,
            record: RawRecord::new(),
            violations: vec![Violation {
                rule,
                field: "amount".into(),
            }],
        }
    }

    #[test]
    fn samples_are_bounded_but_counts_are_not() {
        let mut ledger = QualityLedger::new(2);
        for _ in 0..5 {
            ledger.record_rejected(rejection(RuleId::BadFormat));
        }
        ledger.record_rejected(rejection(RuleId::ConstraintViolation));

        let s = ledger.summary();
        assert_eq!(s.rejected, 6);
        assert_eq!(s.samples.len(), 2);
        assert_eq!(s.rejected_by_rule[&RuleId::BadFormat], 5);
        assert_eq!(s.rejected_by_rule[&RuleId::ConstraintViolation], 1);
    }

    #[test]
    fn replace_counts_is_not_additive() {
        let shared = SharedLedger::new(5);
        for _ in 0..2 {
            let mut fresh = QualityLedger::new(shared.sample_limit());
            fresh.record_accepted();
            fresh.record_transformed();
            shared.replace_counts(fresh);
        }
        shared.record_load(LoadResult {
            inserted: 1,
            updated: 0,
            skipped: 0,
        });

        let s = shared.summary();
        assert_eq!((s.accepted, s.transformed, s.rejected), (1, 1, 0));
        assert_eq!(s.total(), 2);
        assert_eq!(s.load.map(|l| l.inserted), Some(1));
    }
}
