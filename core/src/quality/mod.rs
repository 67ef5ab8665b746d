//! Record validation and the per-run quality ledger.

mod ledger;
mod validator;

pub use ledger::{LedgerSummary, QualityLedger, SharedLedger};
pub use validator::{Rejection, RuleId, Validator, Violation};
