//! Raw record sources.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::SourceError;
use crate::record::RawRecord;

/// A lazy pass over a source's records.
pub type RecordIter = Box<dyn Iterator<Item = Result<RawRecord, SourceError>> + Send>;

/// Finite, restartable supplier of raw records.
pub trait RawSource: Send + Sync {
    fn name(&self) -> &str;

    /// Start a new pass from the first record. Each call is independent.
    fn open(&self) -> Result<RecordIter, SourceError>;
}

/// Drain one full pass of `source`.
pub fn read_all(source: &dyn RawSource) -> Result<Vec<RawRecord>, SourceError> {
    source.open()?.collect()
}

/// Records held in memory. Used for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemorySource {
    records: Arc<Vec<RawRecord>>,
    fail_opens: AtomicU32,
}

impl InMemorySource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records: Arc::new(records),
            fail_opens: AtomicU32::new(0),
        }
    }

    /// Make the next `n` calls to `open` fail with an I/O error.
    pub fn fail_next_opens(&self, n: u32) {
        self.fail_opens.store(n, Ordering::SeqCst);
    }
}

impl RawSource for InMemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(&self) -> Result<RecordIter, SourceError> {
        let failing = self
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SourceError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "source temporarily unavailable",
            )));
        }

        let records = Arc::clone(&self.records);
        Ok(Box::new(
            (0..records.len()).map(move |i| Ok(records[i].clone())),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_are_restartable() {
        let source = InMemorySource::new(vec![
            RawRecord::new().with("id", "1"),
            RawRecord::new().with("id", "2"),
        ]);
        assert_eq!(read_all(&source).unwrap().len(), 2);
        assert_eq!(read_all(&source).unwrap().len(), 2);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let source = InMemorySource::new(vec![RawRecord::new().with("id", "1")]);
        source.fail_next_opens(1);
        assert!(matches!(read_all(&source), Err(SourceError::Io(_))));
        assert_eq!(read_all(&source).unwrap().len(), 1);
    }
}
