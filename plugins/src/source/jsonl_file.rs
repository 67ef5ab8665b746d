use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use batchflow_core::error::SourceError;
use batchflow_core::record::RawRecord;
use batchflow_core::source::{RawSource, RecordIter};
use serde_json::Value;

/// One JSON object per line. Blank lines are ignored.
pub struct JsonlFileSource {
    path: PathBuf,
}

impl JsonlFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

fn parse_line(line_no: usize, line: &str) -> Result<RawRecord, SourceError> {
    let value: Value = serde_json::from_str(line).map_err(|e| SourceError::Malformed {
        line: line_no,
        message: e.to_string(),
    })?;
    let Value::Object(map) = value else {
        return Err(SourceError::Malformed {
            line: line_no,
            message: "expected a JSON object".to_string(),
        });
    };

    Ok(map
        .into_iter()
        .filter_map(|(k, v)| {
            let text = match v {
                Value::Null => return None,
                Value::String(s) => s,
                other => other.to_string(),
            };
            Some((k, text))
        })
        .collect())
}

impl RawSource for JsonlFileSource {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn open(&self) -> Result<RecordIter, SourceError> {
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(Box::new(
            reader
                .lines()
                .enumerate()
                .filter_map(|(i, line)| match line {
                    Ok(l) if l.trim().is_empty() => None,
                    Ok(l) => Some(parse_line(i + 1, &l)),
                    Err(e) => Some(Err(SourceError::Io(e))),
                }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use batchflow_core::source::read_all;

    use super::*;

    #[test]
    fn reads_objects_and_stringifies_scalars() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"{{"transaction_id":"T-1","amount":12.5,"quantity":2,"customer_id":null}}"#
        )
        .unwrap();
        writeln!(f).unwrap();
        writeln!(f, r#"{{"transaction_id":"T-2","amount":"3.00"}}"#).unwrap();

        let rows = read_all(&JsonlFileSource::new(f.path())).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("amount"), Some("12.5"));
        assert_eq!(rows[0].get("quantity"), Some("2"));
        assert_eq!(rows[0].get("customer_id"), None);
        assert_eq!(rows[1].get("amount"), Some("3.00"));
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, r#"{{"transaction_id":"T-1"}}"#).unwrap();
        writeln!(f, "not json").unwrap();

        match read_all(&JsonlFileSource::new(f.path())) {
            Err(SourceError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed error, got {other:?}"),
        }
    }
}
