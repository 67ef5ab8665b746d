use std::fs::File;
use std::path::{Path, PathBuf};

use batchflow_core::error::SourceError;
use batchflow_core::record::RawRecord;
use batchflow_core::source::{RawSource, RecordIter};

/// Comma-separated file with a header row. Each pass reopens the file.
pub struct CsvFileSource {
    path: PathBuf,
    delimiter: u8,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: b',',
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn map_csv_error(err: csv::Error) -> SourceError {
    let line = err.position().map(|p| p.line() as usize).unwrap_or(0);
    if err.is_io_error() {
        match err.into_kind() {
            csv::ErrorKind::Io(io) => SourceError::Io(io),
            other => SourceError::Malformed {
                line,
                message: format!("{other:?}"),
            },
        }
    } else {
        SourceError::Malformed {
            line,
            message: err.to_string(),
        }
    }
}

impl RawSource for CsvFileSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn open(&self) -> Result<RecordIter, SourceError> {
        let file = File::open(&self.path)?;
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(file);

        let headers = reader.headers().map_err(map_csv_error)?.clone();
        tracing::debug!(path = %self.path.display(), columns = headers.len(), "opened csv source");

        Ok(Box::new(reader.into_records().map(move |row| {
            let row = row.map_err(map_csv_error)?;
            Ok(headers
                .iter()
                .zip(row.iter())
                .collect::<RawRecord>())
        })))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use batchflow_core::source::read_all;

    use super::*;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn reads_rows_by_header() {
        let f = write_file(
            "Transaction_ID, Store_ID ,amount,date\n\
             T-1,S-1,\"1,200.00\",2024-03-10\n\
             T-2,S-2,5.00,2024-03-11\n",
        );
        let source = CsvFileSource::new(f.path());
        let rows = read_all(&source).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("transaction_id"), Some("T-1"));
        assert_eq!(rows[0].get("store_id"), Some("S-1"));
        assert_eq!(rows[0].get("amount"), Some("1,200.00"));

        // restartable
        assert_eq!(read_all(&source).unwrap().len(), 2);
    }

    #[test]
    fn short_rows_leave_fields_absent() {
        let f = write_file("transaction_id,store_id,amount\nT-1,S-1\n");
        let rows = read_all(&CsvFileSource::new(f.path())).unwrap();
        assert_eq!(rows[0].get("amount"), None);
    }

    #[test]
    fn missing_file_is_io_error() {
        let source = CsvFileSource::new("/definitely/not/here.csv");
        assert!(matches!(source.open(), Err(SourceError::Io(_))));
    }
}
