mod csv_file;
mod jsonl_file;

pub use csv_file::CsvFileSource;
pub use jsonl_file::JsonlFileSource;
