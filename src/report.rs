//! CSV report output.
//!
//! Rows are any `Serialize` type; one file per report. Parent directories are created on
//! demand and only `.csv` paths are accepted.

use std::ffi::OsStr;
use std::fs::{create_dir_all, File};
use std::path::Path;

use csv::Writer;
use serde::Serialize;

use crate::error::SimError;

// Checks that the path is valid. Creates the file and all parent directories if
// they do not exist.
fn generate_validate_filepath(path: &Path) -> Result<File, SimError> {
    match path.extension().and_then(OsStr::to_str) {
        Some("csv") => {
            if let Some(parent) = path.parent() {
                create_dir_all(parent)?;
            }
            Ok(File::create(path)?)
        }
        _ => Err(SimError::ReportError(
            "Report output files must be CSVs at this time".to_string(),
        )),
    }
}

pub struct ReportWriter {
    writer: Writer<File>,
}

impl ReportWriter {
    /// # Errors
    ///
    /// Returns a `SimError` if the path is not a CSV file or cannot be created.
    pub fn create(path: &Path) -> Result<ReportWriter, SimError> {
        let file = generate_validate_filepath(path)?;
        Ok(ReportWriter {
            writer: Writer::from_writer(file),
        })
    }

    /// Writes one row and flushes it.
    ///
    /// # Errors
    ///
    /// Returns a `SimError` if the row cannot be serialized or written.
    pub fn send<T: Serialize>(&mut self, row: &T) -> Result<(), SimError> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes all `rows` to a new CSV file at `path`.
///
/// # Errors
///
/// Returns a `SimError` if the file cannot be created or written.
pub fn write_report<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), SimError> {
    let mut writer = ReportWriter::create(path)?;
    for row in rows {
        writer.writer.serialize(row)?;
    }
    writer.writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Serialize, Deserialize)]
    struct SampleReport {
        id: u32,
        value: Option<f64>,
    }

    #[test]
    fn add_and_send_report() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("sample_report.csv");
        let mut writer = ReportWriter::create(&path).unwrap();
        writer
            .send(&SampleReport {
                id: 1,
                value: Some(2.5),
            })
            .unwrap();

        assert!(path.exists(), "CSV file should exist");
        let mut reader = csv::Reader::from_path(path).unwrap();
        let records: Vec<SampleReport> = reader.deserialize().map(Result::unwrap).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 1);
        assert_eq!(records[0].value, Some(2.5));
    }

    #[test]
    fn directory_creation_writing_works() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("test-temp").join("sample_report.csv");
        write_report(
            &path,
            &[
                SampleReport { id: 1, value: None },
                SampleReport {
                    id: 2,
                    value: Some(0.5),
                },
            ],
        )
        .unwrap();

        let mut reader = csv::Reader::from_path(path).unwrap();
        let records: Vec<SampleReport> = reader.deserialize().map(Result::unwrap).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, None);
        assert_eq!(records[1].id, 2);
    }

    #[test]
    fn only_csvs_allowed() {
        let temp_dir = tempdir().unwrap();
        let res = ReportWriter::create(&temp_dir.path().join("sample_report.tsv"));
        match res {
            Err(SimError::ReportError(msg)) => {
                assert_eq!(msg, "Report output files must be CSVs at this time");
            }
            _ => panic!("expected a report error"),
        }
    }
}
