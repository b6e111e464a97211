//! Scan reports.
//!
//! The output format follows the file extension:
//!
//! - **JSON**: summary plus one object per file, for programmatic use
//! - **CSV**: one row per file, for spreadsheets
//!
//! ```ignore
//! use sonoprint::report;
//!
//! report::generate("scan.json", &entries)?;
//! report::generate("scan.csv", &entries)?;
//! ```

pub mod csv;
pub mod json;

use crate::extractor::FingerprintRecord;
use serde::Serialize;
use std::io;
use std::path::Path;

/// One scanned file: either a fingerprint summary or the error that
/// stopped it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanEntry {
    pub file_path: String,
    pub file_name: String,
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub time_bins: usize,
    pub peak_count: usize,
    pub confidence: f64,
    pub hash: String,
    pub silent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScanEntry {
    pub fn from_record(path: &Path, record: &FingerprintRecord) -> Self {
        Self {
            file_path: path.display().to_string(),
            file_name: file_name(path),
            duration_secs: record.duration(),
            sample_rate: record.sample_rate(),
            time_bins: record.compact().time_bins(),
            peak_count: record.peak_count(),
            confidence: record.confidence(),
            hash: record.hash().to_string(),
            silent: record.compact().is_silent(),
            error: None,
        }
    }

    pub fn from_error(path: &Path, error: impl ToString) -> Self {
        Self {
            file_path: path.display().to_string(),
            file_name: file_name(path),
            duration_secs: 0.0,
            sample_rate: 0,
            time_bins: 0,
            peak_count: 0,
            confidence: 0.0,
            hash: String::new(),
            silent: false,
            error: Some(error.to_string()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Write a report, picking the format from the extension (CSV unless `.json`).
pub fn generate<P: AsRef<Path>>(path: P, entries: &[ScanEntry]) -> io::Result<()> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let mut file = std::fs::File::create(path)?;

    match ext.as_str() {
        "json" => json::write(&mut file, entries),
        _ => csv::write(&mut file, entries),
    }
}

/// Counts shown at the top of reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub fingerprinted: usize,
    /// Fingerprinted, but no peaks anywhere.
    pub silent: usize,
    pub errors: usize,
}

impl Summary {
    pub fn from_entries(entries: &[ScanEntry]) -> Self {
        let mut summary = Self {
            total: entries.len(),
            ..Self::default()
        };

        for e in entries {
            if e.is_error() {
                summary.errors += 1;
            } else {
                summary.fingerprinted += 1;
                if e.silent {
                    summary.silent += 1;
                }
            }
        }

        summary
    }
}
