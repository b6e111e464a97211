//! CSV report, one row per file.

use super::ScanEntry;
use std::io::{self, Write};

const HEADER: &str =
    "file_path,file_name,duration_secs,sample_rate,time_bins,peak_count,confidence,hash,silent,error";

pub fn write<W: Write>(writer: &mut W, entries: &[ScanEntry]) -> io::Result<()> {
    writeln!(writer, "{}", HEADER)?;
    for e in entries {
        writeln!(
            writer,
            "{},{},{:.3},{},{},{},{:.6},{},{},{}",
            escape(&e.file_path),
            escape(&e.file_name),
            e.duration_secs,
            e.sample_rate,
            e.time_bins,
            e.peak_count,
            e.confidence,
            e.hash,
            e.silent,
            escape(e.error.as_deref().unwrap_or("")),
        )?;
    }
    Ok(())
}

/// Quote a field when it contains a delimiter, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
