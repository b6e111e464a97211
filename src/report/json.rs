//! JSON report: generation time, summary, then every entry.

use super::{ScanEntry, Summary};
use serde::Serialize;
use std::io::{self, Write};

#[derive(Serialize)]
struct Report<'a> {
    generator: &'static str,
    version: &'static str,
    generated_at: String,
    summary: Summary,
    files: &'a [ScanEntry],
}

pub fn write<W: Write>(writer: &mut W, entries: &[ScanEntry]) -> io::Result<()> {
    let report = Report {
        generator: "sonoprint",
        version: env!("CARGO_PKG_VERSION"),
        generated_at: chrono::Local::now().to_rfc3339(),
        summary: Summary::from_entries(entries),
        files: entries,
    };
    serde_json::to_writer_pretty(&mut *writer, &report)?;
    writeln!(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::entry;

    #[test]
    fn test_json_structure() {
        let entries = vec![
            entry("a.flac", false, None),
            entry("b.mp3", false, Some("decode failed")),
        ];
        let mut out = Vec::new();
        write(&mut out, &entries).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(value["generator"], "sonoprint");
        assert_eq!(value["summary"]["total"], 2);
        assert_eq!(value["summary"]["errors"], 1);
        assert_eq!(value["files"][0]["file_name"], "a.flac");
        assert_eq!(value["files"][0]["hash"].as_str().unwrap().len(), 64);
        // Successful entries carry no error key at all
        assert!(value["files"][0].get("error").is_none());
        assert_eq!(value["files"][1]["error"], "decode failed");
    }
}
