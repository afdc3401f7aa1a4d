use encoding_rs::{Encoding, EUC_JP, ISO_2022_JP, SHIFT_JIS};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{LinkageError, Result};
use crate::table::Table;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const SNIFF_BYTES: usize = 4096;
const ESC: u8 = 0x1B;

/// Lower-cased extension of `path`, without the dot.
pub fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Read a delimited table, decoding legacy Japanese encodings when the file
/// is not UTF-8. Every cell is kept as text.
pub fn read_table(path: &Path) -> Result<Table> {
    let ext = extension(path);
    if ext != "csv" {
        return Err(LinkageError::Format(format!(
            "{} is not a supported table file (extension '{}')",
            path.display(),
            ext
        )));
    }
    let bytes = fs::read(path)?;
    let (text, encoding) = decode(&bytes).ok_or_else(|| {
        LinkageError::Encoding(format!("no known encoding decodes {}", path.display()))
    })?;
    debug!("Decoded {} as {}", path.display(), encoding);
    parse_csv(&text)
}

/// Decode `bytes` as UTF-8 or one of the sniffed legacy encodings.
pub fn decode(bytes: &[u8]) -> Option<(String, &'static str)> {
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        return std::str::from_utf8(rest)
            .ok()
            .map(|s| (s.to_string(), "UTF-8 (BOM)"));
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        return Some((text.to_string(), "UTF-8"));
    }
    candidate_encodings(&bytes[..bytes.len().min(SNIFF_BYTES)])
        .into_iter()
        .find_map(|encoding| {
            encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| (text.into_owned(), encoding.name()))
        })
}

/// Legacy encodings to try, most likely first given a leading sample.
fn candidate_encodings(sample: &[u8]) -> Vec<&'static Encoding> {
    if sample.contains(&ESC) {
        vec![ISO_2022_JP, SHIFT_JIS, EUC_JP]
    } else {
        vec![SHIFT_JIS, EUC_JP, ISO_2022_JP]
    }
}

pub fn parse_csv(text: &str) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut table = Table::new(headers);
    let mut overlong = 0;
    for record in reader.records() {
        let record = record?;
        if table.push_row(record.iter().map(|v| v.to_string()).collect()) > 0 {
            overlong += 1;
        }
    }
    if overlong > 0 {
        warn!(
            "Dropped cells beyond the {} header columns in {} rows",
            table.headers().len(),
            overlong
        );
    }
    Ok(table)
}

/// Write `table` as UTF-8 with a byte-order mark, creating parent directories.
pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(UTF8_BOM)?;
    let mut writer = csv::Writer::from_writer(file);
    writer.write_record(table.headers())?;
    for row in table.rows() {
        writer.write_record(row)?;
    }
    writer.flush()?;
    info!("Wrote {} rows to {}", table.len(), path.display());
    Ok(())
}
