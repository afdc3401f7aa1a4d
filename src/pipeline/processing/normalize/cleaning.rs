use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::dates::to_gregorian_date;
use super::Normalizer;
use crate::config::FieldMap;
use crate::constants::{self, SourceKind, ADDRESS, NORMALIZED_ADDRESS};
use crate::error::{LinkageError, Result};
use crate::table::Table;

/// Whether an optional input file was supplied for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceInput {
    Provided(PathBuf),
    Absent,
}

impl From<Option<PathBuf>> for SourceInput {
    fn from(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => SourceInput::Provided(path),
            None => SourceInput::Absent,
        }
    }
}

/// Where the rows of a table came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOrigin {
    File,
    /// Default values standing in for an absent source; never a genuine match
    Synthetic,
}

/// A cleaned table tagged with its source kind and origin
#[derive(Debug, Clone)]
pub struct SourceTable {
    pub kind: SourceKind,
    pub table: Table,
    pub origin: TableOrigin,
}

impl SourceTable {
    pub fn is_synthetic(&self) -> bool {
        self.origin == TableOrigin::Synthetic
    }

    /// Stand-in table for an absent source: one row per row of `main`,
    /// sharing its addresses, every other field set to its default.
    pub fn synthetic(kind: SourceKind, main: &Table) -> Result<Self> {
        let mut headers: Vec<String> = kind.canonical_fields().iter().map(|f| f.to_string()).collect();
        if kind.has_address() {
            headers.push(NORMALIZED_ADDRESS.to_string());
        }
        let address_idx = main.require_column(ADDRESS, "main table")?;
        let normalized_idx = main.column_index(NORMALIZED_ADDRESS);

        let mut table = Table::new(headers.clone());
        for row in main.rows() {
            let values = headers
                .iter()
                .map(|h| match h.as_str() {
                    ADDRESS => row[address_idx].clone(),
                    NORMALIZED_ADDRESS => normalized_idx
                        .map(|i| row[i].clone())
                        .unwrap_or_else(|| row[address_idx].clone()),
                    other => constants::synthetic_default(other).to_string(),
                })
                .collect();
            table.push_row(values);
        }
        debug!("Synthesized {} default rows for absent source {}", table.len(), kind);
        Ok(Self {
            kind,
            table,
            origin: TableOrigin::Synthetic,
        })
    }
}

/// Counts reported after cleaning one source
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleaningStats {
    pub rows_read: usize,
    pub rows_dropped: usize,
}

/// Renames a raw source table onto canonical columns and derives the
/// normalized address and Gregorian dates.
pub struct SourceCleaner<N: Normalizer> {
    normalizer: N,
}

impl<N: Normalizer> SourceCleaner<N> {
    pub fn new(normalizer: N) -> Self {
        Self { normalizer }
    }

    pub fn clean(&self, mut table: Table, field_map: &FieldMap) -> Result<(SourceTable, CleaningStats)> {
        let kind = field_map.kind();
        let rows_read = table.len();
        field_map.apply(&mut table)?;

        if kind.has_address() {
            let address_idx = table.require_column(ADDRESS, kind.as_str())?;
            table.retain_rows(|row| !row[address_idx].trim().is_empty());
            let normalized: Vec<String> = table
                .column_values(address_idx)
                .map(|a| self.normalizer.normalize(a))
                .collect();
            table.set_column(NORMALIZED_ADDRESS, normalized)?;
        }

        for field in kind.date_fields() {
            let idx = table.require_column(field, kind.as_str())?;
            let converted: Vec<String> = table.column_values(idx).map(to_gregorian_date).collect();
            table.set_column(field, converted)?;
        }

        if table.is_empty() && rows_read > 0 {
            return Err(LinkageError::DataQuality(format!(
                "source {} has no rows with an address",
                kind
            )));
        }

        let stats = CleaningStats {
            rows_read,
            rows_dropped: rows_read - table.len(),
        };
        if stats.rows_dropped > 0 {
            warn!("Dropped {} rows without an address from {}", stats.rows_dropped, kind);
        }
        info!("Cleaned {}: {} rows kept", kind, table.len());

        Ok((
            SourceTable {
                kind,
                table,
                origin: TableOrigin::File,
            },
            stats,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::normalize::AddressNormalizer;
    use std::collections::BTreeMap;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_clean_water_status() {
        let mut columns = BTreeMap::new();
        columns.insert("meter_number".to_string(), "水道番号".to_string());
        columns.insert("address".to_string(), "住所".to_string());
        columns.insert("usage_start_date".to_string(), "使用開始日".to_string());
        columns.insert("usage_end_date".to_string(), "使用中止日".to_string());
        columns.insert("usage_status".to_string(), "状態".to_string());
        let map = FieldMap::new(SourceKind::WaterStatus, &columns).unwrap();

        let table = Table::from_rows(
            strings(&["水道番号", "状態", "住所", "使用開始日", "使用中止日"]),
            vec![
                strings(&["1001", "1", "東京都千代田区霞ケ関１丁目１", "平成25年3月20日", ""]),
                strings(&["1002", "1", "", "130320", ""]),
            ],
        );
        let cleaner = SourceCleaner::new(AddressNormalizer::new());
        let (cleaned, stats) = cleaner.clean(table, &map).unwrap();

        assert_eq!(stats, CleaningStats { rows_read: 2, rows_dropped: 1 });
        assert_eq!(cleaned.origin, TableOrigin::File);
        let t = &cleaned.table;
        let norm = t.column_index(NORMALIZED_ADDRESS).unwrap();
        let start = t.column_index("usage_start_date").unwrap();
        assert_eq!(t.value(0, norm), "千代田区霞が関1-1");
        assert_eq!(t.value(0, start), "20130320");
    }

    #[test]
    fn test_clean_reports_missing_columns() {
        let map = FieldMap::new(SourceKind::LandRegistry, &BTreeMap::new()).unwrap();
        let table = Table::new(strings(&["address"]));
        let err = SourceCleaner::new(AddressNormalizer::new())
            .clean(table, &map)
            .unwrap_err();
        assert!(matches!(err, LinkageError::Schema(_)));
        assert!(err.to_string().contains("land_registry"));
    }

    #[test]
    fn test_synthetic_table_copies_addresses() {
        let main = Table::from_rows(
            strings(&["meter_number", "address", "normalized_address"]),
            vec![strings(&["1", "本町1", "本町1"]), strings(&["2", "本町2", "本町2"])],
        );
        let synthetic = SourceTable::synthetic(SourceKind::LandRegistry, &main).unwrap();
        assert!(synthetic.is_synthetic());
        let t = &synthetic.table;
        assert_eq!(t.len(), 2);
        assert_eq!(t.value(1, t.column_index("address").unwrap()), "本町2");
        assert_eq!(t.value(0, t.column_index("structure").unwrap()), "木造");
        assert_eq!(t.value(0, t.column_index("registration_date").unwrap()), "1990/01/01");
    }
}
