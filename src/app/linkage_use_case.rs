use std::path::Path;
use tracing::info;

use super::normalize_use_case::{read_input, CleanedSource};
use crate::constants::{SourceKind, ADDRESS, NORMALIZED_ADDRESS};
use crate::error::{Diagnostics, ErrorCode, Result, ResultExt, Stage, StageFailure};
use crate::pipeline::linkage::summary::JoinRates;
use crate::pipeline::linkage::{source_label, LinkOutcome, LinkSource, LinkTable, RecordLinker};
use crate::pipeline::normalize::{AddressNormalizer, Normalizer};
use crate::table::Table;

/// Accumulated result of linking every source into the main table
#[derive(Debug, Clone)]
pub struct LinkageReport {
    pub table: Table,
    /// Label and join rates of each linked source, in link order
    pub rates: Vec<(String, JoinRates)>,
}

pub struct LinkageUseCase {
    linker: RecordLinker,
}

impl LinkageUseCase {
    pub fn new(linker: RecordLinker) -> Self {
        Self { linker }
    }

    /// Link each source into `main` in turn; every output becomes the next
    /// primary. Sources without an address are left out.
    pub fn link_all(
        &self,
        main: CleanedSource,
        others: Vec<CleanedSource>,
    ) -> std::result::Result<LinkageReport, StageFailure> {
        let mut diag = Diagnostics::new();
        let mut primary = LinkTable::from_source(main.source, main.label);
        let mut rates = Vec::new();
        for other in others {
            if !other.source.kind.has_address() {
                info!("Skipping {}: it has no address to link on", other.label);
                continue;
            }
            let label = other.label.clone();
            let secondary = LinkTable::from_source(other.source, other.label);
            let source = primary.source.clone();
            let outcome = self
                .linker
                .link(primary, secondary, &mut diag)
                .map_err(|err| std::mem::take(&mut diag).into_failure(Stage::Linkage, err))?;
            rates.push((label, outcome.rates));
            primary = LinkTable::new(outcome.table, NORMALIZED_ADDRESS, source);
        }
        Ok(LinkageReport {
            table: primary.table,
            rates,
        })
    }

    /// Link two CSV files. Tables without a normalized address get one from
    /// their `address` column; a label naming a source kind enables the
    /// household rules.
    pub fn link_files(&self, primary: &Path, secondary: &Path) -> std::result::Result<LinkOutcome, StageFailure> {
        let mut diag = Diagnostics::new();
        let result = self
            .load(primary, &mut diag)
            .and_then(|p| Ok((p, self.load(secondary, &mut diag)?)))
            .and_then(|(p, s)| self.linker.link(p, s, &mut diag));
        result.map_err(|err| diag.into_failure(Stage::Linkage, err))
    }

    fn load(&self, path: &Path, diag: &mut Diagnostics) -> Result<LinkTable> {
        let mut table = read_input(path, Stage::Linkage, diag)?;
        if !table.has_column(NORMALIZED_ADDRESS) {
            let address = table
                .require_column(ADDRESS, &path.display().to_string())
                .note(diag, ErrorCode::LinkImportFormat)?;
            let normalizer = AddressNormalizer::new();
            let normalized: Vec<String> = table.column_values(address).map(|a| normalizer.normalize(a)).collect();
            table.set_column(NORMALIZED_ADDRESS, normalized)?;
        }
        let label = source_label(path);
        let mut source = LinkSource::new(label.clone());
        if let Ok(kind) = label.parse::<SourceKind>() {
            source = source.with_kind(kind);
        }
        Ok(LinkTable::new(table, NORMALIZED_ADDRESS, source))
    }
}
