//! Feeding configure results back into survey catalogues and source lists.
//!
//! Catalogues are CSV tables with a header row; an empty cell is a masked
//! value and never matches anything.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::analysis::TargetRecord;
use crate::analysis::report::GroupRow;
use crate::storage::{self, Claim, StorageError};

/// Errors that can occur while matching catalogues.
#[derive(Debug, thiserror::Error)]
pub enum CatalogueError {
    #[error("column {column} not found in {table}")]
    MissingColumn { column: String, table: String },

    #[error("cross-match produced {after} rows from {before}")]
    RowCountChanged { before: usize, after: usize },

    #[error("column {column} holds {value:?}, not a count")]
    BadCount { column: String, value: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, CatalogueError>;

/// A table of string cells with named columns.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    /// Used in error messages.
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn read(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.iter().map(String::from).collect();
        let rows = reader
            .records()
            .map(|r| r.map(|record| record.iter().map(String::from).collect()))
            .collect::<core::result::Result<_, _>>()?;
        Ok(Self {
            name: path.display().to_string(),
            headers,
            rows,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn require(&self, name: &str) -> Result<usize> {
        self.column(name).ok_or_else(|| CatalogueError::MissingColumn {
            column: name.to_string(),
            table: self.name.clone(),
        })
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows[row].get(column).map_or("", String::as_str)
    }

    /// Reads a cell as a count. An empty cell counts as zero.
    pub fn count(&self, row: usize, column: usize) -> Result<usize> {
        let value = self.cell(row, column).trim();
        if value.is_empty() {
            return Ok(0);
        }
        value.parse().map_err(|_| CatalogueError::BadCount {
            column: self.headers[column].clone(),
            value: value.to_string(),
        })
    }

    /// Adds a column filled with `value`, or resets an existing one to it.
    pub fn fill_column(&mut self, name: &str, value: &str) -> usize {
        let index = match self.column(name) {
            Some(i) => i,
            None => {
                self.headers.push(name.to_string());
                self.headers.len() - 1
            }
        };
        for row in &mut self.rows {
            if row.len() <= index {
                row.resize(index + 1, String::new());
            }
            row[index] = value.to_string();
        }
        index
    }
}

// ── Catalogue cross-match ──

/// Catalogue rows and configured targets meet on survey, id and both templates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchKey {
    pub survey: String,
    pub id: String,
    pub progtemp: String,
    pub obstemp: String,
}

/// How often a catalogue target was configured and assigned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally {
    /// Number of configured fields the target appeared in.
    pub configured: usize,
    /// Number of those fields in which it got a fibre.
    pub assigned: usize,
    pub field_names: Vec<String>,
}

/// Tallies target records by match key.
pub fn tally(targets: &[TargetRecord]) -> HashMap<MatchKey, Tally> {
    let mut tallies: HashMap<MatchKey, Tally> = HashMap::new();
    for record in targets {
        let key = MatchKey {
            survey: record.targsrvy.trim().to_string(),
            id: record.targid.trim().to_string(),
            progtemp: record.progtemp.trim().to_string(),
            obstemp: record.obstemp.trim().to_string(),
        };
        let entry = tallies.entry(key).or_default();
        entry.configured += 1;
        if record.assigned {
            entry.assigned += 1;
        }
        if !entry.field_names.contains(&record.field_name) {
            entry.field_names.push(record.field_name.clone());
        }
    }
    tallies
}

/// Returns `catalogue` with `CONFIGURED`, `ASSIGNED` and `FIELD_NAME` set
/// from `tallies`. Rows without a match get zero counts and no field name.
pub fn add_configured(catalogue: &Table, tallies: &HashMap<MatchKey, Tally>) -> Result<Table> {
    let survey = catalogue.require("TARGSRVY")?;
    let id = catalogue.require("TARGID")?;
    let progtemp = catalogue.require("PROGTEMP")?;
    let obstemp = catalogue.require("OBSTEMP")?;

    let mut output = catalogue.clone();
    let configured = output.fill_column("CONFIGURED", "0");
    let assigned = output.fill_column("ASSIGNED", "0");
    let field_name = output.fill_column("FIELD_NAME", "");

    let mut matched = 0;
    for (row, cells) in output.rows.iter_mut().enumerate() {
        let key = MatchKey {
            survey: catalogue.cell(row, survey).trim().to_string(),
            id: catalogue.cell(row, id).trim().to_string(),
            progtemp: catalogue.cell(row, progtemp).trim().to_string(),
            obstemp: catalogue.cell(row, obstemp).trim().to_string(),
        };
        if key.id.is_empty() {
            continue;
        }
        if let Some(t) = tallies.get(&key) {
            cells[configured] = t.configured.to_string();
            cells[assigned] = t.assigned.to_string();
            cells[field_name] = t.field_names.join(";");
            matched += 1;
        }
    }

    check_row_count(catalogue.rows.len(), output.rows.len())?;

    info!(
        catalogue = %catalogue.name,
        rows = catalogue.rows.len(),
        matched,
        "cross-matched catalogue"
    );
    Ok(output)
}

/// A cross-matched catalogue holds exactly one row per input row.
fn check_row_count(before: usize, after: usize) -> Result<()> {
    if before == after {
        Ok(())
    } else {
        Err(CatalogueError::RowCountChanged { before, after })
    }
}

/// Writes `<outdir>/<stem>-configured.csv` for each catalogue, with the
/// configure tallies of `targets` added. Existing outputs are skipped unless
/// `overwrite` is set. Returns the paths written.
pub fn crossmatch_files(
    catalogues: &[PathBuf],
    targets: &[TargetRecord],
    output_dir: &Path,
    overwrite: bool,
) -> Result<Vec<PathBuf>> {
    storage::ensure_dir(output_dir)?;
    let tallies = tally(targets);
    let mut written = Vec::new();
    for path in catalogues {
        let output = storage::tagged_output(path, output_dir, "configured", "csv")?;
        if storage::claim_output(&output, overwrite)? == Claim::Skip {
            continue;
        }
        add_configured(&Table::read(path)?, &tallies)?.write(&output)?;
        written.push(output);
    }
    Ok(written)
}

// ── Source lists ──

/// Columns copied from target catalogues into source lists, with their defaults.
pub const SOURCE_COLUMNS: [(&str, &str); 5] = [
    ("GA_TARGBITS", "0"),
    ("TARGPROG", ""),
    ("TARGPRIO", "0.0"),
    ("CONFIGURED", "0"),
    ("ASSIGNED", "0"),
];

/// Source rows with a Gaia revision match on Gaia id; the rest on PS1 id.
const GAIA_MATCH: (&str, &str) = ("SOURCE_ID", "GAIA_ID");
const PS1_MATCH: (&str, &str) = ("PS1_ID", "PS_ID");

/// Adds [`SOURCE_COLUMNS`] to `source` at their defaults, then copies values
/// across from each catalogue in turn. A later catalogue overwrites an
/// earlier match. Returns how many catalogues matched a row that had already
/// been filled.
pub fn add_columns_to_source_list(source: &mut Table, catalogues: &[Table]) -> Result<usize> {
    let revision = source.require("GAIA_REV_ID")?;
    let source_gaia = source.require(GAIA_MATCH.0)?;
    let source_ps1 = source.require(PS1_MATCH.0)?;

    let columns: Vec<usize> = SOURCE_COLUMNS
        .iter()
        .map(|(name, default)| source.fill_column(name, default))
        .collect();

    let mut ambiguous = 0;
    for catalogue in catalogues {
        let catalogue_columns = SOURCE_COLUMNS
            .iter()
            .map(|(name, _)| catalogue.require(name))
            .collect::<Result<Vec<_>>>()?;
        let by_gaia = index_by(catalogue, catalogue.require(GAIA_MATCH.1)?);
        let by_ps1 = index_by(catalogue, catalogue.require(PS1_MATCH.1)?);

        let mut conflict = false;
        for row in 0..source.rows.len() {
            let has_gaia = !matches!(source.cell(row, revision).trim(), "" | "0");
            let (value, index) = if has_gaia {
                (source.cell(row, source_gaia).trim(), &by_gaia)
            } else {
                (source.cell(row, source_ps1).trim(), &by_ps1)
            };
            if value.is_empty() {
                continue;
            }
            let Some(&target_row) = index.get(value) else {
                continue;
            };

            let cells = &mut source.rows[row];
            for (&(_, default), (&to, &from)) in
                SOURCE_COLUMNS.iter().zip(columns.iter().zip(&catalogue_columns))
            {
                if cells[to] != default {
                    conflict = true;
                }
                cells[to] = catalogue.cell(target_row, from).to_string();
            }
        }

        if conflict {
            warn!(
                catalogue = %catalogue.name,
                source = %source.name,
                "found ambiguous matches from catalogue to source list; \
                 two surveys may target the same object"
            );
            ambiguous += 1;
        }
    }
    Ok(ambiguous)
}

/// Writes `<outdir>/<stem>-configured.csv` for each source list, with columns
/// copied from the cross-matched target `catalogues`.
pub fn source_list_files(
    sources: &[PathBuf],
    catalogues: &[PathBuf],
    output_dir: &Path,
    overwrite: bool,
) -> Result<Vec<PathBuf>> {
    storage::ensure_dir(output_dir)?;
    let catalogues = catalogues
        .iter()
        .map(|p| Table::read(p))
        .collect::<Result<Vec<_>>>()?;
    let mut written = Vec::new();
    for path in sources {
        let output = storage::tagged_output(path, output_dir, "configured", "csv")?;
        if storage::claim_output(&output, overwrite)? == Claim::Skip {
            continue;
        }
        let mut source = Table::read(path)?;
        add_columns_to_source_list(&mut source, &catalogues)?;
        source.write(&output)?;
        info!(source = %path.display(), output = %output.display(), "wrote source list");
        written.push(output);
    }
    Ok(written)
}

/// Totals `CONFIGURED` and `ASSIGNED` over a matched source list.
pub fn summarize_source_list(source: &Table, key: &str) -> Result<GroupRow> {
    let configured = source.require("CONFIGURED")?;
    let assigned = source.require("ASSIGNED")?;
    let mut summary = GroupRow {
        key: key.to_string(),
        total: 0,
        assigned: 0,
    };
    for row in 0..source.rows.len() {
        summary.total += source.count(row, configured)?;
        summary.assigned += source.count(row, assigned)?;
    }
    Ok(summary)
}

/// One summary row per matched source list file, named by the part of the
/// file name before its first `-`.
pub fn source_list_report(paths: &[PathBuf]) -> Result<Vec<GroupRow>> {
    paths
        .iter()
        .map(|path| summarize_source_list(&Table::read(path)?, &source_list_name(path)))
        .collect()
}

fn source_list_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default();
    stem.split('-').next().unwrap_or_default().to_string()
}

/// Maps each non-empty value in `column` to the first row holding it.
fn index_by(table: &Table, column: usize) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for row in 0..table.rows.len() {
        let value = table.cell(row, column).trim();
        if !value.is_empty() {
            index.entry(value.to_string()).or_insert(row);
        }
    }
    index
}
