use tracing::{info, warn};

use crate::align::WideTable;
use crate::error::EtlError;
use crate::families::VariantFamilyTable;
use crate::storage::ObjectStore;

/// What happened to one output object. Only transport failures are errors;
/// empty inputs and rejected puts are reported and tolerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Skipped,
    Rejected(u16),
}

/// A materialized table ready for serialization: a header and string rows.
#[derive(Debug, Clone)]
pub struct CsvDocument {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvDocument {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EtlError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|err| EtlError::Storage(format!("csv serialize: {err}")))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|err| EtlError::Storage(format!("csv serialize: {err}")))?;
        }
        writer
            .into_inner()
            .map_err(|err| EtlError::Storage(format!("csv serialize: {err}")))
    }
}

/// Serializes and puts one table. A table with no rows short-circuits
/// without touching storage; a non-2xx put is logged and reported as
/// `Rejected`, leaving the caller's loop to carry on.
pub fn write_csv_object<S: ObjectStore + ?Sized>(
    store: &S,
    key: &str,
    document: &CsvDocument,
) -> Result<WriteOutcome, EtlError> {
    if document.is_empty() {
        warn!(key, "no rows to write, skipping put");
        return Ok(WriteOutcome::Skipped);
    }
    let body = document.to_bytes()?;
    let response = store.put(key, &body)?;
    if response.is_success() {
        info!(key, rows = document.row_count(), "wrote object");
        Ok(WriteOutcome::Written)
    } else {
        warn!(key, status = response.status, "put rejected");
        Ok(WriteOutcome::Rejected(response.status))
    }
}

fn format_cell(value: f64) -> String {
    value.to_string()
}

/// Stacks per-entity wide tables into one document using the union of their
/// lineage columns; entities lacking a column get empty cells.
pub fn stack_wide_tables(tables: &[WideTable]) -> CsvDocument {
    let mut columns: Vec<String> = ["Date", "CountryCode", "CountryName", "Population"]
        .iter()
        .map(|name| name.to_string())
        .collect();
    for table in tables {
        for label in table.labels() {
            if !columns.iter().any(|column| column == label) {
                columns.push(label.to_string());
            }
        }
    }
    let lineage_labels: Vec<String> = columns[4..].to_vec();

    let mut document = CsvDocument::new(columns);
    for table in tables {
        let meta = table.meta();
        for (row_index, date) in table.spine().dates().enumerate() {
            let mut row = vec![
                date.to_string(),
                meta.code.clone(),
                meta.name.clone(),
                meta.population.map(format_cell).unwrap_or_default(),
            ];
            for label in &lineage_labels {
                let cell = table
                    .column(label)
                    .and_then(|values| values[row_index])
                    .map(format_cell)
                    .unwrap_or_default();
                row.push(cell);
            }
            document.push_row(row);
        }
    }
    document
}

/// Stacks per-entity family tables the same way, one column per family.
pub fn stack_family_tables(tables: &[VariantFamilyTable]) -> CsvDocument {
    let mut columns: Vec<String> = ["Date", "CountryCode", "CountryName"]
        .iter()
        .map(|name| name.to_string())
        .collect();
    for table in tables {
        for column in table.columns() {
            if !columns.iter().any(|existing| existing == &column.family) {
                columns.push(column.family.clone());
            }
        }
    }
    let family_names: Vec<String> = columns[3..].to_vec();

    let mut document = CsvDocument::new(columns);
    for table in tables {
        let meta = table.meta();
        for (row_index, date) in table.dates().iter().enumerate() {
            let mut row = vec![date.to_string(), meta.code.clone(), meta.name.clone()];
            for name in &family_names {
                let cell = table
                    .columns()
                    .iter()
                    .find(|column| &column.family == name)
                    .map(|column| format_cell(column.totals[row_index]))
                    .unwrap_or_default();
                row.push(cell);
            }
            document.push_row(row);
        }
    }
    document
}
