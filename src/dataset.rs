//! Dataset snapshot loading.
//!
//! A snapshot is a CSV file with a header row; every value is kept as text
//! (rows are rendered back to `name=value` pairs by the chunker anyway).
//! Fetching the snapshot from its upstream source is the scheduler's job,
//! not ours.

use std::path::Path;

use anyhow::{Context, Result};

use crate::model::Row;

/// Load the snapshot at `path` into ordered rows. Row order in the file is
/// the row identity, so nothing here may reorder or drop records.
pub fn load_rows(path: &Path) -> Result<Vec<Row>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("cannot open dataset snapshot {}", path.display()))?;
    let headers = reader
        .headers()
        .with_context(|| format!("cannot read header row of {}", path.display()))?
        .clone();

    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("malformed record {} in snapshot", i + 1))?;
        let fields = headers
            .iter()
            .zip(record.iter())
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        rows.push(Row::new(fields));
    }
    Ok(rows)
}
