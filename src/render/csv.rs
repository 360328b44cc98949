//! Flat-file export of the merged result table.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::entities::table::ResultTable;
use crate::error::SnpFinderError;

/// Header row followed by one row per variant.
pub fn write_table<W: Write>(table: &ResultTable, writer: W) -> Result<(), SnpFinderError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    csv_writer.write_record(ResultTable::columns())?;
    for row in table.rows() {
        csv_writer.write_record(&row)?;
    }
    csv_writer.flush()?;
    Ok(())
}

pub fn export_csv(table: &ResultTable, path: &Path) -> Result<(), SnpFinderError> {
    let file = File::create(path)?;
    write_table(table, BufWriter::new(file))?;
    info!(path = %path.display(), rows = table.len(), "Exported result table");
    Ok(())
}

pub fn to_csv_string(table: &ResultTable) -> Result<String, SnpFinderError> {
    let mut buffer = Vec::new();
    write_table(table, &mut buffer)?;
    String::from_utf8(buffer).map_err(|err| {
        SnpFinderError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    })
}
