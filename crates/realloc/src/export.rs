//! CSV and JSON renderings of result tables.

use std::collections::HashSet;

use crate::error::ReallocError;
use crate::model::{AttrValue, MergedTable, TableRow, VintageTable};
use crate::pipeline::PipelineResult;

fn write_rows(id_field: &str, columns: &[String], rows: &[TableRow]) -> Result<String, ReallocError> {
    let export_err = |e: csv::Error| ReallocError::Export(e.to_string());

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(std::iter::once(id_field).chain(columns.iter().map(String::as_str)))
        .map_err(export_err)?;
    for row in rows {
        let mut record = Vec::with_capacity(columns.len() + 1);
        record.push(row.id.clone());
        // Null cells stay empty so they never read back as zero.
        record.extend(row.values.iter().map(|v| v.map(|n| n.to_string()).unwrap_or_default()));
        writer.write_record(&record).map_err(export_err)?;
    }
    let bytes = writer.into_inner().map_err(|e| ReallocError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| ReallocError::Export(e.to_string()))
}

/// Wide CSV: id column first, then every merged column in order.
pub fn merged_to_csv(table: &MergedTable) -> Result<String, ReallocError> {
    write_rows(&table.id_field, &table.columns, &table.rows)
}

pub fn report_json(result: &PipelineResult) -> Result<String, ReallocError> {
    serde_json::to_string_pretty(result).map_err(|e| ReallocError::Export(e.to_string()))
}

/// Read a previously exported result CSV back into a table keyed by
/// `id_column`, or by the first column when none is named.
///
/// Empty cells become nulls. Any other non-numeric cell is rejected.
pub fn parse_result_table(
    label: &str,
    csv_data: &str,
    id_column: Option<&str>,
) -> Result<VintageTable, ReallocError> {
    let parse_err =
        |e: csv::Error| ReallocError::Parse { source_name: label.into(), message: e.to_string() };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(csv_data.as_bytes());
    let headers: Vec<String> =
        reader.headers().map_err(parse_err)?.iter().map(str::to_string).collect();
    let id_idx = match id_column {
        Some(name) => headers.iter().position(|h| h == name).ok_or_else(|| {
            ReallocError::MissingColumn { table: label.into(), column: name.into() }
        })?,
        None if headers.is_empty() => {
            return Err(ReallocError::Parse { source_name: label.into(), message: "no header row".into() })
        }
        None => 0,
    };
    let id_field = headers[id_idx].clone();

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(parse_err)?;
        let id = record.get(id_idx).unwrap_or("").to_string();
        if !seen.insert(id.clone()) {
            return Err(ReallocError::DuplicateKey { layer: label.into(), id });
        }
        let mut values = Vec::with_capacity(headers.len() - 1);
        for (i, column) in headers.iter().enumerate().filter(|(i, _)| *i != id_idx) {
            let cell = record.get(i).unwrap_or("");
            values.push(match AttrValue::from_cell(cell) {
                AttrValue::Number(n) => Some(n),
                AttrValue::Null => None,
                AttrValue::Text(_) => {
                    return Err(ReallocError::UndefinedValue {
                        layer: label.into(),
                        id,
                        field: column.clone(),
                    })
                }
            });
        }
        rows.push(TableRow { id, values });
    }

    let columns = headers.into_iter().enumerate().filter(|(i, _)| *i != id_idx).map(|(_, h)| h).collect();
    Ok(VintageTable { label: label.into(), id_field, columns, rows })
}
