use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::error::ReallocError;
use crate::model::{MergedTable, TableRow, VintageTable};

/// Left-join vintage tables on `on_field`, anchored on the first table.
///
/// Tables are consumed. Every anchor row survives; a vintage missing an anchor
/// id contributes nulls. Ids present in a later table but absent from the
/// anchor are discarded by the join. They are listed in `MergedTable::dropped`
/// and never become rows: whether that loss is acceptable depends on the anchor
/// covering every id.
pub fn combine(tables: Vec<VintageTable>, on_field: &str) -> Result<MergedTable, ReallocError> {
    for table in &tables {
        if table.id_field != on_field {
            return Err(ReallocError::UnknownField {
                table: table.label.clone(),
                field: on_field.into(),
            });
        }
    }

    let mut tables = tables.into_iter();
    let anchor = tables
        .next()
        .ok_or_else(|| ReallocError::ConfigValidation("no vintage tables to merge".into()))?;
    let anchor_ids = unique_ids(&anchor)?;
    let anchor_label = anchor.label;
    let mut columns = anchor.columns;
    let mut rows = anchor.rows;
    let mut dropped = Vec::new();

    for table in tables {
        unique_ids(&table)?;

        for column in &table.columns {
            columns.push(disambiguate(&columns, column, &table.label)?);
        }

        let by_id: HashMap<&str, &TableRow> =
            table.rows.iter().map(|r| (r.id.as_str(), r)).collect();
        for row in &mut rows {
            match by_id.get(row.id.as_str()) {
                Some(other) => row.values.extend(other.values.iter().copied()),
                None => row.values.extend(std::iter::repeat(None).take(table.columns.len())),
            }
        }

        for row in &table.rows {
            if !anchor_ids.contains(&row.id) {
                dropped.push((table.label.clone(), row.id.clone()));
            }
        }
    }

    if !dropped.is_empty() {
        warn!(
            anchor = %anchor_label,
            dropped = dropped.len(),
            "ids absent from the anchor table were dropped by the merge"
        );
    }

    Ok(MergedTable { id_field: on_field.into(), columns, rows, dropped })
}

fn unique_ids(table: &VintageTable) -> Result<HashSet<String>, ReallocError> {
    let mut ids = HashSet::with_capacity(table.rows.len());
    for row in &table.rows {
        if !ids.insert(row.id.clone()) {
            return Err(ReallocError::DuplicateKey { layer: table.label.clone(), id: row.id.clone() });
        }
    }
    Ok(ids)
}

/// `column` if unused, else `column_<label>`.
pub(crate) fn disambiguate(existing: &[String], column: &str, label: &str) -> Result<String, ReallocError> {
    if !existing.iter().any(|c| c == column) {
        return Ok(column.to_string());
    }
    let suffixed = format!("{column}_{label}");
    if existing.iter().any(|c| *c == suffixed) {
        return Err(ReallocError::DuplicateColumn(suffixed));
    }
    Ok(suffixed)
}
