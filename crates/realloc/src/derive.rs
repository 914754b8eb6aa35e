//! Rates computed from reallocated counts.
//!
//! Densities and shares are intensive. They are derived on the merged table,
//! after every count has been reallocated, never reallocated themselves.

use std::collections::HashMap;

use geo::Area;
use serde::{Deserialize, Serialize};

use crate::error::ReallocError;
use crate::model::{Layer, MergedTable};
use crate::overlay::layer_ids;
use crate::units::{convert, AreaUnit};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensitySpec {
    pub column: String,
    pub numerator: String,
    pub unit: AreaUnit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareSpec {
    pub column: String,
    pub numerator: String,
    pub denominator: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DerivedConfig {
    #[serde(default)]
    pub densities: Vec<DensitySpec>,
    #[serde(default)]
    pub shares: Vec<ShareSpec>,
}

fn column(table: &MergedTable, name: &str) -> Result<usize, ReallocError> {
    table.column_index(name).ok_or_else(|| ReallocError::UnknownField {
        table: "merged".into(),
        field: name.into(),
    })
}

fn add_column(
    table: &mut MergedTable,
    name: &str,
    values: Vec<Option<f64>>,
) -> Result<(), ReallocError> {
    if table.column_index(name).is_some() {
        return Err(ReallocError::DuplicateColumn(name.into()));
    }
    table.columns.push(name.into());
    for (row, v) in table.rows.iter_mut().zip(values) {
        row.values.push(v);
    }
    Ok(())
}

/// Append `numerator / area(target)` columns. Target area is measured in the
/// CRS's native unit and converted to each spec's unit.
pub fn add_densities(
    table: &mut MergedTable,
    target: &Layer,
    target_id_field: &str,
    native: AreaUnit,
    specs: &[DensitySpec],
) -> Result<(), ReallocError> {
    if specs.is_empty() {
        return Ok(());
    }
    let ids = layer_ids(target, target_id_field)?;
    let areas: HashMap<String, f64> = ids
        .into_iter()
        .zip(&target.features)
        .map(|(id, f)| (id, f.geometry.unsigned_area()))
        .collect();

    for spec in specs {
        let num = column(table, &spec.numerator)?;
        let values = table
            .rows
            .iter()
            .map(|row| {
                let count = row.values[num]?;
                let area = convert(*areas.get(&row.id)?, native, spec.unit);
                (area > 0.0).then(|| count / area)
            })
            .collect();
        add_column(table, &spec.column, values)?;
    }
    Ok(())
}

/// Append `100 * numerator / denominator` columns. Null when either input is
/// null or the denominator is zero.
pub fn add_shares(table: &mut MergedTable, specs: &[ShareSpec]) -> Result<(), ReallocError> {
    for spec in specs {
        let num = column(table, &spec.numerator)?;
        let den = column(table, &spec.denominator)?;
        let values = table
            .rows
            .iter()
            .map(|row| {
                let (n, d) = (row.values[num]?, row.values[den]?);
                (d != 0.0).then(|| 100.0 * n / d)
            })
            .collect();
        add_column(table, &spec.column, values)?;
    }
    Ok(())
}
