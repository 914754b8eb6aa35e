use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{PipelineConfig, VintageConfig};
use crate::derive::{add_densities, add_shares};
use crate::error::ReallocError;
use crate::load::{filter_features, join_attributes, AttributeTable, JoinReport};
use crate::merge::combine;
use crate::model::{AttributeKind, Layer, MergedTable, VintageTable};
use crate::reallocate::{self, ReallocRequest};
use crate::verify::{verify_field, ConservationCheck, Tolerance, VerifyOptions};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One vintage's loaded tract layer and optional tabular extract.
pub struct SourceInput {
    pub layer: Layer,
    pub data: Option<AttributeTable>,
}

/// Pre-loaded layers. Vintage inputs are keyed by label and consumed by `run`.
pub struct PipelineInput {
    pub target: Layer,
    pub vintages: HashMap<String, SourceInput>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct FieldCheck {
    pub label: String,
    pub field: String,
    pub column: String,
    pub expected_delta: f64,
    pub matches_expected: bool,
    /// Counts from attribute rows with no tract geometry, included in the
    /// source total.
    pub unjoined_total: f64,
    #[serde(flatten)]
    pub check: ConservationCheck,
}

#[derive(Debug, Clone, Serialize)]
pub struct VintageReport {
    pub label: String,
    pub source_features: usize,
    pub filtered_out: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinReport>,
    pub checks: Vec<FieldCheck>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineMeta {
    pub name: String,
    pub crs: String,
    pub engine_version: String,
    pub run_at: String,
    /// Input file fingerprints, filled in by whoever read the files.
    pub inputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub meta: PipelineMeta,
    pub vintages: Vec<VintageReport>,
    pub merged: MergedTable,
}

impl PipelineResult {
    /// Checks whose delta differs from the configured expectation.
    pub fn mismatches(&self) -> Vec<&FieldCheck> {
        self.vintages
            .iter()
            .flat_map(|v| v.checks.iter())
            .filter(|c| !c.matches_expected)
            .collect()
    }

    /// Fail on the first check whose delta is not the expected one.
    pub fn ensure_conserved(&self, tolerance: &Tolerance) -> Result<(), ReallocError> {
        for c in self.vintages.iter().flat_map(|v| v.checks.iter()) {
            c.check.expect(&c.label, &c.column, c.expected_delta, tolerance)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Reallocate every vintage onto the target layer, check conservation, merge.
///
/// Vintages run in config order; each one's table goes straight to the merge.
pub fn run(config: &PipelineConfig, input: PipelineInput) -> Result<PipelineResult, ReallocError> {
    let PipelineInput { target, mut vintages } = input;

    if target.crs.as_ref() != Some(&config.crs) {
        return Err(ReallocError::ProjectionMismatch(format!(
            "target layer '{}' is in {}, pipeline requires {}",
            target.name,
            target.crs.as_ref().map_or("no CRS".to_string(), |c| c.to_string()),
            config.crs
        )));
    }

    let mut tables = Vec::with_capacity(config.vintages.len());
    let mut reports = Vec::with_capacity(config.vintages.len());
    for vintage in &config.vintages {
        let source = vintages.remove(&vintage.label).ok_or_else(|| {
            ReallocError::ConfigValidation(format!("no input loaded for vintage '{}'", vintage.label))
        })?;
        let (table, report) = run_vintage(config, vintage, &target, source)?;
        tables.push(table);
        reports.push(report);
    }

    let mut merged = combine(tables, &config.target.id_field)?;
    add_densities(
        &mut merged,
        &target,
        &config.target.id_field,
        config.linear_unit.area_unit(),
        &config.derived.densities,
    )?;
    add_shares(&mut merged, &config.derived.shares)?;

    Ok(PipelineResult {
        meta: PipelineMeta {
            name: config.name.clone(),
            crs: config.crs.to_string(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            inputs: BTreeMap::new(),
        },
        vintages: reports,
        merged,
    })
}

fn run_vintage(
    config: &PipelineConfig,
    vintage: &VintageConfig,
    target: &Layer,
    source: SourceInput,
) -> Result<(VintageTable, VintageReport), ReallocError> {
    let SourceInput { mut layer, data } = source;

    // Join before filtering so only rows with no tract at all are unjoined.
    let join = match &data {
        Some(table) => Some(join_attributes(&mut layer, &vintage.id_field, table)?),
        None => None,
    };
    let filtered_out = match &vintage.filter {
        Some(filter) => filter_features(&mut layer, filter),
        None => 0,
    };

    let request = ReallocRequest {
        label: vintage.label.clone(),
        source_id_field: vintage.id_field.clone(),
        target_id_field: config.target.id_field.clone(),
        fields: vintage.fields.clone(),
        options: config.realloc_options(),
    };
    let table = reallocate::run(&layer, target, &request)?;

    let verify_options = VerifyOptions { tolerance: config.tolerance, missing: config.missing_values };
    let mut checks = Vec::new();
    for field in vintage.fields.iter().filter(|f| f.kind == AttributeKind::Extensive) {
        let unjoined_total = join
            .as_ref()
            .and_then(|j| j.unjoined_totals.get(&field.name))
            .copied()
            .unwrap_or(0.0);
        let check = verify_field(&layer, field, &table, &verify_options)?
            .with_unplaced(unjoined_total, &config.tolerance);
        let column = field.output_column();
        let expected_delta = vintage.expected_delta(column);
        let matches_expected = check.matches(expected_delta, &config.tolerance);
        if !matches_expected {
            warn!(
                label = %vintage.label,
                column,
                delta = check.delta,
                expected_delta,
                "conservation delta does not match expectation"
            );
        }
        checks.push(FieldCheck {
            label: vintage.label.clone(),
            field: field.name.clone(),
            column: column.to_string(),
            expected_delta,
            matches_expected,
            unjoined_total,
            check,
        });
    }

    info!(
        label = %vintage.label,
        tracts = layer.features.len(),
        filtered_out,
        checks = checks.len(),
        "vintage reallocated"
    );

    let report = VintageReport {
        label: vintage.label.clone(),
        source_features: layer.features.len(),
        filtered_out,
        join,
        checks,
    };
    Ok((table, report))
}
