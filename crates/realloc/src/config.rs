use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::derive::DerivedConfig;
use crate::error::ReallocError;
use crate::merge::disambiguate;
use crate::model::{AttributeKind, Crs, FieldSpec};
use crate::reallocate::{EmptyTargetFill, MissingValuePolicy, ReallocOptions};
use crate::units::LinearUnit;
use crate::verify::Tolerance;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    /// Planar CRS every layer must be in.
    pub crs: Crs,
    #[serde(default)]
    pub linear_unit: LinearUnit,
    #[serde(default = "default_true")]
    pub fail_on_mismatch: bool,
    #[serde(default)]
    pub missing_values: MissingValuePolicy,
    #[serde(default)]
    pub empty_target: EmptyTargetFill,
    #[serde(default)]
    pub tolerance: Tolerance,
    pub target: TargetConfig,
    pub vintages: Vec<VintageConfig>,
    #[serde(default)]
    pub derived: DerivedConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

/// The fixed neighborhood layer shared by every vintage.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub file: String,
    pub id_field: String,
}

/// One decade/year: which tracts, which id, which counts.
#[derive(Debug, Clone, Deserialize)]
pub struct VintageConfig {
    pub label: String,
    pub file: String,
    pub id_field: String,
    pub fields: Vec<FieldSpec>,
    /// Known residual per output column. Absent columns expect zero.
    #[serde(default)]
    pub expected_delta: BTreeMap<String, f64>,
    #[serde(default)]
    pub data: Option<DataJoin>,
    #[serde(default)]
    pub filter: Option<RowFilter>,
}

impl VintageConfig {
    pub fn expected_delta(&self, column: &str) -> f64 {
        self.expected_delta.get(column).copied().unwrap_or(0.0)
    }
}

/// Tabular extract joined onto the tract layer by id.
#[derive(Debug, Clone, Deserialize)]
pub struct DataJoin {
    pub file: String,
    pub key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowFilter {
    pub field: String,
    pub values: Vec<String>,
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub csv: Option<String>,
    #[serde(default)]
    pub json: Option<String>,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl PipelineConfig {
    pub fn from_toml(input: &str) -> Result<Self, ReallocError> {
        let config: PipelineConfig =
            toml::from_str(input).map_err(|e| ReallocError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn realloc_options(&self) -> ReallocOptions {
        ReallocOptions { missing: self.missing_values, empty_target: self.empty_target }
    }

    pub fn validate(&self) -> Result<(), ReallocError> {
        let invalid =
            |msg: String| -> Result<(), ReallocError> { Err(ReallocError::ConfigValidation(msg)) };

        if self.crs.is_geographic() {
            return invalid(format!("crs {} is geographic; a planar CRS is required", self.crs));
        }
        if self.vintages.is_empty() {
            return invalid("at least one vintage is required".into());
        }
        if self.tolerance.relative < 0.0 || self.tolerance.absolute < 0.0 {
            return invalid("tolerances must be non-negative".into());
        }

        let mut labels = HashSet::new();
        // Column names as the merged table will carry them.
        let mut merged_columns: Vec<String> = Vec::new();
        for vintage in &self.vintages {
            if !labels.insert(vintage.label.as_str()) {
                return invalid(format!("duplicate vintage label '{}'", vintage.label));
            }
            if vintage.fields.is_empty() {
                return invalid(format!("vintage '{}': at least one field is required", vintage.label));
            }

            let mut columns = HashSet::new();
            for field in &vintage.fields {
                let column = field.output_column();
                if !columns.insert(column) {
                    return invalid(format!(
                        "vintage '{}': duplicate output column '{column}'",
                        vintage.label
                    ));
                }
            }
            for field in &vintage.fields {
                let merged = disambiguate(&merged_columns, field.output_column(), &vintage.label)
                    .map_err(|e| ReallocError::ConfigValidation(format!("vintage '{}': {e}", vintage.label)))?;
                merged_columns.push(merged);
            }

            for column in vintage.expected_delta.keys() {
                match vintage.fields.iter().find(|f| f.output_column() == column.as_str()) {
                    None => {
                        return invalid(format!(
                            "vintage '{}': expected_delta names unknown column '{column}'",
                            vintage.label
                        ))
                    }
                    Some(f) if f.kind == AttributeKind::Intensive => {
                        return invalid(format!(
                            "vintage '{}': expected_delta on intensive column '{column}'",
                            vintage.label
                        ))
                    }
                    Some(_) => {}
                }
            }
        }

        // Derived columns may build on each other in declaration order.
        let known = |c: &str, extra: &HashSet<String>| {
            merged_columns.iter().any(|m| m == c) || extra.contains(c)
        };
        let mut derived = HashSet::new();
        for d in &self.derived.densities {
            if !known(d.numerator.as_str(), &derived) {
                return invalid(format!("density '{}': unknown column '{}'", d.column, d.numerator));
            }
            derived.insert(d.column.clone());
        }
        for s in &self.derived.shares {
            for c in [&s.numerator, &s.denominator] {
                if !known(c.as_str(), &derived) {
                    return invalid(format!("share '{}': unknown column '{c}'", s.column));
                }
            }
            derived.insert(s.column.clone());
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
