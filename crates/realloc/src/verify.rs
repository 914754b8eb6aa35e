use serde::{Deserialize, Serialize};

use crate::error::ReallocError;
use crate::model::{AttrValue, AttributeKind, FieldSpec, Layer, VintageTable};
use crate::reallocate::MissingValuePolicy;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    #[serde(default = "default_relative")]
    pub relative: f64,
    #[serde(default = "default_absolute")]
    pub absolute: f64,
}

fn default_relative() -> f64 {
    1e-6
}

fn default_absolute() -> f64 {
    1e-9
}

impl Default for Tolerance {
    fn default() -> Self {
        Self { relative: default_relative(), absolute: default_absolute() }
    }
}

impl Tolerance {
    /// `|a - b| <= max(absolute, relative * |scale|)`
    pub fn accepts(&self, a: f64, b: f64, scale: f64) -> bool {
        (a - b).abs() <= self.absolute.max(self.relative * scale.abs())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    pub tolerance: Tolerance,
    pub missing: MissingValuePolicy,
}

/// Outcome of a conservation check.
///
/// `delta = source_total - reallocated_total`: positive means mass was lost,
/// typically source area that falls outside every target polygon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConservationCheck {
    pub source_total: f64,
    pub reallocated_total: f64,
    pub delta: f64,
    pub conserved: bool,
}

impl ConservationCheck {
    /// Whether the observed delta matches an expected delta within tolerance.
    pub fn matches(&self, expected_delta: f64, tolerance: &Tolerance) -> bool {
        tolerance.accepts(self.delta, expected_delta, self.source_total)
    }

    /// Add counts that never reached the source layer (attribute rows with no
    /// tract geometry) to the source total. They can only show up as loss.
    pub fn with_unplaced(self, unplaced: f64, tolerance: &Tolerance) -> Self {
        let source_total = self.source_total + unplaced;
        let delta = source_total - self.reallocated_total;
        Self {
            source_total,
            reallocated_total: self.reallocated_total,
            delta,
            conserved: tolerance.accepts(delta, 0.0, source_total),
        }
    }

    /// Fail with `ConservationMismatch` unless the delta is the expected one.
    pub fn expect(
        &self,
        label: &str,
        field: &str,
        expected_delta: f64,
        tolerance: &Tolerance,
    ) -> Result<(), ReallocError> {
        if self.matches(expected_delta, tolerance) {
            return Ok(());
        }
        Err(ReallocError::ConservationMismatch {
            label: label.into(),
            field: field.into(),
            expected: expected_delta,
            actual: self.delta,
        })
    }
}

/// Compare the source total of `source_value_field` with the reallocated total
/// in `result_value_field`. Null result cells count as zero.
pub fn verify(
    source: &Layer,
    source_value_field: &str,
    result: &VintageTable,
    result_value_field: &str,
    options: &VerifyOptions,
) -> Result<ConservationCheck, ReallocError> {
    let col = result.column_index(result_value_field).ok_or_else(|| ReallocError::UnknownField {
        table: result.label.clone(),
        field: result_value_field.into(),
    })?;

    let mut source_total = 0.0;
    for (i, feature) in source.features.iter().enumerate() {
        source_total += match (feature.get(source_value_field), options.missing) {
            (AttrValue::Number(n), _) => *n,
            (_, MissingValuePolicy::Zero) => 0.0,
            (_, MissingValuePolicy::Reject) => {
                return Err(ReallocError::UndefinedValue {
                    layer: source.name.clone(),
                    id: format!("#{i}"),
                    field: source_value_field.into(),
                })
            }
        };
    }

    let reallocated_total: f64 = result.rows.iter().filter_map(|r| r.values[col]).sum();
    let delta = source_total - reallocated_total;

    Ok(ConservationCheck {
        source_total,
        reallocated_total,
        delta,
        conserved: options.tolerance.accepts(delta, 0.0, source_total),
    })
}

/// Conservation check for a configured field. Intensive fields have no total
/// to conserve and are rejected.
pub fn verify_field(
    source: &Layer,
    field: &FieldSpec,
    result: &VintageTable,
    options: &VerifyOptions,
) -> Result<ConservationCheck, ReallocError> {
    if field.kind == AttributeKind::Intensive {
        return Err(ReallocError::IntensiveAttribute(field.name.clone()));
    }
    verify(source, &field.name, result, field.output_column(), options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Feature, TableRow};
    use geo::MultiPolygon;
    use std::collections::BTreeMap;

    fn source(values: &[AttrValue]) -> Layer {
        Layer {
            name: "tracts".into(),
            crs: None,
            features: values
                .iter()
                .map(|v| Feature {
                    properties: BTreeMap::from([("pop".to_string(), v.clone())]),
                    geometry: MultiPolygon(vec![]),
                })
                .collect(),
        }
    }

    fn result(values: &[Option<f64>]) -> VintageTable {
        VintageTable {
            label: "2000".into(),
            id_field: "hood".into(),
            columns: vec!["pop00".into()],
            rows: values
                .iter()
                .enumerate()
                .map(|(i, v)| TableRow { id: format!("h{i}"), values: vec![*v] })
                .collect(),
        }
    }

    #[test]
    fn conserved_within_tolerance() {
        let src = source(&[AttrValue::Number(100.0), AttrValue::Number(50.0)]);
        let res = result(&[Some(75.0), Some(74.99999999), None]);
        let check = verify(&src, "pop", &res, "pop00", &VerifyOptions::default()).unwrap();
        assert!(check.conserved);
        assert!(check.delta.abs() < 1e-6);
    }

    #[test]
    fn lost_mass_is_positive_delta() {
        let src = source(&[AttrValue::Number(1000.0)]);
        let res = result(&[Some(900.0)]);
        let check = verify(&src, "pop", &res, "pop00", &VerifyOptions::default()).unwrap();
        assert!(!check.conserved);
        assert!((check.delta - 100.0).abs() < 1e-9);
        assert!(check.matches(100.0, &Tolerance::default()));
        assert!(check.expect("2000", "pop00", 0.0, &Tolerance::default()).is_err());
        assert!(check.expect("2000", "pop00", 100.0, &Tolerance::default()).is_ok());
    }

    #[test]
    fn expected_delta_is_not_generalized() {
        // A run expected to lose exactly 12 people fails if it loses 13.
        let src = source(&[AttrValue::Number(1012.0)]);
        let res = result(&[Some(999.0)]);
        let check = verify(&src, "pop", &res, "pop00", &VerifyOptions::default()).unwrap();
        let err = check.expect("1990", "pop90", 12.0, &Tolerance::default()).unwrap_err();
        match err {
            ReallocError::ConservationMismatch { expected, actual, .. } => {
                assert_eq!(expected, 12.0);
                assert!((actual - 13.0).abs() < 1e-9);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unplaced_counts_become_loss() {
        let src = source(&[AttrValue::Number(100.0)]);
        let res = result(&[Some(100.0)]);
        let check = verify(&src, "pop", &res, "pop00", &VerifyOptions::default()).unwrap();
        assert!(check.conserved);

        let check = check.with_unplaced(12.0, &Tolerance::default());
        assert_eq!(check.source_total, 112.0);
        assert_eq!(check.reallocated_total, 100.0);
        assert!((check.delta - 12.0).abs() < 1e-9);
        assert!(!check.conserved);
        assert!(check.matches(12.0, &Tolerance::default()));
    }

    #[test]
    fn missing_source_value_respects_policy() {
        let src = source(&[AttrValue::Number(10.0), AttrValue::Null]);
        let res = result(&[Some(10.0)]);
        let err = verify(&src, "pop", &res, "pop00", &VerifyOptions::default()).unwrap_err();
        assert!(matches!(err, ReallocError::UndefinedValue { ref id, .. } if id == "#1"));

        let opts = VerifyOptions { missing: MissingValuePolicy::Zero, ..Default::default() };
        assert!(verify(&src, "pop", &res, "pop00", &opts).unwrap().conserved);
    }

    #[test]
    fn unknown_result_column() {
        let src = source(&[AttrValue::Number(1.0)]);
        let res = result(&[Some(1.0)]);
        let err = verify(&src, "pop", &res, "pop90", &VerifyOptions::default()).unwrap_err();
        assert!(matches!(err, ReallocError::UnknownField { .. }));
    }

    #[test]
    fn intensive_fields_cannot_be_verified() {
        let src = source(&[AttrValue::Number(1.0)]);
        let res = result(&[Some(1.0)]);
        let field = FieldSpec::intensive("pop").renamed("pop00");
        let err = verify_field(&src, &field, &res, &VerifyOptions::default()).unwrap_err();
        assert!(matches!(err, ReallocError::IntensiveAttribute(_)));
    }

    #[test]
    fn tolerance_scales_with_total() {
        let tol = Tolerance { relative: 1e-3, absolute: 0.0 };
        assert!(tol.accepts(1000.5, 1000.0, 1000.0));
        assert!(!tol.accepts(1002.0, 1000.0, 1000.0));
    }
}
