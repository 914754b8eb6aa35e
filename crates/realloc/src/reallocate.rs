use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ReallocError;
use crate::model::{AttrValue, AttributeKind, FieldSpec, Layer, TableRow, VintageTable};
use crate::overlay::{check_projection, layer_ids, overlay, validate_layer};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// What to do with a missing or non-numeric attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingValuePolicy {
    #[default]
    Reject,
    /// Coerce to zero. Only ever applied when configured explicitly.
    Zero,
}

/// Value emitted for targets that no source polygon overlaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyTargetFill {
    #[default]
    Zero,
    Null,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReallocOptions {
    pub missing: MissingValuePolicy,
    pub empty_target: EmptyTargetFill,
}

#[derive(Debug, Clone)]
pub struct ReallocRequest {
    pub label: String,
    pub source_id_field: String,
    pub target_id_field: String,
    pub fields: Vec<FieldSpec>,
    pub options: ReallocOptions,
}

// ---------------------------------------------------------------------------
// Value extraction
// ---------------------------------------------------------------------------

/// Numeric value of `field` on every source feature, per the missing-value policy.
pub(crate) fn field_values(
    layer: &Layer,
    ids: &[String],
    field: &FieldSpec,
    missing: MissingValuePolicy,
) -> Result<Vec<f64>, ReallocError> {
    let mut values = Vec::with_capacity(layer.features.len());
    for (feature, id) in layer.features.iter().zip(ids) {
        let value = match (feature.get(&field.name), missing) {
            (AttrValue::Number(n), _) => *n,
            (_, MissingValuePolicy::Zero) => 0.0,
            (_, MissingValuePolicy::Reject) => {
                return Err(ReallocError::UndefinedValue {
                    layer: layer.name.clone(),
                    id: id.clone(),
                    field: field.name.clone(),
                })
            }
        };
        if field.kind == AttributeKind::Extensive && value < 0.0 {
            return Err(ReallocError::NegativeValue {
                layer: layer.name.clone(),
                id: id.clone(),
                field: field.name.clone(),
                value,
            });
        }
        values.push(value);
    }
    Ok(values)
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Reallocate every requested field from `source` onto `target`.
///
/// Every check (projection, ids, values, geometry) runs before the first
/// intersection. Nothing partial is returned on failure.
pub fn run(
    source: &Layer,
    target: &Layer,
    request: &ReallocRequest,
) -> Result<VintageTable, ReallocError> {
    check_projection(source, target)?;

    let target_ids = layer_ids(target, &request.target_id_field)?;
    let source_ids = layer_ids(source, &request.source_id_field)?;

    let mut columns = Vec::with_capacity(request.fields.len());
    let mut seen = HashSet::new();
    for field in &request.fields {
        let column = field.output_column().to_string();
        if !seen.insert(column.clone()) {
            return Err(ReallocError::DuplicateColumn(column));
        }
        columns.push(column);
    }

    let values: Vec<Vec<f64>> = request
        .fields
        .iter()
        .map(|f| field_values(source, &source_ids, f, request.options.missing))
        .collect::<Result<_, _>>()?;

    validate_layer(target, &target_ids)?;
    validate_layer(source, &source_ids)?;

    let overlaps = overlay(source, target, &source_ids, &target_ids);

    // Per target: weighted sums, plus covered area for intensive means.
    let n_targets = target.features.len();
    let mut sums = vec![vec![0.0f64; request.fields.len()]; n_targets];
    let mut covered = vec![0.0f64; n_targets];
    let mut touched = vec![false; n_targets];

    for o in &overlaps {
        touched[o.target] = true;
        covered[o.target] += o.intersection_area;
        for (fi, field) in request.fields.iter().enumerate() {
            let v = values[fi][o.source];
            sums[o.target][fi] += match field.kind {
                AttributeKind::Extensive => v * o.weight,
                AttributeKind::Intensive => v * o.intersection_area,
            };
        }
    }

    let rows = target_ids
        .into_iter()
        .enumerate()
        .map(|(t, id)| {
            let values = request
                .fields
                .iter()
                .enumerate()
                .map(|(fi, field)| {
                    if !touched[t] {
                        return match request.options.empty_target {
                            EmptyTargetFill::Zero => Some(0.0),
                            EmptyTargetFill::Null => None,
                        };
                    }
                    Some(match field.kind {
                        AttributeKind::Extensive => sums[t][fi],
                        AttributeKind::Intensive => sums[t][fi] / covered[t],
                    })
                })
                .collect();
            TableRow { id, values }
        })
        .collect();

    debug!(
        label = %request.label,
        sources = source.features.len(),
        targets = n_targets,
        overlaps = overlaps.len(),
        empty_targets = touched.iter().filter(|t| !**t).count(),
        "reallocated"
    );

    Ok(VintageTable {
        label: request.label.clone(),
        id_field: request.target_id_field.clone(),
        columns,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Crs, Feature};
    use geo::{polygon, MultiPolygon};
    use std::collections::BTreeMap;

    fn feature(id: &str, attrs: &[(&str, AttrValue)], rect: (f64, f64, f64, f64)) -> Feature {
        let (x0, y0, x1, y1) = rect;
        let mut properties = BTreeMap::from([("id".to_string(), AttrValue::Text(id.into()))]);
        for (k, v) in attrs {
            properties.insert(k.to_string(), v.clone());
        }
        Feature {
            properties,
            geometry: MultiPolygon(vec![polygon![
                (x: x0, y: y0),
                (x: x1, y: y0),
                (x: x1, y: y1),
                (x: x0, y: y1),
            ]]),
        }
    }

    fn layer(name: &str, features: Vec<Feature>) -> Layer {
        Layer { name: name.into(), crs: Crs::parse("EPSG:3435"), features }
    }

    fn request(fields: Vec<FieldSpec>) -> ReallocRequest {
        ReallocRequest {
            label: "1990".into(),
            source_id_field: "id".into(),
            target_id_field: "id".into(),
            fields,
            options: ReallocOptions::default(),
        }
    }

    fn pop(n: f64) -> (&'static str, AttrValue) {
        ("pop", AttrValue::Number(n))
    }

    #[test]
    fn contained_source_moves_whole_value() {
        let src = layer("tracts", vec![feature("t1", &[pop(1234.0)], (1.0, 1.0, 2.0, 2.0))]);
        let tgt = layer("hoods", vec![feature("H", &[], (0.0, 0.0, 10.0, 10.0))]);
        let table = run(&src, &tgt, &request(vec![FieldSpec::extensive("pop")])).unwrap();
        assert_eq!(table.value("H", "pop"), Some(1234.0));
    }

    #[test]
    fn halved_source_splits_value() {
        let src = layer("tracts", vec![feature("t1", &[pop(100.0)], (0.0, 0.0, 2.0, 1.0))]);
        let tgt = layer(
            "hoods",
            vec![
                feature("W", &[], (0.0, 0.0, 1.0, 1.0)),
                feature("E", &[], (1.0, 0.0, 2.0, 1.0)),
            ],
        );
        let table = run(&src, &tgt, &request(vec![FieldSpec::extensive("pop")])).unwrap();
        assert!((table.value("W", "pop").unwrap() - 50.0).abs() < 1e-9);
        assert!((table.value("E", "pop").unwrap() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn empty_targets_are_emitted_not_omitted() {
        let src = layer("tracts", vec![feature("t1", &[pop(10.0)], (0.0, 0.0, 1.0, 1.0))]);
        let tgt = layer(
            "hoods",
            vec![
                feature("A", &[], (0.0, 0.0, 1.0, 1.0)),
                feature("B", &[], (5.0, 5.0, 6.0, 6.0)),
            ],
        );
        let table = run(&src, &tgt, &request(vec![FieldSpec::extensive("pop")])).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.value("B", "pop"), Some(0.0));

        let mut req = request(vec![FieldSpec::extensive("pop")]);
        req.options.empty_target = EmptyTargetFill::Null;
        let table = run(&src, &tgt, &req).unwrap();
        assert_eq!(table.rows[1].id, "B");
        assert_eq!(table.rows[1].values, vec![None]);
    }

    #[test]
    fn duplicate_target_rejected_before_geometry_work() {
        // The source geometry is invalid: a duplicate key must still be reported first.
        let mut bad = feature("t1", &[pop(1.0)], (0.0, 0.0, 1.0, 1.0));
        bad.geometry = MultiPolygon(vec![]);
        let src = layer("tracts", vec![bad]);
        let tgt = layer(
            "hoods",
            vec![feature("A", &[], (0.0, 0.0, 1.0, 1.0)), feature("A", &[], (1.0, 0.0, 2.0, 1.0))],
        );
        let err = run(&src, &tgt, &request(vec![FieldSpec::extensive("pop")])).unwrap_err();
        assert!(matches!(err, ReallocError::DuplicateKey { ref layer, .. } if layer == "hoods"));
    }

    #[test]
    fn missing_value_rejected_or_zeroed() {
        let src = layer(
            "tracts",
            vec![
                feature("t1", &[pop(10.0)], (0.0, 0.0, 1.0, 1.0)),
                feature("t2", &[("pop", AttrValue::Null)], (1.0, 0.0, 2.0, 1.0)),
            ],
        );
        let tgt = layer("hoods", vec![feature("H", &[], (0.0, 0.0, 2.0, 1.0))]);

        let err = run(&src, &tgt, &request(vec![FieldSpec::extensive("pop")])).unwrap_err();
        assert!(matches!(err, ReallocError::UndefinedValue { ref id, .. } if id == "t2"));

        let mut req = request(vec![FieldSpec::extensive("pop")]);
        req.options.missing = MissingValuePolicy::Zero;
        let table = run(&src, &tgt, &req).unwrap();
        assert!((table.value("H", "pop").unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn non_numeric_value_is_undefined() {
        let src = layer(
            "tracts",
            vec![feature("t1", &[("pop", AttrValue::Text("n/a".into()))], (0.0, 0.0, 1.0, 1.0))],
        );
        let tgt = layer("hoods", vec![feature("H", &[], (0.0, 0.0, 1.0, 1.0))]);
        let err = run(&src, &tgt, &request(vec![FieldSpec::extensive("pop")])).unwrap_err();
        assert!(matches!(err, ReallocError::UndefinedValue { .. }));
    }

    #[test]
    fn negative_extensive_value_rejected() {
        let src = layer("tracts", vec![feature("t1", &[pop(-3.0)], (0.0, 0.0, 1.0, 1.0))]);
        let tgt = layer("hoods", vec![feature("H", &[], (0.0, 0.0, 1.0, 1.0))]);
        let err = run(&src, &tgt, &request(vec![FieldSpec::extensive("pop")])).unwrap_err();
        assert!(matches!(err, ReallocError::NegativeValue { value, .. } if value == -3.0));
    }

    #[test]
    fn invalid_geometry_names_feature() {
        let mut bad = feature("t9", &[pop(1.0)], (0.0, 0.0, 1.0, 1.0));
        bad.geometry = MultiPolygon(vec![]);
        let src = layer("tracts", vec![bad]);
        let tgt = layer("hoods", vec![feature("H", &[], (0.0, 0.0, 1.0, 1.0))]);
        let err = run(&src, &tgt, &request(vec![FieldSpec::extensive("pop")])).unwrap_err();
        assert!(matches!(err, ReallocError::InvalidGeometry { ref id, .. } if id == "t9"));
    }

    #[test]
    fn intensive_field_is_area_weighted_mean() {
        // Target half covered by a 10% tract, half by a 30% tract.
        let src = layer(
            "tracts",
            vec![
                feature("a", &[("rate", AttrValue::Number(10.0))], (0.0, 0.0, 1.0, 1.0)),
                feature("b", &[("rate", AttrValue::Number(30.0))], (1.0, 0.0, 3.0, 1.0)),
            ],
        );
        let tgt = layer("hoods", vec![feature("H", &[], (0.0, 0.0, 2.0, 1.0))]);
        let table = run(&src, &tgt, &request(vec![FieldSpec::intensive("rate")])).unwrap();
        assert!((table.value("H", "rate").unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn renamed_columns_must_be_unique() {
        let src = layer("tracts", vec![feature("t1", &[pop(1.0)], (0.0, 0.0, 1.0, 1.0))]);
        let tgt = layer("hoods", vec![feature("H", &[], (0.0, 0.0, 1.0, 1.0))]);
        let fields = vec![FieldSpec::extensive("pop"), FieldSpec::extensive("id").renamed("pop")];
        let err = run(&src, &tgt, &request(fields)).unwrap_err();
        assert!(matches!(err, ReallocError::DuplicateColumn(ref c) if c == "pop"));
    }
}
