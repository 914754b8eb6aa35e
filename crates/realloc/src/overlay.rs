use std::collections::HashSet;

use geo::{Area, BooleanOps};
use serde::Serialize;
use tracing::debug;

use crate::error::ReallocError;
use crate::geometry;
use crate::index::EnvelopeIndex;
use crate::model::Layer;

/// One (source, target) pair with positive intersection area.
#[derive(Debug, Clone, Serialize)]
pub struct Overlap {
    pub source: usize,
    pub target: usize,
    pub source_id: String,
    pub target_id: String,
    pub intersection_area: f64,
    /// intersection_area / source area
    pub weight: f64,
}

/// Both layers must carry the same planar CRS. There is no way to opt out.
pub fn check_projection(source: &Layer, target: &Layer) -> Result<(), ReallocError> {
    let (Some(src), Some(tgt)) = (&source.crs, &target.crs) else {
        let missing = if source.crs.is_none() { &source.name } else { &target.name };
        return Err(ReallocError::ProjectionMismatch(format!(
            "layer '{missing}' has no coordinate reference system; cannot verify a common projection"
        )));
    };
    if src != tgt {
        return Err(ReallocError::ProjectionMismatch(format!(
            "layer '{}' is in {src}, layer '{}' is in {tgt}",
            source.name, target.name
        )));
    }
    if src.is_geographic() {
        return Err(ReallocError::ProjectionMismatch(format!(
            "{src} is a geographic (degree) system; reproject both layers to a planar CRS"
        )));
    }
    Ok(())
}

/// Feature ids in layer order. Missing ids and duplicates are fatal.
pub fn layer_ids(layer: &Layer, id_field: &str) -> Result<Vec<String>, ReallocError> {
    let mut seen = HashSet::with_capacity(layer.features.len());
    let mut ids = Vec::with_capacity(layer.features.len());
    for (i, feature) in layer.features.iter().enumerate() {
        let id = feature.get(id_field).as_key().ok_or_else(|| ReallocError::UndefinedValue {
            layer: layer.name.clone(),
            id: format!("#{i}"),
            field: id_field.into(),
        })?;
        if !seen.insert(id.clone()) {
            return Err(ReallocError::DuplicateKey { layer: layer.name.clone(), id });
        }
        ids.push(id);
    }
    Ok(ids)
}

pub(crate) fn validate_layer(layer: &Layer, ids: &[String]) -> Result<(), ReallocError> {
    for (feature, id) in layer.features.iter().zip(ids) {
        geometry::validate(&feature.geometry).map_err(|reason| ReallocError::InvalidGeometry {
            layer: layer.name.clone(),
            id: id.clone(),
            reason,
        })?;
    }
    Ok(())
}

/// Source positions sorted by ascending id. Fixes the accumulation order.
pub(crate) fn source_order(ids: &[String]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..ids.len()).collect();
    order.sort_by(|&a, &b| ids[a].cmp(&ids[b]));
    order
}

/// Overlap weights between every source and target polygon.
///
/// Runs the projection, id and geometry checks first.
pub fn compute_overlaps(
    source: &Layer,
    target: &Layer,
    source_id_field: &str,
    target_id_field: &str,
) -> Result<Vec<Overlap>, ReallocError> {
    check_projection(source, target)?;
    let target_ids = layer_ids(target, target_id_field)?;
    let source_ids = layer_ids(source, source_id_field)?;
    validate_layer(target, &target_ids)?;
    validate_layer(source, &source_ids)?;
    Ok(overlay(source, target, &source_ids, &target_ids))
}

/// Pairwise intersections, sources in ascending id order, targets in layer order.
pub(crate) fn overlay(
    source: &Layer,
    target: &Layer,
    source_ids: &[String],
    target_ids: &[String],
) -> Vec<Overlap> {
    let index = EnvelopeIndex::build(target.features.iter().map(|f| &f.geometry));
    let mut overlaps = Vec::new();
    let mut tested = 0usize;

    for s in source_order(source_ids) {
        let src = &source.features[s].geometry;
        let source_area = src.unsigned_area();
        for t in index.candidates(src) {
            tested += 1;
            let area = src.intersection(&target.features[t].geometry).unsigned_area();
            if area <= 0.0 {
                continue;
            }
            overlaps.push(Overlap {
                source: s,
                target: t,
                source_id: source_ids[s].clone(),
                target_id: target_ids[t].clone(),
                intersection_area: area,
                weight: area / source_area,
            });
        }
    }

    debug!(
        source = %source.name,
        target = %target.name,
        candidates = tested,
        overlaps = overlaps.len(),
        "overlay complete"
    );
    overlaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttrValue, Crs, Feature};
    use geo::{polygon, MultiPolygon};
    use std::collections::BTreeMap;

    fn rect_feature(id: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Feature {
        Feature {
            properties: BTreeMap::from([("id".to_string(), AttrValue::Text(id.into()))]),
            geometry: MultiPolygon(vec![polygon![
                (x: x0, y: y0),
                (x: x1, y: y0),
                (x: x1, y: y1),
                (x: x0, y: y1),
            ]]),
        }
    }

    fn layer(name: &str, crs: Option<&str>, features: Vec<Feature>) -> Layer {
        Layer { name: name.into(), crs: crs.and_then(Crs::parse), features }
    }

    #[test]
    fn projection_must_be_declared() {
        let src = layer("tracts", None, vec![]);
        let tgt = layer("hoods", Some("EPSG:3435"), vec![]);
        let err = check_projection(&src, &tgt).unwrap_err();
        assert!(matches!(err, ReallocError::ProjectionMismatch(_)));
        assert!(err.to_string().contains("tracts"));
    }

    #[test]
    fn projection_must_match() {
        let src = layer("tracts", Some("EPSG:3435"), vec![]);
        let tgt = layer("hoods", Some("EPSG:26916"), vec![]);
        assert!(matches!(
            check_projection(&src, &tgt),
            Err(ReallocError::ProjectionMismatch(_))
        ));
    }

    #[test]
    fn geographic_projection_rejected() {
        let src = layer("tracts", Some("EPSG:4326"), vec![]);
        let tgt = layer("hoods", Some("epsg:4326"), vec![]);
        let err = check_projection(&src, &tgt).unwrap_err();
        assert!(err.to_string().contains("geographic"));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let l = layer(
            "hoods",
            Some("EPSG:3435"),
            vec![rect_feature("A", 0.0, 0.0, 1.0, 1.0), rect_feature("A", 1.0, 0.0, 2.0, 1.0)],
        );
        let err = layer_ids(&l, "id").unwrap_err();
        assert!(matches!(err, ReallocError::DuplicateKey { ref id, .. } if id == "A"));
    }

    #[test]
    fn missing_id_is_undefined() {
        let l = layer("hoods", Some("EPSG:3435"), vec![rect_feature("A", 0.0, 0.0, 1.0, 1.0)]);
        let err = layer_ids(&l, "name").unwrap_err();
        assert!(matches!(err, ReallocError::UndefinedValue { ref field, .. } if field == "name"));
    }

    #[test]
    fn weights_of_split_source_sum_to_one() {
        let src = layer("tracts", Some("EPSG:3435"), vec![rect_feature("t1", 0.0, 0.0, 4.0, 2.0)]);
        let tgt = layer(
            "hoods",
            Some("EPSG:3435"),
            vec![
                rect_feature("W", 0.0, 0.0, 1.0, 2.0),
                rect_feature("E", 1.0, 0.0, 4.0, 2.0),
                rect_feature("FAR", 10.0, 10.0, 11.0, 11.0),
            ],
        );
        let overlaps = compute_overlaps(&src, &tgt, "id", "id").unwrap();
        assert_eq!(overlaps.len(), 2);
        assert_eq!(overlaps[0].target_id, "W");
        assert!((overlaps[0].weight - 0.25).abs() < 1e-12);
        assert!((overlaps[1].weight - 0.75).abs() < 1e-12);
        let total: f64 = overlaps.iter().map(|o| o.weight).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn edge_touching_pairs_are_not_overlaps() {
        let src = layer("tracts", Some("EPSG:3435"), vec![rect_feature("t1", 0.0, 0.0, 1.0, 1.0)]);
        let tgt = layer("hoods", Some("EPSG:3435"), vec![rect_feature("N", 1.0, 0.0, 2.0, 1.0)]);
        assert!(compute_overlaps(&src, &tgt, "id", "id").unwrap().is_empty());
    }

    #[test]
    fn sources_processed_in_id_order() {
        let src = layer(
            "tracts",
            Some("EPSG:3435"),
            vec![rect_feature("b", 1.0, 0.0, 2.0, 1.0), rect_feature("a", 0.0, 0.0, 1.0, 1.0)],
        );
        let tgt = layer("hoods", Some("EPSG:3435"), vec![rect_feature("H", 0.0, 0.0, 2.0, 1.0)]);
        let overlaps = compute_overlaps(&src, &tgt, "id", "id").unwrap();
        let order: Vec<&str> = overlaps.iter().map(|o| o.source_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
    }
}
