use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Area, BooleanOps, BoundingRect, Coord, Intersects, LineString, MultiPolygon, Polygon};

/// Build a polygon from raw GeoJSON-style rings, checking closure on the raw
/// coordinates (geo closes rings silently on construction).
pub fn polygon_from_rings(rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>, String> {
    let mut line_strings = Vec::with_capacity(rings.len());
    for (ri, ring) in rings.iter().enumerate() {
        if ring.len() < 4 {
            return Err(format!("ring {ri} has {} positions, need at least 4", ring.len()));
        }
        let mut coords = Vec::with_capacity(ring.len());
        for pos in ring {
            if pos.len() < 2 {
                return Err(format!("ring {ri} has a position with fewer than 2 ordinates"));
            }
            coords.push(Coord { x: pos[0], y: pos[1] });
        }
        if coords.first() != coords.last() {
            return Err(format!("ring {ri} is not closed"));
        }
        line_strings.push(LineString::new(coords));
    }
    let mut iter = line_strings.into_iter();
    let exterior = iter.next().ok_or_else(|| "polygon has no rings".to_string())?;
    Ok(Polygon::new(exterior, iter.collect()))
}

/// Validate a (multi)polygon before it participates in any area computation.
pub fn validate(geometry: &MultiPolygon<f64>) -> Result<(), String> {
    if geometry.0.is_empty() {
        return Err("empty geometry".into());
    }
    for (pi, polygon) in geometry.0.iter().enumerate() {
        let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors());
        for (ri, ring) in rings.enumerate() {
            if ring.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
                return Err(format!("polygon {pi}, ring {ri}: non-finite coordinate"));
            }
            if ring.0.len() < 4 {
                return Err(format!("polygon {pi}, ring {ri}: fewer than 4 positions"));
            }
            if let Some(at) = self_intersection(ring) {
                return Err(format!(
                    "polygon {pi}, ring {ri}: self-intersection near ({}, {})",
                    at.x, at.y
                ));
            }
        }
        if polygon.unsigned_area() <= 0.0 {
            return Err(format!("polygon {pi}: zero area"));
        }
        validate_rings(polygon).map_err(|reason| format!("polygon {pi}: {reason}"))?;
    }

    for (a, first) in geometry.0.iter().enumerate() {
        for (b, second) in geometry.0.iter().enumerate().skip(a + 1) {
            if !envelopes_meet(first, second) {
                continue;
            }
            if let Some(at) = boundary_crossing(first.exterior(), second.exterior()) {
                return Err(format!("polygons {a} and {b} cross near ({}, {})", at.x, at.y));
            }
            if overlaps(first, second) {
                return Err(format!("polygons {a} and {b} overlap"));
            }
        }
    }
    Ok(())
}

/// Rings of one polygon may touch at points only, and every hole must lie
/// inside the exterior without overlapping another hole.
fn validate_rings(polygon: &Polygon<f64>) -> Result<(), String> {
    let rings: Vec<&LineString<f64>> =
        std::iter::once(polygon.exterior()).chain(polygon.interiors()).collect();
    for a in 0..rings.len() {
        for b in (a + 1)..rings.len() {
            if let Some(at) = boundary_crossing(rings[a], rings[b]) {
                return Err(format!("rings {a} and {b} cross near ({}, {})", at.x, at.y));
            }
        }
    }

    let shell = Polygon::new(polygon.exterior().clone(), vec![]);
    let holes: Vec<Polygon<f64>> =
        polygon.interiors().iter().map(|r| Polygon::new(r.clone(), vec![])).collect();
    for (hi, hole) in holes.iter().enumerate() {
        let inside = shell.intersection(hole).unsigned_area();
        if inside < hole.unsigned_area() * (1.0 - AREA_EPSILON) {
            return Err(format!("hole {} lies outside the exterior ring", hi + 1));
        }
        for (hj, other) in holes.iter().enumerate().skip(hi + 1) {
            if overlaps(hole, other) {
                return Err(format!("holes {} and {} overlap", hi + 1, hj + 1));
            }
        }
    }
    Ok(())
}

const AREA_EPSILON: f64 = 1e-9;

/// Interiors share positive area.
fn overlaps(a: &Polygon<f64>, b: &Polygon<f64>) -> bool {
    if !envelopes_meet(a, b) {
        return false;
    }
    let scale = a.unsigned_area().min(b.unsigned_area());
    a.intersection(b).unsigned_area() > scale * AREA_EPSILON
}

fn envelopes_meet(a: &Polygon<f64>, b: &Polygon<f64>) -> bool {
    match (a.bounding_rect(), b.bounding_rect()) {
        (Some(ra), Some(rb)) => ra.intersects(&rb),
        _ => false,
    }
}

/// First point where two distinct rings cross or run along each other.
/// Touching at a single vertex is allowed.
fn boundary_crossing(a: &LineString<f64>, b: &LineString<f64>) -> Option<Coord<f64>> {
    for sa in a.lines() {
        for sb in b.lines() {
            match line_intersection(sa, sb) {
                Some(LineIntersection::SinglePoint { intersection, is_proper: true }) => {
                    return Some(intersection)
                }
                Some(LineIntersection::Collinear { intersection })
                    if intersection.start != intersection.end =>
                {
                    return Some(intersection.start)
                }
                _ => {}
            }
        }
    }
    None
}

/// First point where two non-adjacent segments of a closed ring touch.
fn self_intersection(ring: &LineString<f64>) -> Option<Coord<f64>> {
    let segments: Vec<_> = ring.lines().filter(|l| l.start != l.end).collect();
    let n = segments.len();
    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if adjacent {
                continue;
            }
            if let Some(hit) = line_intersection(segments[i], segments[j]) {
                let at = match hit {
                    LineIntersection::SinglePoint { intersection, .. } => intersection,
                    LineIntersection::Collinear { intersection } => intersection.start,
                };
                return Some(at);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(points: &[(f64, f64)]) -> Vec<Vec<f64>> {
        points.iter().map(|&(x, y)| vec![x, y]).collect()
    }

    fn square() -> Vec<Vec<f64>> {
        ring(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)])
    }

    #[test]
    fn valid_square() {
        let poly = polygon_from_rings(&[square()]).unwrap();
        assert!(validate(&MultiPolygon(vec![poly])).is_ok());
    }

    #[test]
    fn unclosed_ring_rejected() {
        let short = ring(&[(0.0, 0.0), (1.0, 0.0), (0.0, 0.0)]);
        let err = polygon_from_rings(&[short]).unwrap_err();
        assert!(err.contains("need at least 4"), "{err}");

        let open = ring(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.5)]);
        let err = polygon_from_rings(&[open]).unwrap_err();
        assert!(err.contains("not closed"));
    }

    #[test]
    fn bowtie_rejected() {
        let bowtie = ring(&[(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]);
        let poly = polygon_from_rings(&[bowtie]).unwrap();
        let err = validate(&MultiPolygon(vec![poly])).unwrap_err();
        assert!(err.contains("self-intersection"), "{err}");
    }

    #[test]
    fn empty_geometry_rejected() {
        let err = validate(&MultiPolygon(vec![])).unwrap_err();
        assert_eq!(err, "empty geometry");
    }

    #[test]
    fn collapsed_polygon_rejected() {
        let flat = ring(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 0.0)]);
        let poly = polygon_from_rings(&[flat]).unwrap();
        assert!(validate(&MultiPolygon(vec![poly])).is_err());
    }

    fn multi(parts: Vec<Vec<Vec<Vec<f64>>>>) -> MultiPolygon<f64> {
        MultiPolygon(parts.iter().map(|rings| polygon_from_rings(rings).unwrap()).collect())
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Vec<f64>> {
        ring(&[(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)])
    }

    #[test]
    fn overlapping_parts_rejected() {
        let err = validate(&multi(vec![vec![rect(0.0, 0.0, 2.0, 2.0)], vec![rect(1.0, 1.0, 3.0, 3.0)]]))
            .unwrap_err();
        assert!(err.contains("polygons 0 and 1"), "{err}");
    }

    #[test]
    fn nested_parts_rejected() {
        // No boundary crossing, but the second part lies inside the first.
        let err = validate(&multi(vec![vec![rect(0.0, 0.0, 4.0, 4.0)], vec![rect(1.0, 1.0, 2.0, 2.0)]]))
            .unwrap_err();
        assert!(err.contains("overlap"), "{err}");
    }

    #[test]
    fn parts_sharing_an_edge_rejected() {
        let err = validate(&multi(vec![vec![rect(0.0, 0.0, 1.0, 1.0)], vec![rect(1.0, 0.0, 2.0, 1.0)]]))
            .unwrap_err();
        assert!(err.contains("cross"), "{err}");
    }

    #[test]
    fn parts_touching_at_a_corner_are_valid() {
        let geometry = multi(vec![vec![rect(0.0, 0.0, 1.0, 1.0)], vec![rect(1.0, 1.0, 2.0, 2.0)]]);
        assert!(validate(&geometry).is_ok());
    }

    #[test]
    fn part_inside_a_hole_is_valid() {
        let geometry = multi(vec![
            vec![rect(0.0, 0.0, 6.0, 6.0), rect(1.0, 1.0, 5.0, 5.0)],
            vec![rect(2.0, 2.0, 3.0, 3.0)],
        ]);
        assert!(validate(&geometry).is_ok());
    }

    #[test]
    fn hole_crossing_exterior_rejected() {
        let err = validate(&multi(vec![vec![rect(0.0, 0.0, 4.0, 4.0), rect(3.0, 1.0, 5.0, 2.0)]]))
            .unwrap_err();
        assert!(err.contains("rings 0 and 1 cross"), "{err}");
    }

    #[test]
    fn hole_outside_exterior_rejected() {
        let err = validate(&multi(vec![vec![rect(0.0, 0.0, 4.0, 4.0), rect(5.0, 5.0, 6.0, 6.0)]]))
            .unwrap_err();
        assert!(err.contains("hole 1 lies outside"), "{err}");
    }

    #[test]
    fn overlapping_holes_rejected() {
        let err = validate(&multi(vec![vec![
            rect(0.0, 0.0, 10.0, 10.0),
            rect(1.0, 1.0, 4.0, 4.0),
            rect(2.0, 2.0, 5.0, 5.0),
        ]]))
        .unwrap_err();
        assert!(err.contains("rings 1 and 2 cross"), "{err}");
    }

    #[test]
    fn polygon_with_hole_is_valid() {
        let outer = ring(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]);
        let hole = ring(&[(1.0, 1.0), (1.0, 2.0), (2.0, 2.0), (2.0, 1.0), (1.0, 1.0)]);
        let poly = polygon_from_rings(&[outer, hole]).unwrap();
        assert!(validate(&MultiPolygon(vec![poly])).is_ok());
    }
}
